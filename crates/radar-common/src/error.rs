//! Error types for the radar composite pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using RadarError.
pub type RadarResult<T> = Result<T, RadarError>;

/// Coarse classification of an error, used by the retry wrapper to decide
/// whether another attempt can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Network,
    Timeout,
    Processing,
    /// A source answered but had nothing fresh to offer
    NoData,
    Cache,
    Storage,
    Merge,
    Config,
    Internal,
}

impl ErrorKind {
    /// Transient kinds are the ones where a later attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Processing => "processing",
            ErrorKind::NoData => "no_data",
            ErrorKind::Cache => "cache",
            ErrorKind::Storage => "storage",
            ErrorKind::Merge => "merge",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary error type for radar pipeline operations.
#[derive(Debug, Error)]
pub enum RadarError {
    // === Validation Errors ===
    #[error("Invalid source name: '{name}'. {reason}")]
    InvalidSourceName { name: String, reason: String },

    #[error("Grid dimensions must be positive: {height}x{width}")]
    NonPositiveDimensions { height: i64, width: i64 },

    #[error("Grid dimensions exceed maximum ({max}): {height}x{width} ({dimension} too large)")]
    DimensionsExceedMaximum {
        dimension: &'static str,
        max: usize,
        height: i64,
        width: i64,
    },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    // === Network Errors ===
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    // === Data Errors ===
    #[error("Failed to process radar file: {0}")]
    Processing(String),

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("No usable data: {0}")]
    NoData(String),

    // === Merge Errors ===
    #[error("Frame shape mismatch for '{source_name}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        source_name: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Frame extent mismatch for '{0}': frames in one merge must share a target grid")]
    ExtentMismatch(String),

    #[error("Source '{0}' contributed more than one frame to a merge")]
    DuplicateSource(String),

    // === Storage Errors ===
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // === Infrastructure Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RadarError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RadarError::InvalidSourceName { .. }
            | RadarError::NonPositiveDimensions { .. }
            | RadarError::DimensionsExceedMaximum { .. }
            | RadarError::InvalidTimestamp(_) => ErrorKind::Validation,
            RadarError::Network(_) => ErrorKind::Network,
            RadarError::Timeout(_) => ErrorKind::Timeout,
            RadarError::Processing(_) | RadarError::Projection(_) => ErrorKind::Processing,
            RadarError::NoData(_) => ErrorKind::NoData,
            RadarError::ShapeMismatch { .. }
            | RadarError::ExtentMismatch(_)
            | RadarError::DuplicateSource(_) => ErrorKind::Merge,
            RadarError::Cache(_) => ErrorKind::Cache,
            RadarError::Storage(_) => ErrorKind::Storage,
            RadarError::Config(_) => ErrorKind::Config,
            RadarError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }

    pub fn processing(msg: impl Into<String>) -> Self {
        Self::Processing(msg.into())
    }

    pub fn no_data(msg: impl Into<String>) -> Self {
        Self::NoData(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }
}

impl From<std::io::Error> for RadarError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => RadarError::Timeout(err.to_string()),
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => RadarError::Network(err.to_string()),
            _ => RadarError::Storage(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RadarError {
    fn from(err: serde_json::Error) -> Self {
        RadarError::Processing(format!("JSON error: {}", err))
    }
}
