//! Gridded radar frames at each stage of the pipeline.
//!
//! Grids are stored row-major (top row first) as `f32`. From
//! [`ReprojectedFrame`] onwards, missing data is always `NaN`; native
//! sentinels only exist on [`RadarFrame`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::bbox::BoundingBox;
use crate::crs::CrsCode;
use crate::error::{RadarError, RadarResult};
use crate::validation::{validate_grid_dimensions, validate_source_name};

/// Spatial placement of a grid: its CRS and outer bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridExtent {
    pub crs: CrsCode,
    pub bbox: BoundingBox,
}

impl GridExtent {
    pub fn new(crs: CrsCode, bbox: BoundingBox) -> Self {
        Self { crs, bbox }
    }
}

/// A decoded radar grid in its native projection, as produced by a source
/// adapter.
#[derive(Debug, Clone)]
pub struct RadarFrame {
    pub source: String,
    pub product: String,
    /// UTC, compact numeric (`YYYYMMDDHHMM` or `YYYYMMDDHHMMSS`)
    pub timestamp: String,
    pub data: Vec<f32>,
    /// Native "no measurement" marker; `None` when the source already uses NaN
    pub nodata: Option<f32>,
    pub native_extent: GridExtent,
    pub height: usize,
    pub width: usize,
}

impl RadarFrame {
    /// Build a frame, validating the source name and grid shape.
    pub fn new(
        source: &str,
        product: impl Into<String>,
        timestamp: impl Into<String>,
        data: Vec<f32>,
        nodata: Option<f32>,
        native_extent: GridExtent,
        dimensions: (i64, i64),
    ) -> RadarResult<Self> {
        let source = validate_source_name(source)?;
        let (height, width) = validate_grid_dimensions(dimensions.0, dimensions.1)?;

        if data.len() != height * width {
            return Err(RadarError::processing(format!(
                "grid has {} values, expected {}x{} = {}",
                data.len(),
                height,
                width,
                height * width
            )));
        }

        Ok(Self {
            source,
            product: product.into(),
            timestamp: timestamp.into(),
            data,
            nodata,
            native_extent,
            height,
            width,
        })
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Whether a value is missing under this frame's nodata convention.
    pub fn is_nodata(&self, value: f32) -> bool {
        value.is_nan() || self.nodata.is_some_and(|nd| value == nd)
    }

    /// Value at (row, col) with nodata mapped to NaN.
    pub fn value(&self, row: usize, col: usize) -> f32 {
        if row >= self.height || col >= self.width {
            return f32::NAN;
        }
        let v = self.data[row * self.width + col];
        if self.is_nodata(v) {
            f32::NAN
        } else {
            v
        }
    }

    /// Overwrite the timestamp, e.g. with a synchronization bucket.
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }
}

/// A frame resampled onto the shared target grid. Missing data is NaN.
#[derive(Debug, Clone)]
pub struct ReprojectedFrame {
    pub source: String,
    pub product: String,
    pub timestamp: String,
    pub data: Vec<f32>,
    pub extent: GridExtent,
    pub height: usize,
    pub width: usize,
}

impl ReprojectedFrame {
    pub fn dimensions(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn value(&self, row: usize, col: usize) -> f32 {
        if row >= self.height || col >= self.width {
            return f32::NAN;
        }
        self.data[row * self.width + col]
    }

    /// Number of non-NaN pixels.
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| !v.is_nan()).count()
    }
}

/// Pixel-level fusion strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    Max,
    Average,
    Priority,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Max => "max",
            MergeStrategy::Average => "average",
            MergeStrategy::Priority => "priority",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = RadarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "max" => Ok(MergeStrategy::Max),
            "average" | "mean" => Ok(MergeStrategy::Average),
            "priority" => Ok(MergeStrategy::Priority),
            other => Err(RadarError::Config(format!("unknown merge strategy '{}'", other))),
        }
    }
}

/// Result of fusing several reprojected frames for one timestamp.
///
/// Immutable once built; all accessors are read-only.
#[derive(Debug, Clone)]
pub struct MergedFrame {
    timestamp: String,
    data: Vec<f32>,
    extent: GridExtent,
    height: usize,
    width: usize,
    strategy: MergeStrategy,
    contributing_sources: Vec<String>,
    fill_counts: Vec<(String, usize)>,
}

impl MergedFrame {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timestamp: impl Into<String>,
        data: Vec<f32>,
        extent: GridExtent,
        dimensions: (usize, usize),
        strategy: MergeStrategy,
        contributing_sources: Vec<String>,
        fill_counts: Vec<(String, usize)>,
    ) -> Self {
        Self {
            timestamp: timestamp.into(),
            data,
            extent,
            height: dimensions.0,
            width: dimensions.1,
            strategy,
            contributing_sources,
            fill_counts,
        }
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn extent(&self) -> &GridExtent {
        &self.extent
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Sources that supplied at least one valid pixel, in merge order.
    pub fn contributing_sources(&self) -> &[String] {
        &self.contributing_sources
    }

    /// Pixels filled by each source (priority merges only).
    pub fn fill_counts(&self) -> &[(String, usize)] {
        &self.fill_counts
    }

    pub fn value(&self, row: usize, col: usize) -> f32 {
        if row >= self.height || col >= self.width {
            return f32::NAN;
        }
        self.data[row * self.width + col]
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| !v.is_nan()).count()
    }

    /// Artifact base name: `merged_{strategy}_{timestamp}`.
    pub fn artifact_name(&self) -> String {
        format!("merged_{}_{}", self.strategy, self.timestamp)
    }
}
