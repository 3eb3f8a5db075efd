//! Input guards for values that end up in file paths, cache keys and grid
//! allocations.
//!
//! Source names become path components of the artifact cache and remote
//! mirror keys, so [`validate_source_name`] is the single gate against path
//! traversal. Grid dimensions come from untrusted upstream files and bound the
//! size of every allocation made for a frame.

use crate::error::{RadarError, RadarResult};

/// Cache format version. Bump when the layout or semantics of cached
/// artifacts change; entries written under another version are never served.
pub const CACHE_VERSION: &str = "v1";

/// Largest accepted grid height or width, in pixels.
pub const MAX_GRID_DIMENSION: usize = 10_000;

/// Human-readable form of the accepted source name shape.
pub const SOURCE_NAME_PATTERN: &str = "^[a-z]{2,10}$";

const SOURCE_NAME_MIN_LEN: usize = 2;
const SOURCE_NAME_MAX_LEN: usize = 10;

/// Validate and normalize a source identifier.
///
/// Trims surrounding whitespace and lowercases, then requires 2-10 ASCII
/// letters. Anything containing a path separator or `..` is rejected outright.
pub fn validate_source_name(name: &str) -> RadarResult<String> {
    let invalid = |reason: &str| RadarError::InvalidSourceName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let normalized = name.trim().to_lowercase();

    if normalized.is_empty() {
        return Err(invalid("Source name cannot be empty"));
    }

    if normalized.contains("..") || normalized.contains('/') || normalized.contains('\\') {
        return Err(invalid("Path separators and '..' are not allowed"));
    }

    let len = normalized.chars().count();
    if !(SOURCE_NAME_MIN_LEN..=SOURCE_NAME_MAX_LEN).contains(&len)
        || !normalized.chars().all(|c| c.is_ascii_lowercase())
    {
        return Err(invalid(&format!(
            "Must match {} (2-10 letters, e.g. 'dwd', 'shmu', 'chmi')",
            SOURCE_NAME_PATTERN
        )));
    }

    Ok(normalized)
}

/// Validate grid dimensions read from an upstream file.
///
/// Returns the dimensions as `usize` once both are in `1..=MAX_GRID_DIMENSION`.
pub fn validate_grid_dimensions(height: i64, width: i64) -> RadarResult<(usize, usize)> {
    if height <= 0 || width <= 0 {
        return Err(RadarError::NonPositiveDimensions { height, width });
    }

    let max = MAX_GRID_DIMENSION as i64;
    if height > max {
        return Err(RadarError::DimensionsExceedMaximum {
            dimension: "height",
            max: MAX_GRID_DIMENSION,
            height,
            width,
        });
    }
    if width > max {
        return Err(RadarError::DimensionsExceedMaximum {
            dimension: "width",
            max: MAX_GRID_DIMENSION,
            height,
            width,
        });
    }

    Ok((height as usize, width as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_sources_pass() {
        for name in ["dwd", "shmu", "chmi", "imgw", "omsz", "arso"] {
            assert_eq!(validate_source_name(name).unwrap(), name);
        }
    }

    #[test]
    fn test_exceed_maximum_names_dimension() {
        let err = validate_grid_dimensions(100, MAX_GRID_DIMENSION as i64 + 1).unwrap_err();
        assert!(err.to_string().contains("width"));
        assert!(err.to_string().contains("exceed maximum"));
    }
}
