//! Common types and utilities shared across the radar composite crates.

pub mod bbox;
pub mod crs;
pub mod error;
pub mod frame;
pub mod source;
pub mod time;
pub mod validation;

pub use bbox::BoundingBox;
pub use crs::CrsCode;
pub use error::{ErrorKind, RadarError, RadarResult};
pub use frame::{GridExtent, MergeStrategy, MergedFrame, RadarFrame, ReprojectedFrame};
pub use source::{DownloadedFile, GridReprojector, SourceAdapter, SourceExtent};
pub use validation::{
    validate_grid_dimensions, validate_source_name, CACHE_VERSION, MAX_GRID_DIMENSION,
    SOURCE_NAME_PATTERN,
};
