//! Composite construction for radar frames.
//!
//! This crate handles:
//! - The shared target grid every source is resampled onto
//! - Resampling of native grids in EPSG:4326 / EPSG:3857
//! - Pixel-level fusion of several sources into one composite

pub mod grid;
pub mod interpolation;
pub mod merge;
pub mod reproject;

pub use grid::TargetGrid;
pub use interpolation::{bilinear_interpolate, nearest_interpolate, ResampleMethod};
pub use merge::MergeEngine;
pub use reproject::WebMapReprojector;
