//! The shared target grid.
//!
//! Every source is resampled onto one target grid so that composites can be
//! built pixel by pixel. The grid is row-major with row 0 at the northern
//! edge; pixel `(row, col)` covers a cell of the extent and is sampled at
//! its center.

use radar_common::{
    validate_grid_dimensions, BoundingBox, CrsCode, GridExtent, RadarError, RadarResult,
};

/// Fixed output grid shared by all frames of a composite.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetGrid {
    extent: GridExtent,
    height: usize,
    width: usize,
}

impl TargetGrid {
    /// Build a grid over an explicit extent.
    pub fn new(extent: GridExtent, height: i64, width: i64) -> RadarResult<Self> {
        if matches!(extent.crs, CrsCode::Other(_)) {
            return Err(RadarError::Config(format!(
                "target grid must be EPSG:4326 or EPSG:3857, got {}",
                extent.crs
            )));
        }
        if !(extent.bbox.width() > 0.0 && extent.bbox.height() > 0.0) {
            return Err(RadarError::Config(format!(
                "target grid extent is empty: {:?}",
                extent.bbox
            )));
        }
        let (height, width) = validate_grid_dimensions(height, width)?;
        Ok(Self {
            extent,
            height,
            width,
        })
    }

    /// Web Mercator grid covering a WGS84 bounding box at `resolution_m`
    /// metres per pixel.
    pub fn web_mercator(wgs84: BoundingBox, resolution_m: f64) -> RadarResult<Self> {
        if !(resolution_m.is_finite() && resolution_m > 0.0) {
            return Err(RadarError::Config(format!(
                "grid resolution must be positive, got {}",
                resolution_m
            )));
        }

        let bbox = wgs84.wgs84_to_mercator();
        let width = (bbox.width() / resolution_m).ceil() as i64;
        let height = (bbox.height() / resolution_m).ceil() as i64;

        // Snap the extent to whole pixels so the resolution is exact
        let bbox = BoundingBox::new(
            bbox.min_x,
            bbox.max_y - height as f64 * resolution_m,
            bbox.min_x + width as f64 * resolution_m,
            bbox.max_y,
        );

        Self::new(GridExtent::new(CrsCode::Epsg3857, bbox), height, width)
    }

    pub fn extent(&self) -> &GridExtent {
        &self.extent
    }

    /// (height, width)
    pub fn dimensions(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Pixel size in CRS units as (x, y).
    pub fn resolution(&self) -> (f64, f64) {
        (
            self.extent.bbox.width() / self.width as f64,
            self.extent.bbox.height() / self.height as f64,
        )
    }

    /// Center of pixel `(row, col)` in the grid's CRS.
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let (dx, dy) = self.resolution();
        (
            self.extent.bbox.min_x + (col as f64 + 0.5) * dx,
            self.extent.bbox.max_y - (row as f64 + 0.5) * dy,
        )
    }
}
