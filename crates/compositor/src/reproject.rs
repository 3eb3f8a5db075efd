//! Resampling of native grids onto the target grid.
//!
//! Handles native grids in EPSG:4326 and EPSG:3857, which covers sources
//! that publish on a lat/lon or web-map grid. Other projections are rejected
//! with a processing error and need an external reprojector behind the same
//! [`GridReprojector`] trait.

use rayon::prelude::*;
use tracing::debug;

use radar_common::bbox::{lonlat_to_mercator, mercator_to_lonlat};
use radar_common::{
    CrsCode, GridExtent, GridReprojector, RadarError, RadarFrame, RadarResult, ReprojectedFrame,
};

use crate::grid::TargetGrid;
use crate::interpolation::ResampleMethod;

/// Reprojector between the two web-map coordinate systems.
#[derive(Debug, Clone)]
pub struct WebMapReprojector {
    grid: TargetGrid,
    method: ResampleMethod,
}

impl WebMapReprojector {
    pub fn new(grid: TargetGrid) -> Self {
        Self {
            grid,
            method: ResampleMethod::default(),
        }
    }

    pub fn with_method(mut self, method: ResampleMethod) -> Self {
        self.method = method;
        self
    }

    pub fn grid(&self) -> &TargetGrid {
        &self.grid
    }
}

/// Map a point between EPSG:4326 and EPSG:3857.
fn transform(from: &CrsCode, to: &CrsCode, x: f64, y: f64) -> Option<(f64, f64)> {
    match (from, to) {
        (CrsCode::Epsg4326, CrsCode::Epsg4326) | (CrsCode::Epsg3857, CrsCode::Epsg3857) => {
            Some((x, y))
        }
        (CrsCode::Epsg3857, CrsCode::Epsg4326) => Some(mercator_to_lonlat(x, y)),
        (CrsCode::Epsg4326, CrsCode::Epsg3857) => Some(lonlat_to_mercator(x, y)),
        _ => None,
    }
}

impl GridReprojector for WebMapReprojector {
    fn target_extent(&self) -> &GridExtent {
        self.grid.extent()
    }

    fn target_dimensions(&self) -> (usize, usize) {
        self.grid.dimensions()
    }

    fn reproject(&self, frame: &RadarFrame) -> RadarResult<ReprojectedFrame> {
        let native = &frame.native_extent;
        let target_crs = &self.grid.extent().crs;

        if transform(&native.crs, target_crs, 0.0, 0.0).is_none() {
            return Err(RadarError::processing(format!(
                "no built-in transform from {} to {} for source {}",
                native.crs, target_crs, frame.source
            )));
        }

        let (src_h, src_w) = frame.dimensions();
        let nb = native.bbox;
        if !(nb.width() > 0.0 && nb.height() > 0.0) {
            return Err(RadarError::Projection(format!(
                "native extent of {} is empty",
                frame.source
            )));
        }

        // Nodata sentinels become NaN before sampling
        let source: Vec<f32> = frame
            .data
            .iter()
            .map(|&v| if frame.is_nodata(v) { f32::NAN } else { v })
            .collect();

        let (height, width) = self.grid.dimensions();
        let col_scale = src_w as f64 / nb.width();
        let row_scale = src_h as f64 / nb.height();
        let mut output = vec![f32::NAN; height * width];

        output
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(row, out_row)| {
                for (col, out) in out_row.iter_mut().enumerate() {
                    let (tx, ty) = self.grid.pixel_center(row, col);
                    let Some((nx, ny)) = transform(target_crs, &native.crs, tx, ty) else {
                        continue;
                    };
                    let x = (nx - nb.min_x) * col_scale - 0.5;
                    let y = (nb.max_y - ny) * row_scale - 0.5;
                    *out = self.method.sample(&source, src_w, src_h, x, y);
                }
            });

        let reprojected = ReprojectedFrame {
            source: frame.source.clone(),
            product: frame.product.clone(),
            timestamp: frame.timestamp.clone(),
            data: output,
            extent: self.grid.extent().clone(),
            height,
            width,
        };

        debug!(
            source = %frame.source,
            timestamp = %frame.timestamp,
            native = ?(src_h, src_w),
            target = ?(height, width),
            valid = reprojected.valid_count(),
            "Reprojected frame"
        );

        Ok(reprojected)
    }
}
