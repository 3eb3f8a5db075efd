//! Interpolation methods for grid resampling.
//!
//! Coordinates are fractional pixel indices where `(0.0, 0.0)` is the center
//! of the top-left pixel. Anything outside the grid yields NaN.

use serde::{Deserialize, Serialize};

/// Resampling method used when mapping a native grid onto the target grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleMethod {
    /// Keeps measured values exactly; the usual choice for reflectivity
    #[default]
    Nearest,
    Bilinear,
}

/// Nearest neighbor interpolation.
///
/// Returns the value of the nearest grid point.
pub fn nearest_interpolate(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
    if !x.is_finite() || !y.is_finite() || x < -0.5 || y < -0.5 {
        return f32::NAN;
    }

    let col = x.round() as usize;
    let row = y.round() as usize;

    if col >= width || row >= height {
        return f32::NAN;
    }

    data[row * width + col]
}

/// Bilinear interpolation.
///
/// Smoothly interpolates between the four nearest grid points. Edge pixels
/// are clamped; if any of the four corners is NaN the result is NaN.
pub fn bilinear_interpolate(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
    if width == 0
        || height == 0
        || !x.is_finite()
        || !y.is_finite()
        || x < -0.5
        || y < -0.5
        || x > width as f64 - 0.5
        || y > height as f64 - 0.5
    {
        return f32::NAN;
    }

    let x = x.clamp(0.0, (width - 1) as f64);
    let y = y.clamp(0.0, (height - 1) as f64);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let xf = (x - x0 as f64) as f32;
    let yf = (y - y0 as f64) as f32;

    let v00 = data[y0 * width + x0];
    let v10 = data[y0 * width + x1];
    let v01 = data[y1 * width + x0];
    let v11 = data[y1 * width + x1];

    if v00.is_nan() || v10.is_nan() || v01.is_nan() || v11.is_nan() {
        return f32::NAN;
    }

    let top = v00 * (1.0 - xf) + v10 * xf;
    let bottom = v01 * (1.0 - xf) + v11 * xf;
    top * (1.0 - yf) + bottom * yf
}

impl ResampleMethod {
    pub fn sample(&self, data: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
        match self {
            ResampleMethod::Nearest => nearest_interpolate(data, width, height, x, y),
            ResampleMethod::Bilinear => bilinear_interpolate(data, width, height, x, y),
        }
    }
}
