//! Bounding box types and operations.

use serde::{Deserialize, Serialize};

/// Web Mercator half-circumference in metres.
pub const MERCATOR_HALF_EXTENT: f64 = 20_037_508.34;

/// A geographic or projected bounding box.
///
/// For geographic CRS (EPSG:4326), coordinates are in degrees.
/// For projected CRS (EPSG:3857), coordinates are in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Width of the bounding box in coordinate units.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the bounding box in coordinate units.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Check if this bbox intersects another.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// Smallest box covering both boxes.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Check if a point is contained within this bbox.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Convert a WGS84 box (degrees) to Web Mercator (metres).
    pub fn wgs84_to_mercator(&self) -> BoundingBox {
        let (min_x, min_y) = lonlat_to_mercator(self.min_x, self.min_y);
        let (max_x, max_y) = lonlat_to_mercator(self.max_x, self.max_y);
        BoundingBox::new(min_x, min_y, max_x, max_y)
    }

    /// Convert a Web Mercator box (metres) to WGS84 (degrees).
    pub fn mercator_to_wgs84(&self) -> BoundingBox {
        let (min_x, min_y) = mercator_to_lonlat(self.min_x, self.min_y);
        let (max_x, max_y) = mercator_to_lonlat(self.max_x, self.max_y);
        BoundingBox::new(min_x, min_y, max_x, max_y)
    }
}

/// Convert WGS84 longitude/latitude to Web Mercator (EPSG:3857).
pub fn lonlat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let x = lon * MERCATOR_HALF_EXTENT / 180.0;
    let y = ((90.0 + lat) * std::f64::consts::PI / 360.0).tan().ln() / (std::f64::consts::PI / 180.0);
    (x, y * MERCATOR_HALF_EXTENT / 180.0)
}

/// Convert Web Mercator (EPSG:3857) to WGS84 longitude/latitude.
pub fn mercator_to_lonlat(x: f64, y: f64) -> (f64, f64) {
    let lon = x / MERCATOR_HALF_EXTENT * 180.0;
    let lat = (y / MERCATOR_HALF_EXTENT * std::f64::consts::PI).exp().atan() * 360.0
        / std::f64::consts::PI
        - 90.0;
    (lon, lat)
}
