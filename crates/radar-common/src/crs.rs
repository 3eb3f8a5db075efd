//! Coordinate Reference System identifiers for native and target grids.

use serde::{Deserialize, Serialize};
use std::fmt;

/// CRS of a radar grid.
///
/// Only the two web-map systems are understood natively; everything else
/// (polar stereographic, national grids) is carried as its PROJ definition
/// and left to an external reprojector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrsCode {
    /// WGS84 Geographic (lon/lat in degrees)
    Epsg4326,
    /// Web Mercator (meters)
    Epsg3857,
    /// Any other CRS, as a PROJ string or authority code
    Other(String),
}

impl CrsCode {
    /// Parse a CRS string such as "EPSG:4326", "epsg:3857" or a PROJ definition.
    pub fn parse(s: &str) -> Self {
        let normalized = s.trim().to_uppercase();

        match normalized.as_str() {
            "EPSG:4326" | "CRS:84" | "WGS84" => CrsCode::Epsg4326,
            "EPSG:3857" | "EPSG:900913" => CrsCode::Epsg3857,
            _ => CrsCode::Other(s.trim().to_string()),
        }
    }

    /// Check if this is a geographic (lat/lon) CRS.
    pub fn is_geographic(&self) -> bool {
        matches!(self, CrsCode::Epsg4326)
    }
}

impl fmt::Display for CrsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrsCode::Epsg4326 => write!(f, "EPSG:4326"),
            CrsCode::Epsg3857 => write!(f, "EPSG:3857"),
            CrsCode::Other(def) => write!(f, "{}", def),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_codes() {
        assert_eq!(CrsCode::parse("epsg:4326"), CrsCode::Epsg4326);
        assert_eq!(CrsCode::parse("CRS:84"), CrsCode::Epsg4326);
        assert_eq!(CrsCode::parse("EPSG:900913"), CrsCode::Epsg3857);
    }

    #[test]
    fn test_parse_other_keeps_definition() {
        let crs = CrsCode::parse("+proj=stere +lat_0=90 +lon_0=10");
        assert_eq!(crs, CrsCode::Other("+proj=stere +lat_0=90 +lon_0=10".into()));
        assert_eq!(crs.to_string(), "+proj=stere +lat_0=90 +lon_0=10");
    }
}
