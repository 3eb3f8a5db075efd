//! Capabilities the pipeline consumes from collaborators: fetching and
//! decoding native files, and resampling them onto the shared grid.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;
use crate::error::RadarResult;
use crate::frame::{GridExtent, RadarFrame, ReprojectedFrame};

/// Geographic coverage of a source in the projections the pipeline needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceExtent {
    pub native: GridExtent,
    pub wgs84: BoundingBox,
    pub web_mercator: BoundingBox,
}

impl SourceExtent {
    /// Build from a native extent and its WGS84 bounds; the Mercator bounds
    /// are derived.
    pub fn new(native: GridExtent, wgs84: BoundingBox) -> Self {
        Self {
            native,
            web_mercator: wgs84.wgs84_to_mercator(),
            wgs84,
        }
    }
}

/// A file fetched by a source adapter, ready for decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub product: String,
    pub timestamp: String,
    /// True when the adapter reused a previously fetched file
    #[serde(default)]
    pub cached: bool,
}

/// One national weather service: knows how to fetch and decode its files.
///
/// Network calls inside `download_latest` are expected to carry their own
/// request timeouts and report failures as `Network` / `Timeout` errors so
/// the retry wrapper can classify them. Decoding failures are `Processing`.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Source identifier; must pass `validate_source_name`.
    fn name(&self) -> &str;

    fn get_extent(&self) -> SourceExtent;

    fn get_available_products(&self) -> Vec<String>;

    /// Fetch the newest `count` timestamps for the given products.
    async fn download_latest(
        &self,
        count: usize,
        products: &[String],
    ) -> RadarResult<Vec<DownloadedFile>>;

    /// Decode a fetched file into a native-grid frame.
    async fn process_to_array(&self, path: &Path) -> RadarResult<RadarFrame>;
}

/// Resamples native frames onto one fixed target grid.
///
/// Every frame returned by one reprojector shares the same extent and
/// dimensions, which is what makes them mergeable.
pub trait GridReprojector: Send + Sync {
    fn target_extent(&self) -> &GridExtent;

    /// Target grid as (height, width).
    fn target_dimensions(&self) -> (usize, usize);

    fn reproject(&self, frame: &RadarFrame) -> RadarResult<ReprojectedFrame>;
}
