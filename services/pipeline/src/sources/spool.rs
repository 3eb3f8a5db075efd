//! Spool directory adapter.
//!
//! Frames arrive as `{product}_{timestamp}.json` documents written by an
//! external decoder. Each document holds one grid; `null` cells are missing
//! data. Grid placement may be given per document or fall back to the
//! source's configured extent.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use radar_common::time::{normalize_timestamp, parse_timestamp};
use radar_common::{
    validate_source_name, BoundingBox, CrsCode, DownloadedFile, GridExtent, RadarError,
    RadarFrame, RadarResult, SourceAdapter, SourceExtent,
};

use crate::config::SourceSettings;

const SPOOL_EXT: &str = "json";

/// One decoded grid as written to the spool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoolDocument {
    #[serde(default)]
    pub source: Option<String>,
    pub product: String,
    pub timestamp: String,
    #[serde(default)]
    pub crs: Option<String>,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
    pub height: i64,
    pub width: i64,
    #[serde(default)]
    pub nodata: Option<f32>,
    /// Row-major, top row first
    pub data: Vec<Option<f32>>,
}

/// Reads frames for one source from its spool directory.
#[derive(Debug, Clone)]
pub struct SpoolAdapter {
    name: String,
    dir: PathBuf,
    products: Vec<String>,
    extent: SourceExtent,
}

/// A spool file whose name parsed as `{product}_{timestamp}.json`.
#[derive(Debug, Clone)]
struct SpoolEntry {
    product: String,
    timestamp: String,
    path: PathBuf,
}

impl SpoolAdapter {
    pub fn new(settings: &SourceSettings) -> RadarResult<Self> {
        let name = validate_source_name(&settings.name)?;

        let Some(native_bbox) = settings.bbox else {
            return Err(RadarError::Config(format!(
                "source '{}' needs a native bbox",
                name
            )));
        };
        let Some(wgs84) = settings.wgs84_extent() else {
            return Err(RadarError::Config(format!(
                "source '{}' uses {} and needs an explicit wgs84 extent",
                name, settings.crs
            )));
        };

        Ok(Self {
            name,
            dir: settings.spool_dir.clone(),
            products: settings.products.iter().map(|p| p.to_lowercase()).collect(),
            extent: SourceExtent::new(GridExtent::new(settings.crs_code(), native_bbox), wgs84),
        })
    }

    pub fn spool_dir(&self) -> &Path {
        &self.dir
    }

    async fn scan(&self) -> RadarResult<Vec<SpoolEntry>> {
        let mut dir = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            RadarError::network(format!(
                "spool directory {} unavailable: {}",
                self.dir.display(),
                e
            ))
        })?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            match parse_spool_name(&path) {
                Some((product, timestamp)) => entries.push(SpoolEntry {
                    product,
                    timestamp,
                    path,
                }),
                None => debug!(path = %path.display(), "Ignoring unrecognized spool file"),
            }
        }
        Ok(entries)
    }
}

/// Split `{product}_{timestamp}.json` into its parts.
fn parse_spool_name(path: &Path) -> Option<(String, String)> {
    if path.extension().and_then(|e| e.to_str()) != Some(SPOOL_EXT) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (product, timestamp) = stem.rsplit_once('_')?;

    let product_ok = !product.is_empty()
        && product
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if !product_ok || parse_timestamp(timestamp).is_err() {
        return None;
    }
    Some((product.to_string(), normalize_timestamp(timestamp, 12)))
}

#[async_trait]
impl SourceAdapter for SpoolAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_extent(&self) -> SourceExtent {
        self.extent.clone()
    }

    fn get_available_products(&self) -> Vec<String> {
        if !self.products.is_empty() {
            return self.products.clone();
        }

        let Ok(dir) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut products: Vec<String> = dir
            .filter_map(|e| e.ok())
            .filter_map(|e| parse_spool_name(&e.path()).map(|(product, _)| product))
            .collect();
        products.sort();
        products.dedup();
        products
    }

    #[instrument(skip(self, products), fields(source = %self.name))]
    async fn download_latest(
        &self,
        count: usize,
        products: &[String],
    ) -> RadarResult<Vec<DownloadedFile>> {
        let mut by_product: BTreeMap<String, Vec<SpoolEntry>> = BTreeMap::new();
        for entry in self.scan().await? {
            by_product.entry(entry.product.clone()).or_default().push(entry);
        }

        let wanted: Vec<String> = if products.is_empty() {
            by_product.keys().cloned().collect()
        } else {
            products.iter().map(|p| p.to_lowercase()).collect()
        };

        let mut files = Vec::new();
        for product in &wanted {
            let Some(entries) = by_product.get_mut(product) else {
                warn!(product = %product, "No spool files for product");
                continue;
            };
            entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            entries.dedup_by(|a, b| a.timestamp == b.timestamp);

            files.extend(entries.iter().take(count).map(|e| DownloadedFile {
                path: e.path.clone(),
                product: e.product.clone(),
                timestamp: e.timestamp.clone(),
                cached: false,
            }));
        }

        debug!(files = files.len(), "Collected spool files");
        Ok(files)
    }

    #[instrument(skip(self), fields(source = %self.name))]
    async fn process_to_array(&self, path: &Path) -> RadarResult<RadarFrame> {
        let raw = tokio::fs::read(path).await.map_err(|e| {
            RadarError::processing(format!("cannot read {}: {}", path.display(), e))
        })?;
        let doc: SpoolDocument = serde_json::from_slice(&raw).map_err(|e| {
            RadarError::processing(format!("malformed spool document {}: {}", path.display(), e))
        })?;

        if let Some(source) = &doc.source {
            if !source.trim().eq_ignore_ascii_case(&self.name) {
                return Err(RadarError::processing(format!(
                    "{} belongs to source '{}', not '{}'",
                    path.display(),
                    source,
                    self.name
                )));
            }
        }

        let extent = match (&doc.crs, doc.bbox) {
            (None, None) => self.extent.native.clone(),
            (crs, bbox) => GridExtent::new(
                crs.as_deref()
                    .map(CrsCode::parse)
                    .unwrap_or_else(|| self.extent.native.crs.clone()),
                bbox.unwrap_or(self.extent.native.bbox),
            ),
        };

        let data = doc
            .data
            .into_iter()
            .map(|v| v.unwrap_or(f32::NAN))
            .collect();

        RadarFrame::new(
            &self.name,
            doc.product.to_lowercase(),
            normalize_timestamp(&doc.timestamp, 12),
            data,
            doc.nodata,
            extent,
            (doc.height, doc.width),
        )
    }
}
