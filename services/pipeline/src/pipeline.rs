//! One batch pass over every source.
//!
//! For each source: download with retry, drop it if its data is stale,
//! decode, normalize the timestamp to its synchronization bucket and
//! reproject onto the target grid, reusing cached frames. Then, unless too
//! few core sources are up, reuse or build the merged composite for each
//! bucket and strategy.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument};

use compositor::{MergeEngine, WebMapReprojector};
use radar_common::time::{format_compact, parse_timestamp, sync_bucket};
use radar_common::{
    DownloadedFile, ErrorKind, GridReprojector, MergeStrategy, MergedFrame, RadarError,
    RadarResult, ReprojectedFrame, SourceAdapter,
};
use resilience::{Alert, AlertLevel};
use storage::{CacheOutcome, COMPOSITE_SOURCE};

use crate::context::ServiceContext;
use crate::sources::build_adapters;

/// A source that produced nothing usable in this run.
#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub kind: ErrorKind,
    pub error: String,
}

/// What one pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub sources_ok: Vec<String>,
    pub sources_failed: Vec<SourceFailure>,
    pub frames_built: usize,
    pub frames_cached: usize,
    /// Files that could not be decoded or reprojected
    pub processing_errors: usize,
    pub composites_built: usize,
    pub composites_cached: usize,
    /// Buckets with too few sources to merge
    pub buckets_skipped: usize,
    /// Composites were withheld because too few core sources were up
    pub core_outage: bool,
    /// `{source}/{product}_{timestamp}` and `composite/merged_{strategy}_{timestamp}`
    pub artifacts: Vec<String>,
}

impl RunSummary {
    pub fn is_total_failure(&self) -> bool {
        self.sources_ok.is_empty() && !self.sources_failed.is_empty()
    }
}

/// Frames of one bucket in source order, at most one per source.
type Bucket = Vec<ReprojectedFrame>;

/// Longest freshness window honoured, one year.
const MAX_DATA_AGE_MINUTES: u64 = 365 * 24 * 60;

pub struct Pipeline {
    ctx: ServiceContext,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    reprojector: Arc<dyn GridReprojector>,
    engine: MergeEngine,
}

impl Pipeline {
    pub fn new(
        ctx: ServiceContext,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        reprojector: Arc<dyn GridReprojector>,
    ) -> Result<Self> {
        let engine = MergeEngine::with_priority(&ctx.config.composite.priority)
            .context("Invalid composite priority list")?;

        Ok(Self {
            ctx,
            adapters,
            reprojector,
            engine,
        })
    }

    /// Pipeline over the configured spool sources and the configured grid.
    pub fn from_context(ctx: ServiceContext) -> Result<Self> {
        let adapters = build_adapters(&ctx.config)?;
        let grid = ctx.config.target_grid()?;
        let (height, width) = grid.dimensions();
        info!(height, width, crs = %grid.extent().crs, "Target grid");

        let reprojector = WebMapReprojector::new(grid).with_method(ctx.config.composite.resample);
        Self::new(ctx, adapters, Arc::new(reprojector))
    }

    /// Keep only the named sources.
    pub fn retain_sources(&mut self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        let wanted: HashSet<String> = names.iter().map(|n| n.trim().to_lowercase()).collect();
        self.adapters.retain(|a| wanted.contains(a.name()));
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    /// Run one pass. Source failures are recorded in the summary and with the
    /// alert manager; they never abort the other sources.
    #[instrument(skip(self), fields(sources = self.adapters.len()))]
    pub async fn run_once(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut buckets: BTreeMap<String, Bucket> = BTreeMap::new();

        for adapter in &self.adapters {
            self.collect_source(adapter.as_ref(), &mut buckets, &mut summary)
                .await;
        }

        if self.ctx.config.composite.enabled {
            match self.core_outage(&summary) {
                Some(reason) => {
                    self.withhold_composites(&reason, &mut summary);
                    summary.buckets_skipped += buckets.len();
                }
                None => self.build_composites(&buckets, &mut summary).await,
            }
        }

        info!(
            ok = summary.sources_ok.len(),
            failed = summary.sources_failed.len(),
            frames_built = summary.frames_built,
            frames_cached = summary.frames_cached,
            composites_built = summary.composites_built,
            composites_cached = summary.composites_cached,
            "Pipeline run complete"
        );

        summary
    }

    fn products_for(&self, adapter: &dyn SourceAdapter) -> (Vec<String>, usize) {
        let settings = self
            .ctx
            .config
            .sources
            .iter()
            .find(|s| s.name == adapter.name());

        let products = settings
            .map(|s| s.products.clone())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| adapter.get_available_products());
        let count = settings.map_or(1, |s| s.count.max(1));
        (products, count)
    }

    async fn collect_source(
        &self,
        adapter: &dyn SourceAdapter,
        buckets: &mut BTreeMap<String, Bucket>,
        summary: &mut RunSummary,
    ) {
        let name = adapter.name().to_string();
        let (products, count) = self.products_for(adapter);

        let operation = format!("{}.download_latest", name);
        let files = match self
            .ctx
            .retry
            .run(&operation, || adapter.download_latest(count, &products))
            .await
        {
            Ok(files) if files.is_empty() => {
                self.fail_source(&name, ErrorKind::NoData, "no files available", summary);
                return;
            }
            Ok(files) => files,
            Err(e) => {
                self.fail_source(&name, e.kind(), &e.to_string(), summary);
                return;
            }
        };

        if let Some(reason) = self.stale_reason(&files) {
            self.fail_source(&name, ErrorKind::NoData, &reason, summary);
            return;
        }

        let mut produced = 0;
        let mut last_error = None;

        for file in &files {
            match self.frame_for(adapter, file).await {
                Ok((bucket, frame, outcome)) => {
                    produced += 1;
                    match outcome {
                        CacheOutcome::Hit => summary.frames_cached += 1,
                        CacheOutcome::Built => summary.frames_built += 1,
                    }
                    summary
                        .artifacts
                        .push(format!("{}/{}_{}", name, frame.product, frame.timestamp));

                    let slot = buckets.entry(bucket.clone()).or_default();
                    if slot.iter().any(|f| f.source == name) {
                        debug!(
                            source = %name,
                            bucket = %bucket,
                            product = %frame.product,
                            "Source already has a frame in this bucket"
                        );
                    } else {
                        slot.push(frame);
                    }
                }
                Err(e) => {
                    error!(
                        source = %name,
                        path = %file.path.display(),
                        product = %file.product,
                        timestamp = %file.timestamp,
                        error = %e,
                        "Failed to process file"
                    );
                    summary.processing_errors += 1;
                    last_error = Some(e);
                }
            }
        }

        match (produced, last_error) {
            (0, Some(e)) => self.fail_source(&name, e.kind(), &e.to_string(), summary),
            _ => {
                self.ctx.alerts.record_success(&name);
                summary.sources_ok.push(name);
            }
        }
    }

    /// Why the newest of `files` is too old to use, if it is.
    fn stale_reason(&self, files: &[DownloadedFile]) -> Option<String> {
        let max_age = self.ctx.config.composite.max_data_age_minutes;
        if max_age == 0 {
            return None;
        }

        let newest = files
            .iter()
            .filter_map(|f| parse_timestamp(&f.timestamp).ok())
            .max()?;
        let cutoff = Utc::now() - Duration::minutes(max_age.min(MAX_DATA_AGE_MINUTES) as i64);

        (newest < cutoff).then(|| {
            format!(
                "stale data: newest file {} is older than {}",
                format_compact(newest),
                format_compact(cutoff)
            )
        })
    }

    /// Sources missing from the config count as core.
    fn is_core(&self, name: &str) -> bool {
        self.ctx
            .config
            .sources
            .iter()
            .find(|s| s.name == name)
            .map_or(true, |s| s.core)
    }

    fn core_outage(&self, summary: &RunSummary) -> Option<String> {
        let required = self.ctx.config.composite.min_core_sources;
        if required == 0 {
            return None;
        }

        let available = summary
            .sources_ok
            .iter()
            .filter(|name| self.is_core(name))
            .count();
        (available < required).then(|| {
            format!(
                "{} core sources available, {} required",
                available, required
            )
        })
    }

    fn withhold_composites(&self, reason: &str, summary: &mut RunSummary) {
        error!(reason = %reason, "Too few core sources, composites withheld");
        summary.core_outage = true;

        let failed: Vec<serde_json::Value> = summary
            .sources_failed
            .iter()
            .map(|f| serde_json::Value::from(f.source.as_str()))
            .collect();
        let alert = Alert {
            level: AlertLevel::Critical,
            source: COMPOSITE_SOURCE.to_string(),
            message: format!("Composites withheld: {}", reason),
            details: Some(BTreeMap::from([(
                "sources_failed".to_string(),
                serde_json::Value::Array(failed),
            )])),
        };
        self.ctx.alerts.send_alert(&alert);
    }

    /// Decode and reproject one file, or reuse the cached frame if it lies on
    /// the current target grid.
    async fn frame_for(
        &self,
        adapter: &dyn SourceAdapter,
        file: &DownloadedFile,
    ) -> RadarResult<(String, ReprojectedFrame, CacheOutcome)> {
        let bucket = sync_bucket(&file.timestamp, self.ctx.config.composite.sync_interval_minutes)?;
        let fp = self
            .ctx
            .cache
            .fingerprint(adapter.name(), &file.product, &bucket)?;

        let target = self.reprojector.target_extent();
        let dimensions = self.reprojector.target_dimensions();
        let on_grid =
            |f: &ReprojectedFrame| f.extent == *target && (f.height, f.width) == dimensions;

        let (frame, outcome) = self
            .ctx
            .cache
            .get_or_build_if(&fp, on_grid, || async {
                let native = adapter
                    .process_to_array(&file.path)
                    .await?
                    .with_timestamp(bucket.clone());
                self.reprojector.reproject(&native)
            })
            .await?;

        Ok((bucket, frame, outcome))
    }

    fn fail_source(&self, name: &str, kind: ErrorKind, message: &str, summary: &mut RunSummary) {
        let details = BTreeMap::from([(
            "error_kind".to_string(),
            serde_json::Value::from(kind.as_str()),
        )]);
        self.ctx
            .alerts
            .record_failure_with(name, message, AlertLevel::Error, Some(details));

        summary.sources_failed.push(SourceFailure {
            source: name.to_string(),
            kind,
            error: message.to_string(),
        });
    }

    async fn build_composites(&self, buckets: &BTreeMap<String, Bucket>, summary: &mut RunSummary) {
        let composite = &self.ctx.config.composite;

        for (bucket, frames) in buckets.iter().rev() {
            if frames.len() < composite.min_sources {
                info!(
                    bucket = %bucket,
                    sources = frames.len(),
                    required = composite.min_sources,
                    "Not enough sources to merge"
                );
                summary.buckets_skipped += 1;
                continue;
            }

            for strategy in &composite.strategies {
                match self.composite_for(bucket, frames, *strategy).await {
                    Ok((merged, outcome)) => {
                        match outcome {
                            CacheOutcome::Hit => summary.composites_cached += 1,
                            CacheOutcome::Built => summary.composites_built += 1,
                        }
                        summary
                            .artifacts
                            .push(format!("composite/{}", merged.artifact_name()));
                    }
                    Err(e) => error!(
                        bucket = %bucket,
                        strategy = %strategy,
                        error = %e,
                        "Failed to build composite"
                    ),
                }
            }
        }
    }

    /// Reuse a cached composite unless it lies on another grid or predates a
    /// source that has since delivered data for the bucket.
    async fn composite_for(
        &self,
        bucket: &str,
        frames: &[ReprojectedFrame],
        strategy: MergeStrategy,
    ) -> RadarResult<(MergedFrame, CacheOutcome)> {
        let fp = self.ctx.cache.composite_fingerprint(strategy, bucket)?;
        let target = self.reprojector.target_extent();
        let dimensions = self.reprojector.target_dimensions();

        self.ctx
            .cache
            .get_or_build_if(
                &fp,
                |merged: &MergedFrame| {
                    merged.extent() == target
                        && merged.dimensions() == dimensions
                        && covers_all(merged, frames)
                },
                || async {
                    self.engine.merge(frames, strategy)?.ok_or_else(|| {
                        RadarError::Internal("merge produced no composite".to_string())
                    })
                },
            )
            .await
    }
}

/// Whether every frame with data is among the composite's contributors.
fn covers_all(merged: &MergedFrame, frames: &[ReprojectedFrame]) -> bool {
    frames
        .iter()
        .filter(|f| f.valid_count() > 0)
        .all(|f| merged.contributing_sources().contains(&f.source))
}
