//! End-to-end pipeline passes against fake sources and a temporary cache.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tempfile::TempDir;

use compositor::{TargetGrid, WebMapReprojector};
use radar_common::{
    BoundingBox, CrsCode, DownloadedFile, ErrorKind, GridExtent, MergeStrategy, RadarError,
    RadarFrame, RadarResult, SourceAdapter, SourceExtent,
};
use radar_pipeline::config::{RetrySettings, SourceSettings};
use radar_pipeline::{Pipeline, PipelineConfig, ServiceContext};
use resilience::{Alert, AlertLevel, AlertManager, AlertSink};
use storage::{ArtifactCache, CacheConfig};

// ============================================================================
// Fakes
// ============================================================================

fn native_extent() -> GridExtent {
    GridExtent::new(CrsCode::Epsg4326, BoundingBox::new(0.0, 0.0, 4.0, 2.0))
}

struct FakeAdapter {
    name: String,
    files: Vec<DownloadedFile>,
    value: f32,
    failures_before_success: u32,
    failure: fn() -> RadarError,
    downloads: AtomicU32,
    decodes: AtomicU32,
}

impl FakeAdapter {
    fn new(name: &str, product: &str, timestamp: &str, value: f32) -> Self {
        Self {
            name: name.to_string(),
            files: vec![DownloadedFile {
                path: PathBuf::from(format!("/spool/{}/{}_{}.h5", name, product, timestamp)),
                product: product.to_string(),
                timestamp: timestamp.to_string(),
                cached: false,
            }],
            value,
            failures_before_success: 0,
            failure: || RadarError::network("connection reset"),
            downloads: AtomicU32::new(0),
            decodes: AtomicU32::new(0),
        }
    }

    fn failing(mut self, times: u32, failure: fn() -> RadarError) -> Self {
        self.failures_before_success = times;
        self.failure = failure;
        self
    }

    fn without_files(mut self) -> Self {
        self.files.clear();
        self
    }

    fn downloads(&self) -> u32 {
        self.downloads.load(Ordering::SeqCst)
    }

    fn decodes(&self) -> u32 {
        self.decodes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for FakeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_extent(&self) -> SourceExtent {
        SourceExtent::new(native_extent(), native_extent().bbox)
    }

    fn get_available_products(&self) -> Vec<String> {
        self.files.iter().map(|f| f.product.clone()).collect()
    }

    async fn download_latest(
        &self,
        count: usize,
        _products: &[String],
    ) -> RadarResult<Vec<DownloadedFile>> {
        let attempt = self.downloads.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures_before_success {
            return Err((self.failure)());
        }
        Ok(self.files.iter().take(count).cloned().collect())
    }

    async fn process_to_array(&self, path: &Path) -> RadarResult<RadarFrame> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        let file = self
            .files
            .iter()
            .find(|f| f.path == path)
            .ok_or_else(|| RadarError::processing("unknown file"))?;
        if file.product == "corrupt" {
            return Err(RadarError::processing("truncated HDF5 dataset"));
        }
        RadarFrame::new(
            &self.name,
            file.product.clone(),
            file.timestamp.clone(),
            vec![self.value; 8],
            None,
            native_extent(),
            (2, 4),
        )
    }
}

#[derive(Default)]
struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
}

impl AlertSink for RecordingSink {
    fn send(&self, alert: &Alert) -> RadarResult<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    _dir: TempDir,
    ctx: ServiceContext,
    sink: Arc<RecordingSink>,
}

async fn harness(configure: impl FnOnce(&mut PipelineConfig)) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = PipelineConfig {
        cache: CacheConfig {
            local_dir: dir.path().join("cache"),
            ..CacheConfig::default()
        },
        retry: RetrySettings {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter: false,
            retry_on: Vec::new(),
        },
        ..PipelineConfig::default()
    };
    config.composite.strategies = vec![MergeStrategy::Max, MergeStrategy::Average];
    configure(&mut config);

    let alerts = Arc::new(AlertManager::new(config.alerts.threshold));
    let sink = Arc::new(RecordingSink::default());
    alerts.add_handler(sink.clone());

    let cache = ArtifactCache::open(config.cache.clone(), None).await.unwrap();
    let ctx = ServiceContext::new(config, alerts, Arc::new(cache));

    Harness {
        _dir: dir,
        ctx,
        sink,
    }
}

fn pipeline(ctx: &ServiceContext, adapters: &[Arc<FakeAdapter>]) -> Pipeline {
    pipeline_on(ctx, adapters, TargetGrid::new(native_extent(), 2, 4).unwrap())
}

fn pipeline_on(ctx: &ServiceContext, adapters: &[Arc<FakeAdapter>], grid: TargetGrid) -> Pipeline {
    let adapters = adapters
        .iter()
        .map(|a| a.clone() as Arc<dyn SourceAdapter>)
        .collect();
    Pipeline::new(ctx.clone(), adapters, Arc::new(WebMapReprojector::new(grid))).unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_run_builds_frames_and_composites() {
    let h = harness(|_| {}).await;
    // Both land in the 10:00 bucket
    let dwd = Arc::new(FakeAdapter::new("dwd", "dmax", "20250128100330", 10.0));
    let shmu = Arc::new(FakeAdapter::new("shmu", "zmax", "202501281004", 20.0));

    let summary = pipeline(&h.ctx, &[dwd.clone(), shmu.clone()]).run_once().await;

    assert_eq!(summary.sources_ok, vec!["dwd", "shmu"]);
    assert!(summary.sources_failed.is_empty());
    assert_eq!(summary.frames_built, 2);
    assert_eq!(summary.composites_built, 2);
    assert!(summary.artifacts.contains(&"dwd/dmax_202501281000".to_string()));
    assert!(summary
        .artifacts
        .contains(&"composite/merged_average_202501281000".to_string()));

    let max = h
        .ctx
        .cache
        .get_merged(MergeStrategy::Max, "202501281000")
        .await
        .unwrap();
    assert_eq!(max.value(0, 0), 20.0);
    assert_eq!(max.contributing_sources(), &["dwd", "shmu"]);

    let avg = h
        .ctx
        .cache
        .get_merged(MergeStrategy::Average, "202501281000")
        .await
        .unwrap();
    assert_eq!(avg.value(1, 3), 15.0);

    let frame = h
        .ctx
        .cache
        .get_frame("shmu", "zmax", "202501281000")
        .await
        .unwrap();
    assert_eq!(frame.value(0, 0), 20.0);
}

#[tokio::test]
async fn test_second_run_reuses_cache() {
    let h = harness(|_| {}).await;
    let dwd = Arc::new(FakeAdapter::new("dwd", "dmax", "202501281005", 10.0));
    let shmu = Arc::new(FakeAdapter::new("shmu", "zmax", "202501281005", 20.0));
    let pipeline = pipeline(&h.ctx, &[dwd.clone(), shmu.clone()]);

    pipeline.run_once().await;
    let second = pipeline.run_once().await;

    assert_eq!(second.frames_built, 0);
    assert_eq!(second.frames_cached, 2);
    assert_eq!(second.composites_built, 0);
    assert_eq!(second.composites_cached, 2);
    // Downloads happen every run, decoding only once
    assert_eq!(dwd.downloads(), 2);
    assert_eq!(dwd.decodes(), 1);
    assert_eq!(shmu.decodes(), 1);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = harness(|_| {}).await;
    let dwd = Arc::new(
        FakeAdapter::new("dwd", "dmax", "202501281005", 10.0)
            .failing(2, || RadarError::Timeout("read timed out".into())),
    );

    let summary = pipeline(&h.ctx, &[dwd.clone()]).run_once().await;

    assert_eq!(summary.sources_ok, vec!["dwd"]);
    assert_eq!(dwd.downloads(), 3);
    assert_eq!(h.ctx.alerts.failure_count("dwd"), 0);
}

#[tokio::test]
async fn test_non_retryable_kind_fails_fast() {
    let h = harness(|c| c.retry.retry_on = vec![ErrorKind::Network, ErrorKind::Timeout]).await;
    let chmi = Arc::new(
        FakeAdapter::new("chmi", "maxz", "202501281005", 10.0)
            .failing(u32::MAX, || RadarError::Config("bad credentials".into())),
    );

    let summary = pipeline(&h.ctx, &[chmi.clone()]).run_once().await;

    assert_eq!(chmi.downloads(), 1);
    assert_eq!(summary.sources_failed.len(), 1);
    assert_eq!(summary.sources_failed[0].kind, ErrorKind::Config);
    assert!(summary.is_total_failure());
}

#[tokio::test]
async fn test_exhausted_source_alerts_at_threshold() {
    let h = harness(|c| {
        c.alerts.threshold = 2;
        c.retry.max_retries = 1;
    })
    .await;
    let dwd = Arc::new(FakeAdapter::new("dwd", "dmax", "202501281005", 10.0));
    let omsz = Arc::new(
        FakeAdapter::new("omsz", "cmax", "202501281005", 5.0)
            .failing(u32::MAX, || RadarError::network("503 Service Unavailable")),
    );
    let pipeline = pipeline(&h.ctx, &[dwd.clone(), omsz.clone()]);

    let first = pipeline.run_once().await;
    assert_eq!(first.sources_ok, vec!["dwd"]);
    assert_eq!(first.sources_failed[0].source, "omsz");
    assert_eq!(first.sources_failed[0].kind, ErrorKind::Network);
    assert_eq!(omsz.downloads(), 2);
    assert_eq!(h.ctx.alerts.failure_count("omsz"), 1);
    assert!(h.sink.alerts.lock().unwrap().is_empty());
    // The healthy source still yields composites on its own
    assert_eq!(first.composites_built, 2);

    pipeline.run_once().await;
    let alerts = h.sink.alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].source, "omsz");
    let details = alerts[0].details.as_ref().unwrap();
    assert_eq!(details["error_kind"], "network");
    assert_eq!(h.ctx.alerts.failure_count("dwd"), 0);
}

#[tokio::test]
async fn test_processing_error_is_not_retried() {
    let h = harness(|_| {}).await;
    let imgw = Arc::new(FakeAdapter::new("imgw", "corrupt", "202501281005", 1.0));

    let summary = pipeline(&h.ctx, &[imgw.clone()]).run_once().await;

    assert_eq!(imgw.downloads(), 1);
    assert_eq!(imgw.decodes(), 1);
    assert_eq!(summary.processing_errors, 1);
    assert_eq!(summary.sources_failed[0].kind, ErrorKind::Processing);
    assert_eq!(h.ctx.alerts.failure_count("imgw"), 1);
    assert_eq!(summary.composites_built, 0);
}

#[tokio::test]
async fn test_empty_download_counts_as_failure() {
    let h = harness(|_| {}).await;
    let arso = Arc::new(FakeAdapter::new("arso", "zm", "202501281005", 1.0).without_files());

    let summary = pipeline(&h.ctx, &[arso.clone()]).run_once().await;

    assert_eq!(arso.downloads(), 1);
    assert_eq!(summary.sources_failed[0].error, "no files available");
    assert_eq!(summary.sources_failed[0].kind, ErrorKind::NoData);
    assert_eq!(h.ctx.alerts.failure_count("arso"), 1);
}

#[tokio::test]
async fn test_min_sources_skips_thin_buckets() {
    let h = harness(|c| c.composite.min_sources = 2).await;
    let dwd = Arc::new(FakeAdapter::new("dwd", "dmax", "202501281005", 10.0));
    let shmu = Arc::new(FakeAdapter::new("shmu", "zmax", "202501281010", 20.0));

    let summary = pipeline(&h.ctx, &[dwd, shmu]).run_once().await;

    assert_eq!(summary.frames_built, 2);
    assert_eq!(summary.buckets_skipped, 2);
    assert_eq!(summary.composites_built, 0);
}

#[tokio::test]
async fn test_disabled_composite_only_caches_frames() {
    let h = harness(|c| c.composite.enabled = false).await;
    let dwd = Arc::new(FakeAdapter::new("dwd", "dmax", "202501281005", 10.0));

    let summary = pipeline(&h.ctx, &[dwd]).run_once().await;

    assert_eq!(summary.frames_built, 1);
    assert_eq!(summary.composites_built + summary.composites_cached, 0);
}

#[tokio::test]
async fn test_late_source_refreshes_cached_composite() {
    let h = harness(|c| c.composite.strategies = vec![MergeStrategy::Max]).await;
    let dwd = Arc::new(FakeAdapter::new("dwd", "dmax", "202501281005", 10.0));
    let shmu = Arc::new(FakeAdapter::new("shmu", "zmax", "202501281005", 20.0));

    let mut early = pipeline(&h.ctx, &[dwd.clone(), shmu.clone()]);
    early.retain_sources(&["dwd".to_string()]);
    assert_eq!(early.source_names(), vec!["dwd"]);
    early.run_once().await;

    let summary = pipeline(&h.ctx, &[dwd, shmu]).run_once().await;
    assert_eq!(summary.composites_built, 1);

    let merged = h
        .ctx
        .cache
        .get_merged(MergeStrategy::Max, "202501281005")
        .await
        .unwrap();
    assert_eq!(merged.contributing_sources(), &["dwd", "shmu"]);
    assert_eq!(merged.value(0, 0), 20.0);
}

#[tokio::test]
async fn test_grid_change_rebuilds_cached_artifacts() {
    let h = harness(|_| {}).await;
    let dwd = Arc::new(FakeAdapter::new("dwd", "dmax", "202501281005", 10.0));
    let shmu = Arc::new(FakeAdapter::new("shmu", "zmax", "202501281005", 20.0));

    pipeline(&h.ctx, &[dwd.clone(), shmu.clone()]).run_once().await;

    let coarse = TargetGrid::new(native_extent(), 1, 2).unwrap();
    let summary = pipeline_on(&h.ctx, &[dwd.clone(), shmu.clone()], coarse)
        .run_once()
        .await;

    assert_eq!(summary.frames_cached, 0);
    assert_eq!(summary.frames_built, 2);
    assert_eq!(summary.composites_built, 2);
    assert_eq!(dwd.decodes(), 2);

    let merged = h
        .ctx
        .cache
        .get_merged(MergeStrategy::Max, "202501281005")
        .await
        .unwrap();
    assert_eq!(merged.dimensions(), (1, 2));
    assert_eq!(merged.value(0, 1), 20.0);
}

fn minutes_ago(minutes: i64) -> String {
    (Utc::now() - Duration::minutes(minutes))
        .format("%Y%m%d%H%M")
        .to_string()
}

#[tokio::test]
async fn test_stale_source_is_treated_as_down() {
    let h = harness(|c| c.composite.max_data_age_minutes = 30).await;
    let dwd = Arc::new(FakeAdapter::new("dwd", "dmax", &minutes_ago(5), 10.0));
    let shmu = Arc::new(FakeAdapter::new("shmu", "zmax", &minutes_ago(45), 20.0));

    let summary = pipeline(&h.ctx, &[dwd.clone(), shmu.clone()]).run_once().await;

    assert_eq!(summary.sources_ok, vec!["dwd"]);
    assert_eq!(summary.sources_failed[0].source, "shmu");
    assert_eq!(summary.sources_failed[0].kind, ErrorKind::NoData);
    assert!(summary.sources_failed[0].error.starts_with("stale data"));
    assert_eq!(shmu.decodes(), 0);
    assert_eq!(h.ctx.alerts.failure_count("shmu"), 1);
    assert_eq!(summary.composites_built, 2);
}

#[tokio::test]
async fn test_too_few_core_sources_withholds_composites() {
    let h = harness(|c| {
        c.composite.min_core_sources = 2;
        c.sources = vec![SourceSettings {
            name: "arso".to_string(),
            core: false,
            ..SourceSettings::default()
        }];
    })
    .await;
    let dwd = Arc::new(FakeAdapter::new("dwd", "dmax", "202501281005", 10.0));
    let shmu = Arc::new(
        FakeAdapter::new("shmu", "zmax", "202501281005", 20.0)
            .failing(u32::MAX, || RadarError::network("connection refused")),
    );
    let arso = Arc::new(FakeAdapter::new("arso", "zm", "202501281005", 30.0));

    let summary = pipeline(&h.ctx, &[dwd, shmu, arso]).run_once().await;

    // arso is up but optional, so only dwd counts
    assert_eq!(summary.sources_ok, vec!["dwd", "arso"]);
    assert!(summary.core_outage);
    assert_eq!(summary.frames_built, 2);
    assert_eq!(summary.composites_built, 0);
    assert_eq!(summary.buckets_skipped, 1);
    assert!(h
        .ctx
        .cache
        .get_merged(MergeStrategy::Max, "202501281005")
        .await
        .is_none());

    let alerts = h.sink.alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].level, AlertLevel::Critical);
    assert_eq!(alerts[0].source, "composite");
    assert_eq!(alerts[0].details.as_ref().unwrap()["sources_failed"][0], "shmu");
}

#[tokio::test]
async fn test_priority_order_from_config() {
    let h = harness(|c| {
        c.composite.strategies = vec![MergeStrategy::Priority];
        c.composite.priority = vec!["shmu".to_string(), "dwd".to_string()];
    })
    .await;
    let dwd = Arc::new(FakeAdapter::new("dwd", "dmax", "202501281005", 10.0));
    let shmu = Arc::new(FakeAdapter::new("shmu", "zmax", "202501281005", 20.0));

    pipeline(&h.ctx, &[dwd, shmu]).run_once().await;

    let merged = h
        .ctx
        .cache
        .get_merged(MergeStrategy::Priority, "202501281005")
        .await
        .unwrap();
    assert_eq!(merged.value(0, 0), 20.0);
    assert_eq!(merged.fill_counts()[0], ("shmu".to_string(), 8));
}

// ============================================================================
// Spool sources
// ============================================================================

fn write_spool(dir: &Path, file: &str, value: Option<f32>) {
    std::fs::create_dir_all(dir).unwrap();
    let doc = serde_json::json!({
        "product": file.split('_').next().unwrap(),
        "timestamp": file.rsplit('_').next().unwrap(),
        "height": 2,
        "width": 4,
        "nodata": -32.5,
        "data": [value, value, value, value, -32.5, -32.5, null, null],
    });
    std::fs::write(dir.join(format!("{}.json", file)), doc.to_string()).unwrap();
}

fn spool_source(name: &str, dir: PathBuf) -> SourceSettings {
    SourceSettings {
        name: name.to_string(),
        spool_dir: dir,
        bbox: Some(native_extent().bbox),
        ..SourceSettings::default()
    }
}

#[tokio::test]
async fn test_spool_sources_end_to_end() {
    let spool = TempDir::new().unwrap();
    let dwd_dir = spool.path().join("dwd");
    let chmi_dir = spool.path().join("chmi");
    write_spool(&dwd_dir, "dmax_202501281000", Some(12.0));
    write_spool(&dwd_dir, "dmax_202501281005", Some(14.0));
    write_spool(&chmi_dir, "maxz_20250128100600", Some(30.0));

    let h = harness(|c| {
        c.composite.bbox = Some(native_extent().bbox);
        c.composite.resolution_m = 200_000.0;
        c.sources = vec![spool_source("dwd", dwd_dir), spool_source("chmi", chmi_dir)];
    })
    .await;

    let pipeline = Pipeline::from_context(h.ctx.clone()).unwrap();
    assert_eq!(pipeline.source_names(), vec!["dwd", "chmi"]);

    let summary = pipeline.run_once().await;
    assert_eq!(summary.sources_ok, vec!["dwd", "chmi"]);
    // count = 1: only the newest dwd file
    assert_eq!(summary.frames_built, 2);
    assert!(summary.artifacts.contains(&"dwd/dmax_202501281005".to_string()));
    assert!(summary.artifacts.contains(&"chmi/maxz_202501281005".to_string()));

    let merged = h
        .ctx
        .cache
        .get_merged(MergeStrategy::Max, "202501281005")
        .await
        .unwrap();
    assert_eq!(merged.contributing_sources(), &["dwd", "chmi"]);
    assert!(merged.data().iter().any(|v| *v == 30.0));
}

#[tokio::test]
async fn test_missing_spool_dir_is_source_failure() {
    let spool = TempDir::new().unwrap();
    let h = harness(|c| {
        c.retry.max_retries = 0;
        c.composite.bbox = Some(native_extent().bbox);
        c.composite.resolution_m = 200_000.0;
        c.sources = vec![spool_source("shmu", spool.path().join("missing"))];
    })
    .await;

    let summary = Pipeline::from_context(h.ctx.clone())
        .unwrap()
        .run_once()
        .await;

    assert!(summary.is_total_failure());
    assert_eq!(summary.sources_failed[0].kind, ErrorKind::Network);
}
