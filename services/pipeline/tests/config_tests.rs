//! Loading and validating pipeline configuration files.

use std::io::Write;
use std::path::PathBuf;

use tempfile::NamedTempFile;

use radar_common::{BoundingBox, ErrorKind, MergeStrategy};
use radar_pipeline::config::DEFAULT_COMPOSITE_BBOX;
use radar_pipeline::PipelineConfig;
use resilience::RepeatPolicy;

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

fn load(yaml: &str) -> anyhow::Result<PipelineConfig> {
    let file = write_config(yaml);
    PipelineConfig::load(file.path())
}

const FULL: &str = r#"
cache:
  local_dir: ${RADAR_TEST_CONFIG_UNSET_DIR:-/tmp/radar-cache}
  ttl_minutes: 90
retry:
  max_retries: 5
  base_delay_ms: 200
  retry_on: [network, timeout]
alerts:
  threshold: 4
  repeat: every_failure
composite:
  strategies: [max, priority]
  priority: [SHMU, dwd]
  resolution_m: 1000
  max_data_age_minutes: 30
  min_core_sources: 1
sources:
  - name: DWD
    products: [dmax]
    spool_dir: /spool/dwd
    bbox: { min_x: 2.0, min_y: 46.0, max_x: 16.0, max_y: 56.0 }
  - name: shmu
    crs: EPSG:3857
    core: false
    spool_dir: /spool/shmu
    bbox: { min_x: 1500000.0, min_y: 5900000.0, max_x: 2600000.0, max_y: 6500000.0 }
  - name: imgw
    enabled: false
    crs: "+proj=stere +lat_0=90 +lon_0=19"
    spool_dir: /spool/imgw
    bbox: { min_x: 0.0, min_y: 0.0, max_x: 900000.0, max_y: 900000.0 }
    wgs84: { min_x: 13.0, min_y: 48.0, max_x: 26.0, max_y: 56.5 }
"#;

#[test]
fn test_load_full_config() {
    let config = load(FULL).unwrap();

    assert_eq!(config.cache.local_dir, PathBuf::from("/tmp/radar-cache"));
    assert_eq!(config.cache.ttl_minutes, 90);
    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(config.retry.retry_on, vec![ErrorKind::Network, ErrorKind::Timeout]);
    assert_eq!(config.alerts.threshold, 4);
    assert_eq!(config.alerts.repeat, RepeatPolicy::EveryFailure);
    assert_eq!(
        config.composite.strategies,
        vec![MergeStrategy::Max, MergeStrategy::Priority]
    );

    // Names are normalized during validation
    assert_eq!(config.composite.priority, vec!["shmu", "dwd"]);
    assert_eq!(config.sources[0].name, "dwd");

    let enabled: Vec<&str> = config.enabled_sources().map(|s| s.name.as_str()).collect();
    assert_eq!(enabled, vec!["dwd", "shmu"]);
    assert_eq!(config.composite.max_data_age_minutes, 30);
    assert!(config.sources[0].core);
    assert!(!config.sources[1].core);

    let policy = config.retry_policy();
    assert_eq!(policy.max_retries, 5);
    assert!(!policy.retry_on.matches(ErrorKind::Processing));
}

#[test]
fn test_composite_bbox_is_union_of_enabled_sources() {
    let config = load(FULL).unwrap();
    let bbox = config.composite_bbox();

    assert_eq!(bbox.min_x, 2.0);
    assert_eq!(bbox.max_y, 56.0);
    // shmu's Mercator box reaches past dwd to the east
    assert!(bbox.max_x > 23.0 && bbox.max_x < 23.5);
    // The disabled imgw source does not widen the grid
    assert!(bbox.max_x < 26.0);

    let grid = config.target_grid().unwrap();
    let (dx, _) = grid.resolution();
    assert!((dx - 1000.0).abs() < 1e-6);
}

#[test]
fn test_empty_file_is_all_defaults() {
    let config = load("").unwrap();

    assert!(config.sources.is_empty());
    assert_eq!(config.alerts.threshold, 3);
    assert!(config.composite.enabled);
    assert_eq!(config.composite.strategies, vec![MergeStrategy::Max]);
    assert_eq!(config.composite.sync_interval_minutes, 5);
    assert_eq!(config.composite_bbox(), DEFAULT_COMPOSITE_BBOX);
    assert!(!config.cache.remote_enabled);
}

#[test]
fn test_explicit_composite_bbox_wins() {
    let config = load(
        "composite:\n  bbox: { min_x: 16.0, min_y: 47.5, max_x: 23.0, max_y: 50.0 }\n",
    )
    .unwrap();
    assert_eq!(
        config.composite_bbox(),
        BoundingBox::new(16.0, 47.5, 23.0, 50.0)
    );
}

#[test]
fn test_rejects_invalid_source_name() {
    let err = load("sources:\n  - name: ../etc\n    bbox: { min_x: 0, min_y: 0, max_x: 1, max_y: 1 }\n")
        .unwrap_err();
    assert!(format!("{:#}", err).contains("Invalid source"));
}

#[test]
fn test_rejects_duplicate_sources() {
    let yaml = r#"
sources:
  - name: dwd
    bbox: { min_x: 0, min_y: 0, max_x: 1, max_y: 1 }
  - name: DWD
    bbox: { min_x: 0, min_y: 0, max_x: 1, max_y: 1 }
"#;
    let err = load(yaml).unwrap_err();
    assert!(err.to_string().contains("more than once"));
}

#[test]
fn test_rejects_source_without_extent() {
    let err = load("sources:\n  - name: arso\n").unwrap_err();
    assert!(err.to_string().contains("bbox"));

    let yaml = r#"
sources:
  - name: imgw
    crs: "+proj=stere +lat_0=90"
    bbox: { min_x: 0, min_y: 0, max_x: 1, max_y: 1 }
"#;
    let err = load(yaml).unwrap_err();
    assert!(err.to_string().contains("wgs84"));
}

#[test]
fn test_rejects_bad_composite_settings() {
    assert!(load("composite:\n  strategies: []\n").is_err());
    assert!(load("composite:\n  priority: [\"x\"]\n").is_err());
    assert!(load("composite:\n  sync_interval_minutes: 0\n").is_err());
    // Over MAX_GRID_DIMENSION pixels wide at this resolution
    assert!(load("composite:\n  resolution_m: 100\n").is_err());
}

#[test]
fn test_rejects_unreachable_core_minimum() {
    let yaml = r#"
composite:
  min_core_sources: 2
sources:
  - name: dwd
    bbox: { min_x: 0, min_y: 0, max_x: 1, max_y: 1 }
  - name: arso
    core: false
    bbox: { min_x: 0, min_y: 0, max_x: 1, max_y: 1 }
"#;
    let err = load(yaml).unwrap_err();
    assert!(err.to_string().contains("min_core_sources"));
}

#[test]
fn test_rejects_malformed_yaml() {
    let err = load("retry: [unclosed").unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse config file"));
}

#[test]
fn test_missing_file() {
    let err = PipelineConfig::load(std::path::Path::new("/nonexistent/pipeline.yaml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
