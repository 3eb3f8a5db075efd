//! Pipeline configuration.
//!
//! Loaded from a YAML file. `${VAR}` and `${VAR:-default}` references are
//! expanded before parsing, then a handful of fields can be overridden from
//! the environment. Every section has defaults, so an empty file is valid.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use compositor::{ResampleMethod, TargetGrid};
use radar_common::time::DEFAULT_SYNC_INTERVAL_MINUTES;
use radar_common::{
    validate_source_name, BoundingBox, CrsCode, ErrorKind, MergeStrategy,
};
use resilience::{RepeatPolicy, RetryOn, RetryPolicy};
use storage::{CacheConfig, ObjectStorageConfig};

/// Used when neither the composite nor any source declares a WGS84 extent.
pub const DEFAULT_COMPOSITE_BBOX: BoundingBox = BoundingBox {
    min_x: 2.5,
    min_y: 45.5,
    max_x: 23.8,
    max_y: 56.0,
};

// ============================================================================
// Configuration Structures
// ============================================================================

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub cache: CacheConfig,
    /// Connection for the cache mirror; used when `cache.remote_enabled`
    pub remote: ObjectStorageConfig,
    pub retry: RetrySettings,
    pub alerts: AlertSettings,
    pub composite: CompositeSettings,
    pub sources: Vec<SourceSettings>,
}

/// Backoff for source downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    /// Error kinds worth retrying; empty retries every kind
    pub retry_on: Vec<ErrorKind>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: true,
            retry_on: Vec::new(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        let retry_on = if self.retry_on.is_empty() {
            RetryOn::AllKinds
        } else {
            RetryOn::kinds(self.retry_on.iter().copied())
        };

        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
        .with_jitter(self.jitter)
        .with_retry_on(retry_on)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    /// Consecutive failures before a source raises an alert
    pub threshold: u32,
    pub repeat: RepeatPolicy,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            threshold: resilience::alerts::DEFAULT_ALERT_THRESHOLD,
            repeat: RepeatPolicy::default(),
        }
    }
}

/// Target grid and merge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeSettings {
    /// Build merged composites; when off only per-source frames are produced
    pub enabled: bool,
    pub strategies: Vec<MergeStrategy>,
    /// Trust order for `priority` merges, most trusted first
    pub priority: Vec<String>,
    /// WGS84 extent of the target grid; defaults to the union of the
    /// enabled sources' extents
    pub bbox: Option<BoundingBox>,
    pub resolution_m: f64,
    pub resample: ResampleMethod,
    pub sync_interval_minutes: u32,
    /// Buckets with fewer frames than this are not merged
    pub min_sources: usize,
    /// A source whose newest file is older than this is treated as down;
    /// 0 disables the check
    pub max_data_age_minutes: u64,
    /// No composites are built while fewer core sources are up; 0 disables
    pub min_core_sources: usize,
}

impl Default for CompositeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            strategies: vec![MergeStrategy::Max],
            priority: Vec::new(),
            bbox: None,
            resolution_m: 500.0,
            resample: ResampleMethod::default(),
            sync_interval_minutes: DEFAULT_SYNC_INTERVAL_MINUTES,
            min_sources: 1,
            max_data_age_minutes: 0,
            min_core_sources: 0,
        }
    }
}

/// One radar source read from a spool directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub name: String,
    pub enabled: bool,
    /// Products to fetch; empty fetches whatever the source offers
    pub products: Vec<String>,
    pub spool_dir: PathBuf,
    /// Newest timestamps to fetch per product
    pub count: usize,
    /// CRS of the native grid, e.g. "EPSG:4326"
    pub crs: String,
    /// Native extent in `crs` units
    pub bbox: Option<BoundingBox>,
    /// WGS84 extent; derived from `bbox` for EPSG:4326 and EPSG:3857 grids
    pub wgs84: Option<BoundingBox>,
    /// Counts toward `composite.min_core_sources`
    pub core: bool,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            products: Vec::new(),
            spool_dir: PathBuf::from("./data/spool"),
            count: 1,
            crs: "EPSG:4326".to_string(),
            bbox: None,
            wgs84: None,
            core: true,
        }
    }
}

impl SourceSettings {
    pub fn crs_code(&self) -> CrsCode {
        CrsCode::parse(&self.crs)
    }

    /// WGS84 extent, explicit or derived from the native box.
    pub fn wgs84_extent(&self) -> Option<BoundingBox> {
        if self.wgs84.is_some() {
            return self.wgs84;
        }
        let bbox = self.bbox?;
        match self.crs_code() {
            CrsCode::Epsg4326 => Some(bbox),
            CrsCode::Epsg3857 => Some(bbox.mercator_to_wgs84()),
            CrsCode::Other(_) => None,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl PipelineConfig {
    /// Load, override from the process environment, and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Parse YAML after expanding environment references. Not validated.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content)?;
        if expanded.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&expanded).context("Invalid pipeline configuration")
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("RADAR_CACHE_DIR") {
            self.cache.local_dir = PathBuf::from(dir);
        }
        if let Some(ttl) = get("RADAR_CACHE_TTL_MINUTES") {
            self.cache.ttl_minutes = ttl
                .trim()
                .parse()
                .with_context(|| format!("RADAR_CACHE_TTL_MINUTES is not a number: {}", ttl))?;
        }
        if let Some(enabled) = get("RADAR_REMOTE_ENABLED") {
            self.cache.remote_enabled = parse_bool(&enabled)
                .with_context(|| format!("RADAR_REMOTE_ENABLED is not a boolean: {}", enabled))?;
        }
        if let Some(threshold) = get("RADAR_ALERT_THRESHOLD") {
            self.alerts.threshold = threshold.trim().parse().with_context(|| {
                format!("RADAR_ALERT_THRESHOLD is not a number: {}", threshold)
            })?;
        }
        if let Some(endpoint) = get("S3_ENDPOINT") {
            self.remote.allow_http = endpoint.starts_with("http://");
            self.remote.endpoint = endpoint;
        }
        if let Some(bucket) = get("S3_BUCKET") {
            self.remote.bucket = bucket;
        }
        if let Some(key) = get("S3_ACCESS_KEY") {
            self.remote.access_key_id = key;
        }
        if let Some(secret) = get("S3_SECRET_KEY") {
            self.remote.secret_access_key = secret;
        }
        if let Some(region) = get("S3_REGION") {
            self.remote.region = region;
        }

        Ok(())
    }

    /// Sources that take part in a run.
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceSettings> {
        self.sources.iter().filter(|s| s.enabled)
    }

    /// WGS84 extent of the composite grid.
    pub fn composite_bbox(&self) -> BoundingBox {
        if let Some(bbox) = self.composite.bbox {
            return bbox;
        }
        self.enabled_sources()
            .filter_map(SourceSettings::wgs84_extent)
            .reduce(|a, b| a.union(&b))
            .unwrap_or(DEFAULT_COMPOSITE_BBOX)
    }

    pub fn target_grid(&self) -> Result<TargetGrid> {
        let bbox = self.composite_bbox();
        TargetGrid::web_mercator(bbox, self.composite.resolution_m)
            .with_context(|| format!("Invalid composite grid over {:?}", bbox))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.policy()
    }

    /// Check everything that would otherwise fail mid-run.
    pub fn validate(&mut self) -> Result<()> {
        let mut seen = HashSet::new();
        for source in &mut self.sources {
            source.name = validate_source_name(&source.name)
                .with_context(|| format!("Invalid source in config: '{}'", source.name))?;
            anyhow::ensure!(
                seen.insert(source.name.clone()),
                "Source '{}' is configured more than once",
                source.name
            );
            anyhow::ensure!(source.count > 0, "Source '{}' has count 0", source.name);
            anyhow::ensure!(
                source.bbox.is_some(),
                "Source '{}' needs a native bbox",
                source.name
            );
            anyhow::ensure!(
                source.wgs84_extent().is_some(),
                "Source '{}' uses {} and needs an explicit wgs84 extent",
                source.name,
                source.crs
            );
            anyhow::ensure!(
                !source.spool_dir.as_os_str().is_empty(),
                "Source '{}' has no spool directory",
                source.name
            );
        }

        for name in &mut self.composite.priority {
            *name = validate_source_name(name)
                .with_context(|| format!("Invalid source in composite.priority: '{}'", name))?;
        }

        anyhow::ensure!(
            !self.composite.strategies.is_empty(),
            "composite.strategies cannot be empty"
        );
        anyhow::ensure!(
            self.composite.sync_interval_minutes > 0 && self.composite.sync_interval_minutes <= 60,
            "composite.sync_interval_minutes must be within 1..=60, got {}",
            self.composite.sync_interval_minutes
        );
        anyhow::ensure!(
            self.composite.min_sources > 0,
            "composite.min_sources must be at least 1"
        );
        let core_sources = self.enabled_sources().filter(|s| s.core).count();
        anyhow::ensure!(
            self.composite.min_core_sources <= core_sources,
            "composite.min_core_sources is {} but only {} core sources are enabled",
            self.composite.min_core_sources,
            core_sources
        );

        self.target_grid()?;

        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand `${VAR}` and `${VAR:-default}` references. Defaults apply when
/// the variable is unset or empty.
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let reference = &rest[start + 2..];
        let Some(end) = reference.find('}') else {
            let line = reference.lines().next().unwrap_or_default();
            anyhow::bail!("Unclosed variable substitution: ${{{}", line);
        };

        let expr = &reference[..end];
        let (name, default) = match expr.split_once(":-") {
            Some((name, default)) => (name.trim(), Some(default)),
            None => (expr.trim(), None),
        };
        let value = match (std::env::var(name), default) {
            (Ok(value), _) if !value.is_empty() => value,
            (_, Some(default)) => default.to_string(),
            (Ok(value), None) => value,
            (Err(_), None) => anyhow::bail!("Environment variable {} not set", name),
        };
        result.push_str(&value);
        rest = &reference[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_expand_default() {
        let out = expand_env_vars("dir: ${RADAR_TEST_SURELY_UNSET_1:-/tmp/cache}").unwrap();
        assert_eq!(out, "dir: /tmp/cache");
    }

    #[test]
    fn test_expand_missing_var_fails() {
        assert!(expand_env_vars("dir: ${RADAR_TEST_SURELY_UNSET_2}").is_err());
        assert!(expand_env_vars("dir: ${UNCLOSED").is_err());
    }

    #[test]
    fn test_expand_adjacent_references() {
        let out = expand_env_vars(
            "${RADAR_TEST_SURELY_UNSET_3:-/srv}/${RADAR_TEST_SURELY_UNSET_4:-spool}/dwd",
        )
        .unwrap();
        assert_eq!(out, "/srv/spool/dwd");
    }

    #[test]
    fn test_text_without_references_untouched() {
        let text = "cost: $5\nname: dwd";
        assert_eq!(expand_env_vars(text).unwrap(), text);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("RADAR_CACHE_DIR", "/var/cache/radar"),
            ("RADAR_CACHE_TTL_MINUTES", "0"),
            ("RADAR_REMOTE_ENABLED", "yes"),
            ("RADAR_ALERT_THRESHOLD", "5"),
            ("S3_ENDPOINT", "https://s3.example.net"),
            ("S3_BUCKET", "composites"),
            ("S3_REGION", "eu-central-1"),
            ("S3_ACCESS_KEY", ""),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.cache.local_dir, PathBuf::from("/var/cache/radar"));
        assert_eq!(config.cache.ttl_minutes, 0);
        assert!(config.cache.remote_enabled);
        assert_eq!(config.alerts.threshold, 5);
        assert_eq!(config.remote.endpoint, "https://s3.example.net");
        assert!(!config.remote.allow_http);
        assert_eq!(config.remote.bucket, "composites");
        assert_eq!(config.remote.region, "eu-central-1");
        // Empty values leave the default in place
        assert_eq!(config.remote.access_key_id, "minioadmin");
    }

    #[test]
    fn test_bad_override_is_error() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_overrides(|k| (k == "RADAR_REMOTE_ENABLED").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("RADAR_REMOTE_ENABLED"));
    }

    #[test]
    fn test_retry_settings_policy() {
        let policy = RetrySettings {
            max_retries: 2,
            base_delay_ms: 50,
            max_delay_ms: 400,
            jitter: false,
            retry_on: vec![ErrorKind::Network],
        }
        .policy();

        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(50));
        assert!(policy.retry_on.matches(ErrorKind::Network));
        assert!(!policy.retry_on.matches(ErrorKind::Processing));

        assert!(RetrySettings::default().policy().retry_on.matches(ErrorKind::Processing));
    }
}
