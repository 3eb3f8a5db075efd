//! Long-lived services shared by every run of the pipeline.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use resilience::{AlertManager, RetryPolicy};
use storage::{ArtifactCache, ObjectStorage, RemoteMirror};

use crate::config::PipelineConfig;

/// Constructed once at startup and passed to whatever needs it.
#[derive(Clone)]
pub struct ServiceContext {
    pub config: Arc<PipelineConfig>,
    pub alerts: Arc<AlertManager>,
    pub cache: Arc<ArtifactCache>,
    pub retry: RetryPolicy,
}

impl ServiceContext {
    /// Assemble from already-built services.
    pub fn new(config: PipelineConfig, alerts: Arc<AlertManager>, cache: Arc<ArtifactCache>) -> Self {
        let retry = config.retry_policy();
        Self {
            config: Arc::new(config),
            alerts,
            cache,
            retry,
        }
    }

    /// Build the alert manager, remote mirror and cache described by `config`.
    pub async fn from_config(config: PipelineConfig) -> Result<Self> {
        let alerts = Arc::new(
            AlertManager::new(config.alerts.threshold).with_repeat_policy(config.alerts.repeat),
        );

        let mirror: Option<Arc<dyn RemoteMirror>> = if config.cache.remote_enabled {
            let storage = ObjectStorage::new(&config.remote).with_context(|| {
                format!("Failed to connect to object storage at {}", config.remote.endpoint)
            })?;
            Some(Arc::new(storage))
        } else {
            None
        };

        let cache = ArtifactCache::open(config.cache.clone(), mirror)
            .await
            .with_context(|| {
                format!("Failed to open cache at {}", config.cache.local_dir.display())
            })?;

        info!(
            cache_dir = %config.cache.local_dir.display(),
            remote = cache.remote_enabled(),
            alert_threshold = alerts.threshold(),
            sources = config.enabled_sources().count(),
            "Service context ready"
        );

        Ok(Self::new(config, alerts, Arc::new(cache)))
    }
}
