//! Source adapters available to the pipeline.
//!
//! Adapters for individual weather services live outside this crate; the
//! spool adapter picks up frames an external decoder has already written.

mod spool;

use std::sync::Arc;

use anyhow::{Context, Result};
use radar_common::SourceAdapter;

use crate::config::PipelineConfig;

pub use spool::{SpoolAdapter, SpoolDocument};

/// One adapter per enabled source in the configuration.
pub fn build_adapters(config: &PipelineConfig) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    config
        .enabled_sources()
        .map(|settings| {
            SpoolAdapter::new(settings)
                .map(|a| Arc::new(a) as Arc<dyn SourceAdapter>)
                .with_context(|| format!("Cannot set up source '{}'", settings.name))
        })
        .collect()
}
