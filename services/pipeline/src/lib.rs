//! Radar composite pipeline service.
//!
//! Wires the library crates into one batch pass:
//! fetch (with retry) -> decode -> reproject -> cache -> merge -> cache.

pub mod config;
pub mod context;
pub mod logging;
pub mod pipeline;
pub mod sources;

pub use config::PipelineConfig;
pub use context::ServiceContext;
pub use pipeline::{Pipeline, RunSummary, SourceFailure};
pub use sources::SpoolAdapter;
