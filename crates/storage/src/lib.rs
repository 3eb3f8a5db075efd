//! Storage for pipeline artifacts.
//!
//! Provides:
//! - A versioned local artifact cache with TTL expiry
//! - An optional remote mirror over any `object_store` backend (MinIO/S3)
//! - Deterministic fingerprints naming every cached artifact

pub mod artifact_cache;
pub mod fingerprint;
pub mod grid_codec;
pub mod mirror;
pub mod object_store;

pub use self::object_store::{ObjectStorage, ObjectStorageConfig};
pub use artifact_cache::{
    Artifact, ArtifactCache, CacheConfig, CacheEntry, CacheOutcome, CacheStats, CleanupReport,
    EntryMeta, GridMeta, SourceStats,
};
pub use fingerprint::{Fingerprint, COMPOSITE_SOURCE};
pub use mirror::{RemoteMirror, RemoteObject};
