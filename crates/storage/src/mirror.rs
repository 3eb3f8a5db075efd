//! Remote mirror abstraction for the artifact cache.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use radar_common::RadarResult;

/// One object listed from a mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Key/value object store the cache mirrors its entries into.
///
/// Keys are `/`-separated relative paths. Callers treat every error from a
/// mirror as a cache miss, never as a failure of the operation.
#[async_trait]
pub trait RemoteMirror: Send + Sync {
    /// URI of `key`, recorded in cache entries.
    fn uri(&self, key: &str) -> String;

    async fn exists(&self, key: &str) -> RadarResult<bool>;

    async fn put(&self, key: &str, data: Bytes) -> RadarResult<()>;

    async fn get(&self, key: &str) -> RadarResult<Bytes>;

    async fn list(&self, prefix: &str) -> RadarResult<Vec<RemoteObject>>;

    async fn delete(&self, key: &str) -> RadarResult<()>;
}
