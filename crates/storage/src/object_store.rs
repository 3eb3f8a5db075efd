//! Object storage mirror for cached artifacts (MinIO/S3 compatible).

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{aws::AmazonS3Builder, memory::InMemory, path::Path, ObjectStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

use radar_common::{RadarError, RadarResult};

use crate::mirror::{RemoteMirror, RemoteObject};

/// Configuration for object storage connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStorageConfig {
    /// S3/MinIO endpoint URL
    pub endpoint: String,
    /// Bucket name
    pub bucket: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// AWS region (use "us-east-1" for MinIO)
    pub region: String,
    /// Allow HTTP (for local MinIO)
    pub allow_http: bool,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://minio:9000".to_string(),
            bucket: "radar-composites".to_string(),
            access_key_id: "minioadmin".to_string(),
            secret_access_key: "minioadmin".to_string(),
            region: "us-east-1".to_string(),
            allow_http: true,
        }
    }
}

/// Object storage client used as the cache mirror.
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    scheme: &'static str,
}

impl ObjectStorage {
    /// Create a new object storage client from config.
    pub fn new(config: &ObjectStorageConfig) -> RadarResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_endpoint(&config.endpoint)
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_region(&config.region);

        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| RadarError::Storage(format!("Failed to create S3 client: {}", e)))?;

        Ok(Self {
            store: Arc::new(store),
            bucket: config.bucket.clone(),
            scheme: "s3",
        })
    }

    /// Process-local store, for tests and dry runs.
    pub fn in_memory(bucket: impl Into<String>) -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            bucket: bucket.into(),
            scheme: "memory",
        }
    }
}

#[async_trait]
impl RemoteMirror for ObjectStorage {
    fn uri(&self, key: &str) -> String {
        format!("{}://{}/{}", self.scheme, self.bucket, key)
    }

    async fn exists(&self, key: &str) -> RadarResult<bool> {
        let location = Path::from(key);

        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(RadarError::Storage(format!("Failed to check {}: {}", key, e))),
        }
    }

    #[instrument(skip(self, data), fields(bucket = %self.bucket, key = %key))]
    async fn put(&self, key: &str, data: Bytes) -> RadarResult<()> {
        let location = Path::from(key);
        debug!(size = data.len(), "Writing object");

        self.store
            .put(&location, data.into())
            .await
            .map_err(|e| RadarError::Storage(format!("Failed to write {}: {}", key, e)))?;

        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket, key = %key))]
    async fn get(&self, key: &str) -> RadarResult<Bytes> {
        let location = Path::from(key);

        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| RadarError::Storage(format!("Failed to read {}: {}", key, e)))?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| RadarError::Storage(format!("Failed to read bytes: {}", e)))?;

        debug!(size = bytes.len(), "Read object");
        Ok(bytes)
    }

    async fn list(&self, prefix: &str) -> RadarResult<Vec<RemoteObject>> {
        let prefix_path = Path::from(prefix);
        let mut objects = Vec::new();

        let mut stream = self.store.list(Some(&prefix_path));
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| RadarError::Storage(format!("List failed: {}", e)))?
        {
            objects.push(RemoteObject {
                key: meta.location.to_string(),
                size: meta.size as u64,
                last_modified: meta.last_modified,
            });
        }

        Ok(objects)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket, key = %key))]
    async fn delete(&self, key: &str) -> RadarResult<()> {
        let location = Path::from(key);

        self.store
            .delete(&location)
            .await
            .map_err(|e| RadarError::Storage(format!("Failed to delete {}: {}", key, e)))?;

        Ok(())
    }
}
