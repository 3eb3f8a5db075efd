//! Versioned, TTL-bounded artifact cache with an optional remote mirror.
//!
//! Layout on disk:
//!
//! ```text
//! {local_dir}/{source}/{subject}_{timestamp}_{version}.bin   payload
//! {local_dir}/{source}/{subject}_{timestamp}_{version}.json  EntryMeta sidecar
//! ```
//!
//! The sidecar is written last; an entry without one is incomplete and is
//! never served. The mirror uses the same relative layout under
//! `remote_prefix`.
//!
//! Access failures (unreadable files, mirror outages, stale versions) are
//! reported as misses. Only writes and maintenance return errors.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, instrument, warn};

use radar_common::{
    validate_source_name, GridExtent, MergeStrategy, MergedFrame, RadarError, RadarResult,
    ReprojectedFrame, CACHE_VERSION,
};

use crate::fingerprint::{validate_version, Fingerprint};
use crate::grid_codec::{decode_grid, encode_grid};
use crate::mirror::RemoteMirror;

const DATA_EXT: &str = "bin";
const META_EXT: &str = "json";
const TMP_EXT: &str = "tmp";
const MAX_TTL_MINUTES: u64 = 10 * 365 * 24 * 60;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory of the local cache
    pub local_dir: PathBuf,
    /// Entries older than this are expired; 0 disables expiry
    pub ttl_minutes: u64,
    /// Mirror entries to the remote store when one is attached
    pub remote_enabled: bool,
    /// Key prefix for mirrored entries
    pub remote_prefix: String,
    /// Format version stamped into every fingerprint
    pub format_version: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_dir: PathBuf::from("./data/cache"),
            ttl_minutes: 60,
            remote_enabled: false,
            remote_prefix: "radar-cache".to_string(),
            format_version: CACHE_VERSION.to_string(),
        }
    }
}

/// Grid shape and provenance stored alongside gridded payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridMeta {
    pub height: usize,
    pub width: usize,
    pub extent: GridExtent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<MergeStrategy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contributing_sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fill_counts: Vec<(String, usize)>,
}

/// Sidecar metadata for one cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMeta {
    pub fingerprint: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub ttl_minutes: u64,
    #[serde(default)]
    pub remote_uri: Option<String>,
    pub size_bytes: u64,
    #[serde(default)]
    pub grid: Option<GridMeta>,
}

/// A stored entry, as returned by [`ArtifactCache::put`].
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub local_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub ttl_minutes: u64,
    pub remote_uri: Option<String>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        expired(self.created_at, self.ttl_minutes, now)
    }
}

/// Whether [`ArtifactCache::get_or_build`] served or produced the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Built,
}

/// Result of an expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub local_removed: usize,
    pub remote_removed: usize,
}

/// Per-source usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub entries: usize,
    pub bytes: u64,
}

/// Local cache usage, plus the mirror's when one is attached.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub by_source: BTreeMap<String, SourceStats>,
    pub remote_enabled: bool,
    /// Mirrored payloads under `remote_prefix`; absent when the listing failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<SourceStats>,
    pub format_version: String,
}

/// A value the cache can store.
pub trait Artifact: Sized {
    fn encode(&self) -> RadarResult<(Bytes, Option<GridMeta>)>;

    fn decode(fingerprint: &Fingerprint, payload: Bytes, meta: &EntryMeta) -> RadarResult<Self>;
}

impl Artifact for Bytes {
    fn encode(&self) -> RadarResult<(Bytes, Option<GridMeta>)> {
        Ok((self.clone(), None))
    }

    fn decode(_fingerprint: &Fingerprint, payload: Bytes, _meta: &EntryMeta) -> RadarResult<Self> {
        Ok(payload)
    }
}

impl Artifact for ReprojectedFrame {
    fn encode(&self) -> RadarResult<(Bytes, Option<GridMeta>)> {
        let meta = GridMeta {
            height: self.height,
            width: self.width,
            extent: self.extent.clone(),
            strategy: None,
            contributing_sources: Vec::new(),
            fill_counts: Vec::new(),
        };
        Ok((encode_grid(&self.data), Some(meta)))
    }

    fn decode(fingerprint: &Fingerprint, payload: Bytes, meta: &EntryMeta) -> RadarResult<Self> {
        let grid = grid_meta(meta)?;
        let data = decode_grid(&payload, grid.height * grid.width)?;

        Ok(ReprojectedFrame {
            source: fingerprint.source().to_string(),
            product: fingerprint.subject().to_string(),
            timestamp: fingerprint.timestamp().to_string(),
            data,
            extent: grid.extent.clone(),
            height: grid.height,
            width: grid.width,
        })
    }
}

impl Artifact for MergedFrame {
    fn encode(&self) -> RadarResult<(Bytes, Option<GridMeta>)> {
        let (height, width) = self.dimensions();
        let meta = GridMeta {
            height,
            width,
            extent: self.extent().clone(),
            strategy: Some(self.strategy()),
            contributing_sources: self.contributing_sources().to_vec(),
            fill_counts: self.fill_counts().to_vec(),
        };
        Ok((encode_grid(self.data()), Some(meta)))
    }

    fn decode(fingerprint: &Fingerprint, payload: Bytes, meta: &EntryMeta) -> RadarResult<Self> {
        let grid = grid_meta(meta)?;
        let strategy = grid
            .strategy
            .ok_or_else(|| RadarError::cache(format!("{} has no merge strategy", fingerprint)))?;
        let data = decode_grid(&payload, grid.height * grid.width)?;

        Ok(MergedFrame::new(
            fingerprint.timestamp(),
            data,
            grid.extent.clone(),
            (grid.height, grid.width),
            strategy,
            grid.contributing_sources.clone(),
            grid.fill_counts.clone(),
        ))
    }
}

fn grid_meta(meta: &EntryMeta) -> RadarResult<&GridMeta> {
    meta.grid
        .as_ref()
        .ok_or_else(|| RadarError::cache(format!("{} has no grid metadata", meta.fingerprint)))
}

fn expired(created_at: DateTime<Utc>, ttl_minutes: u64, now: DateTime<Utc>) -> bool {
    if ttl_minutes == 0 {
        return false;
    }
    let minutes = ttl_minutes.min(MAX_TTL_MINUTES) as i64;
    now - created_at > Duration::minutes(minutes)
}

type LockMap = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Exclusive hold on one fingerprint's files.
///
/// Dropping it, including when the owning future is cancelled, releases the
/// lock and removes the map entry once nobody else refers to it.
struct FingerprintLock<'a> {
    locks: &'a LockMap,
    key: String,
    lock: Arc<AsyncMutex<()>>,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for FingerprintLock<'_> {
    fn drop(&mut self) {
        self.held.take();
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // The map and this guard hold the only references
        let idle = locks
            .get(&self.key)
            .is_some_and(|l| Arc::ptr_eq(l, &self.lock) && Arc::strong_count(l) == 2);
        if idle {
            locks.remove(&self.key);
        }
    }
}

/// Local artifact cache, optionally mirrored to object storage.
pub struct ArtifactCache {
    config: CacheConfig,
    mirror: Option<Arc<dyn RemoteMirror>>,
    /// Writes take it shared, maintenance takes it exclusive
    maintenance: RwLock<()>,
    /// Serializes writes and builds per fingerprint
    fingerprint_locks: LockMap,
}

impl ArtifactCache {
    /// Open the cache, creating the directory and sweeping expired entries.
    ///
    /// The mirror is only used when `config.remote_enabled` is set.
    #[instrument(skip(config, mirror), fields(dir = %config.local_dir.display()))]
    pub async fn open(
        config: CacheConfig,
        mirror: Option<Arc<dyn RemoteMirror>>,
    ) -> RadarResult<Self> {
        validate_version(&config.format_version)?;

        fs::create_dir_all(&config.local_dir).await.map_err(|e| {
            RadarError::cache(format!(
                "cannot create cache dir {}: {}",
                config.local_dir.display(),
                e
            ))
        })?;

        let mirror = if config.remote_enabled {
            if mirror.is_none() {
                warn!("Remote mirror enabled but none configured, using local cache only");
            }
            mirror
        } else {
            None
        };

        let cache = Self {
            config,
            mirror,
            maintenance: RwLock::new(()),
            fingerprint_locks: Mutex::new(HashMap::new()),
        };

        let report = cache.cleanup_expired().await?;
        info!(
            local_removed = report.local_removed,
            remote_removed = report.remote_removed,
            remote = cache.mirror.is_some(),
            "Artifact cache ready"
        );

        Ok(cache)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn remote_enabled(&self) -> bool {
        self.mirror.is_some()
    }

    /// Fingerprint under the running format version.
    pub fn fingerprint(&self, source: &str, subject: &str, timestamp: &str) -> RadarResult<Fingerprint> {
        Fingerprint::new(source, subject, timestamp, &self.config.format_version)
    }

    /// Fingerprint of a composite under the running format version.
    pub fn composite_fingerprint(
        &self,
        strategy: MergeStrategy,
        timestamp: &str,
    ) -> RadarResult<Fingerprint> {
        Fingerprint::composite(strategy, timestamp, &self.config.format_version)
    }

    fn source_dir(&self, source: &str) -> PathBuf {
        self.config.local_dir.join(source)
    }

    fn data_path(&self, fp: &Fingerprint) -> PathBuf {
        self.source_dir(fp.source()).join(fp.data_file())
    }

    fn meta_path(&self, fp: &Fingerprint) -> PathBuf {
        self.source_dir(fp.source()).join(fp.meta_file())
    }

    fn remote_key(&self, source: &str, file: &str) -> String {
        format!("{}/{}/{}", self.config.remote_prefix.trim_end_matches('/'), source, file)
    }

    /// Whether `filename` is cached for `source`, locally or on the mirror.
    ///
    /// Mirror errors count as "not found".
    pub async fn exists(&self, source: &str, filename: &str) -> bool {
        let Ok(source) = validate_source_name(source) else {
            return false;
        };
        if filename.is_empty()
            || filename.contains("..")
            || filename.contains('/')
            || filename.contains('\\')
        {
            return false;
        }

        if fs::try_exists(self.source_dir(&source).join(filename))
            .await
            .unwrap_or(false)
        {
            return true;
        }

        match &self.mirror {
            Some(mirror) => match mirror.exists(&self.remote_key(&source, filename)).await {
                Ok(found) => found,
                Err(e) => {
                    debug!(source = %source, file = %filename, error = %e, "Mirror lookup failed");
                    false
                }
            },
            None => false,
        }
    }

    /// Whether a live entry for `fp` is available.
    pub async fn contains(&self, fp: &Fingerprint) -> bool {
        self.get::<Bytes>(fp).await.is_some()
    }

    async fn lock_fingerprint(&self, fp: &Fingerprint) -> FingerprintLock<'_> {
        let key = fp.to_string();
        let lock = {
            let mut locks = self
                .fingerprint_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(key.clone()).or_default().clone()
        };

        let mut guard = FingerprintLock {
            locks: &self.fingerprint_locks,
            key,
            lock,
            held: None,
        };
        let held = guard.lock.clone().lock_owned().await;
        guard.held = Some(held);
        guard
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.fingerprint_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Store an artifact. Writers of the same fingerprint are serialized.
    #[instrument(skip(self, artifact), fields(fingerprint = %fp))]
    pub async fn put<A: Artifact>(&self, fp: &Fingerprint, artifact: &A) -> RadarResult<CacheEntry> {
        let held = self.lock_fingerprint(fp).await;
        self.store(fp, artifact, &held).await
    }

    /// Write an entry; the caller holds the fingerprint's lock.
    async fn store<A: Artifact>(
        &self,
        fp: &Fingerprint,
        artifact: &A,
        _held: &FingerprintLock<'_>,
    ) -> RadarResult<CacheEntry> {
        if fp.version() != self.config.format_version {
            return Err(RadarError::cache(format!(
                "fingerprint {} does not match cache version {}",
                fp, self.config.format_version
            )));
        }

        let (payload, grid) = artifact.encode()?;
        let _shared = self.maintenance.read().await;

        let dir = self.source_dir(fp.source());
        fs::create_dir_all(&dir).await?;
        let data_path = self.data_path(fp);
        write_atomic(&data_path, &payload).await?;

        let mut meta = EntryMeta {
            fingerprint: fp.to_string(),
            version: fp.version().to_string(),
            created_at: Utc::now(),
            ttl_minutes: self.config.ttl_minutes,
            remote_uri: None,
            size_bytes: payload.len() as u64,
            grid,
        };

        if let Some(mirror) = &self.mirror {
            let data_key = self.remote_key(fp.source(), &fp.data_file());
            let meta_key = self.remote_key(fp.source(), &fp.meta_file());
            meta.remote_uri = Some(mirror.uri(&data_key));

            let uploaded = match mirror.put(&data_key, payload.clone()).await {
                Ok(()) => {
                    let body = Bytes::from(serde_json::to_vec(&meta)?);
                    mirror.put(&meta_key, body).await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = uploaded {
                warn!(fingerprint = %fp, error = %e, "Mirror upload failed, keeping local copy only");
                meta.remote_uri = None;
            }
        }

        write_atomic(&self.meta_path(fp), &serde_json::to_vec_pretty(&meta)?).await?;
        debug!(size = meta.size_bytes, remote = meta.remote_uri.is_some(), "Cached artifact");

        Ok(CacheEntry {
            fingerprint: fp.clone(),
            local_path: data_path,
            created_at: meta.created_at,
            ttl_minutes: meta.ttl_minutes,
            remote_uri: meta.remote_uri,
        })
    }

    /// Fetch an artifact. Any access problem is a miss.
    pub async fn get<A: Artifact>(&self, fp: &Fingerprint) -> Option<A> {
        self.lookup(fp, None).await
    }

    /// `held` is the caller's lock on `fp`, if it has one; a mirror restore
    /// takes the lock otherwise.
    async fn lookup<A: Artifact>(&self, fp: &Fingerprint, held: Option<&FingerprintLock<'_>>) -> Option<A> {
        if fp.version() != self.config.format_version {
            return None;
        }

        let (payload, meta) = match self.read_local(fp).await {
            Some(found) => found,
            None => self.read_remote(fp, held).await?,
        };

        match A::decode(fp, payload, &meta) {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                warn!(fingerprint = %fp, error = %e, "Cached artifact is unreadable, treating as miss");
                None
            }
        }
    }

    async fn read_local(&self, fp: &Fingerprint) -> Option<(Bytes, EntryMeta)> {
        let raw = fs::read(self.meta_path(fp)).await.ok()?;
        let meta: EntryMeta = match serde_json::from_slice(&raw) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(fingerprint = %fp, error = %e, "Corrupt cache sidecar");
                return None;
            }
        };

        if !self.is_live(fp, &meta) {
            return None;
        }

        match fs::read(self.data_path(fp)).await {
            Ok(payload) => Some((Bytes::from(payload), meta)),
            Err(e) => {
                warn!(fingerprint = %fp, error = %e, "Cache payload missing");
                None
            }
        }
    }

    async fn read_remote(
        &self,
        fp: &Fingerprint,
        held: Option<&FingerprintLock<'_>>,
    ) -> Option<(Bytes, EntryMeta)> {
        let mirror = self.mirror.as_ref()?;

        match self.fetch_remote(mirror.as_ref(), fp).await {
            Ok(Some((payload, meta))) => {
                debug!(fingerprint = %fp, "Restored artifact from mirror");
                let restored = match held {
                    Some(held) => self.restore_local(fp, &payload, &meta, held).await,
                    None => {
                        let held = self.lock_fingerprint(fp).await;
                        self.restore_local(fp, &payload, &meta, &held).await
                    }
                };
                if let Err(e) = restored {
                    warn!(fingerprint = %fp, error = %e, "Failed to restore mirrored artifact locally");
                }
                Some((payload, meta))
            }
            Ok(None) => None,
            Err(e) => {
                debug!(fingerprint = %fp, error = %e, "Mirror miss");
                None
            }
        }
    }

    async fn fetch_remote(
        &self,
        mirror: &dyn RemoteMirror,
        fp: &Fingerprint,
    ) -> RadarResult<Option<(Bytes, EntryMeta)>> {
        let raw = mirror.get(&self.remote_key(fp.source(), &fp.meta_file())).await?;
        let meta: EntryMeta = serde_json::from_slice(&raw)?;
        if !self.is_live(fp, &meta) {
            return Ok(None);
        }
        let payload = mirror.get(&self.remote_key(fp.source(), &fp.data_file())).await?;
        Ok(Some((payload, meta)))
    }

    async fn restore_local(
        &self,
        fp: &Fingerprint,
        payload: &[u8],
        meta: &EntryMeta,
        _held: &FingerprintLock<'_>,
    ) -> RadarResult<()> {
        let _shared = self.maintenance.read().await;
        fs::create_dir_all(self.source_dir(fp.source())).await?;
        write_atomic(&self.data_path(fp), payload).await?;
        write_atomic(&self.meta_path(fp), &serde_json::to_vec_pretty(meta)?).await
    }

    fn is_live(&self, fp: &Fingerprint, meta: &EntryMeta) -> bool {
        if meta.version != self.config.format_version || meta.fingerprint != fp.to_string() {
            debug!(fingerprint = %fp, found = %meta.fingerprint, "Cache version mismatch");
            return false;
        }
        !expired(meta.created_at, self.config.ttl_minutes, Utc::now())
    }

    /// Return the cached artifact for `fp`, or build and store it.
    ///
    /// Concurrent callers for the same fingerprint are serialized so the
    /// builder runs at most once; later callers are served the stored result.
    /// A failed build stores nothing and the error goes to that caller only.
    /// Failing to store a built artifact is logged and the artifact returned.
    pub async fn get_or_build<A, F, Fut>(
        &self,
        fp: &Fingerprint,
        build: F,
    ) -> RadarResult<(A, CacheOutcome)>
    where
        A: Artifact,
        F: FnOnce() -> Fut,
        Fut: Future<Output = RadarResult<A>>,
    {
        self.get_or_build_if(fp, |_: &A| true, build).await
    }

    /// Like [`get_or_build`](Self::get_or_build), but a cached artifact that
    /// fails `usable` is treated as a miss: it is rebuilt and overwritten.
    pub async fn get_or_build_if<A, U, F, Fut>(
        &self,
        fp: &Fingerprint,
        usable: U,
        build: F,
    ) -> RadarResult<(A, CacheOutcome)>
    where
        A: Artifact,
        U: Fn(&A) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = RadarResult<A>>,
    {
        if let Some(hit) = self.get::<A>(fp).await.filter(|a| usable(a)) {
            return Ok((hit, CacheOutcome::Hit));
        }

        let held = self.lock_fingerprint(fp).await;

        if let Some(hit) = self.lookup::<A>(fp, Some(&held)).await {
            if usable(&hit) {
                return Ok((hit, CacheOutcome::Hit));
            }
            debug!(fingerprint = %fp, "Cached artifact rejected, rebuilding");
        }

        let artifact = build().await?;
        if let Err(e) = self.store(fp, &artifact, &held).await {
            warn!(fingerprint = %fp, error = %e, "Failed to cache built artifact");
        }
        Ok((artifact, CacheOutcome::Built))
    }

    /// Store a reprojected frame under `(source, product, timestamp)`.
    pub async fn put_frame(&self, frame: &ReprojectedFrame) -> RadarResult<CacheEntry> {
        let fp = self.fingerprint(&frame.source, &frame.product, &frame.timestamp)?;
        self.put(&fp, frame).await
    }

    /// Fetch a reprojected frame. Invalid keys are misses.
    pub async fn get_frame(
        &self,
        source: &str,
        product: &str,
        timestamp: &str,
    ) -> Option<ReprojectedFrame> {
        let fp = self.fingerprint(source, product, timestamp).ok()?;
        self.get(&fp).await
    }

    /// Store a composite under `(strategy, timestamp)`.
    pub async fn put_merged(&self, frame: &MergedFrame) -> RadarResult<CacheEntry> {
        let fp = self.composite_fingerprint(frame.strategy(), frame.timestamp())?;
        self.put(&fp, frame).await
    }

    pub async fn get_merged(&self, strategy: MergeStrategy, timestamp: &str) -> Option<MergedFrame> {
        let fp = self.composite_fingerprint(strategy, timestamp).ok()?;
        self.get(&fp).await
    }

    /// Timestamps with live entries for `source`, newest first.
    ///
    /// Merges local and mirrored listings; a failing mirror contributes
    /// nothing.
    pub async fn available_timestamps(
        &self,
        source: &str,
        subject: Option<&str>,
    ) -> RadarResult<Vec<String>> {
        let source = validate_source_name(source)?;
        let subject = subject.map(|s| s.trim().to_lowercase());
        let now = Utc::now();
        let mut found = BTreeSet::new();

        let wanted = |fp: &Fingerprint| {
            fp.version() == self.config.format_version
                && subject.as_deref().map_or(true, |s| fp.subject() == s)
        };

        for meta_path in list_files(&self.source_dir(&source), META_EXT).await? {
            let Some(fp) = stem_of(&meta_path).and_then(|stem| Fingerprint::from_stem(&source, &stem))
            else {
                continue;
            };
            if !wanted(&fp) {
                continue;
            }
            match read_meta(&meta_path).await {
                Some(meta) if !expired(meta.created_at, self.config.ttl_minutes, now) => {
                    found.insert(fp.timestamp().to_string());
                }
                _ => {}
            }
        }

        if let Some(mirror) = &self.mirror {
            let prefix = self.remote_key(&source, "");
            match mirror.list(prefix.trim_end_matches('/')).await {
                Ok(objects) => {
                    for obj in objects {
                        let Some(name) = obj.key.rsplit('/').next() else {
                            continue;
                        };
                        let Some(stem) = name.strip_suffix(".json") else {
                            continue;
                        };
                        let Some(fp) = Fingerprint::from_stem(&source, stem) else {
                            continue;
                        };
                        if wanted(&fp) && !expired(obj.last_modified, self.config.ttl_minutes, now) {
                            found.insert(fp.timestamp().to_string());
                        }
                    }
                }
                Err(e) => warn!(source = %source, error = %e, "Mirror listing failed"),
            }
        }

        Ok(found.into_iter().rev().collect())
    }

    /// Remove expired and incomplete entries locally and on the mirror.
    #[instrument(skip(self))]
    pub async fn cleanup_expired(&self) -> RadarResult<CleanupReport> {
        let _exclusive = self.maintenance.write().await;
        let now = Utc::now();
        let mut report = CleanupReport::default();

        for dir in list_dirs(&self.config.local_dir).await? {
            for meta_path in list_files(&dir, META_EXT).await? {
                let stale = match read_meta(&meta_path).await {
                    Some(meta) => expired(meta.created_at, self.config.ttl_minutes, now),
                    None => true,
                };
                if stale {
                    remove_quietly(&meta_path).await;
                    remove_quietly(&meta_path.with_extension(DATA_EXT)).await;
                    report.local_removed += 1;
                }
            }

            // Payloads whose sidecar never landed, and interrupted writes
            for data_path in list_files(&dir, DATA_EXT).await? {
                if !fs::try_exists(data_path.with_extension(META_EXT)).await.unwrap_or(false) {
                    remove_quietly(&data_path).await;
                    report.local_removed += 1;
                }
            }
            for tmp in list_files(&dir, TMP_EXT).await? {
                remove_quietly(&tmp).await;
            }
        }

        if let Some(mirror) = &self.mirror {
            match mirror.list(self.config.remote_prefix.trim_end_matches('/')).await {
                Ok(objects) => {
                    for obj in objects {
                        if !expired(obj.last_modified, self.config.ttl_minutes, now) {
                            continue;
                        }
                        match mirror.delete(&obj.key).await {
                            Ok(()) => {
                                if obj.key.ends_with(".json") {
                                    report.remote_removed += 1;
                                }
                            }
                            Err(e) => warn!(key = %obj.key, error = %e, "Failed to delete mirrored object"),
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Mirror listing failed during cleanup"),
            }
        }

        if report.local_removed > 0 || report.remote_removed > 0 {
            info!(
                local_removed = report.local_removed,
                remote_removed = report.remote_removed,
                "Expired cache entries removed"
            );
        }
        Ok(report)
    }

    /// Remove every local entry. Returns the number of entries removed.
    ///
    /// The mirror is left untouched.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> RadarResult<usize> {
        let _exclusive = self.maintenance.write().await;
        let mut removed = 0;
        for dir in list_dirs(&self.config.local_dir).await? {
            removed += clear_dir(&dir).await?;
        }
        info!(removed, "Cache cleared");
        Ok(removed)
    }

    /// Remove every local entry of one source.
    #[instrument(skip(self))]
    pub async fn clear_source(&self, source: &str) -> RadarResult<usize> {
        let source = validate_source_name(source)?;
        let _exclusive = self.maintenance.write().await;
        let dir = self.source_dir(&source);
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(0);
        }
        let removed = clear_dir(&dir).await?;
        info!(source = %source, removed, "Source cache cleared");
        Ok(removed)
    }

    /// Entry counts and sizes of the local cache.
    pub async fn stats(&self) -> RadarResult<CacheStats> {
        let mut stats = CacheStats {
            remote_enabled: self.mirror.is_some(),
            format_version: self.config.format_version.clone(),
            ..CacheStats::default()
        };

        for dir in list_dirs(&self.config.local_dir).await? {
            let Some(source) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let mut per_source = SourceStats::default();
            for data_path in list_files(&dir, DATA_EXT).await? {
                per_source.entries += 1;
                per_source.bytes += fs::metadata(&data_path).await.map(|m| m.len()).unwrap_or(0);
            }
            if per_source.entries > 0 {
                stats.entries += per_source.entries;
                stats.total_bytes += per_source.bytes;
                stats.by_source.insert(source, per_source);
            }
        }

        if let Some(mirror) = &self.mirror {
            match mirror.list(self.config.remote_prefix.trim_end_matches('/')).await {
                Ok(objects) => {
                    let remote = objects
                        .iter()
                        .filter(|obj| obj.key.ends_with(".bin"))
                        .fold(SourceStats::default(), |acc, obj| SourceStats {
                            entries: acc.entries + 1,
                            bytes: acc.bytes + obj.size,
                        });
                    stats.remote = Some(remote);
                }
                Err(e) => warn!(error = %e, "Mirror listing failed, reporting local usage only"),
            }
        }

        Ok(stats)
    }
}

/// Stage under a name unique to this write, then rename into place.
async fn write_atomic(path: &Path, contents: &[u8]) -> RadarResult<()> {
    let tmp = path.with_extension(format!(
        "{}.{}-{}.{}",
        path.extension().and_then(|e| e.to_str()).unwrap_or(""),
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed),
        TMP_EXT
    ));
    if let Err(e) = fs::write(&tmp, contents).await {
        remove_quietly(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        remove_quietly(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn read_meta(path: &Path) -> Option<EntryMeta> {
    let raw = fs::read(path).await.ok()?;
    serde_json::from_slice(&raw).ok()
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove cache file");
        }
    }
}

fn stem_of(path: &Path) -> Option<String> {
    path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
}

async fn list_dirs(root: &Path) -> RadarResult<Vec<PathBuf>> {
    list_entries(root, |path, is_dir| is_dir && path.file_name().is_some()).await
}

async fn list_files(dir: &Path, ext: &str) -> RadarResult<Vec<PathBuf>> {
    list_entries(dir, |path, is_dir| {
        !is_dir && path.extension().and_then(|e| e.to_str()) == Some(ext)
    })
    .await
}

async fn list_entries(dir: &Path, keep: impl Fn(&Path, bool) -> bool) -> RadarResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let is_dir = entry.file_type().await?.is_dir();
        let path = entry.path();
        if keep(&path, is_dir) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

async fn clear_dir(dir: &Path) -> RadarResult<usize> {
    let removed = list_files(dir, DATA_EXT).await?.len();
    fs::remove_dir_all(dir).await?;
    Ok(removed)
}
