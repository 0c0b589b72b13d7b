//! File-based cache backend.
//!
//! Stores one JSON document per key inside a directory. Writes go through a
//! temp file and a rename so readers never see a torn entry.
//!
//! Removing an expired file re-reads it under the backend's write lock and
//! only deletes it if it still holds the expired entry, so a concurrent
//! `set` is never lost to an eager purge.
//!
//! Storage failures never reach the caller: they are logged and the
//! operation degrades to a miss (reads) or a dropped write (writes), so a
//! broken disk turns into recomputation rather than errors.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use memento_core::constants::{DOMAIN_FILE_NAME, FILE_ENTRY_EXTENSION, INITIAL_VERSION, NO_EXPIRY};
use memento_core::error::{MemoError, Result};
use memento_core::traits::{CacheBackend, EvictionListener, ListenerId};
use memento_core::types::CacheEntry;
use memento_hash::hash_hex;

use crate::listeners::EvictionListeners;

/// On-disk representation of one cache entry.
///
/// ```text
/// { "key": "...", "value": <V as JSON>, "expires_at": <unix nanos | 0>, "version": <u64> }
/// ```
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry<V> {
    key: String,
    value: V,
    expires_at: i64,
    version: u64,
}

impl<V> StoredEntry<V> {
    fn into_entry(self) -> CacheEntry<V> {
        CacheEntry::from_parts(self.value, self.expires_at, self.version)
    }
}

/// File-based cache backend.
///
/// Values must round-trip through `serde_json`. File names are the SHA3-256
/// digest of the key, so arbitrary keys (slashes, unicode) are safe.
pub struct FileBackend<V> {
    dir: PathBuf,
    listeners: EvictionListeners,
    /// Serializes version read-modify-write in `set` against stale-entry removal
    writes: Mutex<()>,
    /// Unique suffix source for temp files
    temp_counter: AtomicU64,
    _values: PhantomData<fn() -> V>,
}

impl<V> FileBackend<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Opens (creating if needed) a file backend rooted at `dir`.
    pub async fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(|e| {
            MemoError::StorageError(format!("Failed to create cache directory {:?}: {}", dir, e))
        })?;

        debug!(dir = ?dir, "Opened file backend");
        Ok(Self::at(dir))
    }

    /// Creates a backend over `dir` without touching the filesystem.
    ///
    /// Usable from synchronous backend factories; writes fail (and are
    /// logged) until the directory exists.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            listeners: EvictionListeners::default(),
            writes: Mutex::new(()),
            temp_counter: AtomicU64::new(0),
            _values: PhantomData,
        }
    }

    /// Returns the cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the file holding `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let name = hash_hex(DOMAIN_FILE_NAME, key.as_bytes());
        self.dir.join(format!("{}.{}", name, FILE_ENTRY_EXTENSION))
    }

    /// Reads the stored entry for `key`, expired or not.
    async fn read_entry(&self, path: &Path) -> Result<Option<StoredEntry<V>>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn write_entry(&self, path: &Path, entry: &StoredEntry<V>) -> Result<()> {
        let serialized = serde_json::to_vec(entry)?;

        // Write atomically (write to temp, then rename)
        let suffix = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let temp_path = path.with_extension(format!("{}.tmp", suffix));
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&serialized).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove_path(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn try_get(&self, key: &str) -> Result<Option<V>> {
        let path = self.path_for(key);
        let Some(stored) = self.read_entry(&path).await? else {
            return Ok(None);
        };

        if stored.key != key {
            // Digest collision or foreign file: never serve another key's value.
            warn!(key, stored_key = %stored.key, "File backend key mismatch");
            return Ok(None);
        }

        let (version, expires_at) = (stored.version, stored.expires_at);
        let entry = stored.into_entry();
        if entry.is_expired() {
            if self.remove_if_unchanged(&path, version, expires_at).await? {
                debug!(key, "Reaped expired entry on read");
                self.notify_evicted(key);
            }
            return Ok(None);
        }

        Ok(Some(entry.into_value()))
    }

    /// Deletes the file at `path` only if it still holds the entry written
    /// with `version` and `expires_at`. Returns true if the file was removed.
    async fn remove_if_unchanged(&self, path: &Path, version: u64, expires_at: i64) -> Result<bool> {
        let _writes = self.writes.lock().await;
        match self.read_entry(path).await? {
            Some(current) if current.version == version && current.expires_at == expires_at => {
                self.remove_path(path).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn try_set(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<u64> {
        let path = self.path_for(key);
        let _writes = self.writes.lock().await;

        let version = match self.read_entry(&path).await {
            Ok(Some(previous)) => {
                let previous = previous.into_entry();
                previous.bump_version()
            }
            Ok(None) => INITIAL_VERSION,
            Err(e) => {
                debug!(key, error = %e, "Unreadable previous entry, restarting version");
                INITIAL_VERSION
            }
        };

        let fresh = CacheEntry::new((), ttl, version);
        let stored = StoredEntry {
            key: key.to_string(),
            value,
            expires_at: fresh.expires_at(),
            version,
        };

        self.write_entry(&path, &stored).await?;
        Ok(version)
    }

    async fn try_clear(&self) -> Result<usize> {
        let mut removed = 0;
        let mut dir = fs::read_dir(&self.dir).await?;

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            let is_entry = path
                .extension()
                .map_or(false, |ext| ext == FILE_ENTRY_EXTENSION || ext == "tmp");
            if is_entry {
                self.remove_path(&path).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Removes every expired entry file and returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        let mut purged = 0;
        let mut dir = fs::read_dir(&self.dir).await?;

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().map_or(true, |ext| ext != FILE_ENTRY_EXTENSION) {
                continue;
            }

            match self.read_entry(&path).await {
                Ok(Some(stored)) if stored.expires_at != NO_EXPIRY => {
                    let (key, version, expires_at) = (stored.key.clone(), stored.version, stored.expires_at);
                    if stored.into_entry().is_expired()
                        && self.remove_if_unchanged(&path, version, expires_at).await?
                    {
                        self.notify_evicted(&key);
                        purged += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(path = ?path, error = %e, "Skipping unreadable cache file"),
            }
        }

        Ok(purged)
    }

    fn notify_evicted(&self, key: &str) {
        self.listeners.notify(key);
    }
}

#[async_trait]
impl<V> CacheBackend<V> for FileBackend<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    #[instrument(level = "trace", skip(self))]
    async fn get(&self, key: &str) -> Option<V> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "File backend read failed, treating as miss");
                None
            }
        }
    }

    #[instrument(level = "trace", skip(self, value))]
    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        match self.try_set(key, value, ttl).await {
            Ok(version) => debug!(key, version, "Stored entry"),
            Err(e) => warn!(key, error = %e, "File backend write failed, entry dropped"),
        }
    }

    async fn delete(&self, key: &str) {
        if let Err(e) = self.remove_path(&self.path_for(key)).await {
            warn!(key, error = %e, "File backend delete failed");
        }
    }

    async fn clear(&self) {
        match self.try_clear().await {
            Ok(removed) => debug!(removed, "Cleared file backend"),
            Err(e) => warn!(error = %e, "File backend clear failed"),
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }

    fn add_eviction_listener(&self, listener: EvictionListener) -> Option<ListenerId> {
        Some(self.listeners.add(listener))
    }

    fn remove_eviction_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}
