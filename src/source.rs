//! Local storage tiers.
//!
//! [`LocalSource`] is the contract the orchestrator programs against; it
//! never inspects a tier's internals, only `read`/`save`/`clear`. Two
//! bundled implementations cover the common tiers:
//!
//! - [`MemorySource`] — bounded in-memory map, cheapest and first in most
//!   configurations.
//! - [`DiskSource`] — persistent file-per-key store, JSON-serialized.
//!
//! Tiers must tolerate concurrent calls across different keys; behaviour
//! under concurrent calls for the same key is backend-defined.

use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{BoxKey, DataboxError, Result};

/// One local storage tier keyed by [`BoxKey`].
///
/// A failed `read` is treated by the orchestrator as a miss for that tier;
/// a failed `save` is logged and never blocks the emission of an
/// already-fetched value.
#[async_trait]
pub trait LocalSource<T>: Send + Sync {
    /// Short tier name used in logs and metric labels.
    fn name(&self) -> &str;

    /// Read the stored value for `key`, if present.
    async fn read(&self, key: &BoxKey) -> Result<Option<T>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn save(&self, key: &BoxKey, value: &T) -> Result<()>;

    /// Drop any value stored under `key`.
    async fn clear(&self, key: &BoxKey) -> Result<()>;
}

#[async_trait]
impl<T, S> LocalSource<T> for std::sync::Arc<S>
where
    S: LocalSource<T> + ?Sized,
    T: Send + Sync,
{
    fn name(&self) -> &str {
        self.as_ref().name()
    }

    async fn read(&self, key: &BoxKey) -> Result<Option<T>> {
        self.as_ref().read(key).await
    }

    async fn save(&self, key: &BoxKey, value: &T) -> Result<()> {
        self.as_ref().save(key, value).await
    }

    async fn clear(&self, key: &BoxKey) -> Result<()> {
        self.as_ref().clear(key).await
    }
}

/// Default maximum number of entries held by a [`MemorySource`].
const DEFAULT_MEMORY_ENTRIES: u64 = 1_000;

/// Bounded in-memory tier.
///
/// Values are cloned on read. Default capacity: 1,000 entries.
pub struct MemorySource<T> {
    entries: moka::sync::Cache<String, T>,
}

impl<T: Clone + Send + Sync + 'static> MemorySource<T> {
    /// Create a memory tier with the default capacity.
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MEMORY_ENTRIES)
    }

    /// Create a memory tier with a custom capacity.
    pub fn with_max_entries(max: u64) -> Self {
        Self {
            entries: moka::sync::Cache::new(max),
        }
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> u64 {
        self.entries.entry_count()
    }

    /// Whether the tier is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync + 'static> Default for MemorySource<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> LocalSource<T> for MemorySource<T> {
    fn name(&self) -> &str {
        "memory"
    }

    async fn read(&self, key: &BoxKey) -> Result<Option<T>> {
        Ok(self.entries.get(key.as_str()))
    }

    async fn save(&self, key: &BoxKey, value: &T) -> Result<()> {
        self.entries.insert(key.as_str().to_owned(), value.clone());
        Ok(())
    }

    async fn clear(&self, key: &BoxKey) -> Result<()> {
        self.entries.invalidate(key.as_str());
        Ok(())
    }
}

/// Persistent file-per-key tier under a directory.
///
/// Each key maps to `<dir>/<key>.json`, written as serde_json. The key
/// pattern guarantees file-name safety. The directory is created on the
/// first save.
pub struct DiskSource<T> {
    dir: PathBuf,
    _value: PhantomData<fn() -> T>,
}

impl<T> DiskSource<T> {
    /// Create a disk tier rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            _value: PhantomData,
        }
    }

    fn path_for(&self, key: &BoxKey) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn storage_error(&self, message: impl ToString) -> DataboxError {
        DataboxError::Storage {
            source: "disk".to_owned(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl<T> LocalSource<T> for DiskSource<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn name(&self) -> &str {
        "disk"
    }

    async fn read(&self, key: &BoxKey) -> Result<Option<T>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.storage_error(e)),
        }
    }

    async fn save(&self, key: &BoxKey, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| self.storage_error(e))?;
        tokio::fs::write(self.path_for(key), bytes)
            .await
            .map_err(|e| self.storage_error(e))
    }

    async fn clear(&self, key: &BoxKey) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.storage_error(e)),
        }
    }
}
