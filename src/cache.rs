//! Durable key → value store for provider results
//!
//! Keys are provider-qualified coordinate strings (see [`Coordinate::cache_key`]).
//! A stored `None` value is a negative entry: an earlier lookup failed permanently.
//! Entries never expire; callers decide whether to bypass the cache.
//!
//! [`Coordinate::cache_key`]: crate::models::Coordinate::cache_key

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use fjall::Keyspace;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use tokio::task;

/// A cached value together with its key and creation time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    /// `None` marks a negative entry
    pub value: Option<Vec<u8>>,
    /// Unix timestamp (seconds)
    pub created_at: u64,
}

impl CacheEntry {
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.value.is_none()
    }
}

/// Storage contract shared by all workers.
///
/// `put` is idempotent and last-writer-wins for concurrent writes to one key.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns `None` on a miss
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    async fn put(&self, key: &str, value: Option<Vec<u8>>) -> Result<()>;

    /// Make all writes durable
    async fn flush(&self) -> Result<()>;
}

/// Encode a payload for storage
pub fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).context("Failed to encode cache value")
}

/// Decode a payload read from storage
pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).context("Failed to decode cache value")
}

fn unix_now() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    value: Option<Vec<u8>>,
    created_at: u64, // Unix timestamp (seconds)
}

/// fjall-backed cache, persisted across runs
pub struct PersistentCache {
    db: Arc<fjall::Database>,
    store: Keyspace,
}

fn get_from_store(store: Keyspace, key: Vec<u8>) -> Result<Option<Vec<u8>>> {
    Ok(store.get(key)?.map(|v| v.to_vec()))
}

impl PersistentCache {
    /// Open (or create) the cache database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = fjall::Database::builder(path)
            .open()
            .with_context(|| format!("Failed to open cache database at {}", path.display()))?;
        let store = db.keyspace("enrichment", fjall::KeyspaceCreateOptions::default)?;
        tracing::info!(path = %path.display(), "Opened persistent cache");
        Ok(Self {
            db: Arc::new(db),
            store,
        })
    }
}

#[async_trait]
impl Cache for PersistentCache {
    #[tracing::instrument(name = "query_cache", level = "debug", skip(self))]
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let store = self.store.clone();
        let key_bytes = key.as_bytes().to_vec();

        let maybe_bytes: Option<Vec<u8>> =
            task::spawn_blocking(move || get_from_store(store, key_bytes)).await??;

        match maybe_bytes {
            Some(bytes) => {
                let stored: StoredEntry = postcard::from_bytes(&bytes)?;
                tracing::debug!(negative = stored.value.is_none(), "Key found");
                Ok(Some(CacheEntry {
                    key: key.to_string(),
                    value: stored.value,
                    created_at: stored.created_at,
                }))
            }
            None => {
                tracing::debug!("Key not found");
                Ok(None)
            }
        }
    }

    #[tracing::instrument(name = "put_cache", level = "debug", skip(self, value))]
    async fn put(&self, key: &str, value: Option<Vec<u8>>) -> Result<()> {
        let store = self.store.clone();
        let key = key.as_bytes().to_vec();
        let entry = StoredEntry {
            value,
            created_at: unix_now()?,
        };
        let bytes = postcard::to_stdvec(&entry)?;

        task::spawn_blocking(move || store.insert(key, bytes)).await??;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || db.persist(fjall::PersistMode::SyncAll)).await??;
        tracing::debug!("Persistent cache flushed");
        Ok(())
    }
}

/// In-process cache; nothing survives the process
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Option<Vec<u8>>) -> Result<()> {
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            created_at: unix_now()?,
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
