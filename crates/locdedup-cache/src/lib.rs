//! Best-effort Redis TTL cache.
//!
//! Every external lookup in the pipeline (ViaCEP, IBGE, Google, LLM
//! decisions) goes through this store. The contract is deliberately loose:
//! a failing `get` reads as a miss, a failing `set`/`del` is a no-op, and
//! callers must stay correct when the cache returns nothing at all. Negative
//! results are cached with [`MISS_SENTINEL`] so "looked up and absent" is
//! distinguishable from "never looked up".
//!
//! # Example
//!
//! ```rust,ignore
//! use locdedup_cache::Cache;
//!
//! let cache = Cache::connect("redis://localhost:6379").await?;
//! cache.set_json("viacep:74815100", &payload, 7 * 86_400).await;
//! let hit: Option<Payload> = cache.get_json("viacep:74815100").await;
//! ```

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Distinguished value for a cached negative lookup.
///
/// Stored verbatim; [`Cache::get_json`] surfaces it as [`CacheLookup::Miss`]
/// instead of attempting to deserialize it.
pub const MISS_SENTINEL: &str = "__locdedup_miss__";

/// Outcome of a cached lookup that distinguishes negatives from absence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup<T> {
    /// Cached positive value.
    Hit(T),
    /// Cached negative: the upstream said "not found" recently.
    Miss,
    /// Nothing cached (or the cache is down).
    Absent,
}

/// Errors raised while establishing the connection. Runtime command errors
/// never surface; they degrade to misses.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    Connection(String),
}

/// Shared handle over a Redis connection manager. Cheap to clone.
#[derive(Clone)]
pub struct Cache {
    manager: Option<ConnectionManager>,
}

impl Cache {
    /// Connect to Redis.
    ///
    /// # Errors
    /// Returns `CacheError::Connection` when the endpoint is unreachable.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        info!("Connecting to Redis: {}", url);
        let client =
            redis::Client::open(url).map_err(|e| CacheError::Connection(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        Ok(Self {
            manager: Some(manager),
        })
    }

    /// A cache that stores nothing and always misses. Used when `REDIS_URL`
    /// points nowhere or the connection failed at startup.
    #[must_use]
    pub fn disabled() -> Self {
        Self { manager: None }
    }

    /// Whether a live connection backs this handle.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.manager.is_some()
    }

    /// Raw get. `None` on absence and on any cache failure.
    pub async fn get(&self, key: &str) -> Option<String> {
        let manager = self.manager.as_ref()?;
        let mut conn = manager.clone();
        match conn.get::<_, Option<String>>(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("cache get failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Raw set with TTL. Failures are dropped.
    pub async fn set(&self, key: &str, value: &str, ttl_seconds: u64) {
        let Some(manager) = self.manager.as_ref() else {
            return;
        };
        let mut conn = manager.clone();
        if let Err(e) = conn.set_ex::<_, _, ()>(key, value, ttl_seconds).await {
            warn!("cache set failed for {}: {}", key, e);
        }
    }

    /// Delete a key. Failures are dropped.
    pub async fn del(&self, key: &str) {
        let Some(manager) = self.manager.as_ref() else {
            return;
        };
        let mut conn = manager.clone();
        if let Err(e) = conn.del::<_, ()>(key).await {
            warn!("cache del failed for {}: {}", key, e);
        }
    }

    /// JSON get that understands the negative sentinel.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> CacheLookup<T> {
        match self.get(key).await {
            None => CacheLookup::Absent,
            Some(raw) if raw == MISS_SENTINEL => CacheLookup::Miss,
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => CacheLookup::Hit(value),
                Err(e) => {
                    // A stale or foreign payload reads as absent.
                    debug!("cache payload for {} not deserializable: {}", key, e);
                    CacheLookup::Absent
                }
            },
        }
    }

    /// JSON set. Serialization failures are dropped like any cache failure.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set(key, &raw, ttl_seconds).await,
            Err(e) => warn!("cache serialize failed for {}: {}", key, e),
        }
    }

    /// Record a negative lookup.
    pub async fn set_miss(&self, key: &str, ttl_seconds: u64) {
        self.set(key, MISS_SENTINEL, ttl_seconds).await;
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
