//! Token cache client
//!
//! Ephemeral access tokens and tickets are maintained by an external
//! refresher and read here. A miss is a normal outcome and a connection
//! error degrades to a miss as well: a missing cached token merely produces
//! a pass-through call the upstream rejects with its own error semantics.

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::debug;

/// Read-only key-value lookup for ephemeral credentials
#[async_trait]
pub trait TokenCache: Send + Sync {
    /// Look up a key. Absence and lookup failure both return `None`.
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
}

/// Redis-backed cache using an auto-reconnecting connection manager
pub struct RedisCache {
    manager: redis::aio::ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl TokenCache for RedisCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut conn = self.manager.clone();
        match conn.get::<_, Option<Vec<u8>>>(key).await {
            Ok(value) => value,
            Err(e) => {
                debug!(key, error = %e, "Cache lookup failed, treating as absent");
                None
            }
        }
    }
}

/// Cache used when no backing store is configured; every lookup misses
pub struct NullCache;

#[async_trait]
impl TokenCache for NullCache {
    async fn get(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }
}

/// In-memory cache for tests and single-node embedding
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.entries.write().insert(key.into(), value.into());
    }
}

#[async_trait]
impl TokenCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.read().get(key).cloned()
    }
}
