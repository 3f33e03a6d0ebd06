use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use serde::Serialize;
use std::fmt;

use crate::models::{EntityKind, NodeId};

/// What a mutation made stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheScope {
    Node(NodeId),
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CacheKey {
    pub kind: EntityKind,
    pub scope: CacheScope,
}

impl CacheKey {
    pub fn node(kind: EntityKind, id: NodeId) -> Self {
        Self {
            kind,
            scope: CacheScope::Node(id),
        }
    }

    pub fn all(kind: EntityKind) -> Self {
        Self {
            kind,
            scope: CacheScope::All,
        }
    }

    /// Key prefix shared by every cached entry of the kind.
    pub fn namespace(&self) -> String {
        format!("hierarchy:{}", self.kind.table_name())
    }

    /// Cached tree snapshot of the kind; stale after any mutation.
    pub fn tree_key(&self) -> String {
        format!("{}:tree", self.namespace())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            CacheScope::Node(id) => write!(f, "{}:node:{}", self.namespace(), id),
            CacheScope::All => write!(f, "{}:*", self.namespace()),
        }
    }
}

/// Drops cached views after a committed mutation.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self, key: CacheKey) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisCacheInvalidator {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisCacheInvalidator {
    pub async fn new(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %url, "Connecting to Redis");
        let client = Client::open(url)?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }

    pub async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize, anyhow::Error> {
        let mut conn = self.manager.clone();
        let mut cursor: u64 = 0;
        let mut deleted = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to scan cache keys: {}", e))?;

            if !keys.is_empty() {
                deleted += redis::cmd("DEL")
                    .arg(&keys)
                    .query_async::<_, usize>(&mut conn)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to delete cache keys: {}", e))?;
            }

            if next == 0 {
                return Ok(deleted);
            }
            cursor = next;
        }
    }
}

#[async_trait]
impl CacheInvalidator for RedisCacheInvalidator {
    async fn invalidate(&self, key: CacheKey) -> Result<(), anyhow::Error> {
        match key.scope {
            CacheScope::Node(_) => {
                let mut conn = self.manager.clone();
                redis::cmd("DEL")
                    .arg(key.to_string())
                    .arg(key.tree_key())
                    .query_async::<_, usize>(&mut conn)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to invalidate {}: {}", key, e))?;
            }
            CacheScope::All => {
                let removed = self.delete_matching(&key.to_string()).await?;
                tracing::debug!(kind = %key.kind, removed, "Invalidated cached hierarchy");
            }
        }
        Ok(())
    }
}

/// Used when no cache is configured.
pub struct NoopCacheInvalidator;

#[async_trait]
impl CacheInvalidator for NoopCacheInvalidator {
    async fn invalidate(&self, _key: CacheKey) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// Remembers every invalidation; can be switched to fail.
#[derive(Default)]
pub struct RecordingCacheInvalidator {
    pub keys: std::sync::Mutex<Vec<CacheKey>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl RecordingCacheInvalidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<CacheKey> {
        self.keys
            .lock()
            .map(|keys| keys.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CacheInvalidator for RecordingCacheInvalidator {
    async fn invalidate(&self, key: CacheKey) -> Result<(), anyhow::Error> {
        self.keys
            .lock()
            .map_err(|e| anyhow::anyhow!("Recording cache mutex poisoned: {}", e))?
            .push(key);
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(anyhow::anyhow!("cache unavailable"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_typed_and_namespaced() {
        let node = CacheKey::node(EntityKind::Department, 12);
        assert_eq!(node.to_string(), "hierarchy:departments:node:12");
        assert_eq!(node.tree_key(), "hierarchy:departments:tree");
        assert_eq!(CacheKey::all(EntityKind::Role).to_string(), "hierarchy:roles:*");
    }

    #[tokio::test]
    async fn recording_invalidator_keeps_order() {
        let cache = RecordingCacheInvalidator::new();
        cache.invalidate(CacheKey::node(EntityKind::Category, 1)).await.unwrap();
        cache.invalidate(CacheKey::all(EntityKind::Category)).await.unwrap();
        assert_eq!(
            cache.recorded(),
            vec![CacheKey::node(EntityKind::Category, 1), CacheKey::all(EntityKind::Category)]
        );
    }
}
