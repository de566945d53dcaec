//! Connection pool cache keyed by connection string (C6, §4.6).
//!
//! Mirrors the source's single-factory-per-connection-string model: callers
//! that build engines against the same `connection_string` share one
//! `sqlx` pool rather than opening a fresh one per engine instance.

use dashmap::DashMap;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use kvlite_core::{KvLiteError, KvLiteResult};

/// Caches one [`SqlitePool`] per connection string, capped at
/// `max_cached_connections` pools total (the oldest-created pool is never
/// evicted automatically -- exceeding the cap is a configuration error,
/// matching the bounded-resource intent of spec.md's connection factory).
pub struct SqliteConnectionFactory {
    pools: DashMap<String, SqlitePool>,
    max_cached_connections: usize,
}

impl SqliteConnectionFactory {
    #[must_use]
    pub fn new(max_cached_connections: usize) -> Self {
        Self {
            pools: DashMap::new(),
            max_cached_connections,
        }
    }

    /// Returns the pool for `connection_string`, creating and caching it on
    /// first use. `max_pool_size` bounds the number of live connections
    /// within that one pool.
    pub async fn get_or_create(
        &self,
        connection_string: &str,
        max_pool_size: u32,
    ) -> KvLiteResult<SqlitePool> {
        if let Some(pool) = self.pools.get(connection_string) {
            return Ok(pool.clone());
        }

        if self.pools.len() >= self.max_cached_connections {
            return Err(KvLiteError::InvalidArgument(format!(
                "connection factory already holds {} cached pools (max_cached_connections = {})",
                self.pools.len(),
                self.max_cached_connections
            )));
        }

        let options: SqliteConnectOptions = connection_string
            .parse()
            .map_err(|e: sqlx::Error| KvLiteError::Backend(e.into()))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(options.create_if_missing(true))
            .await
            .map_err(|e| KvLiteError::Backend(e.into()))?;

        self.pools
            .insert(connection_string.to_string(), pool.clone());
        Ok(pool)
    }

    /// Number of distinct connection strings currently pooled.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.pools.len()
    }

    /// Drops and closes the pool for `connection_string`, if present.
    pub async fn evict(&self, connection_string: &str) {
        if let Some((_, pool)) = self.pools.remove(connection_string) {
            pool.close().await;
        }
    }
}
