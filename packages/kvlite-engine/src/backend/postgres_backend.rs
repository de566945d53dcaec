//! PostgreSQL implementation of [`BackendStore`] (C6 + C7, §4.7).
//!
//! Mirrors [`super::sqlite_backend::SqliteBackend`] row for row; the only
//! differences are `$n` placeholders and `EXCLUDED` upsert syntax, both
//! already isolated in [`SqlTemplates`].

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use kvlite_core::{hash_to_sql_i64, no_parents, pack_parent_keys, CacheEntry, KvLiteError, KvLiteResult};

use super::{BackendStore, ExpiryFilter, PeekedValue, SqlDialect, SqlTemplates};

pub struct PostgresBackend {
    pool: PgPool,
    templates: SqlTemplates,
}

impl PostgresBackend {
    pub fn new(pool: PgPool, schema: &str, table: &str) -> KvLiteResult<Self> {
        let templates = SqlTemplates::build(SqlDialect::Postgres, schema, table)?;
        Ok(Self { pool, templates })
    }

    /// Creates the cache entries table if it does not already exist.
    pub async fn ensure_schema(&self, schema: &str, table: &str) -> KvLiteResult<()> {
        if !schema.is_empty() {
            sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS \"{schema}\""))
                .execute(&self.pool)
                .await
                .map_err(|e| KvLiteError::Backend(e.into()))?;
        }
        let table_ident = if schema.is_empty() {
            format!("\"{table}\"")
        } else {
            format!("\"{schema}\".\"{table}\"")
        };
        let parent_cols: String = (0..kvlite_core::MAX_PARENT_KEYS)
            .map(|i| format!("parent_key_{i} TEXT"))
            .collect::<Vec<_>>()
            .join(", ");
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table_ident} (
                partition TEXT NOT NULL,
                key TEXT NOT NULL,
                hash BIGINT NOT NULL,
                utc_expiry BIGINT NOT NULL,
                interval BIGINT NOT NULL,
                value BYTEA NOT NULL,
                compressed BOOLEAN NOT NULL,
                utc_creation BIGINT NOT NULL,
                {parent_cols},
                PRIMARY KEY (partition, key)
            )"
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| KvLiteError::Backend(e.into()))?;
        Ok(())
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> KvLiteResult<CacheEntry> {
        let hash_i64: i64 = row.try_get("hash").map_err(|e| KvLiteError::Backend(e.into()))?;
        let mut parent_keys = no_parents();
        let mut raw_parents = Vec::new();
        for i in 0..kvlite_core::MAX_PARENT_KEYS {
            let col = format!("parent_key_{i}");
            let value: Option<String> =
                row.try_get(col.as_str()).map_err(|e| KvLiteError::Backend(e.into()))?;
            if let Some(v) = value {
                raw_parents.push(v);
            }
        }
        if let Some(packed) = pack_parent_keys(&raw_parents) {
            parent_keys = packed;
        }
        Ok(CacheEntry {
            partition: row.try_get("partition").map_err(|e| KvLiteError::Backend(e.into()))?,
            key: row.try_get("key").map_err(|e| KvLiteError::Backend(e.into()))?,
            hash: kvlite_core::hash_from_sql_i64(hash_i64),
            value: row.try_get("value").map_err(|e| KvLiteError::Backend(e.into()))?,
            compressed: row.try_get("compressed").map_err(|e| KvLiteError::Backend(e.into()))?,
            utc_expiry: row.try_get("utc_expiry").map_err(|e| KvLiteError::Backend(e.into()))?,
            interval: row.try_get("interval").map_err(|e| KvLiteError::Backend(e.into()))?,
            utc_creation: row.try_get("utc_creation").map_err(|e| KvLiteError::Backend(e.into()))?,
            parent_keys,
        })
    }
}

#[async_trait]
impl BackendStore for PostgresBackend {
    async fn insert_or_update_entry(&self, entry: &CacheEntry) -> KvLiteResult<()> {
        let mut query = sqlx::query(&self.templates.insert_or_update_entry)
            .bind(&entry.partition)
            .bind(&entry.key)
            .bind(hash_to_sql_i64(entry.hash))
            .bind(entry.utc_expiry)
            .bind(entry.interval)
            .bind(&entry.value)
            .bind(entry.compressed)
            .bind(entry.utc_creation);
        for slot in &entry.parent_keys {
            query = query.bind(slot.as_deref());
        }
        query
            .execute(&self.pool)
            .await
            .map_err(|e| KvLiteError::Backend(e.into()))?;
        Ok(())
    }

    async fn delete_entry(&self, partition: &str, key: &str) -> KvLiteResult<(u64, Vec<String>)> {
        let mut children_query = sqlx::query(&self.templates.delete_entry_children).bind(partition);
        for _ in 0..kvlite_core::MAX_PARENT_KEYS {
            children_query = children_query.bind(key);
        }
        let child_rows = children_query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| KvLiteError::Backend(e.into()))?;
        let children: Vec<String> = child_rows
            .iter()
            .filter(|r| r.try_get::<String, _>("key").map(|k| k != key).unwrap_or(true))
            .map(|r| r.try_get::<String, _>("key"))
            .collect::<Result<_, _>>()
            .map_err(|e| KvLiteError::Backend(e.into()))?;

        let mut delete_query = sqlx::query(&self.templates.delete_entry)
            .bind(partition)
            .bind(key);
        for _ in 0..kvlite_core::MAX_PARENT_KEYS {
            delete_query = delete_query.bind(key);
        }
        let result = delete_query
            .execute(&self.pool)
            .await
            .map_err(|e| KvLiteError::Backend(e.into()))?;
        Ok((result.rows_affected(), children))
    }

    async fn delete_entries(
        &self,
        partition: Option<&str>,
        filter: ExpiryFilter,
        now: i64,
    ) -> KvLiteResult<Vec<(String, String)>> {
        let ignore_expiry = matches!(filter, ExpiryFilter::IgnoreExpiry);
        let selected = sqlx::query(&self.templates.delete_entries_select)
            .bind(partition)
            .bind(partition)
            .bind(ignore_expiry)
            .bind(now)
            .bind(ignore_expiry)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| KvLiteError::Backend(e.into()))?;
        let pairs: Vec<(String, String)> = selected
            .iter()
            .map(|r| -> KvLiteResult<(String, String)> {
                Ok((
                    r.try_get("partition").map_err(|e| KvLiteError::Backend(e.into()))?,
                    r.try_get("key").map_err(|e| KvLiteError::Backend(e.into()))?,
                ))
            })
            .collect::<KvLiteResult<_>>()?;

        sqlx::query(&self.templates.delete_entries_delete)
            .bind(partition)
            .bind(partition)
            .bind(ignore_expiry)
            .bind(now)
            .bind(ignore_expiry)
            .execute(&self.pool)
            .await
            .map_err(|e| KvLiteError::Backend(e.into()))?;

        Ok(pairs)
    }

    async fn update_entry_expiry(
        &self,
        partition: &str,
        key: &str,
        new_utc_expiry: i64,
    ) -> KvLiteResult<()> {
        sqlx::query(&self.templates.update_entry_expiry)
            .bind(new_utc_expiry)
            .bind(partition)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| KvLiteError::Backend(e.into()))?;
        Ok(())
    }

    async fn contains_entry(&self, partition: &str, key: &str) -> KvLiteResult<bool> {
        let row = sqlx::query(&self.templates.contains_entry)
            .bind(partition)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| KvLiteError::Backend(e.into()))?;
        Ok(row.is_some())
    }

    async fn count_entries(
        &self,
        partition: Option<&str>,
        filter: ExpiryFilter,
        now: i64,
    ) -> KvLiteResult<u64> {
        let ignore_expiry = matches!(filter, ExpiryFilter::IgnoreExpiry);
        let row = sqlx::query(&self.templates.count_entries)
            .bind(partition)
            .bind(partition)
            .bind(ignore_expiry)
            .bind(now)
            .bind(ignore_expiry)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| KvLiteError::Backend(e.into()))?;
        let n: i64 = row.try_get("n").map_err(|e| KvLiteError::Backend(e.into()))?;
        Ok(n as u64)
    }

    async fn peek_entries(&self, partition: Option<&str>) -> KvLiteResult<Vec<CacheEntry>> {
        let rows = sqlx::query(&self.templates.peek_entries)
            .bind(partition)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| KvLiteError::Backend(e.into()))?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn peek_entry(&self, partition: &str, key: &str) -> KvLiteResult<Option<CacheEntry>> {
        let row = sqlx::query(&self.templates.peek_entry)
            .bind(partition)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| KvLiteError::Backend(e.into()))?;
        row.as_ref().map(Self::row_to_entry).transpose()
    }

    async fn peek_value(&self, partition: &str, key: &str) -> KvLiteResult<Option<PeekedValue>> {
        let row = sqlx::query(&self.templates.peek_value)
            .bind(partition)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| KvLiteError::Backend(e.into()))?;
        row.map(|r| -> KvLiteResult<PeekedValue> {
            Ok(PeekedValue {
                value: r.try_get("value").map_err(|e| KvLiteError::Backend(e.into()))?,
                compressed: r.try_get("compressed").map_err(|e| KvLiteError::Backend(e.into()))?,
                utc_expiry: r.try_get("utc_expiry").map_err(|e| KvLiteError::Backend(e.into()))?,
                interval: r.try_get("interval").map_err(|e| KvLiteError::Backend(e.into()))?,
                utc_creation: r.try_get("utc_creation").map_err(|e| KvLiteError::Backend(e.into()))?,
            })
        })
        .transpose()
    }

    async fn get_cache_size_in_bytes(&self) -> KvLiteResult<u64> {
        let row = sqlx::query(&self.templates.get_cache_size_in_bytes)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| KvLiteError::Backend(e.into()))?;
        let size: i64 = row.try_get("size").map_err(|e| KvLiteError::Backend(e.into()))?;
        Ok(size as u64)
    }
}
