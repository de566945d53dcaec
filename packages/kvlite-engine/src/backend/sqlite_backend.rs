//! SQLite implementation of [`BackendStore`] (C6 + C7, §4.7).

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use kvlite_core::{hash_to_sql_i64, no_parents, pack_parent_keys, CacheEntry, KvLiteError, KvLiteResult};

use super::{BackendStore, ExpiryFilter, PeekedValue, SqlDialect, SqlTemplates};

/// SQLite-backed [`BackendStore`], built once per `(schema, table)` pair
/// against a shared pool handed out by
/// [`super::connection_factory::SqliteConnectionFactory`].
pub struct SqliteBackend {
    pool: SqlitePool,
    templates: SqlTemplates,
}

impl SqliteBackend {
    /// Builds a backend over `pool`, validating and compiling the SQL
    /// templates for `schema`/`table` up front.
    pub fn new(pool: SqlitePool, schema: &str, table: &str) -> KvLiteResult<Self> {
        let templates = SqlTemplates::build(SqlDialect::Sqlite, schema, table)?;
        Ok(Self { pool, templates })
    }

    /// Creates the cache entries table if it does not already exist.
    /// Not part of [`BackendStore`] -- run once at engine construction.
    pub async fn ensure_schema(&self, schema: &str, table: &str) -> KvLiteResult<()> {
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
                hash INTEGER NOT NULL,
                utc_expiry INTEGER NOT NULL,
                interval INTEGER NOT NULL,
                value BLOB NOT NULL,
                compressed INTEGER NOT NULL,
                utc_creation INTEGER NOT NULL,
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

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> KvLiteResult<CacheEntry> {
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
impl BackendStore for SqliteBackend {
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

#[cfg(test)]
mod tests {
    use super::*;
    use kvlite_core::entry_hash;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn make_backend() -> SqliteBackend {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let backend = SqliteBackend::new(pool, "", "kvl_cache_entries").unwrap();
        backend.ensure_schema("", "kvl_cache_entries").await.unwrap();
        backend
    }

    fn entry(partition: &str, key: &str, utc_expiry: i64, parents: &[&str]) -> CacheEntry {
        let parent_keys = pack_parent_keys(
            &parents.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        )
        .unwrap();
        CacheEntry {
            partition: partition.to_string(),
            key: key.to_string(),
            hash: entry_hash(partition, key),
            value: b"payload".to_vec(),
            compressed: false,
            utc_expiry,
            interval: 0,
            utc_creation: 1000,
            parent_keys,
        }
    }

    #[tokio::test]
    async fn insert_then_contains_and_peek_round_trip() {
        let backend = make_backend().await;
        backend
            .insert_or_update_entry(&entry("P", "k1", 5000, &[]))
            .await
            .unwrap();
        assert!(backend.contains_entry("P", "k1").await.unwrap());
        let peeked = backend.peek_entry("P", "k1").await.unwrap().unwrap();
        assert_eq!(peeked.value, b"payload");
        assert_eq!(peeked.utc_expiry, 5000);
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_row() {
        let backend = make_backend().await;
        backend
            .insert_or_update_entry(&entry("P", "k1", 5000, &[]))
            .await
            .unwrap();
        let mut updated = entry("P", "k1", 9000, &[]);
        updated.value = b"new".to_vec();
        backend.insert_or_update_entry(&updated).await.unwrap();
        let peeked = backend.peek_entry("P", "k1").await.unwrap().unwrap();
        assert_eq!(peeked.utc_expiry, 9000);
        assert_eq!(peeked.value, b"new");
        assert_eq!(backend.count_entries(None, ExpiryFilter::IgnoreExpiry, 0).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_entry_cascades_one_level_to_children() {
        let backend = make_backend().await;
        backend.insert_or_update_entry(&entry("P", "parent", 5000, &[])).await.unwrap();
        backend
            .insert_or_update_entry(&entry("P", "child1", 5000, &["parent"]))
            .await
            .unwrap();
        backend
            .insert_or_update_entry(&entry("P", "child2", 5000, &["parent"]))
            .await
            .unwrap();

        let (deleted, children) = backend.delete_entry("P", "parent").await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(children.len(), 2);
        assert!(children.contains(&"child1".to_string()));
        assert!(children.contains(&"child2".to_string()));

        assert!(backend.contains_entry("P", "child1").await.unwrap());
        for child in &children {
            backend.delete_entry("P", child).await.unwrap();
        }
        assert!(!backend.contains_entry("P", "child1").await.unwrap());
        assert!(!backend.contains_entry("P", "child2").await.unwrap());
    }

    #[tokio::test]
    async fn delete_entries_respects_expiry_filter() {
        let backend = make_backend().await;
        backend.insert_or_update_entry(&entry("P", "expired", 10, &[])).await.unwrap();
        backend.insert_or_update_entry(&entry("P", "live", 9999, &[])).await.unwrap();

        let removed = backend
            .delete_entries(Some("P"), ExpiryFilter::ConsiderExpiry, 5000)
            .await
            .unwrap();
        assert_eq!(removed, vec![("P".to_string(), "expired".to_string())]);
        assert!(backend.contains_entry("P", "live").await.unwrap());
        assert!(!backend.contains_entry("P", "expired").await.unwrap());
    }

    #[tokio::test]
    async fn clear_with_ignore_expiry_removes_everything_in_partition() {
        let backend = make_backend().await;
        backend.insert_or_update_entry(&entry("P", "a", 10, &[])).await.unwrap();
        backend.insert_or_update_entry(&entry("P", "b", 9999, &[])).await.unwrap();
        backend.insert_or_update_entry(&entry("Q", "c", 9999, &[])).await.unwrap();

        let removed = backend
            .delete_entries(Some("P"), ExpiryFilter::IgnoreExpiry, 0)
            .await
            .unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(backend.count_entries(None, ExpiryFilter::IgnoreExpiry, 0).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_entry_expiry_changes_only_that_row() {
        let backend = make_backend().await;
        backend.insert_or_update_entry(&entry("P", "k1", 100, &[])).await.unwrap();
        backend.update_entry_expiry("P", "k1", 200).await.unwrap();
        let peeked = backend.peek_entry("P", "k1").await.unwrap().unwrap();
        assert_eq!(peeked.utc_expiry, 200);
    }

    #[tokio::test]
    async fn count_entries_considers_expiry_by_default() {
        let backend = make_backend().await;
        backend.insert_or_update_entry(&entry("P", "expired", 10, &[])).await.unwrap();
        backend.insert_or_update_entry(&entry("P", "live", 9999, &[])).await.unwrap();
        let valid = backend
            .count_entries(Some("P"), ExpiryFilter::ConsiderExpiry, 5000)
            .await
            .unwrap();
        assert_eq!(valid, 1);
    }

    #[tokio::test]
    async fn peek_entries_is_unfiltered_by_expiry() {
        let backend = make_backend().await;
        backend.insert_or_update_entry(&entry("P", "expired", 10, &[])).await.unwrap();
        let all = backend.peek_entries(Some("P")).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn get_cache_size_in_bytes_accounts_for_rows() {
        let backend = make_backend().await;
        assert_eq!(backend.get_cache_size_in_bytes().await.unwrap(), 0);
        backend.insert_or_update_entry(&entry("P", "k1", 100, &[])).await.unwrap();
        assert!(backend.get_cache_size_in_bytes().await.unwrap() > 0);
    }

    #[tokio::test]
    async fn peek_entry_preserves_parent_keys() {
        let backend = make_backend().await;
        backend
            .insert_or_update_entry(&entry("P", "child", 100, &["parent"]))
            .await
            .unwrap();
        let peeked = backend.peek_entry("P", "child").await.unwrap().unwrap();
        assert_eq!(peeked.parents(), vec!["parent"]);
    }
}
