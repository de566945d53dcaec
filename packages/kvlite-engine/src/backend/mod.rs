//! The uniform SQL backend contract (C6 + C7, §4.7) that `CacheEngine` is
//! generic over, replacing the source's deep inheritance of cache classes
//! (spec.md §9) with a single trait and one implementation per dialect.

pub mod connection_factory;
pub mod sql_builder;
pub mod sqlite_backend;

#[cfg(feature = "postgres")]
pub mod postgres_backend;

pub use sql_builder::{SqlDialect, SqlTemplates};
pub use sqlite_backend::SqliteBackend;

#[cfg(feature = "postgres")]
pub use postgres_backend::PostgresBackend;

use async_trait::async_trait;
use kvlite_core::{CacheEntry, KvLiteResult};

/// Whether a clear/count operation considers or ignores expiry (§4.1.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryFilter {
    /// Only rows whose `utc_expiry < now` (clear) / `>= now` (count, as
    /// "valid") are matched, depending on the operation.
    ConsiderExpiry,
    /// All rows matching the partition predicate, regardless of expiry.
    IgnoreExpiry,
}

/// A row fetched by `peek_value` -- a lighter projection than
/// [`CacheEntry`] that omits parent keys, matching the spec's distinction
/// between `peek_value_query` (used by `get`/`peek`) and `peek_entry_query`
/// (used by `get_item`/`peek_item`).
#[derive(Debug, Clone)]
pub struct PeekedValue {
    pub value: Vec<u8>,
    pub compressed: bool,
    pub utc_expiry: i64,
    pub interval: i64,
    pub utc_creation: i64,
}

/// The uniform contract every SQL backend implements.
///
/// All operations on a single row are scoped to `(partition, key)`; the
/// contract says nothing about *how* a backend opens or pools connections
/// beyond `can_peek` -- a backend without efficient single-column
/// projections may decline peek support rather than emulate it poorly.
#[async_trait]
pub trait BackendStore: Send + Sync {
    /// Whether this backend supports the lightweight peek queries.
    /// `peek`/`peek_item`/`peek_items` fail with `NotSupported` when false.
    fn can_peek(&self) -> bool {
        true
    }

    /// Upserts a row by primary key `(partition, key)`.
    async fn insert_or_update_entry(&self, entry: &CacheEntry) -> KvLiteResult<()>;

    /// Deletes the row `(partition, key)` and any row in the same
    /// partition whose `parent_key_i` equals `key`, in one statement
    /// (one-level cascade). Returns the number of rows deleted and the
    /// keys of the direct children just removed, so the caller can
    /// recurse for multi-level cascade (§4.1.5).
    async fn delete_entry(&self, partition: &str, key: &str) -> KvLiteResult<(u64, Vec<String>)>;

    /// Bulk-deletes rows matching the optional partition predicate and the
    /// expiry filter (§4.1.6). Returns `(partition, key)` of every row
    /// deleted directly, so the caller can cascade into their children.
    async fn delete_entries(
        &self,
        partition: Option<&str>,
        filter: ExpiryFilter,
        now: i64,
    ) -> KvLiteResult<Vec<(String, String)>>;

    /// Extends `utc_expiry` for a sliding entry after a renewing read.
    async fn update_entry_expiry(
        &self,
        partition: &str,
        key: &str,
        new_utc_expiry: i64,
    ) -> KvLiteResult<()>;

    /// Whether `(partition, key)` exists. Does not filter by expiry at
    /// the SQL level; callers combine this with [`CacheEntry::is_valid_at`].
    async fn contains_entry(&self, partition: &str, key: &str) -> KvLiteResult<bool>;

    /// Counts rows matching the optional partition predicate and expiry
    /// filter.
    async fn count_entries(
        &self,
        partition: Option<&str>,
        filter: ExpiryFilter,
        now: i64,
    ) -> KvLiteResult<u64>;

    /// Fetches every row matching the optional partition predicate,
    /// unfiltered by expiry -- the caller applies validity/renewal.
    async fn peek_entries(&self, partition: Option<&str>) -> KvLiteResult<Vec<CacheEntry>>;

    /// Fetches a single row with parent keys, unfiltered by expiry.
    async fn peek_entry(&self, partition: &str, key: &str) -> KvLiteResult<Option<CacheEntry>>;

    /// Fetches a single row's value-bearing columns only (no parent
    /// keys), unfiltered by expiry.
    async fn peek_value(&self, partition: &str, key: &str) -> KvLiteResult<Option<PeekedValue>>;

    /// Backend-estimated total cache size in bytes (§4.7: sum of
    /// partition/key/value lengths plus a fixed per-row overhead of three
    /// 8-byte columns).
    async fn get_cache_size_in_bytes(&self) -> KvLiteResult<u64>;
}
