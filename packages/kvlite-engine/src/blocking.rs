//! Synchronous form of the cache engine (§4.1.1: "a synchronous and an
//! asynchronous form with equivalent semantics").
//!
//! Blocks the calling thread on the async engine via `futures::executor::
//! block_on` rather than requiring a Tokio runtime handle, so it can be used
//! from plain threads as well as from inside an existing runtime's
//! `spawn_blocking`. The sync form never accepts a cancellation token --
//! cancellation is an async-only concern (§4.1.1).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::executor::block_on;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use kvlite_core::{ClockSource, KvLiteResult};

use crate::backend::{BackendStore, ExpiryFilter};
use crate::engine::{CacheEngine, CacheItem, TimedExpiry};

/// Thin synchronous facade over [`CacheEngine`]. Holds an `Arc` so the
/// `add_*` family can still trigger the auto-cleanup task; if no Tokio
/// runtime is current (the common case here), the cleanup runs inline
/// instead of being spawned.
pub struct BlockingCacheEngine<B: BackendStore, C: ClockSource> {
    inner: Arc<CacheEngine<B, C>>,
}

impl<B, C> BlockingCacheEngine<B, C>
where
    B: BackendStore + Send + Sync + 'static,
    C: ClockSource + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(inner: Arc<CacheEngine<B, C>>) -> Self {
        Self { inner }
    }

    fn never_cancelled() -> CancellationToken {
        CancellationToken::new()
    }

    pub fn add_sliding<T: Serialize + Sync>(
        &self,
        partition: &str,
        key: &str,
        value: &T,
        interval: Duration,
        parent_keys: &[String],
    ) -> KvLiteResult<()> {
        block_on(self.inner.add_sliding(partition, key, value, interval, parent_keys, &Self::never_cancelled()))
    }

    pub fn add_static<T: Serialize + Sync>(
        &self,
        partition: &str,
        key: &str,
        value: &T,
        parent_keys: &[String],
    ) -> KvLiteResult<()> {
        block_on(self.inner.add_static(partition, key, value, parent_keys, &Self::never_cancelled()))
    }

    pub fn add_timed<T: Serialize + Sync>(
        &self,
        partition: &str,
        key: &str,
        value: &T,
        expiry: TimedExpiry,
        parent_keys: &[String],
    ) -> KvLiteResult<()> {
        block_on(self.inner.add_timed(partition, key, value, expiry, parent_keys, &Self::never_cancelled()))
    }

    pub fn get<T: DeserializeOwned>(&self, partition: &str, key: &str) -> KvLiteResult<Option<T>> {
        block_on(self.inner.get(partition, key, &Self::never_cancelled()))
    }

    pub fn get_item<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
    ) -> KvLiteResult<Option<CacheItem<T>>> {
        block_on(self.inner.get_item(partition, key, &Self::never_cancelled()))
    }

    pub fn get_items<T: DeserializeOwned>(&self, partition: Option<&str>) -> KvLiteResult<Vec<CacheItem<T>>> {
        block_on(self.inner.get_items(partition, &Self::never_cancelled()))
    }

    pub fn peek<T: DeserializeOwned>(&self, partition: &str, key: &str) -> KvLiteResult<Option<T>> {
        block_on(self.inner.peek(partition, key, &Self::never_cancelled()))
    }

    pub fn peek_item<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
    ) -> KvLiteResult<Option<CacheItem<T>>> {
        block_on(self.inner.peek_item(partition, key, &Self::never_cancelled()))
    }

    pub fn peek_items<T: DeserializeOwned>(&self, partition: Option<&str>) -> KvLiteResult<Vec<CacheItem<T>>> {
        block_on(self.inner.peek_items(partition, &Self::never_cancelled()))
    }

    pub fn contains(&self, partition: &str, key: &str) -> KvLiteResult<bool> {
        block_on(self.inner.contains(partition, key))
    }

    pub fn count(&self, partition: Option<&str>, mode: ExpiryFilter) -> KvLiteResult<u32> {
        block_on(self.inner.count(partition, mode))
    }

    pub fn long_count(&self, partition: Option<&str>, mode: ExpiryFilter) -> KvLiteResult<u64> {
        block_on(self.inner.long_count(partition, mode))
    }

    pub fn clear(&self, partition: Option<&str>, mode: ExpiryFilter) -> KvLiteResult<u64> {
        block_on(self.inner.clear(partition, mode, &Self::never_cancelled()))
    }

    pub fn remove(&self, partition: &str, key: &str) -> KvLiteResult<()> {
        block_on(self.inner.remove(partition, key, &Self::never_cancelled()))
    }

    pub fn get_cache_size_in_bytes(&self) -> KvLiteResult<u64> {
        block_on(self.inner.get_cache_size_in_bytes())
    }

    pub fn get_or_add_sliding<T, F, Fut>(
        &self,
        partition: &str,
        key: &str,
        interval: Duration,
        parent_keys: &[String],
        producer: F,
    ) -> KvLiteResult<T>
    where
        T: Serialize + DeserializeOwned + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = KvLiteResult<T>>,
    {
        block_on(
            self.inner
                .get_or_add_sliding(partition, key, interval, parent_keys, &Self::never_cancelled(), producer),
        )
    }

    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error()
    }
}
