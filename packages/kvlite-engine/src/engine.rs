//! The cache engine (C9, §4.1): the orchestrator every operation flows
//! through, generic over a [`BackendStore`] and a [`ClockSource`].
//!
//! Replaces the source's class-per-backend inheritance with one generic
//! struct; replaces exceptions-as-control-flow with `Option`-returning reads
//! plus a monotonic `last_error` slot (§4.1.7).

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use kvlite_core::{
    anti_tamper_prefix, entry_hash, pack_parent_keys, truncate_identifier, CacheEntry, ClockSource,
    KvLiteError, KvLiteResult, SystemClock,
};

use crate::backend::{BackendStore, ExpiryFilter};
use crate::buffer_pool::BufferPool;
use crate::compressor::Compressor;
use crate::retry::RetryPolicy;
use crate::serializer::{self, SerializationFormat};
use crate::settings::Settings;

/// A fully-materialized entry returned by `get_item`/`peek_item`/`get_items`
/// -- the value plus the metadata the bare `get`/`peek` forms discard.
#[derive(Debug, Clone)]
pub struct CacheItem<T> {
    pub value: T,
    pub utc_expiry: i64,
    pub interval: i64,
    pub utc_creation: i64,
    pub parent_keys: Vec<String>,
}

/// How an `add_timed` call expresses its expiry.
#[derive(Debug, Clone, Copy)]
pub enum TimedExpiry {
    /// An absolute instant.
    At(i64),
    /// `now + lifetime` at write time.
    After(Duration),
}

/// Internal expiry plan shared by the three `add_*` entry points.
enum ExpiryPlan {
    Sliding(Duration),
    Static,
    Timed(TimedExpiry),
}

/// The cache engine. `B` is the SQL backend; `C` is the clock, defaulted to
/// the real system clock and swapped for [`kvlite_core::FakeClock`] in tests.
pub struct CacheEngine<B: BackendStore, C: ClockSource = SystemClock> {
    backend: B,
    clock: Arc<C>,
    settings_rx: watch::Receiver<Settings>,
    compressor: Arc<dyn Compressor>,
    buffer_pool: Arc<BufferPool>,
    retry: RetryPolicy,
    serialization_format: SerializationFormat,
    last_error: Mutex<Option<String>>,
    disposed: AtomicBool,
}

impl<B: BackendStore, C: ClockSource> CacheEngine<B, C> {
    /// Builds an engine over `backend`, reading buffer-pool size and retry
    /// attempts from the initial value of `settings_rx`.
    pub fn new(
        backend: B,
        clock: Arc<C>,
        settings_rx: watch::Receiver<Settings>,
        compressor: Arc<dyn Compressor>,
    ) -> Self {
        let settings = settings_rx.borrow().clone();
        Self {
            backend,
            clock,
            buffer_pool: Arc::new(BufferPool::new(settings.max_pooled_buffers)),
            retry: RetryPolicy::new(settings.retry_attempts),
            settings_rx,
            compressor,
            serialization_format: SerializationFormat::default(),
            last_error: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    /// Selects the wire encoding used for new writes. Existing rows keep
    /// whatever encoding they were written with; the engine does not tag
    /// rows with their format (callers are expected to standardize on one).
    #[must_use]
    pub fn with_serialization_format(mut self, format: SerializationFormat) -> Self {
        self.serialization_format = format;
        self
    }

    /// The last swallowed error, if any. Last-writer-wins; observational
    /// only (§5).
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Marks the engine disposed. Every subsequent operation fails with
    /// `KvLiteError::Disposed`.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Direct access to the underlying backend, bypassing preconditions,
    /// retry, and error swallowing. For integration tests that need to
    /// simulate out-of-band mutation (e.g. tamper detection) or inspect
    /// rows the public API intentionally hides.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn current_settings(&self) -> Settings {
        self.settings_rx.borrow().clone()
    }

    fn ensure_not_disposed(&self) -> KvLiteResult<()> {
        if self.is_disposed() {
            Err(KvLiteError::Disposed)
        } else {
            Ok(())
        }
    }

    fn ensure_not_cancelled(cancel: &CancellationToken) -> KvLiteResult<()> {
        if cancel.is_cancelled() {
            Err(KvLiteError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Swallows backend/serialization/tamper errors into `fallback`,
    /// recording them in `last_error` and logging at ERROR. Precondition
    /// errors (disposed, invalid argument, not-supported, cancelled)
    /// propagate (§4.1.7).
    fn swallow<T>(&self, fallback: T, result: KvLiteResult<T>) -> KvLiteResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) if err.is_swallowed() => {
                tracing::error!(error = %err, "kvlite operation failed, returning fallback");
                *self.last_error.lock() = Some(err.to_string());
                Ok(fallback)
            }
            Err(err) => Err(err),
        }
    }

    fn encode_payload<T: Serialize>(
        &self,
        value: &T,
        partition: &str,
        key: &str,
        utc_creation: i64,
    ) -> KvLiteResult<(Vec<u8>, bool)> {
        let mut buf = self.buffer_pool.acquire();
        buf.extend_from_slice(&anti_tamper_prefix(partition, key, utc_creation).to_le_bytes());
        buf.extend_from_slice(&serializer::encode(self.serialization_format, value)?);

        let settings = self.current_settings();
        if buf.len() > settings.min_length_for_compression {
            Ok((self.compressor.compress(&buf)?, true))
        } else {
            Ok((buf.to_vec(), false))
        }
    }

    fn decode_payload<T: DeserializeOwned>(
        &self,
        raw: &[u8],
        compressed: bool,
        partition: &str,
        key: &str,
        utc_creation: i64,
    ) -> KvLiteResult<T> {
        let bytes = if compressed {
            self.compressor.decompress(raw)?
        } else {
            raw.to_vec()
        };
        if bytes.len() < 8 {
            return Err(KvLiteError::DataTamper);
        }
        let (prefix, body) = bytes.split_at(8);
        let stored: u64 = u64::from_le_bytes(prefix.try_into().expect("split_at(8) yields 8 bytes"));
        if stored != anti_tamper_prefix(partition, key, utc_creation) {
            return Err(KvLiteError::DataTamper);
        }
        serializer::decode(self.serialization_format, body)
    }

    async fn add_inner<T: Serialize + Sync>(
        &self,
        partition: &str,
        key: &str,
        value: &T,
        plan: ExpiryPlan,
        parent_keys: &[String],
        cancel: &CancellationToken,
    ) -> KvLiteResult<()> {
        self.ensure_not_disposed()?;
        Self::ensure_not_cancelled(cancel)?;
        let settings = self.current_settings();
        let partition = truncate_identifier(partition, settings.max_partition_name_length);
        let key = truncate_identifier(key, settings.max_key_name_length);

        let truncated_parents: Vec<String> = parent_keys
            .iter()
            .map(|p| truncate_identifier(p, settings.max_key_name_length))
            .collect();
        let packed = pack_parent_keys(&truncated_parents).ok_or_else(|| {
            KvLiteError::NotSupported(format!(
                "at most {} parent keys are supported",
                settings.max_parent_keys_per_item()
            ))
        })?;

        let now = self.clock.now_utc();
        let (utc_expiry, interval) = match plan {
            ExpiryPlan::Sliding(d) => {
                let secs = d.as_secs() as i64;
                (now + secs, secs)
            }
            ExpiryPlan::Static => {
                let secs = settings.static_interval.as_secs() as i64;
                (now + secs, secs)
            }
            ExpiryPlan::Timed(TimedExpiry::At(at)) => (at, 0),
            ExpiryPlan::Timed(TimedExpiry::After(lifetime)) => (now + lifetime.as_secs() as i64, 0),
        };

        let (bytes, compressed) = self.encode_payload(value, &partition, &key, now)?;
        let entry = CacheEntry {
            hash: entry_hash(&partition, &key),
            partition,
            key,
            value: bytes,
            compressed,
            utc_expiry,
            interval,
            utc_creation: now,
            parent_keys: packed,
        };

        let backend = &self.backend;
        self.retry
            .run_async(cancel, || backend.insert_or_update_entry(&entry))
            .await
    }

    async fn get_value_inner<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> KvLiteResult<Option<T>> {
        self.ensure_not_disposed()?;
        Self::ensure_not_cancelled(cancel)?;
        let settings = self.current_settings();
        let partition = truncate_identifier(partition, settings.max_partition_name_length);
        let key = truncate_identifier(key, settings.max_key_name_length);
        let now = self.clock.now_utc();

        let Some(row) = self.backend.peek_value(&partition, &key).await? else {
            return Ok(None);
        };
        if row.utc_expiry < now {
            self.backend.delete_entry(&partition, &key).await?;
            return Ok(None);
        }
        if row.interval > 0 {
            let new_expiry = now + row.interval;
            if let Err(err) = self.backend.update_entry_expiry(&partition, &key, new_expiry).await {
                tracing::warn!(error = %err, partition, key, "sliding renewal failed; serving stale expiry");
            }
        }
        match self.decode_payload::<T>(&row.value, row.compressed, &partition, &key, row.utc_creation) {
            Ok(value) => Ok(Some(value)),
            Err(err @ (KvLiteError::DataTamper | KvLiteError::Serialization(_))) => {
                tracing::warn!(error = %err, partition, key, "dropping unreadable entry");
                let _ = self.backend.delete_entry(&partition, &key).await;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn get_item_inner<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> KvLiteResult<Option<CacheItem<T>>> {
        self.ensure_not_disposed()?;
        Self::ensure_not_cancelled(cancel)?;
        let settings = self.current_settings();
        let partition = truncate_identifier(partition, settings.max_partition_name_length);
        let key = truncate_identifier(key, settings.max_key_name_length);
        let now = self.clock.now_utc();

        let Some(row) = self.backend.peek_entry(&partition, &key).await? else {
            return Ok(None);
        };
        if !row.is_valid_at(now) {
            self.backend.delete_entry(&partition, &key).await?;
            return Ok(None);
        }
        let mut utc_expiry = row.utc_expiry;
        if row.is_sliding() {
            utc_expiry = now + row.interval;
            if let Err(err) = self.backend.update_entry_expiry(&partition, &key, utc_expiry).await {
                tracing::warn!(error = %err, partition, key, "sliding renewal failed; serving stale expiry");
            }
        }
        match self.decode_payload::<T>(&row.value, row.compressed, &partition, &key, row.utc_creation) {
            Ok(value) => Ok(Some(CacheItem {
                value,
                utc_expiry,
                interval: row.interval,
                utc_creation: row.utc_creation,
                parent_keys: row.parents().into_iter().map(str::to_string).collect(),
            })),
            Err(err @ (KvLiteError::DataTamper | KvLiteError::Serialization(_))) => {
                tracing::warn!(error = %err, partition, key, "dropping unreadable entry");
                let _ = self.backend.delete_entry(&partition, &key).await;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn get_items_inner<T: DeserializeOwned>(
        &self,
        partition: Option<&str>,
        cancel: &CancellationToken,
    ) -> KvLiteResult<Vec<CacheItem<T>>> {
        self.ensure_not_disposed()?;
        Self::ensure_not_cancelled(cancel)?;
        let now = self.clock.now_utc();
        let rows = self.backend.peek_entries(partition).await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            if !row.is_valid_at(now) {
                let _ = self.backend.delete_entry(&row.partition, &row.key).await;
                continue;
            }
            let mut utc_expiry = row.utc_expiry;
            if row.is_sliding() {
                utc_expiry = now + row.interval;
                let _ = self
                    .backend
                    .update_entry_expiry(&row.partition, &row.key, utc_expiry)
                    .await;
            }
            match self.decode_payload::<T>(&row.value, row.compressed, &row.partition, &row.key, row.utc_creation) {
                Ok(value) => items.push(CacheItem {
                    value,
                    utc_expiry,
                    interval: row.interval,
                    utc_creation: row.utc_creation,
                    parent_keys: row.parents().into_iter().map(str::to_string).collect(),
                }),
                Err(err @ (KvLiteError::DataTamper | KvLiteError::Serialization(_))) => {
                    tracing::warn!(error = %err, partition = %row.partition, key = %row.key, "dropping unreadable entry");
                    let _ = self.backend.delete_entry(&row.partition, &row.key).await;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(items)
    }

    fn ensure_peek_supported(&self) -> KvLiteResult<()> {
        if self.backend.can_peek() {
            Ok(())
        } else {
            Err(KvLiteError::NotSupported(
                "this backend does not support peek queries".to_string(),
            ))
        }
    }

    async fn peek_value_inner<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> KvLiteResult<Option<T>> {
        self.ensure_not_disposed()?;
        self.ensure_peek_supported()?;
        Self::ensure_not_cancelled(cancel)?;
        let settings = self.current_settings();
        let partition = truncate_identifier(partition, settings.max_partition_name_length);
        let key = truncate_identifier(key, settings.max_key_name_length);
        let now = self.clock.now_utc();

        let Some(row) = self.backend.peek_value(&partition, &key).await? else {
            return Ok(None);
        };
        if row.utc_expiry < now {
            return Ok(None);
        }
        match self.decode_payload::<T>(&row.value, row.compressed, &partition, &key, row.utc_creation) {
            Ok(value) => Ok(Some(value)),
            Err(KvLiteError::DataTamper | KvLiteError::Serialization(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn peek_item_inner<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> KvLiteResult<Option<CacheItem<T>>> {
        self.ensure_not_disposed()?;
        self.ensure_peek_supported()?;
        Self::ensure_not_cancelled(cancel)?;
        let settings = self.current_settings();
        let partition = truncate_identifier(partition, settings.max_partition_name_length);
        let key = truncate_identifier(key, settings.max_key_name_length);
        let now = self.clock.now_utc();

        let Some(row) = self.backend.peek_entry(&partition, &key).await? else {
            return Ok(None);
        };
        if !row.is_valid_at(now) {
            return Ok(None);
        }
        match self.decode_payload::<T>(&row.value, row.compressed, &partition, &key, row.utc_creation) {
            Ok(value) => Ok(Some(CacheItem {
                value,
                utc_expiry: row.utc_expiry,
                interval: row.interval,
                utc_creation: row.utc_creation,
                parent_keys: row.parents().into_iter().map(str::to_string).collect(),
            })),
            Err(KvLiteError::DataTamper | KvLiteError::Serialization(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn peek_items_inner<T: DeserializeOwned>(
        &self,
        partition: Option<&str>,
        cancel: &CancellationToken,
    ) -> KvLiteResult<Vec<CacheItem<T>>> {
        self.ensure_not_disposed()?;
        self.ensure_peek_supported()?;
        Self::ensure_not_cancelled(cancel)?;
        let now = self.clock.now_utc();
        let rows = self.backend.peek_entries(partition).await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            if !row.is_valid_at(now) {
                continue;
            }
            match self.decode_payload::<T>(&row.value, row.compressed, &row.partition, &row.key, row.utc_creation) {
                Ok(value) => items.push(CacheItem {
                    value,
                    utc_expiry: row.utc_expiry,
                    interval: row.interval,
                    utc_creation: row.utc_creation,
                    parent_keys: row.parents().into_iter().map(str::to_string).collect(),
                }),
                Err(KvLiteError::DataTamper | KvLiteError::Serialization(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(items)
    }

    async fn remove_inner(&self, partition: &str, key: &str, cancel: &CancellationToken) -> KvLiteResult<()> {
        self.ensure_not_disposed()?;
        Self::ensure_not_cancelled(cancel)?;
        let settings = self.current_settings();
        let partition = truncate_identifier(partition, settings.max_partition_name_length);
        let key = truncate_identifier(key, settings.max_key_name_length);

        let mut frontier = vec![key];
        while let Some(k) = frontier.pop() {
            let (_, children) = self.backend.delete_entry(&partition, &k).await?;
            frontier.extend(children);
        }
        Ok(())
    }

    async fn clear_inner(
        &self,
        partition: Option<&str>,
        mode: ExpiryFilter,
        cancel: &CancellationToken,
    ) -> KvLiteResult<u64> {
        self.ensure_not_disposed()?;
        Self::ensure_not_cancelled(cancel)?;
        let now = self.clock.now_utc();
        let directly_removed = self.backend.delete_entries(partition, mode, now).await?;
        let mut total = directly_removed.len() as u64;

        let mut frontier = directly_removed;
        while let Some((p, k)) = frontier.pop() {
            let (_, children) = self.backend.delete_entry(&p, &k).await?;
            total += children.len() as u64;
            frontier.extend(children.into_iter().map(|c| (p.clone(), c)));
        }
        Ok(total)
    }

    // ---- public API ----

    pub async fn contains(&self, partition: &str, key: &str) -> KvLiteResult<bool> {
        let result = async {
            self.ensure_not_disposed()?;
            let settings = self.current_settings();
            let partition = truncate_identifier(partition, settings.max_partition_name_length);
            let key = truncate_identifier(key, settings.max_key_name_length);
            let now = self.clock.now_utc();
            let Some(row) = self.backend.peek_entry(&partition, &key).await? else {
                return Ok(false);
            };
            Ok(row.is_valid_at(now))
        }
        .await;
        self.swallow(false, result)
    }

    pub async fn count(&self, partition: Option<&str>, mode: ExpiryFilter) -> KvLiteResult<u32> {
        let long = self.long_count(partition, mode).await?;
        Ok(u32::try_from(long).unwrap_or(u32::MAX))
    }

    pub async fn long_count(&self, partition: Option<&str>, mode: ExpiryFilter) -> KvLiteResult<u64> {
        let result = async {
            self.ensure_not_disposed()?;
            let now = self.clock.now_utc();
            self.backend.count_entries(partition, mode, now).await
        }
        .await;
        self.swallow(0, result)
    }

    pub async fn get_cache_size_in_bytes(&self) -> KvLiteResult<u64> {
        let result = async {
            self.ensure_not_disposed()?;
            self.backend.get_cache_size_in_bytes().await
        }
        .await;
        self.swallow(0, result)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> KvLiteResult<Option<T>> {
        let result = self.get_value_inner(partition, key, cancel).await;
        self.swallow(None, result)
    }

    pub async fn get_item<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> KvLiteResult<Option<CacheItem<T>>> {
        let result = self.get_item_inner(partition, key, cancel).await;
        self.swallow(None, result)
    }

    pub async fn get_items<T: DeserializeOwned>(
        &self,
        partition: Option<&str>,
        cancel: &CancellationToken,
    ) -> KvLiteResult<Vec<CacheItem<T>>> {
        let result = self.get_items_inner(partition, cancel).await;
        self.swallow(Vec::new(), result)
    }

    pub async fn peek<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> KvLiteResult<Option<T>> {
        let result = self.peek_value_inner(partition, key, cancel).await;
        self.swallow(None, result)
    }

    pub async fn peek_item<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> KvLiteResult<Option<CacheItem<T>>> {
        let result = self.peek_item_inner(partition, key, cancel).await;
        self.swallow(None, result)
    }

    pub async fn peek_items<T: DeserializeOwned>(
        &self,
        partition: Option<&str>,
        cancel: &CancellationToken,
    ) -> KvLiteResult<Vec<CacheItem<T>>> {
        let result = self.peek_items_inner(partition, cancel).await;
        self.swallow(Vec::new(), result)
    }

    pub async fn remove(&self, partition: &str, key: &str, cancel: &CancellationToken) -> KvLiteResult<()> {
        let result = self.remove_inner(partition, key, cancel).await;
        self.swallow((), result)
    }

    pub async fn clear(
        &self,
        partition: Option<&str>,
        mode: ExpiryFilter,
        cancel: &CancellationToken,
    ) -> KvLiteResult<u64> {
        let result = self.clear_inner(partition, mode, cancel).await;
        self.swallow(0, result)
    }
}

impl<B, C> CacheEngine<B, C>
where
    B: BackendStore + Send + Sync + 'static,
    C: ClockSource + Send + Sync + 'static,
{
    fn trigger_auto_cleanup_if_due(self: &Arc<Self>) {
        let chance = self.current_settings().chances_of_auto_cleanup;
        if rand::random::<f64>() >= chance {
            return;
        }
        let engine = Arc::clone(self);
        let cleanup = async move {
            let cancel = CancellationToken::new();
            if let Err(err) = engine.clear(None, ExpiryFilter::ConsiderExpiry, &cancel).await {
                tracing::warn!(error = %err, "auto cleanup task failed");
            }
        };
        // `add_*` is also reachable from `BlockingCacheEngine`, which drives
        // the engine with `block_on` outside any Tokio runtime. Spawning
        // there would panic, so fall back to running inline when there is
        // no reactor to hand the task to.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(cleanup);
            }
            Err(_) => futures::executor::block_on(cleanup),
        }
    }

    pub async fn add_sliding<T: Serialize + Sync>(
        self: &Arc<Self>,
        partition: &str,
        key: &str,
        value: &T,
        interval: Duration,
        parent_keys: &[String],
        cancel: &CancellationToken,
    ) -> KvLiteResult<()> {
        let result = self
            .add_inner(partition, key, value, ExpiryPlan::Sliding(interval), parent_keys, cancel)
            .await;
        self.trigger_auto_cleanup_if_due();
        self.swallow((), result)
    }

    pub async fn add_static<T: Serialize + Sync>(
        self: &Arc<Self>,
        partition: &str,
        key: &str,
        value: &T,
        parent_keys: &[String],
        cancel: &CancellationToken,
    ) -> KvLiteResult<()> {
        let result = self
            .add_inner(partition, key, value, ExpiryPlan::Static, parent_keys, cancel)
            .await;
        self.trigger_auto_cleanup_if_due();
        self.swallow((), result)
    }

    pub async fn add_timed<T: Serialize + Sync>(
        self: &Arc<Self>,
        partition: &str,
        key: &str,
        value: &T,
        expiry: TimedExpiry,
        parent_keys: &[String],
        cancel: &CancellationToken,
    ) -> KvLiteResult<()> {
        let result = self
            .add_inner(partition, key, value, ExpiryPlan::Timed(expiry), parent_keys, cancel)
            .await;
        self.trigger_auto_cleanup_if_due();
        self.swallow((), result)
    }

    pub async fn get_or_add_sliding<T, F, Fut>(
        self: &Arc<Self>,
        partition: &str,
        key: &str,
        interval: Duration,
        parent_keys: &[String],
        cancel: &CancellationToken,
        producer: F,
    ) -> KvLiteResult<T>
    where
        T: Serialize + DeserializeOwned + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = KvLiteResult<T>>,
    {
        if let Some(existing) = self.get::<T>(partition, key, cancel).await? {
            return Ok(existing);
        }
        let value = producer().await?;
        self.add_sliding(partition, key, &value, interval, parent_keys, cancel)
            .await?;
        Ok(value)
    }

    pub async fn get_or_add_static<T, F, Fut>(
        self: &Arc<Self>,
        partition: &str,
        key: &str,
        parent_keys: &[String],
        cancel: &CancellationToken,
        producer: F,
    ) -> KvLiteResult<T>
    where
        T: Serialize + DeserializeOwned + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = KvLiteResult<T>>,
    {
        if let Some(existing) = self.get::<T>(partition, key, cancel).await? {
            return Ok(existing);
        }
        let value = producer().await?;
        self.add_static(partition, key, &value, parent_keys, cancel).await?;
        Ok(value)
    }

    pub async fn get_or_add_timed<T, F, Fut>(
        self: &Arc<Self>,
        partition: &str,
        key: &str,
        expiry: TimedExpiry,
        parent_keys: &[String],
        cancel: &CancellationToken,
        producer: F,
    ) -> KvLiteResult<T>
    where
        T: Serialize + DeserializeOwned + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = KvLiteResult<T>>,
    {
        if let Some(existing) = self.get::<T>(partition, key, cancel).await? {
            return Ok(existing);
        }
        let value = producer().await?;
        self.add_timed(partition, key, &value, expiry, parent_keys, cancel)
            .await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sqlite_backend::SqliteBackend;
    use crate::compressor::GzipCompressor;
    use crate::settings::{Settings, SettingsHandle};
    use kvlite_core::FakeClock;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn make_engine() -> (Arc<CacheEngine<SqliteBackend, FakeClock>>, Arc<FakeClock>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let backend = SqliteBackend::new(pool, "", "kvl_cache_entries").unwrap();
        backend.ensure_schema("", "kvl_cache_entries").await.unwrap();

        let mut settings = Settings {
            connection_string: "sqlite::memory:".to_string(),
            min_length_for_compression: 8,
            ..Settings::default()
        };
        settings.chances_of_auto_cleanup = 0.0;
        let (_handle, rx) = SettingsHandle::new(settings).unwrap();
        let clock = Arc::new(FakeClock::new(1_000));
        let engine = Arc::new(CacheEngine::new(
            backend,
            Arc::clone(&clock),
            rx,
            Arc::new(GzipCompressor) as Arc<dyn Compressor>,
        ));
        (engine, clock)
    }

    fn no_cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn add_sliding_then_get_round_trips_value() {
        let (engine, _clock) = make_engine().await;
        let cancel = no_cancel();
        engine
            .add_sliding("P", "k1", &"hello".to_string(), Duration::from_secs(60), &[], &cancel)
            .await
            .unwrap();
        let value: Option<String> = engine.get("P", "k1", &cancel).await.unwrap();
        assert_eq!(value.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn get_on_expired_entry_self_heals_and_returns_none() {
        let (engine, clock) = make_engine().await;
        let cancel = no_cancel();
        engine
            .add_timed("P", "k1", &42_i32, TimedExpiry::After(Duration::from_secs(10)), &[], &cancel)
            .await
            .unwrap();
        clock.advance(20);
        let value: Option<i32> = engine.get("P", "k1", &cancel).await.unwrap();
        assert_eq!(value, None);
        assert!(!engine.contains("P", "k1").await.unwrap());
    }

    #[tokio::test]
    async fn sliding_get_renews_expiry() {
        let (engine, clock) = make_engine().await;
        let cancel = no_cancel();
        engine
            .add_sliding("P", "k1", &7_i32, Duration::from_secs(10), &[], &cancel)
            .await
            .unwrap();
        clock.advance(5);
        let item: CacheItem<i32> = engine.get_item("P", "k1", &cancel).await.unwrap().unwrap();
        assert_eq!(item.utc_expiry, 1_005 + 10);
    }

    #[tokio::test]
    async fn peek_never_renews_or_deletes() {
        let (engine, clock) = make_engine().await;
        let cancel = no_cancel();
        engine
            .add_timed("P", "k1", &1_i32, TimedExpiry::After(Duration::from_secs(10)), &[], &cancel)
            .await
            .unwrap();
        clock.advance(20);
        let peeked: Option<i32> = engine.peek("P", "k1", &cancel).await.unwrap();
        assert_eq!(peeked, None);
        assert!(
            engine.backend().peek_entry("P", "k1").await.unwrap().is_some(),
            "peek must not self-heal"
        );
        assert!(
            !engine.contains("P", "k1").await.unwrap(),
            "contains must treat an expired, un-swept row as absent"
        );
    }

    #[tokio::test]
    async fn contains_on_expired_unswept_entry_returns_false() {
        let (engine, clock) = make_engine().await;
        let cancel = no_cancel();
        engine
            .add_timed("P", "k1", &1_i32, TimedExpiry::After(Duration::from_secs(10)), &[], &cancel)
            .await
            .unwrap();
        clock.advance(20);
        // No `get`/`peek` call in between: the row is still physically
        // present and has never been swept by auto-cleanup.
        assert!(engine.backend().peek_entry("P", "k1").await.unwrap().is_some());
        assert!(!engine.contains("P", "k1").await.unwrap());
    }

    #[tokio::test]
    async fn remove_cascades_to_descendants() {
        let (engine, _clock) = make_engine().await;
        let cancel = no_cancel();
        engine.add_static("P", "parent", &1_i32, &[], &cancel).await.unwrap();
        engine
            .add_static("P", "child", &2_i32, &["parent".to_string()], &cancel)
            .await
            .unwrap();
        engine
            .add_static("P", "grandchild", &3_i32, &["child".to_string()], &cancel)
            .await
            .unwrap();

        engine.remove("P", "parent", &cancel).await.unwrap();
        assert!(!engine.contains("P", "parent").await.unwrap());
        assert!(!engine.contains("P", "child").await.unwrap());
        assert!(!engine.contains("P", "grandchild").await.unwrap());
    }

    #[tokio::test]
    async fn clear_with_consider_expiry_only_removes_expired() {
        let (engine, clock) = make_engine().await;
        let cancel = no_cancel();
        engine
            .add_timed("P", "expired", &1_i32, TimedExpiry::After(Duration::from_secs(1)), &[], &cancel)
            .await
            .unwrap();
        engine
            .add_timed("P", "live", &2_i32, TimedExpiry::After(Duration::from_secs(1000)), &[], &cancel)
            .await
            .unwrap();
        clock.advance(10);

        let removed = engine.clear(Some("P"), ExpiryFilter::ConsiderExpiry, &cancel).await.unwrap();
        assert_eq!(removed, 1);
        assert!(engine.contains("P", "live").await.unwrap());
        assert_eq!(engine.long_count(None, ExpiryFilter::IgnoreExpiry).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_or_add_sliding_only_invokes_producer_on_miss() {
        let (engine, _clock) = make_engine().await;
        let cancel = no_cancel();
        let calls = std::sync::atomic::AtomicU32::new(0);

        for _ in 0..3 {
            engine
                .get_or_add_sliding("P", "k1", Duration::from_secs(60), &[], &cancel, || async {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok::<_, KvLiteError>(99_i32)
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversized_parent_key_list_is_rejected() {
        let (engine, _clock) = make_engine().await;
        let cancel = no_cancel();
        let too_many: Vec<String> = (0..6).map(|i| format!("p{i}")).collect();
        let err = engine
            .add_static("P", "k1", &1_i32, &too_many, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, KvLiteError::NotSupported(_)));
    }

    #[tokio::test]
    async fn disposed_engine_rejects_operations() {
        let (engine, _clock) = make_engine().await;
        engine.dispose();
        let err = engine.contains("P", "k1").await.unwrap_err();
        assert!(matches!(err, KvLiteError::Disposed));
    }

    #[tokio::test]
    async fn large_value_is_compressed_on_write() {
        let (engine, _clock) = make_engine().await;
        let cancel = no_cancel();
        let big = "x".repeat(4096);
        engine.add_static("P", "k1", &big, &[], &cancel).await.unwrap();
        let item: CacheItem<String> = engine.get_item("P", "k1", &cancel).await.unwrap().unwrap();
        assert_eq!(item.value, big);
    }
}
