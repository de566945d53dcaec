//! Distributed-cache-shaped shim (§6.4): `get`/`set`/`refresh`/`remove`
//! over raw bytes, one fixed partition, no parent keys.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use kvlite_core::{ClockSource, KvLiteError, KvLiteResult};

use crate::backend::BackendStore;
use crate::engine::{CacheEngine, TimedExpiry};

const SHIM_PARTITION: &str = "KVLite.DistributedCache";

/// The expiry policy accepted by [`DistributedCacheShim::set`]. Exactly one
/// of `sliding`/`absolute` may be set; both set is a precondition failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistributedCacheEntryOptions {
    pub sliding: Option<Duration>,
    pub absolute: Option<i64>,
    pub absolute_relative: Option<Duration>,
}

impl DistributedCacheEntryOptions {
    fn validate(&self) -> KvLiteResult<()> {
        let set_count =
            [self.sliding.is_some(), self.absolute.is_some(), self.absolute_relative.is_some()]
                .into_iter()
                .filter(|b| *b)
                .count();
        if self.sliding.is_some() && (self.absolute.is_some() || self.absolute_relative.is_some()) {
            return Err(KvLiteError::NotSupported(
                "sliding and absolute expiry cannot both be set".to_string(),
            ));
        }
        if set_count == 0 {
            return Err(KvLiteError::InvalidArgument(
                "exactly one expiry policy must be set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Byte-oriented shim over [`CacheEngine`], scoped to one fixed partition.
pub struct DistributedCacheShim<B: BackendStore, C: ClockSource> {
    engine: Arc<CacheEngine<B, C>>,
}

impl<B, C> DistributedCacheShim<B, C>
where
    B: BackendStore + Send + Sync + 'static,
    C: ClockSource + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(engine: Arc<CacheEngine<B, C>>) -> Self {
        Self { engine }
    }

    /// Equivalent to `get` -- also triggers sliding renewal when the entry
    /// was written with a sliding policy (§6.4: "refresh(key) ≡ get").
    pub async fn refresh(&self, key: &str, cancel: &CancellationToken) -> KvLiteResult<Option<Vec<u8>>> {
        self.get(key, cancel).await
    }

    pub async fn get(&self, key: &str, cancel: &CancellationToken) -> KvLiteResult<Option<Vec<u8>>> {
        self.engine.get::<Vec<u8>>(SHIM_PARTITION, key, cancel).await
    }

    pub async fn set(
        &self,
        key: &str,
        value: &[u8],
        options: DistributedCacheEntryOptions,
        cancel: &CancellationToken,
    ) -> KvLiteResult<()> {
        options.validate()?;
        let bytes = value.to_vec();
        if let Some(interval) = options.sliding {
            self.engine
                .add_sliding(SHIM_PARTITION, key, &bytes, interval, &[], cancel)
                .await
        } else if let Some(at) = options.absolute {
            self.engine
                .add_timed(SHIM_PARTITION, key, &bytes, TimedExpiry::At(at), &[], cancel)
                .await
        } else {
            let lifetime = options.absolute_relative.expect("validate() ensures one policy is set");
            self.engine
                .add_timed(SHIM_PARTITION, key, &bytes, TimedExpiry::After(lifetime), &[], cancel)
                .await
        }
    }

    pub async fn remove(&self, key: &str, cancel: &CancellationToken) -> KvLiteResult<()> {
        self.engine.remove(SHIM_PARTITION, key, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sqlite_backend::SqliteBackend;
    use crate::compressor::{Compressor, NoopCompressor};
    use crate::settings::{Settings, SettingsHandle};
    use kvlite_core::FakeClock;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn make_shim() -> DistributedCacheShim<SqliteBackend, FakeClock> {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let backend = SqliteBackend::new(pool, "", "kvl_cache_entries").unwrap();
        backend.ensure_schema("", "kvl_cache_entries").await.unwrap();
        let settings = Settings {
            connection_string: "sqlite::memory:".to_string(),
            chances_of_auto_cleanup: 0.0,
            ..Settings::default()
        };
        let (_handle, rx) = SettingsHandle::new(settings).unwrap();
        let engine = Arc::new(CacheEngine::new(
            backend,
            Arc::new(FakeClock::new(1_000)),
            rx,
            Arc::new(NoopCompressor) as Arc<dyn Compressor>,
        ));
        DistributedCacheShim::new(engine)
    }

    #[tokio::test]
    async fn set_with_sliding_then_get_round_trips() {
        let shim = make_shim().await;
        let cancel = CancellationToken::new();
        let opts = DistributedCacheEntryOptions {
            sliding: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        shim.set("k1", b"payload", opts, &cancel).await.unwrap();
        let value = shim.get("k1", &cancel).await.unwrap();
        assert_eq!(value.as_deref(), Some(b"payload".as_slice()));
    }

    #[tokio::test]
    async fn mixed_sliding_and_absolute_is_rejected() {
        let shim = make_shim().await;
        let cancel = CancellationToken::new();
        let opts = DistributedCacheEntryOptions {
            sliding: Some(Duration::from_secs(60)),
            absolute: Some(2_000),
            ..Default::default()
        };
        let err = shim.set("k1", b"x", opts, &cancel).await.unwrap_err();
        assert!(matches!(err, KvLiteError::NotSupported(_)));
    }

    #[tokio::test]
    async fn remove_deletes_the_entry() {
        let shim = make_shim().await;
        let cancel = CancellationToken::new();
        let opts = DistributedCacheEntryOptions {
            absolute: Some(9_999),
            ..Default::default()
        };
        shim.set("k1", b"x", opts, &cancel).await.unwrap();
        shim.remove("k1", &cancel).await.unwrap();
        assert_eq!(shim.get("k1", &cancel).await.unwrap(), None);
    }
}
