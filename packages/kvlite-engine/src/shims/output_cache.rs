//! Legacy web output-cache provider shim (§6.4): `add`/`get`/`set`/`remove`
//! mapped onto `add_timed`/`get`/`add_timed`/`remove` in the default
//! partition. `add` is add-if-absent and returns the pre-existing value
//! when one is already present, unlike `set` which always overwrites.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use kvlite_core::{ClockSource, KvLiteResult};

use crate::backend::BackendStore;
use crate::engine::{CacheEngine, TimedExpiry};

const SHIM_PARTITION: &str = "KVLite.OutputCache";

pub struct OutputCacheProvider<B: BackendStore, C: ClockSource> {
    engine: Arc<CacheEngine<B, C>>,
}

impl<B, C> OutputCacheProvider<B, C>
where
    B: BackendStore + Send + Sync + 'static,
    C: ClockSource + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(engine: Arc<CacheEngine<B, C>>) -> Self {
        Self { engine }
    }

    /// Add-if-absent: on a hit returns the existing value without writing;
    /// on a miss writes `value` and returns it back.
    pub async fn add(
        &self,
        key: &str,
        value: Vec<u8>,
        utc_expiry: i64,
        cancel: &CancellationToken,
    ) -> KvLiteResult<Vec<u8>> {
        if let Some(existing) = self.engine.get::<Vec<u8>>(SHIM_PARTITION, key, cancel).await? {
            return Ok(existing);
        }
        self.engine
            .add_timed(SHIM_PARTITION, key, &value, TimedExpiry::At(utc_expiry), &[], cancel)
            .await?;
        Ok(value)
    }

    pub async fn get(&self, key: &str, cancel: &CancellationToken) -> KvLiteResult<Option<Vec<u8>>> {
        self.engine.get::<Vec<u8>>(SHIM_PARTITION, key, cancel).await
    }

    /// Unconditional write, overwriting any existing value.
    pub async fn set(
        &self,
        key: &str,
        value: &[u8],
        utc_expiry: i64,
        cancel: &CancellationToken,
    ) -> KvLiteResult<()> {
        self.engine
            .add_timed(SHIM_PARTITION, key, &value.to_vec(), TimedExpiry::At(utc_expiry), &[], cancel)
            .await
    }

    pub async fn remove(&self, key: &str, cancel: &CancellationToken) -> KvLiteResult<()> {
        self.engine.remove(SHIM_PARTITION, key, cancel).await
    }
}
