//! `KVLite` engine -- the SQL-backed cache engine built on `kvlite-core`'s
//! data model, generic over a [`backend::BackendStore`].
//!
//! - **Backend** ([`backend`]): [`backend::BackendStore`], SQL dialects and templates
//! - **Engine** ([`engine`]): [`engine::CacheEngine`], the operation orchestrator
//! - **Blocking** ([`blocking`]): the synchronous facade over [`engine::CacheEngine`]
//! - **Serializer** ([`serializer`]): [`serializer::SerializationFormat`]
//! - **Compressor** ([`compressor`]): [`compressor::Compressor`]
//! - **Buffer pool** ([`buffer_pool`]): [`buffer_pool::BufferPool`]
//! - **Retry** ([`retry`]): [`retry::RetryPolicy`]
//! - **Settings** ([`settings`]): [`settings::Settings`], [`settings::SettingsHandle`]
//! - **Shims** ([`shims`]): distributed-cache and output-cache adapters

pub mod backend;
pub mod blocking;
pub mod buffer_pool;
pub mod compressor;
pub mod engine;
pub mod retry;
pub mod serializer;
pub mod settings;
pub mod shims;

pub use backend::{BackendStore, ExpiryFilter, PeekedValue, SqlDialect, SqlTemplates, SqliteBackend};
pub use blocking::BlockingCacheEngine;
pub use buffer_pool::{BufferPool, PooledBuffer};
pub use compressor::{Compressor, GzipCompressor, NoopCompressor};
pub use engine::{CacheEngine, CacheItem, TimedExpiry};
pub use retry::RetryPolicy;
pub use serializer::SerializationFormat;
pub use settings::{Settings, SettingsHandle};

#[cfg(feature = "postgres")]
pub use backend::PostgresBackend;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {}
}
