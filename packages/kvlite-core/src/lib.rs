//! `KVLite` core -- the cache entry data model, clock abstraction, anti-tamper
//! hashing, and the shared error taxonomy.
//!
//! This crate has no I/O dependency: no database driver, no async runtime.
//! Everything that touches a connection, a compressor, or a serializer
//! lives in `kvlite-engine`, which depends on this crate for its types.
//!
//! - **Clock** ([`clock`]): [`clock::ClockSource`] for dependency-injected time
//! - **Hash** ([`hash`]): anti-tamper fingerprinting
//! - **Entry** ([`entry`]): [`entry::CacheEntry`], [`entry::ExpiryMode`], parent-key packing
//! - **Error** ([`error`]): [`error::KvLiteError`], the shared error taxonomy

pub mod clock;
pub mod entry;
pub mod error;
pub mod hash;

pub use clock::{ClockSource, FakeClock, SystemClock};
pub use entry::{
    no_parents, pack_parent_keys, truncate_identifier, unpack_parent_keys, CacheEntry, ExpiryMode,
    ParentKeys, MAX_PARENT_KEYS,
};
pub use error::{KvLiteError, KvLiteResult};
pub use hash::{anti_tamper_prefix, entry_hash, hash_from_sql_i64, hash_to_sql_i64};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }

    #[test]
    fn reexports_accessible() {
        let _ = SystemClock;
        let _ = FakeClock::new(0);
        let _ = no_parents();
        let _ = entry_hash("p", "k");
        let _ = anti_tamper_prefix("p", "k", 0);
        let _: KvLiteResult<()> = Err(KvLiteError::Disposed);
        let _ = ExpiryMode::Timed;
    }
}
