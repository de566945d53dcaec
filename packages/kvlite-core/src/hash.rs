//! Anti-tamper hashing utilities (C4).
//!
//! Two distinct fingerprints are computed with the same primitive:
//!
//! - [`entry_hash`] — a fingerprint over `(partition, key)` used as the
//!   primary-index discriminator (§3, invariant 4).
//! - [`anti_tamper_prefix`] — a fingerprint over `(partition, key,
//!   utc_creation)` written as an 8-byte little-endian prefix on the stored
//!   payload and re-checked on every read (§3, invariant 5; §6.2).
//!
//! Both are pure functions of their inputs: same inputs, same hash, always.
//! Collisions are an integrity signal, not a security boundary.

use xxhash_rust::xxh64::xxh64;

const HASH_SEED: u64 = 0x4B56_4C69_7465; // "KVLite" as a fixed seed.

/// 64-bit fingerprint over `(partition, key)`.
#[must_use]
pub fn entry_hash(partition: &str, key: &str) -> u64 {
    mix(&[partition.as_bytes(), key.as_bytes()])
}

/// 64-bit fingerprint over `(partition, key, utc_creation)`.
///
/// This is the anti-tamper prefix written before the serialized payload.
#[must_use]
pub fn anti_tamper_prefix(partition: &str, key: &str, utc_creation: i64) -> u64 {
    mix(&[
        partition.as_bytes(),
        key.as_bytes(),
        &utc_creation.to_le_bytes(),
    ])
}

fn mix(parts: &[&[u8]]) -> u64 {
    let mut buf = Vec::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for part in parts {
        buf.extend_from_slice(part);
        buf.push(0); // separator so ("ab","c") != ("a","bc")
    }
    xxh64(&buf, HASH_SEED)
}

/// Reinterprets a `u64` hash as the signed 64-bit column representation
/// used on the wire to SQL backends without a native unsigned column type.
///
/// Resolves spec.md's open question on hash column width: KVLite keeps
/// `u64` in process and stores it bit-for-bit as `i64` in SQL.
#[must_use]
pub fn hash_to_sql_i64(hash: u64) -> i64 {
    i64::from_ne_bytes(hash.to_ne_bytes())
}

/// Inverse of [`hash_to_sql_i64`].
#[must_use]
pub fn hash_from_sql_i64(value: i64) -> u64 {
    u64::from_ne_bytes(value.to_ne_bytes())
}
