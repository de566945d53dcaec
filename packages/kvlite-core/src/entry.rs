//! The cache entry data model (§3).
//!
//! [`CacheEntry`] is the row-level representation: partition/key identity,
//! the opaque wire-format payload (anti-tamper prefix + serialized body,
//! optionally compressed — see §6.2), and up to [`MAX_PARENT_KEYS`] parent
//! references that drive cascade-on-delete.
//!
//! [`ExpiryMode`] is the caller-facing policy (§3 "three expiry modes");
//! it is not a column, it is the input that produces `utc_expiry`/`interval`.

use std::time::Duration;

/// Maximum number of parent-key slots per entry (`max_parent_keys_per_item`
/// in settings; this is the hard ceiling the type itself enforces).
pub const MAX_PARENT_KEYS: usize = 5;

/// Parent-key slots, tail-aligned: once a slot is `None`, every slot after
/// it must also be `None` (§3, invariant 3).
pub type ParentKeys = [Option<String>; MAX_PARENT_KEYS];

/// No parent keys.
#[must_use]
pub fn no_parents() -> ParentKeys {
    Default::default()
}

/// Packs a slice of parent keys into the tail-aligned fixed array.
///
/// Returns `None` if `keys.len() > MAX_PARENT_KEYS`; the caller (the engine)
/// turns that into `KvLiteError::NotSupported` (P8).
#[must_use]
pub fn pack_parent_keys(keys: &[String]) -> Option<ParentKeys> {
    if keys.len() > MAX_PARENT_KEYS {
        return None;
    }
    let mut packed: ParentKeys = Default::default();
    for (slot, key) in packed.iter_mut().zip(keys.iter()) {
        *slot = Some(key.clone());
    }
    Some(packed)
}

/// Returns the non-null parent keys, in slot order.
#[must_use]
pub fn unpack_parent_keys(keys: &ParentKeys) -> Vec<&str> {
    keys.iter().filter_map(|k| k.as_deref()).collect()
}

/// The three expiry modes (policy, not separate tables — §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryMode {
    /// `interval = 0`; `utc_expiry` is absolute and never renewed on read.
    Timed,
    /// `interval = D > 0`; `utc_expiry` is renewed to `now + D` on every
    /// non-peek read.
    Sliding(Duration),
    /// Sliding with `D = settings.static_interval`.
    Static,
}

/// A single row in the entries table (§3).
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub partition: String,
    pub key: String,
    /// Fingerprint over `(partition, key)`; primary index discriminator.
    pub hash: u64,
    /// Opaque wire-format payload: anti-tamper prefix + serialized body,
    /// compressed as a whole when `compressed` is set (§6.2).
    pub value: Vec<u8>,
    pub compressed: bool,
    /// Absolute expiry instant, seconds since the Unix epoch.
    pub utc_expiry: i64,
    /// Sliding-renewal interval in seconds. `0` means timed (no renewal).
    pub interval: i64,
    /// Creation instant, seconds since the Unix epoch. Never updated.
    pub utc_creation: i64,
    pub parent_keys: ParentKeys,
}

impl CacheEntry {
    /// An entry is valid at `now` iff `utc_expiry >= now` (§3, invariant 7).
    #[must_use]
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.utc_expiry >= now
    }

    /// Whether this entry renews its expiry on read (`interval > 0`).
    #[must_use]
    pub fn is_sliding(&self) -> bool {
        self.interval > 0
    }

    /// The non-null parent keys, in slot order.
    #[must_use]
    pub fn parents(&self) -> Vec<&str> {
        unpack_parent_keys(&self.parent_keys)
    }
}

/// Truncates a partition or key string to `max_len` bytes on a UTF-8
/// boundary, never splitting a multi-byte character (§3: "truncated on
/// write"; P12).
#[must_use]
pub fn truncate_identifier(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}
