//! Shared error taxonomy (§7).
//!
//! Precondition failures (`InvalidArgument`, `Disposed`, `NotSupported`,
//! `Cancelled`) are raised to callers. `Backend`, `Serialization`, and
//! `DataTamper` are the kinds the engine swallows: it logs them, records
//! them in `last_error`, and degrades to a benign return value.

/// The full error taxonomy for KVLite operations.
#[derive(Debug, thiserror::Error)]
pub enum KvLiteError {
    /// Nulls, too-many parent keys, invalid schema/table identifiers, or
    /// any other argument that fails validation before a backend call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine was used after `dispose()`.
    #[error("engine has been disposed")]
    Disposed,

    /// `peek` on a backend with `can_peek = false`, or mixing sliding and
    /// absolute expiry in the distributed-cache shim.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// An async operation's cancellation token fired before the backend
    /// call was issued.
    #[error("operation cancelled")]
    Cancelled,

    /// A connection or query failure from the backing store. Retried by
    /// the retry policy; swallowed by the engine on writes after the
    /// retry budget is exhausted.
    #[error("backend error: {0}")]
    Backend(#[source] anyhow::Error),

    /// The serializer or compressor failed to round-trip a value.
    /// Swallowed: the offending row is removed and the read returns `None`.
    #[error("serialization error: {0}")]
    Serialization(#[source] anyhow::Error),

    /// The anti-tamper hash did not match the stored payload.
    /// Swallowed: the offending row is removed and the read returns `None`.
    #[error("anti-tamper hash mismatch")]
    DataTamper,
}

impl KvLiteError {
    /// True for the error kinds spec.md §7 says must be swallowed by the
    /// engine rather than raised to the caller.
    #[must_use]
    pub fn is_swallowed(&self) -> bool {
        matches!(
            self,
            KvLiteError::Backend(_) | KvLiteError::Serialization(_) | KvLiteError::DataTamper
        )
    }
}

/// Convenience alias used throughout the KVLite crates.
pub type KvLiteResult<T> = Result<T, KvLiteError>;
