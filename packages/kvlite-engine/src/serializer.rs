//! Pluggable value serialization (C2, §4.2).
//!
//! Rust's generic methods are not object-safe, so KVLite cannot carry a
//! `dyn Serializer` the way the original .NET code carries a runtime-typed
//! `IFormatter`. Instead [`SerializationFormat`] selects between two
//! concrete, statically-dispatched encodings, and [`encode`]/[`decode`] are
//! free functions generic over the caller's `T`. Any `T: Serialize +
//! DeserializeOwned` satisfies `can_serialize`/`can_deserialize` by
//! construction -- the capability predicate spec.md asks for is enforced
//! by the type system rather than a runtime check.

use serde::de::DeserializeOwned;
use serde::Serialize;

use kvlite_core::{KvLiteError, KvLiteResult};

/// Which wire encoding a value is serialized with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationFormat {
    /// Portable structural encoding (JSON). Stands in for the spec's
    /// "default JSON-like variant".
    #[default]
    Structural,
    /// Compact binary encoding (`MessagePack`) carrying field tags more
    /// efficiently than JSON. Stands in for the spec's "binary variant" --
    /// Rust's static typing removes the need for the original's
    /// cross-assembly type metadata, so this only needs to encode values
    /// compactly, which `rmp_serde` does.
    Binary,
}

/// Serializes `value` per `format` into a fresh byte buffer.
pub fn encode<T: Serialize>(format: SerializationFormat, value: &T) -> KvLiteResult<Vec<u8>> {
    match format {
        SerializationFormat::Structural => {
            serde_json::to_vec(value).map_err(|e| KvLiteError::Serialization(e.into()))
        }
        SerializationFormat::Binary => {
            rmp_serde::to_vec(value).map_err(|e| KvLiteError::Serialization(e.into()))
        }
    }
}

/// Deserializes a value of type `T` from `bytes`, per `format`.
pub fn decode<T: DeserializeOwned>(format: SerializationFormat, bytes: &[u8]) -> KvLiteResult<T> {
    match format {
        SerializationFormat::Structural => {
            serde_json::from_slice(bytes).map_err(|e| KvLiteError::Serialization(e.into()))
        }
        SerializationFormat::Binary => {
            rmp_serde::from_slice(bytes).map_err(|e| KvLiteError::Serialization(e.into()))
        }
    }
}
