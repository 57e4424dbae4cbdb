//! Key/Value Converter Pair: object<->binary conversion, parameterized by
//! the current serializer, with partition-affinity decoration for keys.

use extend_core::{ExtendError, KeyAssociation, Result, Serializer};
use serde::de::DeserializeOwned;
use serde::Serialize;

const DECORATION_TAG: u8 = 0xDA;

fn is_decorated(binary: &[u8]) -> bool {
    binary.first() == Some(&DECORATION_TAG) && binary.len() >= 5
}

fn decorate(raw: &[u8], ordinal: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + 5);
    out.push(DECORATION_TAG);
    out.extend_from_slice(&ordinal.to_be_bytes());
    out.extend_from_slice(raw);
    out
}

/// Deterministic partition ordinal for a binary key. The wire format of
/// this value is implementation-defined as long as it is stable for a
/// given input — this is an FNV-1a fold.
fn partition_ordinal(bytes: &[u8]) -> i32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    (hash & 0x7fff_ffff) as i32
}

/// Object<->binary conversion for one serializer, shared by every
/// `NamedCache<K, V, S>` built on top of it.
#[derive(Clone)]
pub struct ConverterPair<S: Serializer> {
    serializer: S,
    defer_key_association: bool,
}

impl<S: Serializer> ConverterPair<S> {
    pub fn new(serializer: S, defer_key_association: bool) -> Self {
        Self { serializer, defer_key_association }
    }

    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// Serialize `key` and, unless `defer_key_association` is set, decorate
    /// it with the partition ordinal of its associated key (or of its own
    /// binary, when the key has none).
    pub fn key_to_binary<K: Serialize + KeyAssociation>(&self, key: &K) -> Result<Vec<u8>> {
        let raw = self.serializer.serialize(key)?;
        if self.defer_key_association {
            return Ok(raw);
        }
        let basis = key.associated_key_binary(&self.serializer)?.unwrap_or_else(|| raw.clone());
        Ok(decorate(&raw, partition_ordinal(&basis)))
    }

    pub fn value_to_binary<V: Serialize>(&self, value: &V) -> Result<Vec<u8>> {
        self.serializer.serialize(value)
    }

    pub fn binary_to_value<V: DeserializeOwned>(&self, binary: &[u8]) -> Result<V> {
        self.serializer.deserialize(binary)
    }

    /// Re-decorate a key binary that may already carry a partition prefix.
    /// Requires the key's static type to deserialize and re-check its
    /// association, since the binary alone carries no type information.
    pub fn binary_to_decorated<K: Serialize + DeserializeOwned + KeyAssociation>(&self, binary: &[u8]) -> Result<Vec<u8>> {
        if is_decorated(binary) {
            return Ok(binary.to_vec());
        }
        let key: K = self.serializer.deserialize(binary)?;
        let basis = key.associated_key_binary(&self.serializer)?.unwrap_or_else(|| binary.to_vec());
        Ok(decorate(binary, partition_ordinal(&basis)))
    }

    pub fn binary_to_undecorated(&self, binary: &[u8]) -> Vec<u8> {
        if is_decorated(binary) {
            binary[5..].to_vec()
        } else {
            binary.to_vec()
        }
    }
}

pub(crate) fn map_failure(payload: extend_core::FailurePayload) -> ExtendError {
    if payload.is_encoded_exception {
        ExtendError::ServerFailure { message: payload.message, encoded: true }
    } else {
        ExtendError::ServerFailure { message: payload.message, encoded: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extend_core::JsonSerializer;

    #[test]
    fn test_undecorated_roundtrip_without_association() {
        let pair = ConverterPair::new(JsonSerializer, false);
        let binary = pair.key_to_binary(&"hello".to_string()).unwrap();
        assert!(is_decorated(&binary));
        let stripped = pair.binary_to_undecorated(&binary);
        let value: String = pair.binary_to_value(&stripped).unwrap();
        assert_eq!(value, "hello");
    }

    #[test]
    fn test_defer_key_association_skips_decoration() {
        let pair = ConverterPair::new(JsonSerializer, true);
        let binary = pair.key_to_binary(&"hello".to_string()).unwrap();
        assert!(!is_decorated(&binary));
    }

    #[test]
    fn test_binary_to_decorated_is_idempotent() {
        let pair = ConverterPair::new(JsonSerializer, false);
        let binary = pair.key_to_binary(&"k".to_string()).unwrap();
        let redecorated = pair.binary_to_decorated::<String>(&binary).unwrap();
        assert_eq!(binary, redecorated);
    }

    #[test]
    fn test_value_roundtrip() {
        let pair = ConverterPair::new(JsonSerializer, false);
        let binary = pair.value_to_binary(&42i32).unwrap();
        let value: i32 = pair.binary_to_value(&binary).unwrap();
        assert_eq!(value, 42);
    }
}
