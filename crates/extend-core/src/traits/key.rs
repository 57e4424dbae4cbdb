//! Key-association trait driving partition-affinity decoration

use crate::{Result, Serializer};

/// Implemented by key types that can declare another key they should be
/// co-located with on the server's partitioned service.
///
/// When a key returns `Some`, the converter pair serializes the associated
/// key too and uses its partition ordinal to decorate the binary of the
/// original key, instead of the key's own ordinal. Most key types have no
/// association and use the default `None`.
pub trait KeyAssociation {
    /// Serialize the associated ("host") key, if this key declares one.
    fn associated_key_binary<S: Serializer>(&self, _serializer: &S) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

impl KeyAssociation for String {}
impl KeyAssociation for &str {}
impl KeyAssociation for Vec<u8> {}
impl KeyAssociation for i64 {}
impl KeyAssociation for i32 {}
impl KeyAssociation for u64 {}

/// A key explicitly bound to a co-location host key.
///
/// `host` is itself serialized and decorated the normal way; `this`'s binary
/// is decorated with the host's partition ordinal rather than its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociatedKey<K, H> {
    pub this: K,
    pub host: H,
}

impl<K, H> AssociatedKey<K, H> {
    pub fn new(this: K, host: H) -> Self {
        Self { this, host }
    }
}

impl<K, H: serde::Serialize> KeyAssociation for AssociatedKey<K, H> {
    fn associated_key_binary<S: Serializer>(&self, serializer: &S) -> Result<Option<Vec<u8>>> {
        Ok(Some(serializer.serialize(&self.host)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JsonSerializer;

    #[test]
    fn test_plain_key_has_no_association() {
        let s = JsonSerializer;
        assert_eq!("k".to_string().associated_key_binary(&s).unwrap(), None);
    }

    #[test]
    fn test_associated_key_serializes_host() {
        let s = JsonSerializer;
        let k = AssociatedKey::new("order-42".to_string(), "customer-7".to_string());
        let bytes = k.associated_key_binary(&s).unwrap().unwrap();
        let decoded: String = s.deserialize(&bytes).unwrap();
        assert_eq!(decoded, "customer-7");
    }
}
