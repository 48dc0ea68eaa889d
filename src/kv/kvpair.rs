// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use std::fmt;
use std::str;

use super::HexRepr;
use super::Key;
use super::Value;
use crate::proto::kvrpcpb;

/// A key/value pair.
///
/// # Examples
/// ```rust
/// # use rangekv_client::{Key, Value, KvPair};
/// let key = "key".to_owned();
/// let value = b"value".to_vec();
/// let constructed = KvPair::new(key.clone(), value.clone());
/// let from_tuple = KvPair::from((key, value));
/// assert_eq!(constructed, from_tuple);
/// ```
///
/// Many functions which accept a `KvPair` accept an `Into<KvPair>`, which
/// means a `(Key, Value)` tuple can be passed directly.
#[derive(Default, Clone, Eq, PartialEq, Hash)]
pub struct KvPair {
    pub key: Key,
    pub value: Value,
}

impl KvPair {
    /// Create a new `KvPair`.
    #[inline]
    pub fn new(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        KvPair {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Immutably borrow the `Key` part of the `KvPair`.
    #[inline]
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Immutably borrow the `Value` part of the `KvPair`.
    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consume `self` and return the `Key` part.
    #[inline]
    pub fn into_key(self) -> Key {
        self.key
    }

    /// Consume `self` and return the `Value` part.
    #[inline]
    pub fn into_value(self) -> Value {
        self.value
    }
}

impl<K, V> From<(K, V)> for KvPair
where
    K: Into<Key>,
    V: Into<Value>,
{
    fn from((k, v): (K, V)) -> Self {
        KvPair::new(k, v)
    }
}

impl From<KvPair> for (Key, Value) {
    fn from(pair: KvPair) -> Self {
        (pair.key, pair.value)
    }
}

impl From<kvrpcpb::KvPair> for KvPair {
    fn from(pair: kvrpcpb::KvPair) -> Self {
        KvPair::new(pair.key, pair.value)
    }
}

impl From<KvPair> for kvrpcpb::KvPair {
    fn from(pair: KvPair) -> Self {
        kvrpcpb::KvPair {
            key: pair.key.into(),
            value: pair.value,
        }
    }
}

impl AsRef<Key> for KvPair {
    fn as_ref(&self) -> &Key {
        &self.key
    }
}

impl fmt::Debug for KvPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match str::from_utf8(&self.value) {
            Ok(s) => write!(f, "KvPair({}, {:?})", HexRepr(&self.key.0), s),
            Err(_) => write!(
                f,
                "KvPair({}, {})",
                HexRepr(&self.key.0),
                HexRepr(&self.value)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proto_round_trip() {
        let pair = KvPair::new("k".to_owned(), vec![1u8, 2, 3]);
        let proto: kvrpcpb::KvPair = pair.clone().into();
        let back: KvPair = proto.into();
        assert_eq!(back, pair);
    }

    #[test]
    fn debug_formats_utf8_and_non_utf8_values() {
        let pair = KvPair::new("key".to_owned(), b"hello".to_vec());
        let s = format!("{pair:?}");
        assert!(s.contains("\"hello\""));

        let pair = KvPair::new("key".to_owned(), vec![0xFF, 0x00, 0xAA]);
        let s = format!("{pair:?}");
        assert!(s.contains("FF00AA"), "{s}");
    }
}
