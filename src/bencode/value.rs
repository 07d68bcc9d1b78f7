use bytes::Bytes;
use std::collections::BTreeMap;

/// A bencode value.
///
/// Dictionaries use a `BTreeMap` so encoding naturally emits keys in the
/// canonical bytewise order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A signed 64-bit integer.
    Integer(i64),
    /// A byte string, not necessarily valid UTF-8.
    Bytes(Bytes),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A dictionary with byte-string keys.
    Dict(BTreeMap<Bytes, Value>),
}

impl Value {
    /// Builds a byte-string value from a UTF-8 string.
    pub fn string(s: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }

    pub fn as_int(&self) -> Option<i64> {
        if let Value::Integer(n) = self {
            return Some(*n);
        }
        None
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        if let Value::Bytes(bytes) = self {
            return Some(bytes);
        }
        None
    }

    /// The value as a UTF-8 string, if it is a byte string holding valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.as_bytes()?).ok()
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        if let Value::List(items) = self {
            return Some(items);
        }
        None
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Bytes, Value>> {
        if let Value::Dict(entries) = self {
            return Some(entries);
        }
        None
    }

    pub fn into_dict(self) -> Option<BTreeMap<Bytes, Value>> {
        if let Value::Dict(entries) = self {
            return Some(entries);
        }
        None
    }

    /// Dictionary lookup; `None` if the value is not a dict or the key is absent.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict()?.get(key)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<Bytes> for Value {
    fn from(bytes: Bytes) -> Self {
        Value::Bytes(bytes)
    }
}
