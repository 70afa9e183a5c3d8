//! The JSON-shaped value and row model shared by every layer of the adapter.
//!
//! Rows coming out of the embedded engine, changeset payloads, and values
//! handed to callers through live queries are all expressed in terms of
//! [`Value`]. This keeps the reactive core decoupled from any particular
//! query builder's typed row representation.

use core::cmp::Ordering;
use std::collections::BTreeMap;

/// A single cell value, shaped after JSON's data model plus a blob variant
/// for SQLite's native binary type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

/// A single row, keyed by column name. `BTreeMap` gives rows a stable
/// iteration order, which matters when a row is hashed or serialized for
/// comparison in a live query's result cache.
pub type Row = BTreeMap<String, Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// Structural equality over [`Value`] trees, matching JSON-style deep
/// comparison rather than IEEE-754 float semantics: `NaN` compares equal
/// to `NaN`, so that a row containing a NaN column doesn't spuriously
/// compare "changed" against an identical previous snapshot.
pub fn structural_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Integer(x), Value::Integer(y)) => x == y,
        (Value::Real(x), Value::Real(y)) => x.to_bits() == y.to_bits() || (x.is_nan() && y.is_nan()),
        (Value::Integer(x), Value::Real(y)) | (Value::Real(y), Value::Integer(x)) => {
            *y == *x as f64
        }
        (Value::Text(x), Value::Text(y)) => x == y,
        (Value::Blob(x), Value::Blob(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| structural_eq(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|v2| structural_eq(v, v2)))
        }
        _ => false,
    }
}

/// Structural equality over two rows, used by the live-query engine to
/// decide whether a refetched result set actually differs from the
/// previous snapshot.
pub fn rows_eq(a: &[Row], b: &[Row]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(ra, rb)| row_eq(ra, rb))
}

fn row_eq(a: &Row, b: &Row) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(k, v)| b.get(k).is_some_and(|v2| structural_eq(v, v2)))
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A total order over [`Value`], used only to give [`Row`] (a `BTreeMap`)
/// deterministic ordering; it does not claim any semantic meaning beyond
/// "stable enough to compare two snapshots key by key". Values of
/// different kinds order by a fixed discriminant rank.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Integer(_) => 2,
                Value::Real(_) => 3,
                Value::Text(_) => 4,
                Value::Blob(_) => 5,
                Value::Array(_) => 6,
                Value::Object(_) => 7,
            }
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
            (Value::Real(x), Value::Real(y)) => x.total_cmp(y),
            (Value::Text(x), Value::Text(y)) => x.cmp(y),
            (Value::Blob(x), Value::Blob(y)) => x.cmp(y),
            (Value::Array(x), Value::Array(y)) => x.cmp(y),
            (Value::Object(x), Value::Object(y)) => x.cmp(y),
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

mod serde_impl {
    use super::Value;
    use serde::de::{self, Deserializer, Visitor};
    use serde::ser::{SerializeMap, SerializeSeq, Serializer};
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;
    use std::fmt;

    impl Serialize for Value {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self {
                Value::Null => serializer.serialize_none(),
                Value::Bool(b) => serializer.serialize_bool(*b),
                Value::Integer(i) => serializer.serialize_i64(*i),
                Value::Real(f) => serializer.serialize_f64(*f),
                Value::Text(s) => serializer.serialize_str(s),
                Value::Blob(b) => {
                    let mut seq = serializer.serialize_seq(Some(b.len()))?;
                    for byte in b {
                        seq.serialize_element(byte)?;
                    }
                    seq.end()
                }
                Value::Array(items) => {
                    let mut seq = serializer.serialize_seq(Some(items.len()))?;
                    for item in items {
                        seq.serialize_element(item)?;
                    }
                    seq.end()
                }
                Value::Object(map) => {
                    let mut ser_map = serializer.serialize_map(Some(map.len()))?;
                    for (k, v) in map {
                        ser_map.serialize_entry(k, v)?;
                    }
                    ser_map.end()
                }
            }
        }
    }

    struct ValueVisitor;

    impl<'de> Visitor<'de> for ValueVisitor {
        type Value = Value;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a JSON-shaped value")
        }

        fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
            Ok(Value::Null)
        }

        fn visit_none<E: de::Error>(self) -> Result<Value, E> {
            Ok(Value::Null)
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
            Ok(Value::Bool(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
            Ok(Value::Integer(v))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
            Ok(Value::Integer(v as i64))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
            Ok(Value::Real(v))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
            Ok(Value::Text(v.to_string()))
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
            Ok(Value::Text(v))
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
            let mut items = Vec::new();
            while let Some(v) = seq.next_element()? {
                items.push(v);
            }
            Ok(Value::Array(items))
        }

        fn visit_map<A: de::MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
            let mut entries = BTreeMap::new();
            while let Some((k, v)) = map.next_entry()? {
                entries.insert(k, v);
            }
            Ok(Value::Object(entries))
        }
    }

    impl<'de> Deserialize<'de> for Value {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
            deserializer.deserialize_any(ValueVisitor)
        }
    }
}
