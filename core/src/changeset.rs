//! The CRDT changeset wire format used by snapshot sync (`getChangeset` /
//! `applyChangeset`) and by the live-sync channel, which speaks the same
//! format over the wire.
//!
//! A changeset is a JSON array of 8-tuples
//! `(table, pk, colVersion, dbVersion, siteId, cl, seq, value)`, where
//! `colVersion`, `dbVersion` and `siteId` are arbitrary-precision integers
//! serialized as the string `"BIGINT::<decimal>"` so they survive a JSON
//! round trip without losing precision to `f64`.

use std::fmt;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeTuple, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::LiveDbError;
use crate::value::Value;

/// An arbitrary-precision integer, wide enough for the version and site
/// identifiers a CRDT engine hands out. A true bignum type isn't needed
/// here: every engine that speaks this protocol packs versions and site
/// identifiers into 128 bits or fewer, so `i128` is wide enough without
/// adding a bignum dependency to the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BigInt(pub i128);

impl BigInt {
    pub fn new(v: i128) -> Self {
        BigInt(v)
    }
}

impl From<i128> for BigInt {
    fn from(v: i128) -> Self {
        BigInt(v)
    }
}

impl From<i64> for BigInt {
    fn from(v: i64) -> Self {
        BigInt(v as i128)
    }
}

const BIGINT_PREFIX: &str = "BIGINT::";

impl Serialize for BigInt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{BIGINT_PREFIX}{}", self.0))
    }
}

impl<'de> Deserialize<'de> for BigInt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BigIntVisitor;

        impl<'de> Visitor<'de> for BigIntVisitor {
            type Value = BigInt;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a string of the form \"{BIGINT_PREFIX}<decimal>\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<BigInt, E> {
                let digits = v
                    .strip_prefix(BIGINT_PREFIX)
                    .ok_or_else(|| de::Error::custom("missing BIGINT:: prefix"))?;
                digits
                    .parse::<i128>()
                    .map(BigInt)
                    .map_err(|e| de::Error::custom(format!("invalid bigint literal: {e}")))
            }
        }

        deserializer.deserialize_str(BigIntVisitor)
    }
}

/// Classifies an engine-level row change as observed through the update
/// hook. Distinct from the changeset wire format above: this is the shape
/// the change router (C7) fans out to live queries, not something that
/// crosses the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// One CRDT change tuple: `(table, pk, colVersion, dbVersion, siteId, cl, seq, value)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeTuple {
    pub table: String,
    pub pk: Value,
    pub col_version: BigInt,
    pub db_version: BigInt,
    pub site_id: BigInt,
    pub cl: i64,
    pub seq: i64,
    pub value: Value,
}

impl Serialize for ChangeTuple {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tup = serializer.serialize_tuple(8)?;
        tup.serialize_element(&self.table)?;
        tup.serialize_element(&self.pk)?;
        tup.serialize_element(&self.col_version)?;
        tup.serialize_element(&self.db_version)?;
        tup.serialize_element(&self.site_id)?;
        tup.serialize_element(&self.cl)?;
        tup.serialize_element(&self.seq)?;
        tup.serialize_element(&self.value)?;
        tup.end()
    }
}

impl<'de> Deserialize<'de> for ChangeTuple {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ChangeTupleVisitor;

        impl<'de> Visitor<'de> for ChangeTupleVisitor {
            type Value = ChangeTuple;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an 8-element change tuple")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<ChangeTuple, A::Error> {
                let table = next(&mut seq)?;
                let pk = next(&mut seq)?;
                let col_version = next(&mut seq)?;
                let db_version = next(&mut seq)?;
                let site_id = next(&mut seq)?;
                let cl = next(&mut seq)?;
                let seq_no = next(&mut seq)?;
                let value = next(&mut seq)?;
                if seq.next_element::<de::IgnoredAny>()?.is_some() {
                    return Err(de::Error::invalid_length(9, &self));
                }
                Ok(ChangeTuple {
                    table,
                    pk,
                    col_version,
                    db_version,
                    site_id,
                    cl,
                    seq: seq_no,
                    value,
                })
            }
        }

        fn next<'de, A: SeqAccess<'de>, T: Deserialize<'de>>(
            seq: &mut A,
        ) -> Result<T, A::Error> {
            seq.next_element()?
                .ok_or_else(|| de::Error::custom("expected 8-element change tuple"))
        }

        deserializer.deserialize_seq(ChangeTupleVisitor)
    }
}

/// Serializes a changeset to its wire format: a JSON array of 8-tuples, an
/// empty changeset serializing to `"[]"`.
pub fn to_wire(tuples: &[ChangeTuple]) -> crate::error::Result<String> {
    serde_json::to_string(tuples).map_err(LiveDbError::from)
}

/// Parses and validates a changeset received over the wire.
///
/// Returns [`LiveDbError::InvalidChangeset`] with the literal message
/// `Invalid changeset format. Expected a JSON array of change tuples.` if
/// the payload isn't valid JSON, isn't an array, or contains an element
/// that isn't an 8-element tuple.
pub fn from_wire(raw: &str) -> crate::error::Result<Vec<ChangeTuple>> {
    const INVALID_MSG: &str = "Invalid changeset format. Expected a JSON array of change tuples.";

    let parsed: serde_json::Value =
        serde_json::from_str(raw).map_err(|_| LiveDbError::InvalidChangeset(INVALID_MSG.into()))?;

    let array = parsed
        .as_array()
        .ok_or_else(|| LiveDbError::InvalidChangeset(INVALID_MSG.into()))?;

    let mut tuples = Vec::with_capacity(array.len());
    for element in array {
        let is_valid_tuple = element.as_array().is_some_and(|a| a.len() == 8);
        if !is_valid_tuple {
            return Err(LiveDbError::InvalidChangeset(INVALID_MSG.into()));
        }
        let tuple: ChangeTuple = serde_json::from_value(element.clone())
            .map_err(|_| LiveDbError::InvalidChangeset(INVALID_MSG.into()))?;
        tuples.push(tuple);
    }

    Ok(tuples)
}
