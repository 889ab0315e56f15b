// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
#![allow(clippy::match_ref_pats)]
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
#![allow(clippy::mutex_atomic)]

//! The value codec external contract (§6): encode/decode of a task's typed
//! leaf values to self-describing bytes, content-preserving and
//! byte-identical for equal values. Object Store blobs for `value` leaves
//! are exactly the bytes this codec produces.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A typed leaf value. `Map` uses a `BTreeMap` rather than an insertion-order
/// map so that two values built in different field orders still encode to
/// identical bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    /// Carried as its IEEE-754 bit pattern rather than `f64` so that the
    /// derived `PartialEq` (and therefore the codec's "equal values encode
    /// identically" guarantee) does not have to reason about NaN.
    Float(u64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn float(v: f64) -> Value {
        Value::Float(v.to_bits())
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct DecodeError(String);

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to decode value: {}", self.0)
    }
}

impl std::error::Error for DecodeError {}

/// The external contract: a codec that turns typed values into
/// self-describing bytes and back.
pub trait ValueCodec: Send + Sync {
    fn encode(&self, value: &Value) -> Vec<u8>;
    fn decode(&self, bytes: &[u8]) -> Result<Value, DecodeError>;
}

/// The concrete codec used by tests and the CLI: values are tagged JSON
/// objects, serialised with `serde_json`'s deterministic field order (map
/// keys are already sorted by the `BTreeMap` representation above).
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonValueCodec;

impl ValueCodec for JsonValueCodec {
    fn encode(&self, value: &Value) -> Vec<u8> {
        // `Value` and `serde_json`'s canonical object encoding make this
        // infallible for any value this type can represent.
        serde_json::to_vec(value).expect("Value always serialises")
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, DecodeError> {
        serde_json::from_slice(bytes).map_err(|e| DecodeError(e.to_string()))
    }
}

/// The deterministic "null blob": the bytes a `null` leaf hashes to when
/// treated as a statically-assigned input (§4.6.3).
pub fn null_blob() -> Vec<u8> {
    JsonValueCodec.encode(&Value::Null)
}
