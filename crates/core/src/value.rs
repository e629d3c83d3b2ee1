// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical argument values.
//!
//! Stage arguments are stored as a tagged union of comparable, serializable
//! surrogates: plain data stays inline, functions become registry
//! references, large payloads become blob handles into the payload store,
//! and user objects reduce to a constructor reference plus state.

use crate::func::FuncRef;
use crate::payload::{self, PayloadError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A canonical stage argument or result value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Function reference: compared and persisted by `(module, name)`.
    Func(FuncRef),
    /// Large out-of-band payload referenced through the payload store.
    Blob(BlobValue),
    /// User object reduced to constructor reference + serialized state.
    Object { ctor: FuncRef, state: Box<Value> },
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric accessor; integers coerce.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_func(&self) -> Option<&FuncRef> {
        match self {
            Value::Func(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&BlobValue> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Total ordering used for deterministic partitioning of per-rank
    /// arguments. Numbers compare numerically across `Int`/`Float`;
    /// otherwise variants order by kind, then contents.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Int(a), Float(b)) => (*a as f64).total_cmp(b),
            (Float(a), Int(b)) => a.total_cmp(&(*b as f64)),
            (Str(a), Str(b)) => a.cmp(b),
            (List(a), List(b)) => cmp_lists(a, b),
            (Map(a), Map(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    match ka.cmp(kb).then_with(|| va.total_cmp(vb)) {
                        Ordering::Equal => {}
                        other => return other,
                    }
                }
                a.len().cmp(&b.len())
            }
            (Func(a), Func(b)) => (&a.module, &a.name).cmp(&(&b.module, &b.name)),
            (Blob(a), Blob(b)) => a.nbytes.cmp(&b.nbytes).then_with(|| a.location.cmp(&b.location)),
            (Object { ctor: ca, state: sa }, Object { ctor: cb, state: sb }) => {
                (&ca.module, &ca.name)
                    .cmp(&(&cb.module, &cb.name))
                    .then_with(|| sa.total_cmp(sb))
            }
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Str(_) => 3,
            Value::List(_) => 4,
            Value::Map(_) => 5,
            Value::Func(_) => 6,
            Value::Blob(_) => 7,
            Value::Object { .. } => 8,
        }
    }

    /// Replace unlocated blobs with interned references (recursively).
    ///
    /// With chunking disabled the value is returned unchanged and blob
    /// bytes stay in-tree.
    pub fn flattened(&self, store: &mut payload::PayloadStore) -> Result<Value, PayloadError> {
        match self {
            Value::Blob(blob) => Ok(Value::Blob(blob.interned(store)?)),
            Value::List(items) => {
                let items = items.iter().map(|v| v.flattened(store)).collect::<Result<_, _>>()?;
                Ok(Value::List(items))
            }
            Value::Map(map) => {
                let map = map
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.flattened(store)?)))
                    .collect::<Result<_, PayloadError>>()?;
                Ok(Value::Map(map))
            }
            Value::Object { ctor, state } => Ok(Value::Object {
                ctor: ctor.clone(),
                state: Box::new(state.flattened(store)?),
            }),
            other => Ok(other.clone()),
        }
    }
}

fn cmp_lists(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.total_cmp(y) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<FuncRef> for Value {
    fn from(f: FuncRef) -> Self {
        Value::Func(f)
    }
}

impl From<BlobValue> for Value {
    fn from(b: BlobValue) -> Self {
        Value::Blob(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// Build a positional argument list: `args![1, "x", 2.5]`.
#[macro_export]
macro_rules! args {
    () => { Vec::<$crate::value::Value>::new() };
    ($($v:expr),+ $(,)?) => {
        vec![$($crate::value::Value::from($v)),+]
    };
}

/// Build a named argument map: `kwargs! { "x" => 1, "path" => "out" }`.
#[macro_export]
macro_rules! kwargs {
    () => { indexmap::IndexMap::<String, $crate::value::Value>::new() };
    ($($k:expr => $v:expr),+ $(,)?) => {{
        let mut map = indexmap::IndexMap::<String, $crate::value::Value>::new();
        $(map.insert($k.to_string(), $crate::value::Value::from($v));)+
        map
    }};
}

/// Out-of-band payload handle.
///
/// Freshly constructed blobs hold their bytes; interning assigns a
/// `(chunk, slot)` location and persistence drops the resident copy.
/// Restored blobs reload lazily through the payload store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobValue {
    /// `(chunk_index, slot_index)` once interned.
    pub location: Option<(u32, u32)>,
    pub nbytes: u64,
    /// Resident bytes; serialized only when chunking is disabled.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "arc_bytes")]
    pub data: Option<Arc<Vec<u8>>>,
}

impl BlobValue {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { location: None, nbytes: bytes.len() as u64, data: Some(Arc::new(bytes)) }
    }

    /// Resident or store-loaded bytes.
    pub fn bytes(&self) -> Result<Arc<Vec<u8>>, PayloadError> {
        if let Some(data) = &self.data {
            return Ok(data.clone());
        }
        match self.location {
            Some(location) => payload::store().lock().get(location),
            None => Err(PayloadError::Unlocated),
        }
    }

    /// Interned copy: location assigned, resident bytes dropped. With
    /// chunking disabled the blob is returned as-is (bytes stay in-tree).
    pub fn interned(&self, store: &mut payload::PayloadStore) -> Result<BlobValue, PayloadError> {
        if !store.chunking_enabled() {
            return Ok(self.clone());
        }
        let location = match self.location {
            Some(location) => location,
            None => match &self.data {
                Some(data) => store.intern(data)?,
                None => return Err(PayloadError::Unlocated),
            },
        };
        Ok(BlobValue { location: Some(location), nbytes: self.nbytes, data: None })
    }
}

impl PartialEq for BlobValue {
    fn eq(&self, other: &Self) -> bool {
        if self.nbytes != other.nbytes {
            return false;
        }
        // Same slot means same bytes without touching the store.
        if let (Some(a), Some(b)) = (self.location, other.location) {
            if a == b {
                return true;
            }
        }
        match (self.bytes(), other.bytes()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

mod arc_bytes {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::sync::Arc;

    pub fn serialize<S: Serializer>(
        data: &Option<Arc<Vec<u8>>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        data.as_ref().map(|arc| arc.as_slice()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Arc<Vec<u8>>>, D::Error> {
        Ok(Option::<Vec<u8>>::deserialize(deserializer)?.map(Arc::new))
    }
}

#[cfg(test)]
#[path = "value_tests.rs"]
mod tests;
