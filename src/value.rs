//! The codec's universe: a tagged sum of the value kinds that flow on the
//! wire (spec.md §3 "Value").
//!
//! Decoders pattern-match over every alternative; encoders exhaust them.
//! There is no escape-hatch "any" representation.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A server-side object reference: (id, type-name, materialized handle).
///
/// The handle is type-erased because the codec doesn't know about the typed
/// wrappers (`Session`, `Statement`, ...) layered on top of it — it only
/// knows it was handed something implementing `RemoteObject` + `Any` by the
/// connection's materialize hook. Typed wrappers downcast it back.
#[derive(Clone)]
pub struct RemoteObjectRef {
    pub id: u64,
    pub type_name: String,
    pub handle: Arc<dyn Any + Send + Sync>,
}

impl fmt::Debug for RemoteObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObjectRef")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// The dynamic value carried by the wire protocol (spec.md §3).
///
/// `Record` is write-only: the decoder always strips tag 8 on read (it's a
/// transparent server-side typing marker), so `decode(encode(Record(v)))`
/// yields `v`, not `Record(v)`. Every other alternative round-trips exactly.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    UInt(u64),
    /// Always negative; non-negative integers are represented as `UInt`.
    Int(i64),
    Float32(f32),
    Float64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    /// Keys are unique; iteration order is not observable.
    Map(HashMap<String, Value>),
    Uuid(Uuid),
    /// An instant with up to nanosecond precision.
    DateTime(DateTime<Utc>),
    RemoteObject(RemoteObjectRef),
    Record(Box<Value>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (UInt(a), UInt(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            // bitwise equality within the declared width (spec.md §8)
            (Float32(a), Float32(b)) => a.to_bits() == b.to_bits(),
            (Float64(a), Float64(b)) => a.to_bits() == b.to_bits(),
            (Text(a), Text(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Uuid(a), Uuid(b)) => a == b,
            (DateTime(a), DateTime(b)) => a == b,
            (RemoteObject(a), RemoteObject(b)) => a.id == b.id && a.type_name == b.type_name,
            (Record(a), Record(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn array(values: impl IntoIterator<Item = Value>) -> Value {
        Value::Array(values.into_iter().collect())
    }

    pub fn map(entries: impl IntoIterator<Item = (String, Value)>) -> Value {
        Value::Map(entries.into_iter().collect())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::UInt(n) => Some(*n),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn into_remote_object(self) -> Option<RemoteObjectRef> {
        match self {
            Value::RemoteObject(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl RemoteObjectRef {
    /// Recovers the typed wrapper a factory stored in `handle`, if it is
    /// in fact a `T`. Used by typed methods whose return value is itself a
    /// remote object (e.g. `Session::get_perspective`).
    pub fn downcast<T: Send + Sync + 'static>(self) -> Option<Arc<T>> {
        self.handle.downcast::<T>().ok()
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::UInt(n)
    }
}

/// Dispatches to `UInt` or `Int` depending on sign, matching the encoder
/// contract in spec.md §4.1 ("positives always encode as UInt").
impl From<i64> for Value {
    fn from(n: i64) -> Self {
        if n >= 0 {
            Value::UInt(n as u64)
        } else {
            Value::Int(n)
        }
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::Float32(f)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float64(f)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::Array(values)
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
