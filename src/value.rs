//! Dynamic values flowing through a graph.
//!
//! Every computation consumes and produces [`Value`]s. The variant set is
//! closed so that equality, total ordering, hashing and serialization all
//! behave deterministically — a requirement for content addressing. Maps
//! are kept as sorted, unique key-value pairs rather than a hash map for
//! the same reason (and so that `serde_json` can round-trip them without
//! string-keyed objects).

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// An owned dynamic value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Sentinel propagated through a branch discarded by a switch.
    /// Distinguishable both here and at the hash level.
    Nothing,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<Value>),
    /// Sorted, unique key-value pairs. Use [`Value::map`] to construct.
    Map(Vec<(Value, Value)>),
}

impl Value {
    pub fn is_nothing(&self) -> bool {
        matches!(self, Value::Nothing)
    }

    /// Build a map value; pairs are sorted by key, later duplicates win.
    pub fn map(pairs: impl IntoIterator<Item = (Value, Value)>) -> Value {
        let mut sorted: Vec<(Value, Value)> = Vec::new();
        for (key, value) in pairs {
            match sorted.binary_search_by(|(k, _)| k.cmp(&key)) {
                Ok(at) => sorted[at].1 = value,
                Err(at) => sorted.insert(at, (key, value)),
            }
        }
        Value::Map(sorted)
    }

    /// Look a key up in a map value.
    pub fn map_get(&self, key: &Value) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs
                .binary_search_by(|(k, _)| k.cmp(key))
                .ok()
                .map(|at| &pairs[at].1),
            _ => None,
        }
    }

    /// Keys of a map value, in order.
    pub fn map_keys(&self) -> Option<impl Iterator<Item = &Value>> {
        match self {
            Value::Map(pairs) => Some(pairs.iter().map(|(k, _)| k)),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Nothing => 0,
            Value::Null => 1,
            Value::Bool(_) => 2,
            Value::Int(_) => 3,
            Value::Float(_) => 4,
            Value::Str(_) => 5,
            Value::Bytes(_) => 6,
            Value::Seq(_) => 7,
            Value::Map(_) => 8,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Seq(a), Value::Seq(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(self.rank());
        match self {
            Value::Nothing | Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Seq(items) => items.hash(state),
            Value::Map(pairs) => pairs.hash(state),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Seq(v)
    }
}

/// Feed the canonical encoding of a value into a hasher.
///
/// This is the byte form digests are computed over. It is infallible and
/// total (non-finite floats go in by bit pattern), unlike the JSON codec
/// used for persisted values.
pub(crate) fn write_canonical(value: &Value, hasher: &mut blake3::Hasher) {
    match value {
        Value::Nothing => {
            hasher.update(&[0]);
        }
        Value::Null => {
            hasher.update(&[1]);
        }
        Value::Bool(b) => {
            hasher.update(&[2, *b as u8]);
        }
        Value::Int(i) => {
            hasher.update(&[3]);
            hasher.update(&i.to_be_bytes());
        }
        Value::Float(f) => {
            hasher.update(&[4]);
            hasher.update(&f.to_bits().to_be_bytes());
        }
        Value::Str(s) => {
            hasher.update(&[5]);
            hasher.update(&(s.len() as u64).to_be_bytes());
            hasher.update(s.as_bytes());
        }
        Value::Bytes(b) => {
            hasher.update(&[6]);
            hasher.update(&(b.len() as u64).to_be_bytes());
            hasher.update(b);
        }
        Value::Seq(items) => {
            hasher.update(&[7]);
            hasher.update(&(items.len() as u64).to_be_bytes());
            for item in items {
                write_canonical(item, hasher);
            }
        }
        Value::Map(pairs) => {
            hasher.update(&[8]);
            hasher.update(&(pairs.len() as u64).to_be_bytes());
            for (key, value) in pairs {
                write_canonical(key, hasher);
                write_canonical(value, hasher);
            }
        }
    }
}

/// Canonical digest of a single value.
pub(crate) fn value_digest(value: &Value) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    write_canonical(value, &mut hasher);
    hasher.finalize()
}
