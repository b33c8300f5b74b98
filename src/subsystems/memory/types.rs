//! Value types carried in session metadata.
//!
//! [`MetaValue`] is a scalar primitive (bool, int, float, string). Session
//! metadata is a string-keyed map of these, so flags like `condensed` and
//! counters like `original_turn_count` stay typed without pulling a
//! general-purpose JSON value into the conversation model.
//!
//! `Float` equality is based on bit patterns via `f64::to_bits()`. NaN is
//! treated as equal to itself, which is fine for metadata that should never
//! carry NaN in the first place.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    /// Equality uses the bit representation.
    Float(f64),
    Str(String),
}

impl MetaValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetaValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for MetaValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MetaValue::Bool(a), MetaValue::Bool(b)) => a == b,
            (MetaValue::Int(a), MetaValue::Int(b)) => a == b,
            (MetaValue::Float(a), MetaValue::Float(b)) => a.to_bits() == b.to_bits(),
            (MetaValue::Str(a), MetaValue::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for MetaValue {}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Bool(b) => write!(f, "{b}"),
            MetaValue::Int(i) => write!(f, "{i}"),
            MetaValue::Float(v) => write!(f, "{v}"),
            MetaValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self { MetaValue::Bool(v) }
}
impl From<i64> for MetaValue {
    fn from(v: i64) -> Self { MetaValue::Int(v) }
}
impl From<usize> for MetaValue {
    fn from(v: usize) -> Self { MetaValue::Int(i64::try_from(v).unwrap_or(i64::MAX)) }
}
impl From<f64> for MetaValue {
    fn from(v: f64) -> Self { MetaValue::Float(v) }
}
impl From<String> for MetaValue {
    fn from(v: String) -> Self { MetaValue::Str(v) }
}
impl From<&str> for MetaValue {
    fn from(v: &str) -> Self { MetaValue::Str(v.to_string()) }
}
