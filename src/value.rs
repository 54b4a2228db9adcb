//! The crate's own canonical dynamic value, shared by both wire formats.
//!
//! Unlike `serde_json::Value`, objects preserve insertion order (a `Vec` of
//! pairs rather than a map) so that encoders produce a deterministic byte
//! stream and the format-aware field walkers in [`crate::serializer`] can
//! scan top-level entries without building a lookup table first.

use std::fmt;

/// A self-describing value: the unit of exchange between [`crate::Record`]
/// implementations and the wire formats.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    Object(Vec<(String, Value)>),
}

impl Value {
    pub fn as_object(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Object(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Value::Object(entries) => entries.iter().find(|(k, _)| k == field).map(|(_, v)| v),
            _ => None,
        }
    }

    /// True for the scalar kinds `extractField` is allowed to stringify.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::Array(_) | Value::Object(_))
    }

    /// Canonical decimal/string form used by partition routing and index
    /// keys: strings pass through, numbers use canonical decimal
    /// form, booleans map to "true"/"false", null maps to "null".
    pub fn to_canonical_string(&self) -> Option<String> {
        match self {
            Value::Null => Some("null".to_string()),
            Value::Bool(b) => Some(if *b { "true" } else { "false" }.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::UInt(u) => Some(u.to_string()),
            Value::Float(f) => Some(format_float(*f)),
            Value::Str(s) => Some(s.clone()),
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

/// Canonical decimal form for floats: shortest round-tripping representation
/// without a trailing ".0" ambiguity (`1` vs `1.0` both format distinctly).
fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() && f.abs() < 1e15 {
        format!("{:.1}", f)
    } else {
        let mut s = format!("{}", f);
        if !s.contains('.') && !s.contains('e') && !s.contains("inf") && !s.contains("NaN") {
            s.push_str(".0");
        }
        s
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_canonical_string() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "<complex>"),
        }
    }
}
