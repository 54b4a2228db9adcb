//! The predicate DSL a caller composes a query from. A `Query`
//! is a conjunction (`AND`) of field predicates; the planner decides how to
//! execute it.

use std::cmp::Ordering;

use crate::record::Record;
use crate::value::Value;

/// One constraint on a single field. Range/equality predicates compare
/// against the field's decoded `Value` (numeric comparisons are
/// type-aware across `Int`/`UInt`/`Float`); `startsWith`/`contains` operate
/// on string fields only.
#[derive(Debug, Clone)]
pub enum Predicate {
    Equal(Value),
    NotEqual(Value),
    GreaterThan(Value),
    LessThan(Value),
    GreaterOrEqual(Value),
    LessOrEqual(Value),
    /// Inclusive both ends.
    Between(Value, Value),
    In(Vec<Value>),
    StartsWith(String),
    Contains(String),
}

impl Predicate {
    /// Whether the planner may satisfy this predicate via an index probe.
    ///
    /// Range operators on a numeric value are excluded: the index's keys are
    /// canonical *strings*, ordered lexicographically, which disagrees with
    /// numeric order (`"9" > "40"`). A numeric range predicate falls back to
    /// a partition/full scan instead, where `matches` compares the decoded
    /// `Value`s numerically.
    pub fn is_indexable(&self) -> bool {
        match self {
            Predicate::NotEqual(_) | Predicate::Contains(_) => false,
            Predicate::GreaterThan(v)
            | Predicate::LessThan(v)
            | Predicate::GreaterOrEqual(v)
            | Predicate::LessOrEqual(v) => !is_numeric(v),
            Predicate::Between(low, high) => !is_numeric(low) && !is_numeric(high),
            _ => true,
        }
    }

    /// True for predicates the planner treats as an equality-class lookup
    /// (tie-break: equality beats range).
    pub fn is_equality(&self) -> bool {
        matches!(self, Predicate::Equal(_) | Predicate::In(_))
    }

    /// The canonical string form of this predicate's bound(s), used by the
    /// planner to consult `shardStats`/`indexStats` (which are keyed by
    /// canonical strings). `None` for predicates with no single bound
    /// (`in`, `notEqual`) — those fall back to a conservative full scan of
    /// candidate shards.
    pub fn canonical_bounds(&self) -> Option<(String, String)> {
        match self {
            Predicate::Equal(v) => v.to_canonical_string().map(|s| (s.clone(), s)),
            Predicate::GreaterThan(v) | Predicate::GreaterOrEqual(v) => {
                v.to_canonical_string().map(|s| (s, String::new()))
            }
            Predicate::LessThan(v) | Predicate::LessOrEqual(v) => {
                v.to_canonical_string().map(|s| (String::new(), s))
            }
            Predicate::Between(low, high) => {
                match (low.to_canonical_string(), high.to_canonical_string()) {
                    (Some(l), Some(h)) => Some((l, h)),
                    _ => None,
                }
            }
            Predicate::StartsWith(prefix) => Some((prefix.clone(), format!("{prefix}\u{10FFFF}"))),
            Predicate::NotEqual(_) | Predicate::In(_) | Predicate::Contains(_) => None,
        }
    }

    /// Does the document's value for this predicate's field satisfy it?
    /// `doc_value` is `None` when the field is absent from the document.
    pub fn matches(&self, doc_value: Option<&Value>) -> bool {
        match self {
            Predicate::Equal(v) => doc_value.is_some_and(|dv| values_equal(dv, v)),
            Predicate::NotEqual(v) => match doc_value {
                Some(dv) => !values_equal(dv, v),
                None => true,
            },
            Predicate::GreaterThan(v) => {
                compare(doc_value, v).is_some_and(|o| o == Ordering::Greater)
            }
            Predicate::LessThan(v) => compare(doc_value, v).is_some_and(|o| o == Ordering::Less),
            Predicate::GreaterOrEqual(v) => {
                compare(doc_value, v).is_some_and(|o| o != Ordering::Less)
            }
            Predicate::LessOrEqual(v) => {
                compare(doc_value, v).is_some_and(|o| o != Ordering::Greater)
            }
            Predicate::Between(low, high) => {
                let Some(dv) = doc_value else { return false };
                let Some(lo) = compare_values(dv, low) else {
                    return false;
                };
                let Some(hi) = compare_values(dv, high) else {
                    return false;
                };
                lo != Ordering::Less && hi != Ordering::Greater
            }
            Predicate::In(values) => {
                doc_value.is_some_and(|dv| values.iter().any(|v| values_equal(dv, v)))
            }
            Predicate::StartsWith(prefix) => as_str(doc_value).is_some_and(|s| s.starts_with(prefix.as_str())),
            Predicate::Contains(needle) => as_str(doc_value).is_some_and(|s| s.contains(needle.as_str())),
        }
    }
}

fn is_numeric(v: &Value) -> bool {
    matches!(v, Value::Int(_) | Value::UInt(_) | Value::Float(_))
}

fn as_str(value: Option<&Value>) -> Option<&str> {
    match value {
        Some(Value::Str(s)) => Some(s.as_str()),
        _ => None,
    }
}

fn compare(doc_value: Option<&Value>, target: &Value) -> Option<Ordering> {
    compare_values(doc_value?, target)
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::UInt(u) => Some(*u as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b)
        .map(|o| o == Ordering::Equal)
        .unwrap_or_else(|| a == b)
}

/// A conjunction of field predicates (logical `AND`; multiple
/// `where` calls on the same query conjunct).
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub(crate) predicates: Vec<(String, Predicate)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, predicate: Predicate) -> Self {
        self.predicates.push((field.into(), predicate));
        self
    }

    pub fn predicates(&self) -> &[(String, Predicate)] {
        &self.predicates
    }

    /// Does `record` satisfy every predicate in this query (logical AND)?
    pub fn matches<T: Record>(&self, record: &T) -> bool {
        let value = record.to_value();
        self.predicates
            .iter()
            .all(|(field, predicate)| predicate.matches(value.get(field)))
    }
}
