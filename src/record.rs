//! The polymorphic record type the planner and storage layers are generic
//! over: any type that can be encoded, decoded, and have fields extracted
//! from its encoded form.

use crate::error::DbResult;
use crate::value::Value;

/// Implemented by any caller type that can round-trip through [`Value`] and
/// therefore through either wire format, generalized away from a single
/// concrete document shape.
pub trait Record: Send + Sync + Clone + 'static {
    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> DbResult<Self>
    where
        Self: Sized;
}

/// A ready-to-use `Record` for callers who don't have their own typed model:
/// an ordered bag of top-level fields carrying arbitrary JSON-like values.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonDocument {
    pub fields: Vec<(String, Value)>,
}

impl JsonDocument {
    pub fn new(fields: Vec<(String, Value)>) -> Self {
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == field).map(|(_, v)| v)
    }
}

impl Record for JsonDocument {
    fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    fn from_value(value: Value) -> DbResult<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(crate::error::DbError::DecodeFailure(format!(
                "expected an object at the document root, found {:?}",
                other
            ))),
        }
    }
}
