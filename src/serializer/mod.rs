//! Two canonical wire formats for [`crate::Value`], and a format-aware
//! byte walker that extracts a top-level field's string form without
//! fully decoding the record.

mod packed;
mod tagtree;

use crate::error::{DbError, DbResult};
use crate::record::Record;
use crate::value::Value;

/// Which canonical wire format a collection was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Self-describing text format: nested key/value maps, arrays, numbers,
    /// booleans, nulls, strings.
    TagTree,
    /// Binary, length-prefixed format with explicit integer widths and a
    /// distinguished null.
    Packed,
}

impl Format {
    pub fn tag(self) -> u8 {
        match self {
            Format::TagTree => 0,
            Format::Packed => 1,
        }
    }

    pub fn from_tag(tag: u8) -> DbResult<Self> {
        match tag {
            0 => Ok(Format::TagTree),
            1 => Ok(Format::Packed),
            other => Err(DbError::DecodeFailure(format!("unknown format tag {other}"))),
        }
    }
}

impl std::str::FromStr for Format {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tagTree" | "tag_tree" => Ok(Format::TagTree),
            "packed" => Ok(Format::Packed),
            other => Err(DbError::DecodeFailure(format!("unknown format '{other}'"))),
        }
    }
}

/// Encode a [`Value`] to its canonical byte form under `format`.
pub fn encode_value(value: &Value, format: Format) -> DbResult<Vec<u8>> {
    match format {
        Format::TagTree => Ok(tagtree::encode(value)),
        Format::Packed => Ok(packed::encode(value)),
    }
}

/// Decode bytes produced by [`encode_value`] back into a [`Value`].
pub fn decode_value(bytes: &[u8], format: Format) -> DbResult<Value> {
    match format {
        Format::TagTree => tagtree::decode(bytes),
        Format::Packed => packed::decode(bytes),
    }
}

/// Encode a whole record via its [`Value`] representation.
pub fn encode<T: Record>(record: &T, format: Format) -> DbResult<Vec<u8>> {
    encode_value(&record.to_value(), format)
}

/// Decode a whole record via its [`Value`] representation.
pub fn decode<T: Record>(bytes: &[u8], format: Format) -> DbResult<T> {
    let value = decode_value(bytes, format)?;
    T::from_value(value)
}

/// Encode an ordered array of already-encoded record byte strings into one
/// shard payload element array, under `format`.
pub fn encode_array(elements: &[Vec<u8>], format: Format) -> DbResult<Vec<u8>> {
    let values: DbResult<Vec<Value>> = elements
        .iter()
        .map(|bytes| decode_value(bytes, format))
        .collect();
    encode_value(&Value::Array(values?), format)
}

/// Inverse of [`encode_array`]: split a shard payload back into individual
/// encoded-record byte strings.
pub fn decode_array(bytes: &[u8], format: Format) -> DbResult<Vec<Vec<u8>>> {
    match decode_value(bytes, format)? {
        Value::Array(items) => items
            .iter()
            .map(|v| encode_value(v, format))
            .collect::<DbResult<Vec<_>>>(),
        other => Err(DbError::DecodeFailure(format!(
            "expected a top-level array, found {:?}",
            other
        ))),
    }
}

/// Context in which a field is being extracted — determines which "absent
/// field" error variant callers should see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldContext {
    Partition,
    Index,
}

/// Return the string-form of a top-level field without fully constructing
/// the record. Strings pass through; integers/floats use canonical decimal
/// form; booleans map to "true"/"false"; null maps to "null". Fails if the
/// field is absent or non-scalar.
pub fn extract_field(
    bytes: &[u8],
    field: &str,
    format: Format,
    context: FieldContext,
) -> DbResult<String> {
    let found = match format {
        Format::TagTree => tagtree::extract_field(bytes, field)?,
        Format::Packed => packed::extract_field(bytes, field)?,
    };
    match found {
        Some(value) => value.to_canonical_string().ok_or_else(|| match context {
            FieldContext::Partition => DbError::PartitionKeyNotFound(field.to_string()),
            FieldContext::Index => DbError::IndexKeyNotFound(field.to_string()),
        }),
        None => Err(match context {
            FieldContext::Partition => DbError::PartitionKeyNotFound(field.to_string()),
            FieldContext::Index => DbError::IndexKeyNotFound(field.to_string()),
        }),
    }
}
