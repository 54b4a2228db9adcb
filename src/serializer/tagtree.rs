//! The "tag-tree" wire format: a self-describing, bencode-style text
//! encoding. Every value is prefixed by an ASCII tag byte, and every
//! variable-length payload (strings, numeric literals, containers) is
//! length-prefixed or `e`-terminated, so a reader can skip over a value it
//! doesn't care about without constructing it — the property
//! [`extract_field`] depends on. Numeric literals are length-prefixed
//! (rather than `e`-terminated) so that scientific notation in a float's
//! decimal form (`1e20`) can't be mistaken for the terminator.
//!
//! Grammar:
//! ```text
//! null    ::= "n"
//! bool    ::= "b0" | "b1"
//! int     ::= "i" <byte-len> ":" <decimal>
//! uint    ::= "u" <byte-len> ":" <decimal>
//! float   ::= "f" <byte-len> ":" <decimal>
//! string  ::= <byte-len> ":" <utf8-bytes>
//! array   ::= "l" value* "e"
//! object  ::= "d" (string value)* "e"
//! ```

use crate::error::{DbError, DbResult};
use crate::value::Value;

pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_literal(tag: u8, literal: &str, out: &mut Vec<u8>) {
    out.push(tag);
    out.extend_from_slice(literal.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(literal.as_bytes());
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(b'n'),
        Value::Bool(b) => {
            out.push(b'b');
            out.push(if *b { b'1' } else { b'0' });
        }
        Value::Int(i) => encode_literal(b'i', &i.to_string(), out),
        Value::UInt(u) => encode_literal(b'u', &u.to_string(), out),
        Value::Float(f) => encode_literal(b'f', &format!("{:?}", f), out),
        Value::Str(s) => {
            out.extend_from_slice(s.len().to_string().as_bytes());
            out.push(b':');
            out.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) => {
            out.push(b'l');
            for item in items {
                encode_into(item, out);
            }
            out.push(b'e');
        }
        Value::Object(entries) => {
            out.push(b'd');
            for (key, value) in entries {
                encode_into(&Value::Str(key.clone()), out);
                encode_into(value, out);
            }
            out.push(b'e');
        }
    }
}

pub fn decode(bytes: &[u8]) -> DbResult<Value> {
    let mut cursor = 0usize;
    let value = decode_at(bytes, &mut cursor)?;
    Ok(value)
}

/// Read a length-prefixed literal starting at `*pos` (which points at the
/// ASCII decimal length, just past any leading tag byte), returning the
/// literal text and leaving `*pos` just past it.
fn read_length_prefixed<'a>(bytes: &'a [u8], pos: &mut usize) -> DbResult<&'a str> {
    let (len_digits, colon) = read_until(bytes, *pos, b':')?;
    let len: usize = len_digits
        .parse()
        .map_err(|e| DbError::DecodeFailure(format!("bad literal length: {e}")))?;
    let start = colon + 1;
    let end = start + len;
    if end > bytes.len() {
        return Err(DbError::DecodeFailure(
            "length-prefixed literal out of bounds".into(),
        ));
    }
    let s = std::str::from_utf8(&bytes[start..end])
        .map_err(|e| DbError::DecodeFailure(format!("invalid utf8 in literal: {e}")))?;
    *pos = end;
    Ok(s)
}

fn decode_at(bytes: &[u8], pos: &mut usize) -> DbResult<Value> {
    let tag = *peek(bytes, *pos)?;
    match tag {
        b'n' => {
            *pos += 1;
            Ok(Value::Null)
        }
        b'b' => {
            let flag = *peek(bytes, *pos + 1)?;
            *pos += 2;
            Ok(Value::Bool(flag == b'1'))
        }
        b'i' => {
            *pos += 1;
            let digits = read_length_prefixed(bytes, pos)?;
            digits
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| DbError::DecodeFailure(format!("bad int literal: {e}")))
        }
        b'u' => {
            *pos += 1;
            let digits = read_length_prefixed(bytes, pos)?;
            digits
                .parse::<u64>()
                .map(Value::UInt)
                .map_err(|e| DbError::DecodeFailure(format!("bad uint literal: {e}")))
        }
        b'f' => {
            *pos += 1;
            let digits = read_length_prefixed(bytes, pos)?;
            digits
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| DbError::DecodeFailure(format!("bad float literal: {e}")))
        }
        b'l' => {
            *pos += 1;
            let mut items = Vec::new();
            while *peek(bytes, *pos)? != b'e' {
                items.push(decode_at(bytes, pos)?);
            }
            *pos += 1;
            Ok(Value::Array(items))
        }
        b'd' => {
            *pos += 1;
            let mut entries = Vec::new();
            while *peek(bytes, *pos)? != b'e' {
                let key = match decode_at(bytes, pos)? {
                    Value::Str(s) => s,
                    other => {
                        return Err(DbError::DecodeFailure(format!(
                            "object key must be a string, found {:?}",
                            other
                        )))
                    }
                };
                let value = decode_at(bytes, pos)?;
                entries.push((key, value));
            }
            *pos += 1;
            Ok(Value::Object(entries))
        }
        b'0'..=b'9' => {
            let s = read_length_prefixed(bytes, pos)?;
            Ok(Value::Str(s.to_string()))
        }
        other => Err(DbError::DecodeFailure(format!(
            "unexpected tag byte '{}'",
            other as char
        ))),
    }
}

/// Advance past a value at `pos` without materializing it, returning the
/// position just past it. Used by [`extract_field`] for non-matching keys.
fn skip_value(bytes: &[u8], pos: &mut usize) -> DbResult<()> {
    decode_at(bytes, pos).map(|_| ())
}

fn peek(bytes: &[u8], pos: usize) -> DbResult<&u8> {
    bytes
        .get(pos)
        .ok_or_else(|| DbError::DecodeFailure("unexpected end of tag-tree input".into()))
}

fn read_until(bytes: &[u8], start: usize, terminator: u8) -> DbResult<(&str, usize)> {
    let end = bytes[start..]
        .iter()
        .position(|&b| b == terminator)
        .map(|p| start + p)
        .ok_or_else(|| DbError::DecodeFailure("missing terminator in tag-tree input".into()))?;
    let s = std::str::from_utf8(&bytes[start..end])
        .map_err(|e| DbError::DecodeFailure(format!("invalid utf8 in literal: {e}")))?;
    Ok((s, end))
}

/// Scan the top-level object for `field` without decoding sibling values.
pub fn extract_field(bytes: &[u8], field: &str) -> DbResult<Option<Value>> {
    let mut pos = 0usize;
    if *peek(bytes, pos)? != b'd' {
        return Err(DbError::DecodeFailure(
            "top-level record is not an object".into(),
        ));
    }
    pos += 1;
    while *peek(bytes, pos)? != b'e' {
        let key = match decode_at(bytes, &mut pos)? {
            Value::Str(s) => s,
            other => {
                return Err(DbError::DecodeFailure(format!(
                    "object key must be a string, found {:?}",
                    other
                )))
            }
        };
        if key == field {
            return Ok(Some(decode_at(bytes, &mut pos)?));
        }
        skip_value(bytes, &mut pos)?;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_scalars() {
        for value in [
            Value::Null,
            Value::Bool(true),
            Value::Bool(false),
            Value::Int(-7),
            Value::UInt(7),
            Value::Float(3.5),
            Value::Float(1e20),
            Value::Str("hello, world".into()),
        ] {
            let bytes = encode(&value);
            assert_eq!(decode(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn roundtrip_nested() {
        let value = Value::Object(vec![
            ("name".into(), Value::Str("Alice".into())),
            (
                "tags".into(),
                Value::Array(vec![Value::Str("a".into()), Value::Str("b".into())]),
            ),
            (
                "address".into(),
                Value::Object(vec![("city".into(), Value::Str("NYC".into()))]),
            ),
        ]);
        let bytes = encode(&value);
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn extract_field_skips_nested_siblings() {
        let value = Value::Object(vec![
            (
                "nested".into(),
                Value::Object(vec![("deep".into(), Value::Int(1))]),
            ),
            ("name".into(), Value::Str("Bob".into())),
        ]);
        let bytes = encode(&value);
        assert_eq!(
            extract_field(&bytes, "name").unwrap(),
            Some(Value::Str("Bob".into()))
        );
        assert_eq!(extract_field(&bytes, "missing").unwrap(), None);
    }
}
