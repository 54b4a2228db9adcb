//! The "packed" wire format: a binary, length-prefixed encoding with
//! explicit signed/unsigned integer widths and a distinguished null tag.
//! All multi-byte integers are big-endian. This encoder always emits the
//! widest integer/float tag (`I64`/`U64`/`F64`) for determinism; the
//! decoder accepts every width tag so bytes produced by other encoders of
//! this format remain readable.

use crate::error::{DbError, DbResult};
use crate::value::Value;

const TAG_NULL: u8 = 0x00;
const TAG_FALSE: u8 = 0x01;
const TAG_TRUE: u8 = 0x02;
const TAG_I8: u8 = 0x03;
const TAG_I16: u8 = 0x04;
const TAG_I32: u8 = 0x05;
const TAG_I64: u8 = 0x06;
const TAG_U8: u8 = 0x07;
const TAG_U16: u8 = 0x08;
const TAG_U32: u8 = 0x09;
const TAG_U64: u8 = 0x0A;
const TAG_F32: u8 = 0x0B;
const TAG_F64: u8 = 0x0C;
const TAG_STR: u8 = 0x0D;
const TAG_ARRAY: u8 = 0x0E;
const TAG_OBJECT: u8 = 0x0F;

pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(false) => out.push(TAG_FALSE),
        Value::Bool(true) => out.push(TAG_TRUE),
        Value::Int(i) => {
            out.push(TAG_I64);
            out.extend_from_slice(&i.to_be_bytes());
        }
        Value::UInt(u) => {
            out.push(TAG_U64);
            out.extend_from_slice(&u.to_be_bytes());
        }
        Value::Float(f) => {
            out.push(TAG_F64);
            out.extend_from_slice(&f.to_be_bytes());
        }
        Value::Str(s) => encode_str(s, out),
        Value::Array(items) => {
            out.push(TAG_ARRAY);
            out.extend_from_slice(&(items.len() as u32).to_be_bytes());
            for item in items {
                encode_into(item, out);
            }
        }
        Value::Object(entries) => {
            out.push(TAG_OBJECT);
            out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
            for (key, value) in entries {
                encode_str(key, out);
                encode_into(value, out);
            }
        }
    }
}

fn encode_str(s: &str, out: &mut Vec<u8>) {
    out.push(TAG_STR);
    out.extend_from_slice(&(s.len() as u32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

pub fn decode(bytes: &[u8]) -> DbResult<Value> {
    let mut pos = 0usize;
    decode_at(bytes, &mut pos)
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> DbResult<&'a [u8]> {
    let end = *pos + len;
    if end > bytes.len() {
        return Err(DbError::DecodeFailure("packed input truncated".into()));
    }
    let slice = &bytes[*pos..end];
    *pos = end;
    Ok(slice)
}

fn take_tag(bytes: &[u8], pos: &mut usize) -> DbResult<u8> {
    let slice = take(bytes, pos, 1)?;
    Ok(slice[0])
}

fn take_u32(bytes: &[u8], pos: &mut usize) -> DbResult<u32> {
    let slice = take(bytes, pos, 4)?;
    Ok(u32::from_be_bytes(slice.try_into().unwrap()))
}

fn decode_at(bytes: &[u8], pos: &mut usize) -> DbResult<Value> {
    let tag = take_tag(bytes, pos)?;
    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_FALSE => Ok(Value::Bool(false)),
        TAG_TRUE => Ok(Value::Bool(true)),
        TAG_I8 => Ok(Value::Int(take(bytes, pos, 1)?[0] as i8 as i64)),
        TAG_I16 => Ok(Value::Int(i16::from_be_bytes(
            take(bytes, pos, 2)?.try_into().unwrap(),
        ) as i64)),
        TAG_I32 => Ok(Value::Int(i32::from_be_bytes(
            take(bytes, pos, 4)?.try_into().unwrap(),
        ) as i64)),
        TAG_I64 => Ok(Value::Int(i64::from_be_bytes(
            take(bytes, pos, 8)?.try_into().unwrap(),
        ))),
        TAG_U8 => Ok(Value::UInt(take(bytes, pos, 1)?[0] as u64)),
        TAG_U16 => Ok(Value::UInt(u16::from_be_bytes(
            take(bytes, pos, 2)?.try_into().unwrap(),
        ) as u64)),
        TAG_U32 => Ok(Value::UInt(u32::from_be_bytes(
            take(bytes, pos, 4)?.try_into().unwrap(),
        ) as u64)),
        TAG_U64 => Ok(Value::UInt(u64::from_be_bytes(
            take(bytes, pos, 8)?.try_into().unwrap(),
        ))),
        TAG_F32 => Ok(Value::Float(
            f32::from_be_bytes(take(bytes, pos, 4)?.try_into().unwrap()) as f64,
        )),
        TAG_F64 => Ok(Value::Float(f64::from_be_bytes(
            take(bytes, pos, 8)?.try_into().unwrap(),
        ))),
        TAG_STR => decode_str(bytes, pos).map(Value::Str),
        TAG_ARRAY => {
            let count = take_u32(bytes, pos)? as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(decode_at(bytes, pos)?);
            }
            Ok(Value::Array(items))
        }
        TAG_OBJECT => {
            let count = take_u32(bytes, pos)? as usize;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let key = expect_str_tag(bytes, pos)?;
                let value = decode_at(bytes, pos)?;
                entries.push((key, value));
            }
            Ok(Value::Object(entries))
        }
        other => Err(DbError::DecodeFailure(format!(
            "unknown packed tag byte 0x{other:02x}"
        ))),
    }
}

fn decode_str(bytes: &[u8], pos: &mut usize) -> DbResult<String> {
    let len = take_u32(bytes, pos)? as usize;
    let slice = take(bytes, pos, len)?;
    std::str::from_utf8(slice)
        .map(|s| s.to_string())
        .map_err(|e| DbError::DecodeFailure(format!("invalid utf8 in packed string: {e}")))
}

fn expect_str_tag(bytes: &[u8], pos: &mut usize) -> DbResult<String> {
    let tag = take_tag(bytes, pos)?;
    if tag != TAG_STR {
        return Err(DbError::DecodeFailure(format!(
            "object key must be a string, found tag 0x{tag:02x}"
        )));
    }
    decode_str(bytes, pos)
}

/// Advance past a value at `pos` without materializing arrays/objects in
/// full (still walks them structurally, since packed lengths are only
/// known by traversal — but never allocates the caller's record type).
fn skip_value(bytes: &[u8], pos: &mut usize) -> DbResult<()> {
    let tag = take_tag(bytes, pos)?;
    match tag {
        TAG_NULL | TAG_FALSE | TAG_TRUE => Ok(()),
        TAG_I8 | TAG_U8 => take(bytes, pos, 1).map(|_| ()),
        TAG_I16 | TAG_U16 => take(bytes, pos, 2).map(|_| ()),
        TAG_I32 | TAG_U32 | TAG_F32 => take(bytes, pos, 4).map(|_| ()),
        TAG_I64 | TAG_U64 | TAG_F64 => take(bytes, pos, 8).map(|_| ()),
        TAG_STR => decode_str(bytes, pos).map(|_| ()),
        TAG_ARRAY => {
            let count = take_u32(bytes, pos)? as usize;
            for _ in 0..count {
                skip_value(bytes, pos)?;
            }
            Ok(())
        }
        TAG_OBJECT => {
            let count = take_u32(bytes, pos)? as usize;
            for _ in 0..count {
                expect_str_tag(bytes, pos)?;
                skip_value(bytes, pos)?;
            }
            Ok(())
        }
        other => Err(DbError::DecodeFailure(format!(
            "unknown packed tag byte 0x{other:02x}"
        ))),
    }
}

/// Scan the top-level object for `field` without decoding sibling values.
pub fn extract_field(bytes: &[u8], field: &str) -> DbResult<Option<Value>> {
    let mut pos = 0usize;
    let tag = take_tag(bytes, &mut pos)?;
    if tag != TAG_OBJECT {
        return Err(DbError::DecodeFailure(
            "top-level record is not an object".into(),
        ));
    }
    let count = take_u32(bytes, &mut pos)? as usize;
    for _ in 0..count {
        let key = expect_str_tag(bytes, &mut pos)?;
        if key == field {
            return Ok(Some(decode_at(bytes, &mut pos)?));
        }
        skip_value(bytes, &mut pos)?;
    }
    Ok(None)
}
