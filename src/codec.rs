//! Bit-exact encode/decode of [`Value`] against the CBOR subset used on the
//! wire (spec.md §4.1). Pure — no I/O, no concurrency.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::error::CodecError;
use crate::value::{RemoteObjectRef, Value};

const MAJOR_UINT: u8 = 0;
const MAJOR_INT: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;
const MAJOR_TAG: u8 = 6;
const MAJOR_SIMPLE: u8 = 7;

const TAG_DATETIME: u64 = 0;
const TAG_REMOTE_OBJECT: u64 = 6;
const TAG_UUID: u64 = 7;
const TAG_RECORD: u64 = 8;

const SIMPLE_FALSE: u8 = 20;
const SIMPLE_TRUE: u8 = 21;
const SIMPLE_NULL: u8 = 22;
const SIMPLE_FLOAT32: u8 = 26;
const SIMPLE_FLOAT64: u8 = 27;

/// The hook by which decoding a remote-object reference calls back into the
/// connection to materialize a typed handle (spec.md §4.1, §4.3).
pub trait Materialize {
    fn materialize(&self, id: u64, type_name: &str) -> RemoteObjectRef;
}

/// A materializer for codec-only contexts (unit tests, pure round-trips)
/// that never decode a remote-object reference.
pub struct NoRemoteObjects;

impl Materialize for NoRemoteObjects {
    fn materialize(&self, _id: u64, _type_name: &str) -> RemoteObjectRef {
        unreachable!("decoded a remote-object reference without a real Materialize impl")
    }
}

/// Cursor over an immutable byte slice, advanced by every read.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn read_byte(&mut self) -> Result<u8, CodecError> {
        let b = *self.buf.get(self.pos).ok_or(CodecError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_exact(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).ok_or(CodecError::UnexpectedEnd)?;
        let slice = self.buf.get(self.pos..end).ok_or(CodecError::UnexpectedEnd)?;
        self.pos = end;
        Ok(slice)
    }

    /// Reads the CBOR "length" argument that follows the 5-bit small-length
    /// field of a type byte (spec.md §4.1): inline 0-23, or 1/2/4/8-byte
    /// forms for 24/25/26/27. The decoder tolerates any form the encoder
    /// chose (it never has to be minimal on read).
    fn read_len(&mut self, type_byte: u8) -> Result<u64, CodecError> {
        let small = type_byte & 0x1F;
        match small {
            0..=23 => Ok(small as u64),
            24 => Ok(self.read_byte()? as u64),
            25 => Ok(u16::from_be_bytes(self.read_exact(2)?.try_into().unwrap()) as u64),
            26 => Ok(u32::from_be_bytes(self.read_exact(4)?.try_into().unwrap()) as u64),
            27 => Ok(u64::from_be_bytes(self.read_exact(8)?.try_into().unwrap())),
            _ => Err(CodecError::UnexpectedEnd),
        }
    }

    fn read_byte_string(&mut self, type_byte: u8) -> Result<Vec<u8>, CodecError> {
        let len = self.read_len(type_byte)?;
        Ok(self.read_exact(len as usize)?.to_vec())
    }
}

/// Decodes a single [`Value`] from the front of `buf`, returning the value
/// and the number of bytes consumed.
pub fn decode_value(buf: &[u8], materialize: &dyn Materialize) -> Result<(Value, usize), CodecError> {
    let mut reader = Reader::new(buf);
    let value = read_value(&mut reader, materialize)?;
    Ok((value, reader.pos))
}

/// Decodes the concatenation of encoded values that makes up one frame
/// (spec.md §4.3: "the framing is concatenation of encoded values, not a
/// wrapping array").
pub fn decode_all(buf: &[u8], materialize: &dyn Materialize) -> Result<Vec<Value>, CodecError> {
    let mut reader = Reader::new(buf);
    let mut out = Vec::new();
    while !reader.is_empty() {
        out.push(read_value(&mut reader, materialize)?);
    }
    Ok(out)
}

fn read_value(reader: &mut Reader<'_>, materialize: &dyn Materialize) -> Result<Value, CodecError> {
    let type_byte = reader.read_byte()?;
    let major = type_byte >> 5;

    match major {
        _ if major == MAJOR_UINT => Ok(Value::UInt(reader.read_len(type_byte)?)),

        _ if major == MAJOR_INT => {
            let payload = reader.read_len(type_byte)?;
            if payload > i64::MAX as u64 {
                return Err(CodecError::UnrepresentableInteger);
            }
            Ok(Value::Int(-(payload as i64) - 1))
        }

        _ if major == MAJOR_BYTES => Ok(Value::Bytes(reader.read_byte_string(type_byte)?)),

        _ if major == MAJOR_TEXT => {
            let bytes = reader.read_byte_string(type_byte)?;
            Ok(Value::Text(String::from_utf8(bytes)?))
        }

        _ if major == MAJOR_ARRAY => {
            let len = reader.read_len(type_byte)?;
            let mut items = Vec::with_capacity(len.min(1 << 20) as usize);
            for _ in 0..len {
                items.push(read_value(reader, materialize)?);
            }
            Ok(Value::Array(items))
        }

        _ if major == MAJOR_MAP => {
            let len = reader.read_len(type_byte)?;
            let mut map = HashMap::with_capacity(len.min(1 << 20) as usize);
            for _ in 0..len {
                let key = read_value(reader, materialize)?;
                let val = read_value(reader, materialize)?;
                let key = key.into_text().ok_or(CodecError::NonTextMapKey)?;
                map.insert(key, val);
            }
            Ok(Value::Map(map))
        }

        _ if major == MAJOR_TAG => {
            let tag = reader.read_len(type_byte)?;
            match tag {
                TAG_DATETIME => {
                    let inner = read_value(reader, materialize)?;
                    let text = inner.as_text().ok_or(CodecError::NonTextTimestamp)?;
                    let dt = DateTime::parse_from_rfc3339(text)?;
                    Ok(Value::DateTime(dt.with_timezone(&Utc)))
                }

                TAG_UUID => {
                    let inner = read_value(reader, materialize)?;
                    let bytes = match inner {
                        Value::Bytes(b) => b,
                        _ => return Err(CodecError::InvalidRemoteObjectRef),
                    };
                    Ok(Value::Uuid(Uuid::from_slice(&bytes)?))
                }

                TAG_RECORD => {
                    // transparent on read: unwrap instead of keeping the marker
                    read_value(reader, materialize)
                }

                TAG_REMOTE_OBJECT => {
                    let inner = read_value(reader, materialize)?;
                    let mut items = inner.into_array().ok_or(CodecError::InvalidRemoteObjectRef)?;
                    if items.len() != 2 {
                        return Err(CodecError::InvalidRemoteObjectRef);
                    }
                    let type_name = items.pop().unwrap().into_text().ok_or(CodecError::InvalidRemoteObjectRef)?;
                    let id = items.pop().unwrap().as_uint().ok_or(CodecError::InvalidRemoteObjectRef)?;
                    Ok(Value::RemoteObject(materialize.materialize(id, &type_name)))
                }

                other => Err(CodecError::UnknownTag(other)),
            }
        }

        _ if major == MAJOR_SIMPLE => {
            let small = type_byte & 0x1F;
            match small {
                SIMPLE_FALSE => Ok(Value::Bool(false)),
                SIMPLE_TRUE => Ok(Value::Bool(true)),
                SIMPLE_NULL => Ok(Value::Null),
                SIMPLE_FLOAT32 => Ok(Value::Float32(f32::from_be_bytes(
                    reader.read_exact(4)?.try_into().unwrap(),
                ))),
                SIMPLE_FLOAT64 => Ok(Value::Float64(f64::from_be_bytes(
                    reader.read_exact(8)?.try_into().unwrap(),
                ))),
                other => Err(CodecError::UnknownSimple(other)),
            }
        }

        other => Err(CodecError::UnknownMajorType(other)),
    }
}

fn write_len(out: &mut Vec<u8>, major: u8, len: u64) {
    let type_byte = major << 5;
    match len {
        0..=23 => out.push(type_byte | len as u8),
        24..=0xFF => {
            out.push(type_byte | 24);
            out.push(len as u8);
        }
        0x100..=0xFFFF => {
            out.push(type_byte | 25);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        0x1_0000..=0xFFFF_FFFF => {
            out.push(type_byte | 26);
            out.extend_from_slice(&(len as u32).to_be_bytes());
        }
        _ => {
            out.push(type_byte | 27);
            out.extend_from_slice(&len.to_be_bytes());
        }
    }
}

fn write_tag(out: &mut Vec<u8>, tag: u8) {
    out.push((MAJOR_TAG << 5) | tag);
}

fn write_simple(out: &mut Vec<u8>, simple: u8) {
    out.push((MAJOR_SIMPLE << 5) | simple);
}

/// Encodes `value` and appends the bytes to `out`, always choosing the
/// minimal length form (spec.md §8 "encoder minimality").
pub fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => write_simple(out, SIMPLE_NULL),
        Value::Bool(true) => write_simple(out, SIMPLE_TRUE),
        Value::Bool(false) => write_simple(out, SIMPLE_FALSE),
        Value::UInt(n) => write_len(out, MAJOR_UINT, *n),
        Value::Int(n) => {
            debug_assert!(*n < 0, "Value::Int must be negative, use UInt for non-negative");
            // `-n - 1` overflows for `i64::MIN`; bitwise-NOT gives the same
            // value for negatives under two's complement without negating.
            write_len(out, MAJOR_INT, !*n as u64);
        }
        Value::Float32(f) => {
            write_simple(out, SIMPLE_FLOAT32);
            out.extend_from_slice(&f.to_be_bytes());
        }
        Value::Float64(f) => {
            write_simple(out, SIMPLE_FLOAT64);
            out.extend_from_slice(&f.to_be_bytes());
        }
        Value::Text(s) => {
            write_len(out, MAJOR_TEXT, s.len() as u64);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            write_len(out, MAJOR_BYTES, b.len() as u64);
            out.extend_from_slice(b);
        }
        Value::Array(items) => {
            write_len(out, MAJOR_ARRAY, items.len() as u64);
            for item in items {
                encode_value(item, out);
            }
        }
        Value::Map(map) => {
            write_len(out, MAJOR_MAP, map.len() as u64);
            for (k, v) in map {
                encode_value(&Value::Text(k.clone()), out);
                encode_value(v, out);
            }
        }
        Value::Uuid(uuid) => {
            write_tag(out, TAG_UUID as u8);
            encode_value(&Value::Bytes(uuid.as_bytes().to_vec()), out);
        }
        Value::DateTime(dt) => {
            write_tag(out, TAG_DATETIME as u8);
            // shortest lossless representation: drop sub-second digits when zero,
            // otherwise nanosecond precision, per spec.md §4.1.
            let text = dt.to_rfc3339_opts(SecondsFormat::AutoSi, true);
            encode_value(&Value::Text(text), out);
        }
        Value::Record(inner) => {
            write_tag(out, TAG_RECORD as u8);
            encode_value(inner, out);
        }
        Value::RemoteObject(r) => {
            write_tag(out, TAG_REMOTE_OBJECT as u8);
            encode_value(
                &Value::Array(vec![Value::UInt(r.id), Value::Text(r.type_name.clone())]),
                out,
            );
        }
    }
}

/// Encodes a sequence of values as the concatenation of their encodings,
/// matching the outbound framing rule in spec.md §4.3.
pub fn encode_all(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for v in values {
        encode_value(v, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) {
        let bytes = encode_all(std::slice::from_ref(&v));
        let (decoded, used) = decode_value(&bytes, &NoRemoteObjects).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(decoded, v);
    }

    #[test]
    fn roundtrip_scalars() {
        roundtrip(Value::Null);
        roundtrip(Value::Bool(true));
        roundtrip(Value::Bool(false));
        roundtrip(Value::UInt(0));
        roundtrip(Value::UInt(23));
        roundtrip(Value::UInt(24));
        roundtrip(Value::UInt(1_000_000));
        roundtrip(Value::UInt(u64::MAX));
        roundtrip(Value::Int(-1));
        roundtrip(Value::Int(-100));
        roundtrip(Value::Int(i64::MIN));
        roundtrip(Value::Float32(100_000.0));
        roundtrip(Value::Float64(1.1));
        roundtrip(Value::Text("foobar".into()));
        roundtrip(Value::Text("föobar".into()));
        roundtrip(Value::Bytes(b"foobar".to_vec()));
    }

    #[test]
    fn roundtrip_containers() {
        roundtrip(Value::array([Value::from("foo"), Value::from("bar")]));
        let mut map = HashMap::new();
        map.insert("foo".to_string(), Value::UInt(1));
        map.insert("bar".to_string(), Value::UInt(2));
        roundtrip(Value::Map(map));
    }

    #[test]
    fn roundtrip_uuid_and_datetime() {
        roundtrip(Value::Uuid(Uuid::from_u128(0x1234_5678_9abc_def0_1234_5678_9abc_def0)));
        roundtrip(Value::DateTime(
            DateTime::parse_from_rfc3339("2013-03-21T20:04:00Z")
                .unwrap()
                .with_timezone(&Utc),
        ));
    }

    #[test]
    fn record_tag_is_transparent_on_read() {
        let wrapped = Value::Record(Box::new(Value::UInt(42)));
        let bytes = encode_all(&[wrapped]);
        let (decoded, _) = decode_value(&bytes, &NoRemoteObjects).unwrap();
        assert_eq!(decoded, Value::UInt(42));
    }

    fn hex(s: &str) -> Vec<u8> {
        s.split_whitespace()
            .map(|b| u8::from_str_radix(b, 16).unwrap())
            .collect()
    }

    #[test]
    fn canonical_decodings() {
        let cases: &[(&str, Value)] = &[
            ("f6", Value::Null),
            ("f5", Value::Bool(true)),
            ("f4", Value::Bool(false)),
            ("fa 47 c3 50 00", Value::Float32(100_000.0)),
            ("fb 3f f1 99 99 99 99 99 9a", Value::Float64(1.1)),
            ("0a", Value::UInt(10)),
            ("18 2a", Value::UInt(42)),
            ("19 03 e8", Value::UInt(1000)),
            ("1a 00 0f 42 40", Value::UInt(1_000_000)),
            ("1b 00 00 00 e8 d4 a5 10 00", Value::UInt(1_000_000_000_000)),
            ("20", Value::Int(-1)),
            ("38 63", Value::Int(-100)),
            ("39 03 e7", Value::Int(-1000)),
            ("66 66 6f 6f 62 61 72", Value::Text("foobar".into())),
            ("67 66 c3 b6 6f 62 61 72", Value::Text("föobar".into())),
            ("46 66 6f 6f 62 61 72", Value::Bytes(b"foobar".to_vec())),
        ];
        for (hexstr, expected) in cases {
            let bytes = hex(hexstr);
            let (decoded, used) = decode_value(&bytes, &NoRemoteObjects).unwrap();
            assert_eq!(used, bytes.len(), "did not consume all bytes for {hexstr}");
            assert_eq!(&decoded, expected, "mismatch decoding {hexstr}");
        }

        let (decoded, _) = decode_value(&hex("82 63 66 6f 6f 63 62 61 72"), &NoRemoteObjects).unwrap();
        assert_eq!(decoded, Value::array([Value::from("foo"), Value::from("bar")]));

        let (decoded, _) =
            decode_value(&hex("a2 63 62 61 72 02 63 66 6f 6f 01"), &NoRemoteObjects).unwrap();
        let mut expected = HashMap::new();
        expected.insert("foo".to_string(), Value::UInt(1));
        expected.insert("bar".to_string(), Value::UInt(2));
        assert_eq!(decoded, Value::Map(expected));

        let (decoded, _) = decode_value(
            &hex("c0 74 32 30 31 33 2d 30 33 2d 32 31 54 32 30 3a 30 34 3a 30 30 5a"),
            &NoRemoteObjects,
        )
        .unwrap();
        assert_eq!(
            decoded,
            Value::DateTime(
                DateTime::parse_from_rfc3339("2013-03-21T20:04:00Z")
                    .unwrap()
                    .with_timezone(&Utc)
            )
        );
    }

    #[test]
    fn decoder_accepts_non_minimal_length_forms() {
        // `10` (uint 16) written in its 2-byte form instead of inline.
        let bytes = hex("19 00 10");
        let (decoded, _) = decode_value(&bytes, &NoRemoteObjects).unwrap();
        assert_eq!(decoded, Value::UInt(16));
    }

    #[test]
    fn encoder_minimality() {
        let cases = [
            (0u64, 1usize),
            (23, 1),
            (24, 2),
            (255, 2),
            (256, 3),
            (65535, 3),
            (65536, 5),
            (u32::MAX as u64, 5),
            (u32::MAX as u64 + 1, 9),
        ];
        for (n, expected_len) in cases {
            let bytes = encode_all(&[Value::UInt(n)]);
            assert_eq!(bytes.len(), expected_len, "wrong length for {n}");
        }
    }

    #[test]
    fn truncated_input_fails() {
        assert!(matches!(
            decode_value(&hex("19 00"), &NoRemoteObjects),
            Err(CodecError::UnexpectedEnd)
        ));
        assert!(matches!(
            decode_value(&hex("66 66 6f 6f"), &NoRemoteObjects),
            Err(CodecError::UnexpectedEnd)
        ));
    }

    #[test]
    fn unrepresentable_negative_integer_fails() {
        let bytes = hex("3b ff ff ff ff ff ff ff ff");
        assert!(matches!(
            decode_value(&bytes, &NoRemoteObjects),
            Err(CodecError::UnrepresentableInteger)
        ));
    }

    #[test]
    fn non_text_map_key_fails() {
        // {1: 2} — map with a uint key instead of text
        let bytes = hex("a1 01 02");
        assert!(matches!(
            decode_value(&bytes, &NoRemoteObjects),
            Err(CodecError::NonTextMapKey)
        ));
    }

    #[test]
    fn unknown_tag_fails() {
        let bytes = hex("c2 00"); // tag 2, not one we support
        assert!(matches!(
            decode_value(&bytes, &NoRemoteObjects),
            Err(CodecError::UnknownTag(2))
        ));
    }
}
