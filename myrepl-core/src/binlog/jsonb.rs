//! binary JSON (the JSON column storage format) to canonical text
//!
//! reference: https://github.com/mysql/mysql-server/blob/8.0/sql/json_binary.cc
use crate::decimal::MyDecimal;
use bytes::{Buf, Bytes};
use myrepl_bytes::error::{Error, Result};
use myrepl_bytes::ReadBytesExt;

const TYPE_SMALL_OBJECT: u8 = 0x00;
const TYPE_LARGE_OBJECT: u8 = 0x01;
const TYPE_SMALL_ARRAY: u8 = 0x02;
const TYPE_LARGE_ARRAY: u8 = 0x03;
const TYPE_LITERAL: u8 = 0x04;
const TYPE_INT16: u8 = 0x05;
const TYPE_UINT16: u8 = 0x06;
const TYPE_INT32: u8 = 0x07;
const TYPE_UINT32: u8 = 0x08;
const TYPE_INT64: u8 = 0x09;
const TYPE_UINT64: u8 = 0x0a;
const TYPE_DOUBLE: u8 = 0x0b;
const TYPE_STRING: u8 = 0x0c;
const TYPE_OPAQUE: u8 = 0x0f;

const LITERAL_NULL: u8 = 0x00;
const LITERAL_TRUE: u8 = 0x01;
const LITERAL_FALSE: u8 = 0x02;

/// nesting guard, documents deeper than this are rejected
const MAX_DEPTH: usize = 100;

/// decode a binary JSON document into its canonical textual form
pub fn decode_jsonb(input: &mut Bytes) -> Result<String> {
    if !input.has_remaining() {
        return Ok("null".to_owned());
    }
    let type_byte = input.read_u8()?;
    let data = input.split_to(input.remaining());
    let mut out = String::new();
    write_value(&mut out, type_byte, data.as_ref(), 0)?;
    Ok(out)
}

fn corrupt(what: &str) -> Error {
    Error::ConstraintError(format!("corrupt json document: {}", what))
}

fn write_value(out: &mut String, type_byte: u8, data: &[u8], depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(corrupt("nesting too deep"));
    }
    match type_byte {
        TYPE_SMALL_OBJECT => write_object(out, data, false, depth),
        TYPE_LARGE_OBJECT => write_object(out, data, true, depth),
        TYPE_SMALL_ARRAY => write_array(out, data, false, depth),
        TYPE_LARGE_ARRAY => write_array(out, data, true, depth),
        TYPE_LITERAL => {
            match *data.first().ok_or_else(|| corrupt("missing literal"))? {
                LITERAL_NULL => out.push_str("null"),
                LITERAL_TRUE => out.push_str("true"),
                LITERAL_FALSE => out.push_str("false"),
                other => return Err(corrupt(&format!("unknown literal {:#04x}", other))),
            }
            Ok(())
        }
        TYPE_INT16 => {
            out.push_str(&read_i16(data)?.to_string());
            Ok(())
        }
        TYPE_UINT16 => {
            out.push_str(&read_u16(data)?.to_string());
            Ok(())
        }
        TYPE_INT32 => {
            out.push_str(&(read_u32(data)? as i32).to_string());
            Ok(())
        }
        TYPE_UINT32 => {
            out.push_str(&read_u32(data)?.to_string());
            Ok(())
        }
        TYPE_INT64 => {
            out.push_str(&(read_u64(data)? as i64).to_string());
            Ok(())
        }
        TYPE_UINT64 => {
            out.push_str(&read_u64(data)?.to_string());
            Ok(())
        }
        TYPE_DOUBLE => {
            let v = f64::from_bits(read_u64(data)?);
            if v.fract() == 0.0 && v.is_finite() && v.abs() < 1e15 {
                // canonical text keeps a trailing .0 for integral doubles
                out.push_str(&format!("{:.1}", v));
            } else {
                out.push_str(&v.to_string());
            }
            Ok(())
        }
        TYPE_STRING => {
            let (len, off) = read_varlen(data)?;
            let end = off + len;
            if end > data.len() {
                return Err(corrupt("string length out of bounds"));
            }
            write_json_string(out, &data[off..end]);
            Ok(())
        }
        TYPE_OPAQUE => write_opaque(out, data),
        other => Err(corrupt(&format!("unknown value type {:#04x}", other))),
    }
}

fn write_object(out: &mut String, data: &[u8], large: bool, depth: usize) -> Result<()> {
    let entry = if large { 4 } else { 2 };
    let count = read_offset(data, 0, large)?;
    let size = read_offset(data, entry, large)?;
    if size > data.len() {
        return Err(corrupt("object size out of bounds"));
    }
    out.push('{');
    let key_entries = 2 * entry;
    let value_entries = key_entries + count * (entry + 2);
    for i in 0..count {
        if i > 0 {
            out.push(',');
        }
        let key_off = read_offset(data, key_entries + i * (entry + 2), large)?;
        let kl_at = key_entries + i * (entry + 2) + entry;
        if kl_at + 2 > data.len() {
            return Err(corrupt("key entry out of bounds"));
        }
        let key_len = read_u16(&data[kl_at..])? as usize;
        if key_off + key_len > data.len() {
            return Err(corrupt("key offset out of bounds"));
        }
        write_json_string(out, &data[key_off..key_off + key_len]);
        out.push(':');
        write_entry(out, data, value_entries + i * (entry + 1), large, depth)?;
    }
    out.push('}');
    Ok(())
}

fn write_array(out: &mut String, data: &[u8], large: bool, depth: usize) -> Result<()> {
    let entry = if large { 4 } else { 2 };
    let count = read_offset(data, 0, large)?;
    let size = read_offset(data, entry, large)?;
    if size > data.len() {
        return Err(corrupt("array size out of bounds"));
    }
    out.push('[');
    let value_entries = 2 * entry;
    for i in 0..count {
        if i > 0 {
            out.push(',');
        }
        write_entry(out, data, value_entries + i * (entry + 1), large, depth)?;
    }
    out.push(']');
    Ok(())
}

/// a value entry is a type byte plus either an inlined scalar or an
/// offset to the value, depending on type and document size class
fn write_entry(
    out: &mut String,
    data: &[u8],
    entry_off: usize,
    large: bool,
    depth: usize,
) -> Result<()> {
    let type_byte = *data.get(entry_off).ok_or_else(|| corrupt("missing entry"))?;
    let inline = match type_byte {
        TYPE_LITERAL | TYPE_INT16 | TYPE_UINT16 => true,
        TYPE_INT32 | TYPE_UINT32 => large,
        _ => false,
    };
    if inline {
        if entry_off + 1 > data.len() {
            return Err(corrupt("inline entry out of bounds"));
        }
        write_value(out, type_byte, &data[entry_off + 1..], depth + 1)
    } else {
        let value_off = read_offset(data, entry_off + 1, large)?;
        if value_off > data.len() {
            return Err(corrupt("value offset out of bounds"));
        }
        write_value(out, type_byte, &data[value_off..], depth + 1)
    }
}

/// opaque values carry a column type byte and raw bytes; packed
/// decimals are decoded, anything else degrades to a string
fn write_opaque(out: &mut String, data: &[u8]) -> Result<()> {
    let col_type = *data.first().ok_or_else(|| corrupt("missing opaque type"))?;
    let (len, off) = read_varlen(&data[1..])?;
    let start = 1 + off;
    if start + len > data.len() {
        return Err(corrupt("opaque length out of bounds"));
    }
    let raw = &data[start..start + len];
    if col_type == 0xf6 && raw.len() >= 2 {
        // NEWDECIMAL: precision and scale precede the packed value
        let precision = raw[0];
        let scale = raw[1];
        let mut bs = Bytes::copy_from_slice(&raw[2..]);
        let dec = MyDecimal::read_from(&mut bs, precision, scale)?;
        out.push_str(&dec.to_string());
        return Ok(());
    }
    write_json_string(out, raw);
    Ok(())
}

fn write_json_string(out: &mut String, raw: &[u8]) {
    out.push('"');
    for c in String::from_utf8_lossy(raw).chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn read_offset(data: &[u8], at: usize, large: bool) -> Result<usize> {
    if large {
        Ok(read_u32(&data[at.min(data.len())..])? as usize)
    } else {
        Ok(read_u16(&data[at.min(data.len())..])? as usize)
    }
}

fn read_i16(data: &[u8]) -> Result<i16> {
    Ok(read_u16(data)? as i16)
}

fn read_u16(data: &[u8]) -> Result<u16> {
    if data.len() < 2 {
        return Err(corrupt("truncated u16"));
    }
    Ok(u16::from_le_bytes([data[0], data[1]]))
}

fn read_u32(data: &[u8]) -> Result<u32> {
    if data.len() < 4 {
        return Err(corrupt("truncated u32"));
    }
    Ok(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
}

fn read_u64(data: &[u8]) -> Result<u64> {
    if data.len() < 8 {
        return Err(corrupt("truncated u64"));
    }
    let mut bs = [0u8; 8];
    bs.copy_from_slice(&data[..8]);
    Ok(u64::from_le_bytes(bs))
}

/// variable-length size: 7 bits per byte, high bit continues
fn read_varlen(data: &[u8]) -> Result<(usize, usize)> {
    let mut len = 0usize;
    for (i, b) in data.iter().enumerate().take(5) {
        len |= ((b & 0x7f) as usize) << (7 * i);
        if b & 0x80 == 0 {
            return Ok((len, i + 1));
        }
    }
    Err(corrupt("unterminated length"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    #[test]
    fn test_scalars() {
        let mut bs = Bytes::from_static(&[TYPE_LITERAL, LITERAL_TRUE]);
        assert_eq!("true", decode_jsonb(&mut bs).unwrap());
        let mut bs = Bytes::from_static(&[TYPE_INT16, 0xfe, 0xff]);
        assert_eq!("-2", decode_jsonb(&mut bs).unwrap());
        let mut bs = Bytes::from_static(&[TYPE_UINT16, 0x39, 0x30]);
        assert_eq!("12345", decode_jsonb(&mut bs).unwrap());
    }

    #[test]
    fn test_string() {
        let mut buf = BytesMut::new();
        buf.put_u8(TYPE_STRING);
        buf.put_u8(5);
        buf.put_slice(b"hello");
        assert_eq!("\"hello\"", decode_jsonb(&mut buf.freeze()).unwrap());
    }

    #[test]
    fn test_string_escaping() {
        let mut buf = BytesMut::new();
        buf.put_u8(TYPE_STRING);
        buf.put_u8(4);
        buf.put_slice(b"a\"b\n");
        assert_eq!("\"a\\\"b\\n\"", decode_jsonb(&mut buf.freeze()).unwrap());
    }

    // the small object {"a": 1} as MySQL stores it
    #[test]
    fn test_small_object() {
        let mut buf = BytesMut::new();
        buf.put_u8(TYPE_SMALL_OBJECT);
        // count, size
        buf.put_u16_le(1);
        buf.put_u16_le(12);
        // key entry: offset 11, length 1
        buf.put_u16_le(11);
        buf.put_u16_le(1);
        // value entry: inlined int16
        buf.put_u8(TYPE_INT16);
        buf.put_u16_le(1);
        // key bytes
        buf.put_slice(b"a");
        assert_eq!("{\"a\":1}", decode_jsonb(&mut buf.freeze()).unwrap());
    }

    #[test]
    fn test_small_array_with_string() {
        let mut buf = BytesMut::new();
        buf.put_u8(TYPE_SMALL_ARRAY);
        // two elements: inlined literal and a string stored at offset 10
        buf.put_u16_le(2);
        buf.put_u16_le(14);
        buf.put_u8(TYPE_LITERAL);
        buf.put_u16_le(LITERAL_NULL as u16);
        buf.put_u8(TYPE_STRING);
        buf.put_u16_le(10);
        // string value: varlen 3 + "abc"
        buf.put_u8(3);
        buf.put_slice(b"abc");
        assert_eq!("[null,\"abc\"]", decode_jsonb(&mut buf.freeze()).unwrap());
    }

    #[test]
    fn test_opaque_decimal() {
        let mut buf = BytesMut::new();
        buf.put_u8(TYPE_OPAQUE);
        buf.put_u8(0xf6);
        buf.put_u8(7); // varlen: precision + scale + 5 value bytes
        buf.put_u8(10);
        buf.put_u8(2);
        buf.put_slice(&[0x80, 0x00, 0x00, 0x03, 0x0A]);
        assert_eq!("3.10", decode_jsonb(&mut buf.freeze()).unwrap());
    }

    #[test]
    fn test_empty_is_null() {
        let mut bs = Bytes::new();
        assert_eq!("null", decode_jsonb(&mut bs).unwrap());
    }

    #[test]
    fn test_corrupt_offsets() {
        let mut buf = BytesMut::new();
        buf.put_u8(TYPE_SMALL_OBJECT);
        buf.put_u16_le(1);
        buf.put_u16_le(200);
        assert!(decode_jsonb(&mut buf.freeze()).is_err());
    }
}
