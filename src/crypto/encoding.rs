//! Stable plaintext encoding for encrypted attribute values.
//!
//! Hand-rolled rather than `serde_json`, so the on-wire bytes that get sealed
//! don't shift under serde derive churn or map-ordering changes - a
//! length-prefixed, tag-discriminated binary format that round-trips every
//! [`AttributeValue`] variant losslessly. This is what actually gets encrypted;
//! it never touches the network on its own.

use std::collections::HashMap;

use crate::attribute_value::AttributeValue;

const TAG_S: u8 = 0;
const TAG_N: u8 = 1;
const TAG_B: u8 = 2;
const TAG_BOOL: u8 = 3;
const TAG_NULL: u8 = 4;
const TAG_L: u8 = 5;
const TAG_M: u8 = 6;
const TAG_SS: u8 = 7;
const TAG_NS: u8 = 8;
const TAG_BS: u8 = 9;

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn write_count(out: &mut Vec<u8>, count: usize) {
    out.extend_from_slice(&(count as u32).to_le_bytes());
}

/// Encodes `av` into this crate's stable plaintext byte representation.
pub fn encode_plaintext(av: &AttributeValue) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(av, &mut out);
    out
}

fn encode_into(av: &AttributeValue, out: &mut Vec<u8>) {
    match av {
        AttributeValue::S(s) => {
            out.push(TAG_S);
            write_bytes(out, s.as_bytes());
        }
        AttributeValue::N(n) => {
            out.push(TAG_N);
            write_bytes(out, n.as_bytes());
        }
        AttributeValue::B(b) => {
            out.push(TAG_B);
            write_bytes(out, b);
        }
        AttributeValue::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(if *b { 1 } else { 0 });
        }
        AttributeValue::Null => {
            out.push(TAG_NULL);
        }
        AttributeValue::L(items) => {
            out.push(TAG_L);
            write_count(out, items.len());
            for item in items {
                encode_into(item, out);
            }
        }
        AttributeValue::M(map) => {
            out.push(TAG_M);
            write_count(out, map.len());
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                write_bytes(out, key.as_bytes());
                encode_into(&map[key], out);
            }
        }
        AttributeValue::Ss(items) => {
            out.push(TAG_SS);
            write_count(out, items.len());
            for s in items {
                write_bytes(out, s.as_bytes());
            }
        }
        AttributeValue::Ns(items) => {
            out.push(TAG_NS);
            write_count(out, items.len());
            for n in items {
                write_bytes(out, n.as_bytes());
            }
        }
        AttributeValue::Bs(items) => {
            out.push(TAG_BS);
            write_count(out, items.len());
            for b in items {
                write_bytes(out, b);
            }
        }
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take_byte(&mut self) -> Option<u8> {
        let b = *self.bytes.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn take_u32(&mut self) -> Option<u32> {
        let slice = self.bytes.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_le_bytes(slice.try_into().ok()?))
    }

    fn take_bytes(&mut self) -> Option<Vec<u8>> {
        let len = self.take_u32()? as usize;
        let slice = self.bytes.get(self.pos..self.pos + len)?;
        self.pos += len;
        Some(slice.to_vec())
    }

    fn take_string(&mut self) -> Option<String> {
        String::from_utf8(self.take_bytes()?).ok()
    }
}

/// Decodes bytes produced by [`encode_plaintext`] back into an [`AttributeValue`].
/// Returns `None` on any malformed input rather than panicking.
pub fn decode_plaintext(bytes: &[u8]) -> Option<AttributeValue> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let value = decode_from(&mut cursor)?;
    if cursor.pos != bytes.len() {
        return None;
    }
    Some(value)
}

fn decode_from(cursor: &mut Cursor) -> Option<AttributeValue> {
    match cursor.take_byte()? {
        TAG_S => Some(AttributeValue::S(cursor.take_string()?)),
        TAG_N => Some(AttributeValue::N(cursor.take_string()?)),
        TAG_B => Some(AttributeValue::B(cursor.take_bytes()?)),
        TAG_BOOL => Some(AttributeValue::Bool(cursor.take_byte()? != 0)),
        TAG_NULL => Some(AttributeValue::Null),
        TAG_L => {
            let count = cursor.take_u32()? as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(decode_from(cursor)?);
            }
            Some(AttributeValue::L(items))
        }
        TAG_M => {
            let count = cursor.take_u32()? as usize;
            let mut map = HashMap::with_capacity(count);
            for _ in 0..count {
                let key = cursor.take_string()?;
                let value = decode_from(cursor)?;
                map.insert(key, value);
            }
            Some(AttributeValue::M(map))
        }
        TAG_SS => {
            let count = cursor.take_u32()? as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(cursor.take_string()?);
            }
            Some(AttributeValue::Ss(items))
        }
        TAG_NS => {
            let count = cursor.take_u32()? as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(cursor.take_string()?);
            }
            Some(AttributeValue::Ns(items))
        }
        TAG_BS => {
            let count = cursor.take_u32()? as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(cursor.take_bytes()?);
            }
            Some(AttributeValue::Bs(items))
        }
        _ => None,
    }
}
