//! Canonical CBOR encoding for deterministic serialization.
//!
//! This module implements RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//!
//! DAG nodes and ledger records are hashed over these bytes, so the same
//! logical value must produce identical bytes on every platform.

use ciborium::value::{Integer, Value};

use crate::error::CoreError;

/// Encode a CBOR value to canonical bytes.
pub fn encode_canonical(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value);
    buf
}

/// Decode bytes into a CBOR value, requiring that they are already canonical.
///
/// Re-encoding must reproduce the input exactly; anything else would let two
/// byte strings describe the same logical value.
pub fn decode_canonical(bytes: &[u8]) -> Result<Value, CoreError> {
    let value: Value =
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))?;
    if encode_canonical(&value) != bytes {
        return Err(CoreError::DecodingError("non-canonical encoding".into()));
    }
    Ok(value)
}

/// Whether `bytes` stop before their first CBOR item is complete.
///
/// Every strict prefix of a well-formed item qualifies. A complete item, or
/// bytes that are malformed before they run out, do not.
pub fn is_truncated(bytes: &[u8]) -> bool {
    match ciborium::from_reader::<Value, _>(bytes) {
        Err(ciborium::de::Error::Io(e)) => e.kind() == std::io::ErrorKind::UnexpectedEof,
        _ => false,
    }
}

/// Recursively encode a CBOR value.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => encode_bytes(buf, b),
        Value::Text(s) => encode_text(buf, s),
        Value::Array(arr) => encode_array(buf, arr),
        Value::Map(entries) => encode_map_canonical(buf, entries),
        Value::Tag(tag, inner) => {
            encode_uint(buf, 6, *tag);
            encode_value_to(buf, inner);
        }
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        Value::Float(f) => {
            buf.push(0xfb);
            buf.extend_from_slice(&f.to_bits().to_be_bytes());
        }
        _ => buf.push(0xf7), // undefined
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: Integer) {
    let n: i128 = i.into();

    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        let abs = (-1 - n) as u64;
        encode_uint(buf, 1, abs);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

fn encode_array(buf: &mut Vec<u8>, arr: &[Value]) {
    encode_uint(buf, 4, arr.len() as u64);
    for item in arr {
        encode_value_to(buf, item);
    }
}

/// Encode a map canonically (major type 5).
///
/// Keys are sorted by their encoded byte comparison.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut key_value_pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_value_to(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();

    key_value_pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, key_value_pairs.len() as u64);
    for (key_bytes, value) in key_value_pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value construction and field access helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Integer-keyed map builder.
#[derive(Default)]
pub struct MapBuilder {
    entries: Vec<(Value, Value)>,
}

impl MapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, key: u64, value: Value) -> Self {
        self.entries.push((Value::Integer(key.into()), value));
        self
    }

    pub fn build(self) -> Value {
        Value::Map(self.entries)
    }
}

/// Read-only view over an integer-keyed map.
pub struct MapReader<'a> {
    entries: &'a [(Value, Value)],
    context: &'static str,
}

impl<'a> MapReader<'a> {
    /// Wrap a value that must be a map.
    pub fn new(value: &'a Value, context: &'static str) -> Result<Self, CoreError> {
        match value {
            Value::Map(entries) => Ok(Self { entries, context }),
            _ => Err(CoreError::DecodingError(format!("{context}: expected map"))),
        }
    }

    /// Get a field by integer key.
    pub fn get(&self, key: u64) -> Option<&'a Value> {
        self.entries
            .iter()
            .find(|(k, _)| matches!(k, Value::Integer(i) if i128::from(*i) == key as i128))
            .map(|(_, v)| v)
    }

    fn missing(&self, key: u64) -> CoreError {
        CoreError::DecodingError(format!("{}: missing or invalid field {}", self.context, key))
    }

    pub fn u64(&self, key: u64) -> Result<u64, CoreError> {
        match self.get(key) {
            Some(Value::Integer(i)) => u64::try_from(i128::from(*i)).map_err(|_| self.missing(key)),
            _ => Err(self.missing(key)),
        }
    }

    pub fn i64(&self, key: u64) -> Result<i64, CoreError> {
        match self.get(key) {
            Some(Value::Integer(i)) => i64::try_from(i128::from(*i)).map_err(|_| self.missing(key)),
            _ => Err(self.missing(key)),
        }
    }

    pub fn opt_i64(&self, key: u64) -> Result<Option<i64>, CoreError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.i64(key).map(Some),
        }
    }

    pub fn bytes(&self, key: u64) -> Result<&'a [u8], CoreError> {
        match self.get(key) {
            Some(Value::Bytes(b)) => Ok(b),
            _ => Err(self.missing(key)),
        }
    }

    pub fn bytes32(&self, key: u64) -> Result<[u8; 32], CoreError> {
        self.bytes(key)?
            .try_into()
            .map_err(|_| self.missing(key))
    }

    pub fn text(&self, key: u64) -> Result<&'a str, CoreError> {
        match self.get(key) {
            Some(Value::Text(s)) => Ok(s),
            _ => Err(self.missing(key)),
        }
    }

    pub fn array(&self, key: u64) -> Result<&'a [Value], CoreError> {
        match self.get(key) {
            Some(Value::Array(a)) => Ok(a),
            _ => Err(self.missing(key)),
        }
    }

    pub fn value(&self, key: u64) -> Result<&'a Value, CoreError> {
        self.get(key).ok_or_else(|| self.missing(key))
    }
}
