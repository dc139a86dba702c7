//! Bencode codec.
//!
//! Hand-rolled rather than serde-based because the info-hash must be computed
//! over the `info` dictionary exactly as it appears in the source bytes;
//! [`info_dict_bytes`] returns that raw span. Encoding is canonical (dict keys
//! sorted, byte-exact integer and string framing), so decode-then-encode of a
//! well-formed document reproduces the input.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Cap on a single bencode string (64 MiB). A descriptor claiming a longer
/// string is treated as malformed rather than allocated.
const MAX_STRING_LEN: usize = 64 * 1024 * 1024;

/// A decoded bencode value
#[derive(Clone, PartialEq, Eq)]
pub enum Value {
    /// Integer, possibly negative
    Integer(i64),
    /// Byte string; not necessarily UTF-8
    Bytes(Vec<u8>),
    /// List of values
    List(Vec<Value>),
    /// Dictionary; `BTreeMap` keeps keys in the canonical sorted order
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(n) => write!(f, "Integer({n})"),
            Self::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) if s.len() <= 40 => write!(f, "Bytes({s:?})"),
                _ => write!(f, "Bytes([{} bytes])", b.len()),
            },
            Self::List(l) => f.debug_tuple("List").field(l).finish(),
            Self::Dict(d) => {
                let keys: Vec<String> = d
                    .keys()
                    .map(|k| String::from_utf8_lossy(k).into_owned())
                    .collect();
                f.debug_tuple("Dict").field(&keys).finish()
            }
        }
    }
}

/// Cursor over the input; tracks the absolute offset so value spans can be
/// reported back to the caller.
struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn bump(&mut self) -> Result<u8> {
        let b = self
            .peek()
            .ok_or_else(|| Error::bencode("unexpected end of input"))?;
        self.pos += 1;
        Ok(b)
    }

    fn value(&mut self) -> Result<Value> {
        match self.peek() {
            Some(b'i') => self.integer(),
            Some(b'l') => self.list(),
            Some(b'd') => self.dict(),
            Some(b'0'..=b'9') => self.bytes().map(Value::Bytes),
            Some(c) => Err(Error::bencode(format!(
                "invalid type marker {:?} at offset {}",
                c as char, self.pos
            ))),
            None => Err(Error::bencode("unexpected end of input")),
        }
    }

    fn integer(&mut self) -> Result<Value> {
        self.bump()?; // 'i'
        let start = self.pos;
        while self.peek().is_some_and(|b| b != b'e') {
            self.pos += 1;
        }
        if self.peek().is_none() {
            return Err(Error::bencode("unterminated integer"));
        }
        let digits = std::str::from_utf8(&self.data[start..self.pos])
            .map_err(|_| Error::bencode("non-ascii integer"))?;
        // "i-0e", "i03e" and friends are rejected so every integer has exactly
        // one encoding.
        if digits.is_empty()
            || digits == "-"
            || digits == "-0"
            || digits.starts_with('+')
            || (digits.len() > 1 && digits.starts_with('0'))
            || (digits.len() > 2 && digits.starts_with("-0"))
        {
            return Err(Error::bencode(format!("malformed integer {digits:?}")));
        }
        let n = digits
            .parse::<i64>()
            .map_err(|_| Error::bencode(format!("integer out of range: {digits}")))?;
        self.bump()?; // 'e'
        Ok(Value::Integer(n))
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(Error::bencode("expected string length"));
        }
        let digits = &self.data[start..self.pos];
        // a leading zero would give the same string two encodings
        if digits.len() > 1 && digits[0] == b'0' {
            return Err(Error::bencode("string length has a leading zero"));
        }
        let len = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| Error::bencode("bad string length"))?;
        if len > MAX_STRING_LEN {
            return Err(Error::bencode(format!("string of {len} bytes exceeds cap")));
        }
        if self.bump()? != b':' {
            return Err(Error::bencode("expected ':' after string length"));
        }
        let end = self
            .pos
            .checked_add(len)
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| Error::bencode("string length exceeds input"))?;
        let out = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(out)
    }

    fn list(&mut self) -> Result<Value> {
        self.bump()?; // 'l'
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Some(b'e') => {
                    self.pos += 1;
                    return Ok(Value::List(items));
                }
                Some(_) => items.push(self.value()?),
                None => return Err(Error::bencode("unterminated list")),
            }
        }
    }

    fn dict(&mut self) -> Result<Value> {
        self.bump()?; // 'd'
        let mut map = BTreeMap::new();
        let mut last_key: Option<Vec<u8>> = None;
        loop {
            match self.peek() {
                Some(b'e') => {
                    self.pos += 1;
                    return Ok(Value::Dict(map));
                }
                Some(_) => {
                    let key = self.bytes()?;
                    if last_key.as_ref().is_some_and(|lk| *lk >= key) {
                        return Err(Error::bencode(format!(
                            "dict keys out of order at {:?}",
                            String::from_utf8_lossy(&key)
                        )));
                    }
                    let value = self.value()?;
                    last_key = Some(key.clone());
                    map.insert(key, value);
                }
                None => return Err(Error::bencode("unterminated dict")),
            }
        }
    }
}

impl Value {
    /// Decode one value; trailing bytes are an error.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(data);
        let value = dec.value()?;
        if dec.pos != data.len() {
            return Err(Error::bencode(format!(
                "{} trailing bytes after document",
                data.len() - dec.pos
            )));
        }
        Ok(value)
    }

    /// Encode to canonical bencode bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Integer(n) => {
                buf.push(b'i');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.push(b'e');
            }
            Self::Bytes(b) => {
                buf.extend_from_slice(b.len().to_string().as_bytes());
                buf.push(b':');
                buf.extend_from_slice(b);
            }
            Self::List(items) => {
                buf.push(b'l');
                for item in items {
                    item.encode_into(buf);
                }
                buf.push(b'e');
            }
            Self::Dict(map) => {
                buf.push(b'd');
                for (key, value) in map {
                    buf.extend_from_slice(key.len().to_string().as_bytes());
                    buf.push(b':');
                    buf.extend_from_slice(key);
                    value.encode_into(buf);
                }
                buf.push(b'e');
            }
        }
    }

    /// Dict lookup by string key
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Dict(d) => d.get(key.as_bytes()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Self::Integer(n) if *n >= 0 => Some(*n as u64),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Self::Dict(d) => Some(d),
            _ => None,
        }
    }
}

/// Locate the raw byte span of the `info` dictionary inside a metainfo
/// document. The span is found by walking the top-level dictionary with the
/// decoder and recording value offsets, so layout quirks in the source bytes
/// are preserved verbatim.
pub fn info_dict_bytes(data: &[u8]) -> Result<&[u8]> {
    let mut dec = Decoder::new(data);
    if dec.bump()? != b'd' {
        return Err(Error::bencode("metainfo root is not a dictionary"));
    }
    loop {
        match dec.peek() {
            Some(b'e') | None => {
                return Err(Error::metainfo("missing 'info' dictionary"));
            }
            Some(_) => {
                let key = dec.bytes()?;
                let start = dec.pos;
                dec.value()?;
                if key == b"info" {
                    return Ok(&data[start..dec.pos]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_integers() {
        assert_eq!(Value::decode(b"i42e").unwrap(), Value::Integer(42));
        assert_eq!(Value::decode(b"i-7e").unwrap(), Value::Integer(-7));
        assert_eq!(Value::decode(b"i0e").unwrap(), Value::Integer(0));

        assert!(Value::decode(b"i01e").is_err());
        assert!(Value::decode(b"i-0e").is_err());
        assert!(Value::decode(b"i-01e").is_err());
        assert!(Value::decode(b"ie").is_err());
        assert!(Value::decode(b"i42").is_err());
    }

    #[test]
    fn decodes_strings() {
        assert_eq!(
            Value::decode(b"4:spam").unwrap(),
            Value::Bytes(b"spam".to_vec())
        );
        assert_eq!(Value::decode(b"0:").unwrap(), Value::Bytes(vec![]));
        assert_eq!(
            Value::decode(b"3:\x00\x01\x02").unwrap(),
            Value::Bytes(vec![0, 1, 2])
        );

        assert!(Value::decode(b"4:spa").is_err());
        assert!(Value::decode(b"4spam").is_err());
    }

    #[test]
    fn decodes_nested_structures() {
        let value = Value::decode(b"d4:listli0ei1ee4:name4:teste").unwrap();
        let list = value.get("list").and_then(|v| v.as_list()).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(value.get("name").and_then(|v| v.as_str()), Some("test"));
        assert!(value.get("missing").is_none());
    }

    #[test]
    fn rejects_unsorted_and_trailing() {
        // "b" before "a"
        assert!(Value::decode(b"d1:bi1e1:ai2ee").is_err());
        // duplicate key
        assert!(Value::decode(b"d1:ai1e1:ai2ee").is_err());
        // trailing garbage
        assert!(Value::decode(b"i1ei2e").is_err());
    }

    #[test]
    fn canonical_roundtrip() {
        let doc: &[u8] = b"d3:bari-3e3:bazl2:hi2:yoe3:food1:ai1eee";
        let value = Value::decode(doc).unwrap();
        assert_eq!(value.encode(), doc);
    }

    #[test]
    fn finds_info_span() {
        let doc = b"d8:announce9:http://tr4:infod4:name1:x12:piece lengthi16384e6:pieces0:ee";
        let span = info_dict_bytes(doc).unwrap();
        assert!(span.starts_with(b"d4:name"));
        assert!(span.ends_with(b"0:e"));
        // The span itself decodes as a dict
        assert!(Value::decode(span).unwrap().as_dict().is_some());
    }

    #[test]
    fn info_span_requires_info_key() {
        assert!(info_dict_bytes(b"d8:announce4:httpe").is_err());
        assert!(info_dict_bytes(b"le").is_err());
    }
}
