use std::collections::BTreeMap;
use std::ops::Range;

use bytes::Bytes;

use super::error::BencodeError;
use super::value::Value;

const MAX_DEPTH: usize = 64;

/// Decodes one complete bencode value.
///
/// The input must contain exactly one value; trailing bytes are an error.
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let mut parser = Parser::new(data);
    let value = parser.value(0)?;
    if !parser.at_end() {
        return Err(BencodeError::TrailingData);
    }
    Ok(value)
}

/// Returns the byte range occupied by the value starting at `start`.
///
/// Used to hash a dictionary's bytes exactly as they appear in the source
/// buffer (the info-hash rule forbids re-encoding).
pub fn value_span(data: &[u8], start: usize) -> Result<Range<usize>, BencodeError> {
    if start > data.len() {
        return Err(BencodeError::UnexpectedEof);
    }
    let mut parser = Parser::new(&data[start..]);
    parser.skip(0)?;
    Ok(start..start + parser.pos)
}

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos == self.data.len()
    }

    fn peek(&self) -> Result<u8, BencodeError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEof)
    }

    fn value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::TooDeep);
        }
        match self.peek()? {
            b'i' => self.integer(),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => self.byte_string().map(Value::Bytes),
            other => Err(BencodeError::UnexpectedByte(other)),
        }
    }

    fn integer(&mut self) -> Result<Value, BencodeError> {
        self.pos += 1;
        let start = self.pos;
        while self.peek()? != b'e' {
            self.pos += 1;
        }
        let digits = std::str::from_utf8(&self.data[start..self.pos])
            .map_err(|_| BencodeError::InvalidInteger("not utf-8".into()))?;
        if digits.is_empty() {
            return Err(BencodeError::InvalidInteger("empty".into()));
        }
        // "i0e" is the only form allowed to start with a zero.
        if digits.starts_with("-0") || (digits.len() > 1 && digits.starts_with('0')) {
            return Err(BencodeError::InvalidInteger("leading zeros".into()));
        }
        let n: i64 = digits
            .parse()
            .map_err(|_| BencodeError::InvalidInteger(digits.into()))?;
        self.pos += 1;
        Ok(Value::Integer(n))
    }

    fn byte_string(&mut self) -> Result<Bytes, BencodeError> {
        let start = self.pos;
        while self.peek()? != b':' {
            self.pos += 1;
        }
        let len: usize = std::str::from_utf8(&self.data[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(BencodeError::InvalidLength)?;
        self.pos += 1;
        let end = self
            .pos
            .checked_add(len)
            .filter(|&e| e <= self.data.len())
            .ok_or(BencodeError::UnexpectedEof)?;
        let bytes = Bytes::copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(bytes)
    }

    fn list(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.value(depth + 1)?);
        }
        self.pos += 1;
        Ok(Value::List(items))
    }

    fn dict(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut entries = BTreeMap::new();
        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(BencodeError::NonStringKey);
            }
            let key = self.byte_string()?;
            let value = self.value(depth + 1)?;
            entries.insert(key, value);
        }
        self.pos += 1;
        Ok(Value::Dict(entries))
    }

    /// Advances past one value without materialising it.
    fn skip(&mut self, depth: usize) -> Result<(), BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::TooDeep);
        }
        match self.peek()? {
            b'i' => {
                self.pos += 1;
                while self.peek()? != b'e' {
                    self.pos += 1;
                }
                self.pos += 1;
            }
            b'l' | b'd' => {
                self.pos += 1;
                while self.peek()? != b'e' {
                    self.skip(depth + 1)?;
                }
                self.pos += 1;
            }
            b'0'..=b'9' => {
                self.byte_string()?;
            }
            other => return Err(BencodeError::UnexpectedByte(other)),
        }
        Ok(())
    }
}
