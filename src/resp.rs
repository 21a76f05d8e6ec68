//! Minimal RESP2 codec used by the client layer.
//!
//! Requests are always arrays of bulk strings. Replies are parsed from a byte
//! buffer; `ParseError::Incomplete` tells the caller to read more data.

use bytes::Bytes;

/// Nested arrays deeper than this are rejected.
const MAX_DEPTH: usize = 16;

/// Reject unreasonably large aggregates before allocating for them.
const MAX_ARRAY_LEN: i64 = 1024 * 1024;

/// A parsed RESP2 reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Array(Vec<Value>),
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// More bytes are needed to complete the value.
    Incomplete,
    Protocol(String),
}

impl Value {
    /// Parse one value from the front of `buf`, returning it and the number of
    /// bytes consumed.
    pub fn parse(buf: &[u8]) -> Result<(Value, usize), ParseError> {
        let mut pos = 0;
        let value = parse_value(buf, &mut pos, 0)?;
        Ok((value, pos))
    }

    /// Returns the value as UTF-8 text if it is a simple or bulk string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::SimpleString(s) => Some(s),
            Value::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }
}

fn parse_value(buf: &[u8], pos: &mut usize, depth: usize) -> Result<Value, ParseError> {
    if depth > MAX_DEPTH {
        return Err(ParseError::Protocol("nesting too deep".to_string()));
    }

    let kind = *buf.get(*pos).ok_or(ParseError::Incomplete)?;
    *pos += 1;

    match kind {
        b'+' => Ok(Value::SimpleString(read_text(buf, pos)?)),
        b'-' => Ok(Value::Error(read_text(buf, pos)?)),
        b':' => Ok(Value::Integer(read_integer(buf, pos)?)),
        b'$' => {
            let len = read_integer(buf, pos)?;
            if len < 0 {
                return Ok(Value::Null);
            }
            let len = len as usize;
            let end = *pos + len;
            if buf.len() < end + 2 {
                return Err(ParseError::Incomplete);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(ParseError::Protocol(
                    "bulk string missing terminator".to_string(),
                ));
            }
            let data = Bytes::copy_from_slice(&buf[*pos..end]);
            *pos = end + 2;
            Ok(Value::BulkString(data))
        }
        b'*' => {
            let count = read_integer(buf, pos)?;
            if count < 0 {
                return Ok(Value::Null);
            }
            if count > MAX_ARRAY_LEN {
                return Err(ParseError::Protocol("array too large".to_string()));
            }
            let mut items = Vec::with_capacity(count.min(64) as usize);
            for _ in 0..count {
                items.push(parse_value(buf, pos, depth + 1)?);
            }
            Ok(Value::Array(items))
        }
        other => Err(ParseError::Protocol(format!(
            "invalid type byte: {:?}",
            other as char
        ))),
    }
}

/// Read up to the next CRLF and advance past it.
fn read_line<'a>(buf: &'a [u8], pos: &mut usize) -> Result<&'a [u8], ParseError> {
    let rest = &buf[*pos..];
    let end = rest
        .windows(2)
        .position(|w| w == b"\r\n")
        .ok_or(ParseError::Incomplete)?;
    *pos += end + 2;
    Ok(&rest[..end])
}

fn read_text(buf: &[u8], pos: &mut usize) -> Result<String, ParseError> {
    let line = read_line(buf, pos)?;
    Ok(String::from_utf8_lossy(line).into_owned())
}

fn read_integer(buf: &[u8], pos: &mut usize) -> Result<i64, ParseError> {
    let line = read_line(buf, pos)?;
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ParseError::Protocol("invalid integer".to_string()))
}

/// A command to send to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    args: Vec<Bytes>,
}

impl Cmd {
    pub fn new(name: &str) -> Self {
        Self {
            args: vec![Bytes::copy_from_slice(name.as_bytes())],
        }
    }

    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        self
    }

    /// Command name as sent on the wire.
    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    /// Append the RESP encoding of this command to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'*');
        push_decimal(buf, self.args.len() as u64);
        buf.extend_from_slice(b"\r\n");
        for arg in &self.args {
            buf.push(b'$');
            push_decimal(buf, arg.len() as u64);
            buf.extend_from_slice(b"\r\n");
            buf.extend_from_slice(arg);
            buf.extend_from_slice(b"\r\n");
        }
    }
}

/// Write a u64 as decimal digits into a Vec.
fn push_decimal(buf: &mut Vec<u8>, n: u64) {
    if n == 0 {
        buf.push(b'0');
        return;
    }
    let start = buf.len();
    let mut val = n;
    while val > 0 {
        buf.push(b'0' + (val % 10) as u8);
        val /= 10;
    }
    buf[start..].reverse();
}
