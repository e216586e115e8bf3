//! RESP2/RESP3 wire codec.
//!
//! `spec.md` §1 names "the raw RESP tokenizer" as a peripheral collaborator
//! whose interface is merely specified; this module is a small, focused
//! implementation of that interface (array-of-bulk-strings command
//! frames, inline commands on the first line, and a RESP2/RESP3-aware
//! reply writer) so the command dispatcher has something real to parse
//! against. It intentionally does not attempt to be a general protocol
//! engine.

use bytes::{Bytes, BytesMut};
use std::fmt::Write as _;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("parsing error '{0}'")]
    ParsingError(usize),
    #[error("invalid multibulk length")]
    InvalidMultibulkLength,
    #[error("invalid bulk length")]
    InvalidBulkLength,
    #[error("unbalanced quotes in request")]
    UnbalancedQuotes,
}

/// A fully parsed command: the command name and its arguments, both as
/// raw bytes (case folding and argument typing happen in the dispatcher).
#[derive(Debug, Clone)]
pub struct Command {
    pub args: Vec<Bytes>,
}

impl Command {
    pub fn name(&self) -> &[u8] {
        self.args.first().map(|b| b.as_ref()).unwrap_or(b"")
    }
}

/// Outcome of attempting to parse one command frame from a buffer.
pub enum ParseOutcome {
    /// Not enough bytes buffered yet.
    Incomplete,
    /// A full command was parsed, consuming `usize` bytes off the front
    /// of the buffer.
    Complete(Command, usize),
}

/// Parses one command frame starting at the front of `buf`.
///
/// `allow_inline` should be `true` only while handling the very first
/// line of a freshly accepted connection, per `spec.md` §6 ("Inline
/// commands are also accepted on the first line of a connection").
pub fn parse_command(buf: &[u8], allow_inline: bool) -> Result<ParseOutcome, ProtocolError> {
    if buf.is_empty() {
        return Ok(ParseOutcome::Incomplete);
    }

    if buf[0] == b'*' {
        parse_multibulk(buf)
    } else if allow_inline {
        parse_inline(buf)
    } else {
        Err(ProtocolError::ParsingError(0))
    }
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 1 < buf.len() {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn parse_multibulk(buf: &[u8]) -> Result<ParseOutcome, ProtocolError> {
    let Some(line_end) = find_crlf(buf, 0) else {
        return Ok(ParseOutcome::Incomplete);
    };
    let count_str = std::str::from_utf8(&buf[1..line_end])
        .map_err(|_| ProtocolError::InvalidMultibulkLength)?;
    let count: i64 = count_str
        .parse()
        .map_err(|_| ProtocolError::InvalidMultibulkLength)?;
    if count <= 0 {
        // Empty/negative multibulk: treat as a no-op empty command.
        return Ok(ParseOutcome::Complete(Command { args: vec![] }, line_end + 2));
    }

    let mut pos = line_end + 2;
    let mut args = Vec::with_capacity(count as usize);

    for _ in 0..count {
        if pos >= buf.len() || buf[pos] != b'$' {
            if pos >= buf.len() {
                return Ok(ParseOutcome::Incomplete);
            }
            return Err(ProtocolError::ParsingError(pos));
        }
        let Some(len_line_end) = find_crlf(buf, pos) else {
            return Ok(ParseOutcome::Incomplete);
        };
        let len_str = std::str::from_utf8(&buf[pos + 1..len_line_end])
            .map_err(|_| ProtocolError::InvalidBulkLength)?;
        let len: i64 = len_str
            .parse()
            .map_err(|_| ProtocolError::InvalidBulkLength)?;
        if len < 0 {
            return Err(ProtocolError::InvalidBulkLength);
        }
        let data_start = len_line_end + 2;
        let data_end = data_start + len as usize;
        if data_end + 2 > buf.len() {
            return Ok(ParseOutcome::Incomplete);
        }
        if &buf[data_end..data_end + 2] != b"\r\n" {
            return Err(ProtocolError::ParsingError(data_end));
        }
        args.push(Bytes::copy_from_slice(&buf[data_start..data_end]));
        pos = data_end + 2;
    }

    Ok(ParseOutcome::Complete(Command { args }, pos))
}

fn parse_inline(buf: &[u8]) -> Result<ParseOutcome, ProtocolError> {
    let Some(line_end) = find_newline(buf) else {
        return Ok(ParseOutcome::Incomplete);
    };
    let consumed = line_end + 1;
    let line_bytes = if line_end > 0 && buf[line_end - 1] == b'\r' {
        &buf[..line_end - 1]
    } else {
        &buf[..line_end]
    };

    let mut args = Vec::new();
    let mut chars = line_bytes.iter().peekable();
    let mut current = Vec::new();
    let mut in_quotes = false;
    let mut has_current = false;

    while let Some(&b) = chars.next() {
        match b {
            b'"' => {
                in_quotes = !in_quotes;
                has_current = true;
            }
            b' ' | b'\t' if !in_quotes => {
                if has_current {
                    args.push(Bytes::from(std::mem::take(&mut current)));
                    has_current = false;
                }
            }
            _ => {
                current.push(b);
                has_current = true;
            }
        }
    }
    if in_quotes {
        return Err(ProtocolError::UnbalancedQuotes);
    }
    if has_current {
        args.push(Bytes::from(current));
    }

    Ok(ParseOutcome::Complete(Command { args }, consumed))
}

fn find_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

/// Which RESP version a connection should reply with, selected by HELLO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespVersion {
    Resp2,
    Resp3,
}

/// A reply value. Encoding adapts to [`RespVersion`] where the two
/// protocol versions disagree (null, boolean, double, map).
#[derive(Debug, Clone)]
pub enum Value {
    SimpleString(String),
    Error(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    BulkString(Option<Bytes>),
    Array(Option<Vec<Value>>),
    Map(Vec<(Value, Value)>),
    Null,
}

impl Value {
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Value::BulkString(Some(data.into()))
    }

    pub fn nil_bulk() -> Self {
        Value::BulkString(None)
    }

    pub fn ok() -> Self {
        Value::SimpleString("OK".to_owned())
    }

    pub fn encode(&self, out: &mut BytesMut, version: RespVersion) {
        match self {
            Value::SimpleString(s) => {
                out.extend_from_slice(b"+");
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Value::Error(s) => {
                out.extend_from_slice(b"-");
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Value::Integer(i) => {
                out.extend_from_slice(b":");
                let mut tmp = String::new();
                let _ = write!(tmp, "{i}");
                out.extend_from_slice(tmp.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Value::Double(d) => match version {
                RespVersion::Resp3 => {
                    out.extend_from_slice(b",");
                    let mut tmp = String::new();
                    let _ = write!(tmp, "{d}");
                    out.extend_from_slice(tmp.as_bytes());
                    out.extend_from_slice(b"\r\n");
                }
                RespVersion::Resp2 => {
                    let mut tmp = String::new();
                    let _ = write!(tmp, "{d}");
                    Value::bulk(Bytes::from(tmp.into_bytes())).encode(out, version);
                }
            },
            Value::Boolean(b) => match version {
                RespVersion::Resp3 => {
                    out.extend_from_slice(if *b { b"#t\r\n" } else { b"#f\r\n" });
                }
                RespVersion::Resp2 => {
                    Value::Integer(if *b { 1 } else { 0 }).encode(out, version);
                }
            },
            Value::BulkString(None) => {
                out.extend_from_slice(b"$-1\r\n");
            }
            Value::BulkString(Some(data)) => {
                out.extend_from_slice(b"$");
                let mut tmp = String::new();
                let _ = write!(tmp, "{}", data.len());
                out.extend_from_slice(tmp.as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            Value::Array(None) => {
                out.extend_from_slice(b"*-1\r\n");
            }
            Value::Array(Some(items)) => {
                out.extend_from_slice(b"*");
                let mut tmp = String::new();
                let _ = write!(tmp, "{}", items.len());
                out.extend_from_slice(tmp.as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode(out, version);
                }
            }
            Value::Map(pairs) => match version {
                RespVersion::Resp3 => {
                    out.extend_from_slice(b"%");
                    let mut tmp = String::new();
                    let _ = write!(tmp, "{}", pairs.len());
                    out.extend_from_slice(tmp.as_bytes());
                    out.extend_from_slice(b"\r\n");
                    for (k, v) in pairs {
                        k.encode(out, version);
                        v.encode(out, version);
                    }
                }
                RespVersion::Resp2 => {
                    out.extend_from_slice(b"*");
                    let mut tmp = String::new();
                    let _ = write!(tmp, "{}", pairs.len() * 2);
                    out.extend_from_slice(tmp.as_bytes());
                    out.extend_from_slice(b"\r\n");
                    for (k, v) in pairs {
                        k.encode(out, version);
                        v.encode(out, version);
                    }
                }
            },
            Value::Null => match version {
                RespVersion::Resp3 => out.extend_from_slice(b"_\r\n"),
                RespVersion::Resp2 => Value::BulkString(None).encode(out, version),
            },
        }
    }

    pub fn to_bytes(&self, version: RespVersion) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf, version);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multibulk_command() {
        let raw = b"*2\r\n$3\r\nGET\r\n$5\r\na_key\r\n";
        match parse_command(raw, false).unwrap() {
            ParseOutcome::Complete(cmd, consumed) => {
                assert_eq!(consumed, raw.len());
                assert_eq!(cmd.args[0].as_ref(), b"GET");
                assert_eq!(cmd.args[1].as_ref(), b"a_key");
            }
            ParseOutcome::Incomplete => panic!("expected complete parse"),
        }
    }

    #[test]
    fn reports_incomplete_for_partial_frame() {
        let raw = b"*2\r\n$3\r\nGET\r\n$5\r\na_k";
        assert!(matches!(
            parse_command(raw, false).unwrap(),
            ParseOutcome::Incomplete
        ));
    }

    #[test]
    fn parses_inline_command_with_quotes() {
        let raw = b"SET a_key \"b value\"\r\n";
        match parse_command(raw, true).unwrap() {
            ParseOutcome::Complete(cmd, _) => {
                assert_eq!(cmd.args.len(), 3);
                assert_eq!(cmd.args[2].as_ref(), b"b value");
            }
            ParseOutcome::Incomplete => panic!("expected complete parse"),
        }
    }

    #[test]
    fn encodes_resp2_vs_resp3_null_and_boolean() {
        let mut buf = BytesMut::new();
        Value::Null.encode(&mut buf, RespVersion::Resp2);
        assert_eq!(&buf[..], b"$-1\r\n");

        buf.clear();
        Value::Null.encode(&mut buf, RespVersion::Resp3);
        assert_eq!(&buf[..], b"_\r\n");

        buf.clear();
        Value::Boolean(true).encode(&mut buf, RespVersion::Resp2);
        assert_eq!(&buf[..], b":1\r\n");

        buf.clear();
        Value::Boolean(true).encode(&mut buf, RespVersion::Resp3);
        assert_eq!(&buf[..], b"#t\r\n");
    }

    #[test]
    fn scenario_s1_set_then_get() {
        let mut buf = BytesMut::new();
        Value::ok().encode(&mut buf, RespVersion::Resp2);
        assert_eq!(&buf[..], b"+OK\r\n");

        buf.clear();
        Value::bulk(Bytes::from_static(b"b_value")).encode(&mut buf, RespVersion::Resp2);
        assert_eq!(&buf[..], b"$7\r\nb_value\r\n");
    }
}
