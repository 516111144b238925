//! RESP values: the self-describing framing carried on every peer connection.
//!
//! Only the subset needed by the Raft wire format is produced (arrays, bulk strings, integers), but the parser accepts
//! every RESP2 type so that a misbehaving peer gets a decode error instead of a stalled connection.

#[cfg(test)]
mod tests;

pub mod error;
pub mod parser;

use bytes::{BufMut, Bytes, BytesMut};

pub use error::RespError;
pub use parser::{Parsed, RespParser};

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const CRLF: &[u8; 2] = b"\r\n";

pub const NIL: &[u8; 5] = b"$-1\r\n";

/// Arrays nested deeper than this are refused.
pub const MAX_DEPTH: usize = 32;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Resp {
    SimpleString(Bytes),
    Error(Bytes),
    Integer(i64),
    BulkString(Bytes),
    Array(Vec<Resp>),
    Nil,
}

impl Resp {
    pub fn bulk<T: Into<Bytes>>(data: T) -> Self {
        Resp::BulkString(data.into())
    }

    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            Resp::BulkString(data) => Some(data),
            _ => None,
        }
    }

    /// The name of this value's type, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Resp::SimpleString(_) => "simple string",
            Resp::Error(_) => "error",
            Resp::Integer(_) => "integer",
            Resp::BulkString(_) => "bulk string",
            Resp::Array(_) => "array",
            Resp::Nil => "nil",
        }
    }

    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Resp::SimpleString(line) => put_line(out, b'+', line),
            Resp::Error(line) => put_line(out, b'-', line),
            Resp::Integer(value) => put_line(out, b':', value.to_string().as_bytes()),
            Resp::BulkString(data) => {
                put_line(out, b'$', data.len().to_string().as_bytes());
                out.put_slice(data);
                out.put_slice(CRLF);
            }
            Resp::Array(values) => {
                put_line(out, b'*', values.len().to_string().as_bytes());
                for value in values {
                    value.encode(out);
                }
            }
            Resp::Nil => out.put_slice(NIL),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.encode(&mut out);
        out.freeze()
    }
}

impl From<&'static str> for Resp {
    fn from(data: &'static str) -> Self {
        Resp::BulkString(Bytes::from_static(data.as_bytes()))
    }
}

impl From<String> for Resp {
    fn from(data: String) -> Self {
        Resp::BulkString(Bytes::from(data))
    }
}

impl From<u64> for Resp {
    // values above i64::MAX do not occur for terms and indices
    fn from(value: u64) -> Self {
        Resp::Integer(value as i64)
    }
}

impl From<bool> for Resp {
    fn from(value: bool) -> Self {
        Resp::Integer(value as i64)
    }
}

impl From<Vec<Resp>> for Resp {
    fn from(values: Vec<Resp>) -> Self {
        Resp::Array(values)
    }
}

fn put_line(out: &mut BytesMut, symbol: u8, line: &[u8]) {
    out.reserve(line.len() + 3);
    out.put_u8(symbol);
    out.put_slice(line);
    out.put_slice(CRLF);
}
