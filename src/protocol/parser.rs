use bytes::{Buf, Bytes, BytesMut};

use super::error::RespError;
use super::{Resp, CR, LF, MAX_DEPTH};

type ParseResult = Result<Step, RespError>;

// longest decimal i64, sign included
const MAX_INTEGER_LEN: usize = 20;

enum Step {
    Done(Resp, usize),
    /// No value before this many bytes, counted from where the value starts, are buffered.
    Incomplete(usize),
}

/// Outcome of [`RespParser::feed`] and [`RespParser::parse`].
#[derive(Debug, Eq, PartialEq)]
pub enum Parsed {
    NeedMore,
    Value(Resp),
}

/// Incremental RESP parser bound to one connection.
///
/// Bytes are buffered until a complete value is available. A value, or a partial value, larger than `max_frame_len`
/// is an error; the connection is expected to be dropped afterwards.
///
/// An incomplete value is not looked at again until the bytes it still lacks have arrived, so a large bulk string
/// received in many small reads is parsed once.
pub struct RespParser {
    buffer: BytesMut,
    max_frame_len: usize,
    need: usize,
}

impl RespParser {
    pub fn new(max_frame_len: usize) -> Self {
        RespParser {
            buffer: BytesMut::new(),
            max_frame_len,
            need: 0,
        }
    }

    /// Buffer `bytes` and try to parse the next value.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Parsed, RespError> {
        self.buffer.extend_from_slice(bytes);
        self.parse()
    }

    /// Try to parse the next value out of what is already buffered.
    pub fn parse(&mut self) -> Result<Parsed, RespError> {
        if self.buffer.len() < self.need {
            return self.need_more();
        }
        match parse_value(&self.buffer, 0, self.max_frame_len)? {
            Step::Done(_, consumed) if consumed > self.max_frame_len => Err(self.too_large()),
            Step::Done(resp, consumed) => {
                self.buffer.advance(consumed);
                self.need = 0;
                Ok(Parsed::Value(resp))
            }
            Step::Incomplete(need) if need > self.max_frame_len => Err(self.too_large()),
            Step::Incomplete(need) => {
                self.need = need;
                self.need_more()
            }
        }
    }

    /// Number of bytes received but not yet returned as a value.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Number of bytes known to be missing from the value being received.
    pub fn missing(&self) -> usize {
        self.need.saturating_sub(self.buffer.len())
    }

    fn need_more(&self) -> Result<Parsed, RespError> {
        if self.buffer.len() > self.max_frame_len {
            Err(self.too_large())
        } else {
            Ok(Parsed::NeedMore)
        }
    }

    fn too_large(&self) -> RespError {
        RespError::FrameTooLarge {
            limit: self.max_frame_len,
        }
    }
}

fn parse_value(input: &[u8], depth: usize, limit: usize) -> ParseResult {
    let symbol = match input.first() {
        Some(symbol) => *symbol,
        None => return Ok(Step::Incomplete(1)),
    };
    if !matches!(symbol, b'+' | b'-' | b':' | b'$' | b'*') {
        return Err(RespError::UnknownSymbol(symbol));
    }
    let (line, header_len) = match until_crlf(&input[1..]) {
        Some((line, line_len)) => (line, 1 + line_len),
        // symbol, digits and CRLF
        None if symbol != b'+' && symbol != b'-' && input.len() >= MAX_INTEGER_LEN + 3 => {
            return Err(RespError::InvalidInteger(
                String::from_utf8_lossy(&input[1..=MAX_INTEGER_LEN]).into_owned(),
            ))
        }
        None => return Ok(Step::Incomplete(input.len() + 1)),
    };

    match symbol {
        b'+' => Ok(Step::Done(Resp::SimpleString(Bytes::copy_from_slice(line)), header_len)),
        b'-' => Ok(Step::Done(Resp::Error(Bytes::copy_from_slice(line)), header_len)),
        b':' => Ok(Step::Done(Resp::Integer(parse_integer(line)?), header_len)),
        b'$' => parse_bulk_string(&input[header_len..], parse_integer(line)?, header_len, limit),
        _ => parse_array(&input[header_len..], parse_integer(line)?, header_len, depth, limit),
    }
}

fn parse_bulk_string(input: &[u8], len: i64, header_len: usize, limit: usize) -> ParseResult {
    let len = match checked_len(len, limit)? {
        Some(len) => len,
        None => return Ok(Step::Done(Resp::Nil, header_len)),
    };
    if input.len() < len + 2 {
        return Ok(Step::Incomplete(header_len + len + 2));
    }
    if input[len] != CR || input[len + 1] != LF {
        return Err(RespError::MissingCrlf { len });
    }
    Ok(Step::Done(
        Resp::BulkString(Bytes::copy_from_slice(&input[..len])),
        header_len + len + 2,
    ))
}

fn parse_array(
    input: &[u8],
    count: i64,
    header_len: usize,
    depth: usize,
    limit: usize,
) -> ParseResult {
    let count = match checked_len(count, limit)? {
        Some(count) => count,
        None => return Ok(Step::Done(Resp::Nil, header_len)),
    };
    if depth >= MAX_DEPTH {
        return Err(RespError::TooDeep(MAX_DEPTH));
    }

    let mut consumed = 0;
    let mut values = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        match parse_value(&input[consumed..], depth + 1, limit)? {
            Step::Done(value, len) => {
                values.push(value);
                consumed += len;
            }
            Step::Incomplete(need) => return Ok(Step::Incomplete(header_len + consumed + need)),
        }
    }
    Ok(Step::Done(Resp::Array(values), header_len + consumed))
}

// -1 stands for nil
fn checked_len(len: i64, limit: usize) -> Result<Option<usize>, RespError> {
    match len {
        -1 => Ok(None),
        len if len < 0 => Err(RespError::InvalidLength(len)),
        len if len as u64 > limit as u64 => Err(RespError::FrameTooLarge { limit }),
        len => Ok(Some(len as usize)),
    }
}

fn until_crlf(input: &[u8]) -> Option<(&[u8], usize)> {
    input
        .windows(2)
        .position(|pair| pair[0] == CR && pair[1] == LF)
        .map(|index| (&input[..index], index + 2))
}

fn parse_integer(line: &[u8]) -> Result<i64, RespError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|line| line.parse::<i64>().ok())
        .ok_or_else(|| RespError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))
}
