use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum RespError {
    #[error("unknown type symbol {0:#04x}")]
    UnknownSymbol(u8),

    #[error("invalid integer {0:?}")]
    InvalidInteger(String),

    #[error("invalid length {0}")]
    InvalidLength(i64),

    // bulk string payload not terminated by CRLF
    #[error("bulk string of {len} bytes is not followed by CRLF")]
    MissingCrlf { len: usize },

    #[error("frame exceeds the limit of {limit} bytes")]
    FrameTooLarge { limit: usize },

    #[error("values nested deeper than {0} levels")]
    TooDeep(usize),
}
