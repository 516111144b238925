use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("expected an array, got {0}")]
    NotArray(&'static str),

    #[error("key at position {index} is not a bulk string")]
    KeyNotString { index: usize },

    #[error("key/value array has odd length {0}")]
    OddLength(usize),

    #[error("key {0:?} appears more than once")]
    DuplicateKey(&'static str),

    #[error("unknown key {0:?}")]
    UnknownKey(String),

    #[error("missing key {0:?}")]
    MissingKey(&'static str),

    #[error("value of {key:?} should be {expected}, got {found}")]
    WrongType {
        key: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("value of {key:?} should be 0 or 1, got {value}")]
    NotBoolean { key: &'static str, value: i64 },

    #[error("value of {key:?} must not be negative, got {value}")]
    Negative { key: &'static str, value: i64 },

    #[error("value of {0:?} is not valid UTF-8")]
    NotUtf8(&'static str),

    #[error("binary payload is not valid base64: {0}")]
    InvalidBase64(#[source] base64::DecodeError),

    #[error("unknown message type {0:?}")]
    UnknownType(String),
}
