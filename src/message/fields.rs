use bytes::Bytes;

use crate::protocol::Resp;

use super::error::DecodeError;

/// The values of a flat `[key, value, key, value, ...]` array, checked against a fixed set of keys.
///
/// Every key must be a bulk string naming one of `keys`, at most once. Values are then taken out one by one with a
/// type check; taking a key that was not present is [`DecodeError::MissingKey`].
pub(super) struct Fields {
    keys: &'static [&'static str],
    values: Vec<Option<Resp>>,
}

impl Fields {
    pub fn parse(resp: Resp, keys: &'static [&'static str]) -> Result<Self, DecodeError> {
        let items = match resp {
            Resp::Array(items) => items,
            other => return Err(DecodeError::NotArray(other.kind())),
        };
        if items.len() % 2 != 0 {
            return Err(DecodeError::OddLength(items.len()));
        }

        let mut values = vec![None; keys.len()];
        let mut items = items.into_iter();
        let mut index = 0;
        while let (Some(key), Some(value)) = (items.next(), items.next()) {
            let key = match key {
                Resp::BulkString(key) => key,
                _ => return Err(DecodeError::KeyNotString { index }),
            };
            let slot = keys
                .iter()
                .position(|known| known.as_bytes() == &key[..])
                .ok_or_else(|| DecodeError::UnknownKey(String::from_utf8_lossy(&key).into_owned()))?;
            if values[slot].is_some() {
                return Err(DecodeError::DuplicateKey(keys[slot]));
            }
            values[slot] = Some(value);
            index += 2;
        }

        Ok(Fields { keys, values })
    }

    pub fn take(&mut self, key: &'static str) -> Result<Resp, DecodeError> {
        self.keys
            .iter()
            .position(|known| *known == key)
            .and_then(|slot| self.values[slot].take())
            .ok_or(DecodeError::MissingKey(key))
    }

    pub fn int(&mut self, key: &'static str) -> Result<u64, DecodeError> {
        match self.take(key)? {
            Resp::Integer(value) if value < 0 => Err(DecodeError::Negative { key, value }),
            Resp::Integer(value) => Ok(value as u64),
            other => Err(wrong_type(key, "integer", &other)),
        }
    }

    pub fn boolean(&mut self, key: &'static str) -> Result<bool, DecodeError> {
        match self.take(key)? {
            Resp::Integer(0) => Ok(false),
            Resp::Integer(1) => Ok(true),
            Resp::Integer(value) => Err(DecodeError::NotBoolean { key, value }),
            other => Err(wrong_type(key, "integer", &other)),
        }
    }

    pub fn bytes(&mut self, key: &'static str) -> Result<Bytes, DecodeError> {
        match self.take(key)? {
            Resp::BulkString(data) => Ok(data),
            other => Err(wrong_type(key, "bulk string", &other)),
        }
    }

    pub fn string(&mut self, key: &'static str) -> Result<String, DecodeError> {
        let data = self.bytes(key)?;
        String::from_utf8(data.to_vec()).map_err(|_| DecodeError::NotUtf8(key))
    }

    pub fn array(&mut self, key: &'static str) -> Result<Vec<Resp>, DecodeError> {
        match self.take(key)? {
            Resp::Array(items) => Ok(items),
            other => Err(wrong_type(key, "array", &other)),
        }
    }
}

fn wrong_type(key: &'static str, expected: &'static str, found: &Resp) -> DecodeError {
    DecodeError::WrongType {
        key,
        expected,
        found: found.kind(),
    }
}
