use serde::{Deserialize, Serialize};

use crate::errors::EngineResult;

/// Canonical object-serialization scheme used for keys and values when
/// `useSerialize` is true (the default). Self-describing enough to round
/// trip arbitrary entries without the caller tracking a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
}

impl Value {
    pub fn encode(&self) -> EngineResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> EngineResult<Value> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::Int(i)
    }
}

/// Encodes a key or value to bytes according to `use_serialize`.
///
/// When `use_serialize` is false, callers must already be passing raw
/// UTF-8/byte strings through `Value::Str`/`Value::Bytes` -- anything else
/// is a programmer error.
pub fn encode(value: &Value, use_serialize: bool) -> EngineResult<Vec<u8>> {
    if use_serialize {
        value.encode()
    } else {
        match value {
            Value::Str(s) => Ok(s.clone().into_bytes()),
            Value::Bytes(b) => Ok(b.clone()),
            other => Err(crate::errors::EngineError::InvalidArgument(format!(
                "value {other:?} cannot be passed through without serialization"
            ))),
        }
    }
}

pub fn decode(bytes: &[u8], use_serialize: bool) -> EngineResult<Value> {
    if use_serialize {
        Value::decode(bytes)
    } else {
        Ok(Value::Str(String::from_utf8_lossy(bytes).into_owned()))
    }
}
