//! Values stored under paths, and their encodings.
//!
//! [`Value`] is a closed set of built-in variants plus [`Value::Custom`] for
//! encodings added at runtime through the [`codec`] registry.

pub mod codec;

use std::fmt;

use thiserror::Error;

use crate::addressing::Properties;

pub use codec::{decode, register_value_decoder, CodecRegistry, ValueDecoder};

/// Description of a value's wire format.
pub type Encoding = u8;

/// Known encodings.
pub mod encoding {
    use super::Encoding;

    /// A raw bytes buffer.
    pub const RAW: Encoding = 0x00;
    /// An UTF-8 string.
    pub const STRING: Encoding = 0x02;
    /// `k=v` pairs separated by `;`, as an UTF-8 string.
    pub const PROPERTIES: Encoding = 0x03;
    /// A JSON document in an UTF-8 string.
    pub const JSON: Encoding = 0x04;
    /// A decimal integer as an UTF-8 string.
    pub const INT: Encoding = 0x06;
    /// A float as an UTF-8 string.
    pub const FLOAT: Encoding = 0x07;
}

/// Failure to decode one payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no decoder registered for encoding {0:#04x}")]
    UnknownEncoding(Encoding),

    #[error("payload for encoding {encoding:#04x} is not valid UTF-8")]
    InvalidUtf8 {
        encoding: Encoding,
        #[source]
        source: std::str::Utf8Error,
    },

    #[error("failed to decode INT value: {0}")]
    InvalidInt(#[from] std::num::ParseIntError),

    #[error("failed to decode FLOAT value: {0}")]
    InvalidFloat(#[from] std::num::ParseFloatError),

    #[error("{0}")]
    Custom(String),
}

/// A value that can be published under a path.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Raw(Vec<u8>),
    String(String),
    Properties(Properties),
    Int(i64),
    Float(f64),
    /// A payload with an encoding outside the built-in set.
    Custom { encoding: Encoding, payload: Vec<u8> },
}

impl Value {
    /// The encoding flag sent along with [`Value::encode`].
    pub fn encoding(&self) -> Encoding {
        match self {
            Value::Raw(_) => encoding::RAW,
            Value::String(_) => encoding::STRING,
            Value::Properties(_) => encoding::PROPERTIES,
            Value::Int(_) => encoding::INT,
            Value::Float(_) => encoding::FLOAT,
            Value::Custom { encoding, .. } => *encoding,
        }
    }

    /// The value serialized for the wire.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Value::Raw(buf) => buf.clone(),
            Value::Custom { payload, .. } => payload.clone(),
            other => other.to_string().into_bytes(),
        }
    }

    /// View the value as properties; non-properties values become `{"value": text}`.
    pub fn to_properties(&self) -> Properties {
        match self {
            Value::Properties(p) => p.clone(),
            other => Properties::new().with("value", other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Raw(buf) => write!(f, "[x {}]", hex::encode(buf)),
            Value::String(s) => f.write_str(s),
            Value::Properties(p) => write!(f, "{}", p),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Custom { encoding, payload } => {
                write!(f, "[{:#04x} {}]", encoding, hex::encode(payload))
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<Vec<u8>> for Value {
    fn from(buf: Vec<u8>) -> Self {
        Value::Raw(buf)
    }
}

impl From<Properties> for Value {
    fn from(p: Properties) -> Self {
        Value::Properties(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_flags() {
        assert_eq!(Value::Raw(vec![]).encoding(), encoding::RAW);
        assert_eq!(Value::from("s").encoding(), encoding::STRING);
        assert_eq!(Value::from(Properties::new()).encoding(), encoding::PROPERTIES);
        assert_eq!(Value::from(1i64).encoding(), encoding::INT);
        assert_eq!(Value::from(1.5f64).encoding(), encoding::FLOAT);
    }

    #[test]
    fn test_text_forms() {
        assert_eq!(Value::Int(-42).encode(), b"-42".to_vec());
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Raw(vec![0x0a, 0xff]).to_string(), "[x 0aff]");
        let p = Properties::new().with("b", "2").with("a", "1");
        assert_eq!(Value::Properties(p).encode(), b"a=1;b=2".to_vec());
    }

    #[test]
    fn test_to_properties() {
        let p = Value::Int(3).to_properties();
        assert_eq!(p.get("value"), Some("3"));
    }
}
