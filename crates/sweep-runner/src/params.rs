use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A scalar run parameter. Serializes as the bare JSON scalar, so a
/// `ParamMap` round-trips through `meta.json` unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

pub type ParamMap = BTreeMap<String, ParamValue>;

impl ParamValue {
    pub fn from_json(key: &str, value: &Value) -> Result<Self, ConfigError> {
        let unsupported = || ConfigError::UnsupportedValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        match value {
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::String(s) => Ok(Self::Str(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else if n.is_u64() {
                    Err(unsupported())
                } else {
                    n.as_f64()
                        .filter(|f| f.is_finite())
                        .map(Self::Float)
                        .ok_or_else(unsupported)
                }
            }
            Value::Null | Value::Array(_) | Value::Object(_) => Err(unsupported()),
        }
    }

    /// The command-line form of the value.
    pub fn token(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            // serde_json keeps a fractional part on integral floats ("1.0").
            Self::Float(f) => Value::from(*f).to_string(),
            Self::Str(s) => s.clone(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => {
                let s = s.trim();
                !(s.is_empty() || s.eq_ignore_ascii_case("false") || s == "0")
            }
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}
