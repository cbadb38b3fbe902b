//! Parameter and column values.
//!
//! Values compare and hash structurally, so templates built from them can be
//! used as deduplication keys. Formatting summarizes large text and blobs
//! instead of rendering them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};

/// Longest text rendered verbatim by `Debug`/`Display`.
const SUMMARY_TEXT_LIMIT: usize = 32;

/// A single SQL value.
#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Self::Blob(v) => Some(v),
            _ => None,
        }
    }

    /// Name of the value's storage class, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
        }
    }

    /// Coerce this value to the storage class named by `tag`.
    ///
    /// `Null` coerces to every tag. Lossy conversions (a fractional real to
    /// an integer, non-UTF-8 bytes to text) fail with [`Error::Binding`].
    pub fn coerce(&self, tag: TypeTag) -> Result<Value> {
        let mismatch = || {
            Error::binding(format!(
                "cannot coerce {} value {} to {}",
                self.kind(),
                self,
                tag
            ))
        };

        let coerced = match (tag, self) {
            (_, Self::Null) => Self::Null,

            (TypeTag::Integer, Self::Integer(v)) => Self::Integer(*v),
            (TypeTag::Integer, Self::Real(v)) => {
                if v.fract() != 0.0 || *v < i64::MIN as f64 || *v >= i64::MAX as f64 {
                    return Err(mismatch());
                }
                Self::Integer(*v as i64)
            }
            (TypeTag::Integer, Self::Text(v)) => {
                Self::Integer(v.trim().parse().map_err(|_| mismatch())?)
            }

            (TypeTag::Real, Self::Integer(v)) => Self::Real(*v as f64),
            (TypeTag::Real, Self::Real(v)) => Self::Real(*v),
            (TypeTag::Real, Self::Text(v)) => Self::Real(v.trim().parse().map_err(|_| mismatch())?),

            (TypeTag::Text, Self::Integer(v)) => Self::Text(v.to_string()),
            (TypeTag::Text, Self::Real(v)) => Self::Text(v.to_string()),
            (TypeTag::Text, Self::Text(v)) => Self::Text(v.clone()),
            (TypeTag::Text, Self::Blob(v)) => {
                Self::Text(String::from_utf8(v.clone()).map_err(|_| mismatch())?)
            }

            (TypeTag::Blob, Self::Blob(v)) => Self::Blob(v.clone()),
            (TypeTag::Blob, Self::Text(v)) => Self::Blob(v.clone().into_bytes()),

            (TypeTag::Boolean, Self::Integer(v)) if *v == 0 || *v == 1 => Self::Integer(*v),
            (TypeTag::Boolean, Self::Text(v)) => match v.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Self::Integer(1),
                "false" | "0" => Self::Integer(0),
                _ => return Err(mismatch()),
            },

            _ => return Err(mismatch()),
        };
        Ok(coerced)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            // Bitwise, so that equality stays consistent with hashing.
            (Self::Real(a), Self::Real(b)) => a.to_bits() == b.to_bits(),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Blob(a), Self::Blob(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Integer(v) => v.hash(state),
            Self::Real(v) => v.to_bits().hash(state),
            Self::Text(v) => v.hash(state),
            Self::Blob(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Text(v) if v.chars().count() <= SUMMARY_TEXT_LIMIT => write!(f, "'{v}'"),
            Self::Text(v) => {
                let head: String = v.chars().take(SUMMARY_TEXT_LIMIT).collect();
                write!(f, "'{head}...' ({} chars)", v.chars().count())
            }
            Self::Blob(v) => write!(f, "<blob {} bytes>", v.len()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Integer(v) => write!(f, "Integer({v})"),
            Self::Real(v) => write!(f, "Real({v})"),
            Self::Text(_) => write!(f, "Text({self})"),
            Self::Blob(v) => write!(f, "Blob({} bytes)", v.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Blob(v.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Declared storage class a parameter is coerced to before binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
            Self::Blob => "blob",
            Self::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Conversion out of a [`Value`], used when mapping records to entities.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

fn unexpected(expected: &str, value: &Value) -> Error {
    Error::resource(
        "decode",
        format!("expected {expected}, found {} value {value}", value.kind()),
    )
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_i64().ok_or_else(|| unexpected("integer", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| unexpected("real", value))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_i64()
            .map(|v| v != 0)
            .ok_or_else(|| unexpected("boolean", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| unexpected("text", value))
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_blob()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| unexpected("blob", value))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}
