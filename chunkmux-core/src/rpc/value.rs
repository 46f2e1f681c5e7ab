//! Dynamically typed values carried as RPC arguments and results.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A value that can cross the channel.
///
/// Binary payloads travel as [`Bytes`] so media chunks are moved, not
/// copied element by element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Bytes(Bytes),
    List(Vec<Value>),
    Record(BTreeMap<String, Value>),
}

/// Failure to read a typed value out of a [`Value`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeError {
    #[error("Expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Missing field: {field}")]
    MissingField { field: &'static str },

    #[error("Missing argument at position {index}")]
    MissingArgument { index: usize },

    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl Value {
    /// Short name of the variant, used in decode errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Record(_) => "record",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// # Errors
    /// - `DecodeError::TypeMismatch` - Value is not a bool
    pub fn as_bool(&self) -> Result<bool, DecodeError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(mismatch("bool", other)),
        }
    }

    /// # Errors
    /// - `DecodeError::TypeMismatch` - Value is not a number
    pub fn as_f64(&self) -> Result<f64, DecodeError> {
        match self {
            Value::Number(n) => Ok(*n),
            other => Err(mismatch("number", other)),
        }
    }

    /// # Errors
    /// - `DecodeError::TypeMismatch` - Value is not text
    pub fn as_str(&self) -> Result<&str, DecodeError> {
        match self {
            Value::Text(s) => Ok(s),
            other => Err(mismatch("text", other)),
        }
    }

    /// # Errors
    /// - `DecodeError::TypeMismatch` - Value is not a byte payload
    pub fn as_bytes(&self) -> Result<&Bytes, DecodeError> {
        match self {
            Value::Bytes(b) => Ok(b),
            other => Err(mismatch("bytes", other)),
        }
    }

    /// # Errors
    /// - `DecodeError::TypeMismatch` - Value is not a list
    pub fn as_list(&self) -> Result<&[Value], DecodeError> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(mismatch("list", other)),
        }
    }

    /// Looks up a required field of a record.
    ///
    /// # Errors
    /// - `DecodeError::TypeMismatch` - Value is not a record
    /// - `DecodeError::MissingField` - Record has no such field
    pub fn field(&self, name: &'static str) -> Result<&Value, DecodeError> {
        match self {
            Value::Record(fields) => fields
                .get(name)
                .ok_or(DecodeError::MissingField { field: name }),
            other => Err(mismatch("record", other)),
        }
    }

    /// Looks up an optional field; absent and `Null` both read as `None`.
    ///
    /// # Errors
    /// - `DecodeError::TypeMismatch` - Value is not a record
    pub fn optional_field(&self, name: &'static str) -> Result<Option<&Value>, DecodeError> {
        match self {
            Value::Record(fields) => Ok(fields.get(name).filter(|v| !v.is_null())),
            other => Err(mismatch("record", other)),
        }
    }
}

fn mismatch(expected: &'static str, found: &Value) -> DecodeError {
    DecodeError::TypeMismatch {
        expected,
        found: found.kind_name(),
    }
}

/// Builds a [`Value::Record`] from `(name, value)` pairs.
pub fn record<I>(fields: I) -> Value
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    Value::Record(
        fields
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect(),
    )
}

/// Positional argument access for handlers.
pub trait Arguments {
    /// # Errors
    /// - `DecodeError::MissingArgument` - Fewer arguments than `index + 1`
    fn required(&self, index: usize) -> Result<&Value, DecodeError>;

    /// Missing trailing arguments and explicit nulls both read as `None`.
    fn optional(&self, index: usize) -> Option<&Value>;
}

impl Arguments for [Value] {
    fn required(&self, index: usize) -> Result<&Value, DecodeError> {
        self.get(index)
            .ok_or(DecodeError::MissingArgument { index })
    }

    fn optional(&self, index: usize) -> Option<&Value> {
        self.get(index).filter(|v| !v.is_null())
    }
}

/// Typed decoding out of a [`Value`].
pub trait FromValue: Sized {
    /// # Errors
    /// - `DecodeError` - The value does not have the expected shape
    fn from_value(value: &Value) -> Result<Self, DecodeError>;
}

impl FromValue for () {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Null => Ok(()),
            other => Err(mismatch("null", other)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        value.as_bool()
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        value.as_f64()
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        value.as_str().map(str::to_string)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        value.as_list()?.iter().map(T::from_value).collect()
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(option: Option<T>) -> Self {
        option.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}
