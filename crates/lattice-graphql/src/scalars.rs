//! Scalar and enum codecs.
//!
//! Every leaf field is described by a [`ScalarType`], which knows how to turn
//! a wire JSON value into a typed [`Scalar`], how to write it back, and which
//! default a field takes before it is fetched or when the server sends `null`.
//!
//! Besides the GraphQL built-ins (`Boolean`, `Int`, `Float`, `String`, `ID`)
//! the runtime ships codecs for the common custom scalars `DateTime`, `Date`,
//! `Time`, `Decimal` and `UUID`. Application specific scalars implement
//! [`CustomScalar`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::DeserializeError;

/// Values a field holds before it was fetched, or after the server sent `null`.
pub mod defaults {
    /// Placeholder text for unset string fields.
    pub const STRING: &str = " - ";
    /// Default `Int`.
    pub const INT: i32 = 0;
    /// Default `Float`.
    pub const FLOAT: f64 = 0.0;
    /// Default `Boolean`.
    pub const BOOLEAN: bool = false;
    /// Placeholder `ID` for nodes whose id was not selected.
    pub const ID: &str = "9b2a0828-880d-4023-9909-de067984523c";
    /// Default `Decimal`.
    pub const DECIMAL: &str = "0";
}

const TIME_FORMAT: &str = "%H:%M:%S%.f";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// A user-provided scalar codec.
///
/// Decoded values are kept as JSON in [`Scalar::Custom`]; the codec decides
/// what normalized form they take.
///
/// # Example
///
/// ```
/// use lattice_graphql::scalars::CustomScalar;
/// use serde_json::{json, Value};
///
/// #[derive(Debug)]
/// struct Country;
///
/// impl CustomScalar for Country {
///     fn name(&self) -> &str { "Country" }
///
///     fn deserialize(&self, raw: &Value) -> Result<Value, String> {
///         match raw.as_str() {
///             Some(code) if code.len() == 2 => Ok(json!(code.to_uppercase())),
///             _ => Err("expected a two letter country code".into()),
///         }
///     }
///
///     fn default_value(&self) -> Value { json!("--") }
/// }
/// ```
pub trait CustomScalar: Send + Sync + fmt::Debug {
    /// The scalar's GraphQL name.
    fn name(&self) -> &str;

    /// Decode a non-null wire value.
    fn deserialize(&self, raw: &Value) -> std::result::Result<Value, String>;

    /// Encode a decoded value for the wire.
    fn serialize(&self, value: &Value) -> Value {
        value.clone()
    }

    /// The value of an unset field.
    fn default_value(&self) -> Value;
}

/// A GraphQL enum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumType {
    name: String,
    members: Vec<Arc<str>>,
}

impl EnumType {
    /// Create an enum with members in declaration order.
    pub fn new<I, S>(name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            members: members.into_iter().map(|m| Arc::from(m.as_ref())).collect(),
        }
    }

    /// The enum's GraphQL name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Members in declaration order.
    pub fn members(&self) -> &[Arc<str>] {
        &self.members
    }

    /// Look up a member by its wire name.
    pub fn by_name(&self, name: &str) -> Option<Arc<str>> {
        self.members.iter().find(|m| m.as_ref() == name).cloned()
    }

    /// Declaration index of a member.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.as_ref() == name)
    }
}

/// A decoded scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// `Boolean`.
    Boolean(bool),
    /// `Int` (32-bit signed).
    Int(i32),
    /// `Float`.
    Float(f64),
    /// `String`.
    String(String),
    /// `ID`.
    Id(String),
    /// A field with no value (`Void`).
    Void,
    /// `UUID`.
    Uuid(Uuid),
    /// `DateTime` (RFC 3339).
    DateTime(DateTime<FixedOffset>),
    /// `Date` (`YYYY-MM-DD`).
    Date(NaiveDate),
    /// `Time` (`HH:MM:SS[.fff]`).
    Time(NaiveTime),
    /// `Decimal`, kept in its exact textual form.
    Decimal(String),
    /// Enum member.
    Enum(Arc<str>),
    /// Value produced by a [`CustomScalar`].
    Custom(Value),
}

impl Scalar {
    /// Text of `String`, `ID`, `Decimal` and enum values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Id(s) | Self::Decimal(s) => Some(s),
            Self::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// Integer value.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float value (integers widen).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    /// Boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// UUID value.
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(v) => Some(*v),
            _ => None,
        }
    }

    /// DateTime value.
    pub fn as_datetime(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            Self::DateTime(v) => Some(*v),
            _ => None,
        }
    }
}

/// The codec of a leaf field.
#[derive(Debug, Clone)]
pub enum ScalarType {
    Boolean,
    Int,
    Float,
    String,
    Id,
    Void,
    Uuid,
    DateTime,
    Date,
    Time,
    Decimal,
    Enum(Arc<EnumType>),
    Custom(Arc<dyn CustomScalar>),
}

impl ScalarType {
    /// The scalar's GraphQL name.
    pub fn name(&self) -> &str {
        match self {
            Self::Boolean => "Boolean",
            Self::Int => "Int",
            Self::Float => "Float",
            Self::String => "String",
            Self::Id => "ID",
            Self::Void => "Void",
            Self::Uuid => "UUID",
            Self::DateTime => "DateTime",
            Self::Date => "Date",
            Self::Time => "Time",
            Self::Decimal => "Decimal",
            Self::Enum(e) => e.name(),
            Self::Custom(c) => c.name(),
        }
    }

    /// The value of an unset field of this type.
    pub fn default_value(&self) -> Scalar {
        match self {
            Self::Boolean => Scalar::Boolean(defaults::BOOLEAN),
            Self::Int => Scalar::Int(defaults::INT),
            Self::Float => Scalar::Float(defaults::FLOAT),
            Self::String => Scalar::String(defaults::STRING.to_string()),
            Self::Id => Scalar::Id(defaults::ID.to_string()),
            Self::Void => Scalar::Void,
            Self::Uuid => Scalar::Uuid(Uuid::nil()),
            Self::DateTime => Scalar::DateTime(DateTime::<Utc>::default().fixed_offset()),
            Self::Date => Scalar::Date(NaiveDate::default()),
            Self::Time => Scalar::Time(NaiveTime::default()),
            Self::Decimal => Scalar::Decimal(defaults::DECIMAL.to_string()),
            Self::Enum(e) => match e.members().first() {
                Some(first) => Scalar::Enum(first.clone()),
                None => Scalar::Void,
            },
            Self::Custom(c) => Scalar::Custom(c.default_value()),
        }
    }

    /// Decode a non-null wire value for `field`.
    pub fn decode(&self, field: &str, raw: &Value) -> Result<Scalar, DeserializeError> {
        match self {
            Self::Boolean => raw
                .as_bool()
                .map(Scalar::Boolean)
                .ok_or_else(|| DeserializeError::mismatch(field, "boolean", raw)),
            Self::Int => raw
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Scalar::Int)
                .ok_or_else(|| DeserializeError::mismatch(field, "32-bit integer", raw)),
            Self::Float => raw
                .as_f64()
                .map(Scalar::Float)
                .ok_or_else(|| DeserializeError::mismatch(field, "number", raw)),
            Self::String => raw
                .as_str()
                .map(|s| Scalar::String(s.to_string()))
                .ok_or_else(|| DeserializeError::mismatch(field, "string", raw)),
            Self::Id => match raw {
                Value::String(s) => Ok(Scalar::Id(s.clone())),
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Scalar::Id(n.to_string())),
                _ => Err(DeserializeError::mismatch(field, "ID", raw)),
            },
            Self::Void => Ok(Scalar::Void),
            Self::Uuid => {
                let text = raw
                    .as_str()
                    .ok_or_else(|| DeserializeError::mismatch(field, "UUID string", raw))?;
                Uuid::parse_str(text)
                    .map(Scalar::Uuid)
                    .map_err(|e| DeserializeError::invalid_scalar("UUID", e.to_string()))
            }
            Self::DateTime => {
                let text = raw
                    .as_str()
                    .ok_or_else(|| DeserializeError::mismatch(field, "RFC 3339 string", raw))?;
                DateTime::parse_from_rfc3339(text)
                    .map(Scalar::DateTime)
                    .map_err(|e| DeserializeError::invalid_scalar("DateTime", e.to_string()))
            }
            Self::Date => {
                let text = raw
                    .as_str()
                    .ok_or_else(|| DeserializeError::mismatch(field, "date string", raw))?;
                NaiveDate::parse_from_str(text, DATE_FORMAT)
                    .map(Scalar::Date)
                    .map_err(|e| DeserializeError::invalid_scalar("Date", e.to_string()))
            }
            Self::Time => {
                let text = raw
                    .as_str()
                    .ok_or_else(|| DeserializeError::mismatch(field, "time string", raw))?;
                NaiveTime::parse_from_str(text, TIME_FORMAT)
                    .map(Scalar::Time)
                    .map_err(|e| DeserializeError::invalid_scalar("Time", e.to_string()))
            }
            Self::Decimal => {
                let text = match raw {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => return Err(DeserializeError::mismatch(field, "decimal", raw)),
                };
                if text.trim().parse::<f64>().is_err() {
                    return Err(DeserializeError::invalid_scalar(
                        "Decimal",
                        format!("'{text}' is not a number"),
                    ));
                }
                Ok(Scalar::Decimal(text))
            }
            Self::Enum(e) => {
                let name = raw
                    .as_str()
                    .ok_or_else(|| DeserializeError::mismatch(field, "enum member", raw))?;
                e.by_name(name)
                    .map(Scalar::Enum)
                    .ok_or_else(|| DeserializeError::UnknownEnumMember {
                        enum_name: e.name().to_string(),
                        value: name.to_string(),
                    })
            }
            Self::Custom(c) => c
                .deserialize(raw)
                .map(Scalar::Custom)
                .map_err(|message| DeserializeError::invalid_scalar(c.name(), message)),
        }
    }

    /// Encode a value for the wire.
    pub fn encode(&self, value: &Scalar) -> Value {
        match (self, value) {
            (Self::Custom(c), Scalar::Custom(v)) => c.serialize(v),
            (_, Scalar::Boolean(v)) => Value::Bool(*v),
            (_, Scalar::Int(v)) => Value::from(*v),
            (_, Scalar::Float(v)) => Value::from(*v),
            (_, Scalar::String(s) | Scalar::Id(s) | Scalar::Decimal(s)) => Value::String(s.clone()),
            (_, Scalar::Void) => Value::Null,
            (_, Scalar::Uuid(v)) => Value::String(v.to_string()),
            (_, Scalar::DateTime(v)) => Value::String(v.to_rfc3339()),
            (_, Scalar::Date(v)) => Value::String(v.format(DATE_FORMAT).to_string()),
            (_, Scalar::Time(v)) => Value::String(v.format(TIME_FORMAT).to_string()),
            (_, Scalar::Enum(v)) => Value::String(v.to_string()),
            (_, Scalar::Custom(v)) => v.clone(),
        }
    }
}
