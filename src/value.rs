//! Runtime values: constants in expressions, bound parameters, and
//! materialized results.

use std::cmp::Ordering;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RelqError, RelqResult};
use crate::types::{RecordType, Type};

/// Text layout of stored timestamps; matches `STRFTIME('%Y-%m-%d %H:%M:%f')`.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub const TICKS_PER_MILLISECOND: i64 = 10_000;
pub const TICKS_PER_SECOND: i64 = 10_000_000;
pub const TICKS_PER_DAY: i64 = 864_000_000_000;

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Char(char),
    Blob(Vec<u8>),
    DateTime(NaiveDateTime),
    /// Tick count (100ns units).
    Duration(i64),
    Uuid(Uuid),
    Enum(String),
    Record(Record),
    List(Vec<Value>),
    Group { key: Box<Value>, elements: Vec<Value> },
}

/// A constructed result object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((field.into(), value.into()));
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == field).map(|(_, v)| v)
    }
}

/// A SQLite storage-class value: what is bound to a placeholder and what
/// a cell holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Render as an inline SQL literal.
    pub fn to_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Integer(n) => n.to_string(),
            SqlValue::Real(f) => {
                let s = f.to_string();
                if s.contains('.') || s.contains('e') || s.contains("inf") || s.contains("NaN") {
                    s
                } else {
                    format!("{}.0", s)
                }
            }
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            SqlValue::Blob(bytes) => {
                let mut out = String::from("X'");
                for b in bytes {
                    out.push_str(&format!("{:02X}", b));
                }
                out.push('\'');
                out
            }
        }
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_literal())
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The natural static type of a literal.
    pub fn natural_type(&self) -> Type {
        match self {
            Value::Null => Type::Nullable(Box::new(Type::Unknown)),
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::I64,
            Value::Float(_) => Type::F64,
            Value::Decimal(_) => Type::Decimal,
            Value::Text(_) => Type::Text,
            Value::Char(_) => Type::Char,
            Value::Blob(_) => Type::Blob,
            Value::DateTime(_) => Type::DateTime,
            Value::Duration(_) => Type::Duration,
            Value::Uuid(_) => Type::Uuid,
            Value::Enum(name) => Type::Enum(crate::types::EnumType {
                name: name.clone(),
                variants: vec![name.clone()],
                stored_as_text: true,
            }),
            Value::Record(r) => Type::Record(RecordType {
                name: r.name.clone(),
                fields: r
                    .fields
                    .iter()
                    .map(|(n, v)| (n.clone(), v.natural_type()))
                    .collect(),
            }),
            Value::List(items) => Type::Sequence(Box::new(
                items.first().map(Value::natural_type).unwrap_or(Type::Unknown),
            )),
            Value::Group { key, elements } => Type::Group {
                key: Box::new(key.natural_type()),
                element: Box::new(
                    elements.first().map(Value::natural_type).unwrap_or(Type::Unknown),
                ),
            },
        }
    }

    /// Lower to a SQLite storage value, directed by the static type.
    pub fn to_sql_value(&self, ty: &Type) -> RelqResult<SqlValue> {
        Ok(match self {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Int(n) => match ty.non_null() {
                Type::F32 | Type::F64 | Type::Decimal => SqlValue::Real(*n as f64),
                _ => SqlValue::Integer(*n),
            },
            Value::Float(f) => SqlValue::Real(*f),
            Value::Decimal(d) => SqlValue::Real(
                d.to_f64()
                    .ok_or_else(|| RelqError::conversion(format!("decimal {} out of range", d)))?,
            ),
            Value::Text(s) => SqlValue::Text(s.clone()),
            Value::Char(c) => SqlValue::Text(c.to_string()),
            Value::Blob(b) => SqlValue::Blob(b.clone()),
            Value::DateTime(dt) => SqlValue::Text(dt.format(DATETIME_FORMAT).to_string()),
            Value::Duration(ticks) => SqlValue::Integer(*ticks),
            Value::Uuid(u) => SqlValue::Text(u.hyphenated().to_string()),
            Value::Enum(variant) => match ty.non_null() {
                Type::Enum(e) if !e.stored_as_text => {
                    let ordinal = e.ordinal(variant).ok_or_else(|| {
                        RelqError::conversion(format!("'{}' is not a variant of {}", variant, e.name))
                    })?;
                    SqlValue::Integer(ordinal as i64)
                }
                _ => SqlValue::Text(variant.clone()),
            },
            Value::Record(_) | Value::List(_) | Value::Group { .. } => {
                return Err(RelqError::conversion(format!(
                    "{} is not representable as a column",
                    ty
                )));
            }
        })
    }

    /// The zero value substituted for SQL NULL in a non-nullable cell.
    pub fn default_for(ty: &Type) -> Value {
        match ty {
            Type::Bool => Value::Bool(false),
            Type::I8 | Type::I16 | Type::I32 | Type::I64 => Value::Int(0),
            Type::U8 | Type::U16 | Type::U32 | Type::U64 => Value::Int(0),
            Type::F32 | Type::F64 => Value::Float(0.0),
            Type::Decimal => Value::Decimal(Decimal::ZERO),
            Type::Duration => Value::Duration(0),
            Type::Uuid => Value::Uuid(Uuid::nil()),
            Type::Enum(e) => e
                .variants
                .first()
                .map(|v| Value::Enum(v.clone()))
                .unwrap_or(Value::Null),
            Type::Sequence(_) => Value::List(Vec::new()),
            _ => Value::Null,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(n) => Some(*n != 0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Duration(t) => Some(*t),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Decimal(d) if d.fract().is_zero() => d.to_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            Value::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Int(n) => Some(Decimal::from(*n)),
            Value::Float(f) => Decimal::from_f64(*f),
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// Equality where NULL equals NULL and nothing else.
    pub fn null_safe_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            _ => self.compare(other) == Some(Ordering::Equal) || self == other,
        }
    }

    /// Ordering across comparable values; numeric kinds compare by value.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Decimal(_), _) | (_, Value::Decimal(_)) => {
                Some(self.as_decimal()?.cmp(&other.as_decimal()?))
            }
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Char(b)) => Some(a.as_str().cmp(b.to_string().as_str())),
            (Value::Char(a), Value::Text(b)) => Some(a.to_string().as_str().cmp(b.as_str())),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Duration(a), Value::Duration(b)) => Some(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            (Value::Enum(a), Value::Enum(b)) => Some(a.cmp(b)),
            (Value::Blob(a), Value::Blob(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Render as JSON for display.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(n) => J::Number((*n).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .unwrap_or(J::Null),
            Value::Decimal(d) => J::String(d.to_string()),
            Value::Text(s) => J::String(s.clone()),
            Value::Char(c) => J::String(c.to_string()),
            Value::Blob(b) => J::Array(b.iter().map(|x| J::Number((*x).into())).collect()),
            Value::DateTime(dt) => J::String(dt.format(DATETIME_FORMAT).to_string()),
            Value::Duration(t) => J::Number((*t).into()),
            Value::Uuid(u) => J::String(u.to_string()),
            Value::Enum(v) => J::String(v.clone()),
            Value::Record(r) => J::Object(
                r.fields
                    .iter()
                    .map(|(n, v)| (n.clone(), v.to_json()))
                    .collect(),
            ),
            Value::List(items) => J::Array(items.iter().map(Value::to_json).collect()),
            Value::Group { key, elements } => {
                let mut map = serde_json::Map::new();
                map.insert("key".into(), key.to_json());
                map.insert(
                    "elements".into(),
                    J::Array(elements.iter().map(Value::to_json).collect()),
                );
                J::Object(map)
            }
        }
    }
}

/// Parse a stored timestamp in any of the layouts SQLite produces.
pub fn parse_datetime(text: &str) -> RelqResult<NaiveDateTime> {
    const LAYOUTS: &[&str] = &[
        DATETIME_FORMAT,
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ];
    for layout in LAYOUTS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, layout) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| RelqError::conversion(format!("'{}' is not a timestamp", text)))
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<char> for Value {
    fn from(v: char) -> Self {
        Value::Char(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Value::Record(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
