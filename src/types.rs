//! Static types carried by every expression node.
//!
//! Types drive three decisions in the compiler: whether an expression may
//! become a single SQL column, how a host parameter is lowered to a SQLite
//! storage class, and how the materializer reads a cell back.

use serde::{Deserialize, Serialize};

/// A static result type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Decimal,
    Text,
    Char,
    Blob,
    DateTime,
    /// Stored as a tick count (100ns units).
    Duration,
    Uuid,
    Enum(EnumType),
    Nullable(Box<Type>),
    Record(RecordType),
    Sequence(Box<Type>),
    Group { key: Box<Type>, element: Box<Type> },
    /// Type of an unbound lambda parameter.
    Unknown,
}

/// An enumeration with a declared value set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumType {
    pub name: String,
    pub variants: Vec<String>,
    /// Stored by name when true, by ordinal otherwise.
    #[serde(default)]
    pub stored_as_text: bool,
}

impl EnumType {
    pub fn new(name: impl Into<String>, variants: &[&str]) -> Self {
        Self {
            name: name.into(),
            variants: variants.iter().map(|v| v.to_string()).collect(),
            stored_as_text: false,
        }
    }

    pub fn stored_as_text(mut self) -> Self {
        self.stored_as_text = true;
        self
    }

    pub fn ordinal(&self, variant: &str) -> Option<usize> {
        self.variants.iter().position(|v| v == variant)
    }
}

/// A named record shape (an entity or an anonymous projection).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordType {
    pub name: String,
    pub fields: Vec<(String, Type)>,
}

impl RecordType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.fields.push((name.into(), ty));
        self
    }

    pub fn field(&self, name: &str) -> Option<&Type> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

impl Type {
    /// Whether a value of this type is representable as one SQL column.
    pub fn is_column_type(&self) -> bool {
        match self {
            Type::Bool
            | Type::I8
            | Type::I16
            | Type::I32
            | Type::I64
            | Type::U8
            | Type::U16
            | Type::U32
            | Type::U64
            | Type::F32
            | Type::F64
            | Type::Decimal
            | Type::Text
            | Type::Char
            | Type::Blob
            | Type::DateTime
            | Type::Duration
            | Type::Uuid
            | Type::Enum(_) => true,
            Type::Nullable(inner) => inner.is_column_type(),
            Type::Record(_) | Type::Sequence(_) | Type::Group { .. } | Type::Unknown => false,
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, Type::Nullable(_))
    }

    /// The type with any `Nullable` wrapper removed.
    pub fn non_null(&self) -> &Type {
        match self {
            Type::Nullable(inner) => inner.non_null(),
            other => other,
        }
    }

    pub fn nullable(self) -> Type {
        match self {
            Type::Nullable(_) => self,
            other => Type::Nullable(Box::new(other)),
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self.non_null(),
            Type::I8
                | Type::I16
                | Type::I32
                | Type::I64
                | Type::U8
                | Type::U16
                | Type::U32
                | Type::U64
        )
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self.non_null(), Type::F32 | Type::F64 | Type::Decimal)
    }

    pub fn is_text(&self) -> bool {
        matches!(self.non_null(), Type::Text | Type::Char)
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self.non_null(), Type::Sequence(_) | Type::Group { .. })
    }

    /// Element type of a sequence-shaped type.
    pub fn element(&self) -> Option<&Type> {
        match self.non_null() {
            Type::Sequence(el) => Some(el),
            Type::Group { element, .. } => Some(element),
            _ => None,
        }
    }

    /// SQLite type name used by `CAST(.. AS ..)`.
    pub fn storage_name(&self) -> &'static str {
        match self.non_null() {
            Type::Bool
            | Type::I8
            | Type::I16
            | Type::I32
            | Type::I64
            | Type::U8
            | Type::U16
            | Type::U32
            | Type::U64
            | Type::Duration => "INTEGER",
            Type::F32 | Type::F64 | Type::Decimal => "REAL",
            Type::Blob => "BLOB",
            Type::Enum(e) if !e.stored_as_text => "INTEGER",
            _ => "TEXT",
        }
    }

    /// Result type of arithmetic between two numeric operands.
    pub fn promote(left: &Type, right: &Type) -> Type {
        let (l, r) = (left.non_null(), right.non_null());
        let base = if l == r {
            l.clone()
        } else if matches!(l, Type::Decimal) || matches!(r, Type::Decimal) {
            Type::Decimal
        } else if matches!(l, Type::F32 | Type::F64) || matches!(r, Type::F32 | Type::F64) {
            Type::F64
        } else if l.is_integer() && r.is_integer() {
            Type::I64
        } else {
            l.clone()
        };
        if left.is_nullable() || right.is_nullable() {
            base.nullable()
        } else {
            base
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::I8 => write!(f, "i8"),
            Type::I16 => write!(f, "i16"),
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::U8 => write!(f, "u8"),
            Type::U16 => write!(f, "u16"),
            Type::U32 => write!(f, "u32"),
            Type::U64 => write!(f, "u64"),
            Type::F32 => write!(f, "f32"),
            Type::F64 => write!(f, "f64"),
            Type::Decimal => write!(f, "decimal"),
            Type::Text => write!(f, "text"),
            Type::Char => write!(f, "char"),
            Type::Blob => write!(f, "blob"),
            Type::DateTime => write!(f, "datetime"),
            Type::Duration => write!(f, "duration"),
            Type::Uuid => write!(f, "uuid"),
            Type::Enum(e) => write!(f, "enum {}", e.name),
            Type::Nullable(inner) => write!(f, "{}?", inner),
            Type::Record(r) => write!(f, "{}", r.name),
            Type::Sequence(el) => write!(f, "[{}]", el),
            Type::Group { key, element } => write!(f, "group<{}, {}>", key, element),
            Type::Unknown => write!(f, "?"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_types() {
        assert!(Type::I32.is_column_type());
        assert!(Type::Nullable(Box::new(Type::Text)).is_column_type());
        assert!(Type::Enum(EnumType::new("Genre", &["Rock", "Jazz"])).is_column_type());
        assert!(!Type::Record(RecordType::new("Album")).is_column_type());
        assert!(!Type::Sequence(Box::new(Type::I32)).is_column_type());
    }

    #[test]
    fn test_promote() {
        assert_eq!(Type::promote(&Type::I32, &Type::F64), Type::F64);
        assert_eq!(Type::promote(&Type::I32, &Type::I64), Type::I64);
        assert_eq!(
            Type::promote(&Type::I32.nullable(), &Type::I32),
            Type::Nullable(Box::new(Type::I32))
        );
    }

    #[test]
    fn test_storage_name() {
        assert_eq!(Type::Duration.storage_name(), "INTEGER");
        assert_eq!(Type::Uuid.storage_name(), "TEXT");
        let text_enum = EnumType::new("Genre", &["Rock"]).stored_as_text();
        assert_eq!(Type::Enum(text_enum).storage_name(), "TEXT");
    }
}
