//! Scalar expressions.
//!
//! One closed tree covers both what user code builds (parameters,
//! constants, operators, member access, method calls, record
//! construction, nested queries) and the leaves the binder introduces
//! (column references, host parameters, aggregates, subqueries, nested
//! projections).

use serde::{Deserialize, Serialize};

use super::{Aggregate, ColumnRef, Projection, Subquery};
use crate::ast::Query;
use crate::types::{RecordType, Type};
use crate::value::Value;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    /// Modulo (%)
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Coalesce,
    BitAnd,
    BitOr,
    Concat,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// Binding strength used when deciding on parentheses.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::Ne => 3,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 4,
            BinaryOp::BitAnd | BinaryOp::BitOr => 5,
            BinaryOp::Add | BinaryOp::Sub => 6,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 7,
            BinaryOp::Concat => 8,
            BinaryOp::Coalesce => 9,
        }
    }

    pub fn is_associative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Mul
                | BinaryOp::And
                | BinaryOp::Or
                | BinaryOp::BitAnd
                | BinaryOp::BitOr
                | BinaryOp::Concat
        )
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "IS",
            BinaryOp::Ne => "IS NOT",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Coalesce => "COALESCE",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::Concat => "||",
        };
        write!(f, "{}", s)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Negate,
}

/// Methods with a known SQLite translation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Contains,
    StartsWith,
    EndsWith,
    Equals,
    ToUpper,
    ToLower,
    Trim,
    TrimStart,
    TrimEnd,
    Substring,
    Replace,
    IndexOf,
    IsNullOrEmpty,
    AddYears,
    AddMonths,
    AddDays,
    AddHours,
    AddMinutes,
    AddSeconds,
    AddMilliseconds,
    Abs,
    Round,
    ToText,
    /// Anything else; never translatable.
    Other(String),
}

impl Method {
    pub fn name(&self) -> &str {
        match self {
            Method::Contains => "Contains",
            Method::StartsWith => "StartsWith",
            Method::EndsWith => "EndsWith",
            Method::Equals => "Equals",
            Method::ToUpper => "ToUpper",
            Method::ToLower => "ToLower",
            Method::Trim => "Trim",
            Method::TrimStart => "TrimStart",
            Method::TrimEnd => "TrimEnd",
            Method::Substring => "Substring",
            Method::Replace => "Replace",
            Method::IndexOf => "IndexOf",
            Method::IsNullOrEmpty => "IsNullOrEmpty",
            Method::AddYears => "AddYears",
            Method::AddMonths => "AddMonths",
            Method::AddDays => "AddDays",
            Method::AddHours => "AddHours",
            Method::AddMinutes => "AddMinutes",
            Method::AddSeconds => "AddSeconds",
            Method::AddMilliseconds => "AddMilliseconds",
            Method::Abs => "Abs",
            Method::Round => "Round",
            Method::ToText => "ToString",
            Method::Other(name) => name,
        }
    }

    pub fn is_translatable(&self) -> bool {
        !matches!(self, Method::Other(_))
    }

    /// Number of arguments besides the target, as (min, max).
    pub fn arity(&self) -> (usize, usize) {
        match self {
            Method::Contains | Method::StartsWith | Method::EndsWith | Method::Equals => (1, 1),
            Method::IndexOf => (1, 1),
            Method::Substring => (1, 2),
            Method::Replace => (2, 2),
            Method::Round => (0, 1),
            Method::AddYears
            | Method::AddMonths
            | Method::AddDays
            | Method::AddHours
            | Method::AddMinutes
            | Method::AddSeconds
            | Method::AddMilliseconds => (1, 1),
            _ => (0, 0),
        }
    }

    pub fn result_type(&self, target: &Type) -> Type {
        match self {
            Method::Contains
            | Method::StartsWith
            | Method::EndsWith
            | Method::Equals
            | Method::IsNullOrEmpty => Type::Bool,
            Method::ToUpper
            | Method::ToLower
            | Method::Trim
            | Method::TrimStart
            | Method::TrimEnd
            | Method::Substring
            | Method::Replace
            | Method::ToText => Type::Text,
            Method::IndexOf => Type::I32,
            Method::AddYears
            | Method::AddMonths
            | Method::AddDays
            | Method::AddHours
            | Method::AddMinutes
            | Method::AddSeconds
            | Method::AddMilliseconds => target.clone(),
            Method::Abs | Method::Round => target.clone(),
            Method::Other(_) => Type::Unknown,
        }
    }
}

const TEXT_MEMBERS: &[&str] = &["Length"];
const DATETIME_MEMBERS: &[&str] = &[
    "Year",
    "Month",
    "Day",
    "Hour",
    "Minute",
    "Second",
    "Millisecond",
    "DayOfWeek",
    "DayOfYear",
    "Date",
    "TimeOfDay",
];
const DURATION_MEMBERS: &[&str] = &[
    "Ticks",
    "Days",
    "Hours",
    "Minutes",
    "Seconds",
    "Milliseconds",
    "TotalDays",
    "TotalHours",
    "TotalMinutes",
    "TotalSeconds",
    "TotalMilliseconds",
];

/// Static type of `target.name`, or `None` when the member is unknown.
pub fn member_type(target: &Type, name: &str) -> Option<Type> {
    let nullable = target.is_nullable();
    let lift = |ty: Type| if nullable { ty.nullable() } else { ty };
    match target.non_null() {
        Type::Record(record) => record.field(name).cloned(),
        Type::Group { key, .. } if name == "Key" => Some((**key).clone()),
        _ if nullable && name == "HasValue" => Some(Type::Bool),
        _ if nullable && name == "Value" => Some(target.non_null().clone()),
        Type::Text if TEXT_MEMBERS.contains(&name) => Some(lift(Type::I32)),
        Type::DateTime if DATETIME_MEMBERS.contains(&name) => Some(lift(match name {
            "Date" => Type::DateTime,
            "TimeOfDay" => Type::Duration,
            _ => Type::I32,
        })),
        Type::Duration if DURATION_MEMBERS.contains(&name) => Some(lift(match name {
            "Ticks" => Type::I64,
            n if n.starts_with("Total") => Type::F64,
            _ => Type::I32,
        })),
        _ => None,
    }
}

/// A scalar expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarExpr {
    /// Reference to a lambda parameter.
    Param(String),
    /// A captured host variable.
    Variable { name: String, value: Value, ty: Type },
    Constant { value: Value, ty: Type },
    Binary {
        op: BinaryOp,
        left: Box<ScalarExpr>,
        right: Box<ScalarExpr>,
    },
    Unary { op: UnaryOp, operand: Box<ScalarExpr> },
    Member { target: Box<ScalarExpr>, name: String },
    Call {
        method: Method,
        target: Box<ScalarExpr>,
        args: Vec<ScalarExpr>,
    },
    Conditional {
        test: Box<ScalarExpr>,
        then: Box<ScalarExpr>,
        otherwise: Box<ScalarExpr>,
    },
    /// Record construction; the member list rebuilds result objects.
    New {
        ty: RecordType,
        members: Vec<(String, ScalarExpr)>,
    },
    Convert { operand: Box<ScalarExpr>, ty: Type },
    /// A nested combinator query (unbound).
    Query(Box<Query>),
    Column(ColumnRef),
    /// A literal bound positionally rather than inlined.
    HostParameter { value: Value, ty: Type },
    Aggregate(Aggregate),
    Subquery(Subquery),
    /// Dialect function passthrough.
    Function {
        name: String,
        args: Vec<ScalarExpr>,
        ty: Type,
    },
    /// A correlated sequence materialized per outer row.
    Projection(Box<Projection>),
    /// A group: its key plus the element projection.
    Group {
        key: Box<ScalarExpr>,
        elements: Box<ScalarExpr>,
    },
}

impl ScalarExpr {
    pub fn constant(value: Value) -> Self {
        let ty = value.natural_type();
        ScalarExpr::Constant { value, ty }
    }

    pub fn binary(op: BinaryOp, left: ScalarExpr, right: ScalarExpr) -> Self {
        ScalarExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn not(operand: ScalarExpr) -> Self {
        ScalarExpr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        }
    }

    /// Conjunction of all parts; `None` when empty.
    pub fn conjunction(parts: impl IntoIterator<Item = ScalarExpr>) -> Option<ScalarExpr> {
        parts
            .into_iter()
            .reduce(|acc, next| ScalarExpr::binary(BinaryOp::And, acc, next))
    }

    pub fn disjunction(parts: impl IntoIterator<Item = ScalarExpr>) -> Option<ScalarExpr> {
        parts
            .into_iter()
            .reduce(|acc, next| ScalarExpr::binary(BinaryOp::Or, acc, next))
    }

    /// Split a conjunction into its conjuncts.
    pub fn conjuncts(&self) -> Vec<&ScalarExpr> {
        match self {
            ScalarExpr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let mut parts = left.conjuncts();
                parts.extend(right.conjuncts());
                parts
            }
            other => vec![other],
        }
    }

    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            ScalarExpr::Column(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            ScalarExpr::Constant { .. } | ScalarExpr::HostParameter { .. }
        )
    }

    /// The static result type.
    pub fn ty(&self) -> Type {
        match self {
            ScalarExpr::Param(_) | ScalarExpr::Query(_) => Type::Unknown,
            ScalarExpr::Variable { ty, .. }
            | ScalarExpr::Constant { ty, .. }
            | ScalarExpr::HostParameter { ty, .. }
            | ScalarExpr::Convert { ty, .. }
            | ScalarExpr::Function { ty, .. } => ty.clone(),
            ScalarExpr::Binary { op, left, right } => binary_type(*op, &left.ty(), &right.ty()),
            ScalarExpr::Unary { op, operand } => match op {
                UnaryOp::Not => Type::Bool,
                UnaryOp::Negate => operand.ty(),
            },
            ScalarExpr::Member { target, name } => {
                member_type(&target.ty(), name).unwrap_or(Type::Unknown)
            }
            ScalarExpr::Call { method, target, .. } => method.result_type(&target.ty()),
            ScalarExpr::Conditional { then, .. } => then.ty(),
            ScalarExpr::New { ty, .. } => Type::Record(ty.clone()),
            ScalarExpr::Column(c) => c.ty.clone(),
            ScalarExpr::Aggregate(a) => a.ty.clone(),
            ScalarExpr::Subquery(s) => s.ty(),
            ScalarExpr::Projection(p) => p.ty(),
            ScalarExpr::Group { key, elements } => Type::Group {
                key: Box::new(key.ty()),
                element: Box::new(elements.ty().element().cloned().unwrap_or(Type::Unknown)),
            },
        }
    }
}

fn binary_type(op: BinaryOp, left: &Type, right: &Type) -> Type {
    if op.is_comparison() || op.is_logical() {
        return Type::Bool;
    }
    match op {
        BinaryOp::Concat => Type::Text,
        BinaryOp::Coalesce => {
            if right.is_nullable() {
                right.clone()
            } else {
                right.non_null().clone()
            }
        }
        BinaryOp::Sub
            if matches!(left.non_null(), Type::DateTime)
                && matches!(right.non_null(), Type::DateTime) =>
        {
            Type::Duration
        }
        BinaryOp::Add | BinaryOp::Sub if matches!(left.non_null(), Type::DateTime) => left.clone(),
        BinaryOp::Add if left.is_text() || right.is_text() => Type::Text,
        _ if left.is_numeric() && right.is_numeric() => Type::promote(left, right),
        _ => left.clone(),
    }
}

impl From<ColumnRef> for ScalarExpr {
    fn from(c: ColumnRef) -> Self {
        ScalarExpr::Column(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Alias;

    #[test]
    fn test_member_types() {
        assert_eq!(member_type(&Type::DateTime, "Year"), Some(Type::I32));
        assert_eq!(member_type(&Type::Duration, "TotalHours"), Some(Type::F64));
        assert_eq!(
            member_type(&Type::Text.nullable(), "Length"),
            Some(Type::I32.nullable())
        );
        assert_eq!(member_type(&Type::Text, "Reversed"), None);
    }

    #[test]
    fn test_binary_types() {
        let stamp = ScalarExpr::Column(ColumnRef::new(Alias(0), "At", Type::DateTime));
        let diff = ScalarExpr::binary(BinaryOp::Sub, stamp.clone(), stamp);
        assert_eq!(diff.ty(), Type::Duration);
        let cmp = ScalarExpr::binary(
            BinaryOp::Lt,
            ScalarExpr::constant(Value::Int(1)),
            ScalarExpr::constant(Value::Int(2)),
        );
        assert_eq!(cmp.ty(), Type::Bool);
    }

    #[test]
    fn test_conjuncts() {
        let a = ScalarExpr::constant(Value::Bool(true));
        let all = ScalarExpr::conjunction(vec![a.clone(), a.clone(), a]).unwrap();
        assert_eq!(all.conjuncts().len(), 3);
    }
}
