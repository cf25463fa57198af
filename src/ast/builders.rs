//! Ergonomic builders for queries and scalar expressions.
//!
//! ```ignore
//! use relq::prelude::*;
//!
//! let q = Query::table("Track")
//!     .filter(lambda("t", |t| t.field("Milliseconds").gt(200_000)))
//!     .order_by(lambda("t", |t| t.field("Name")))
//!     .project(lambda("t", |t| t.field("Name")));
//! ```

use chrono::NaiveDateTime;
use rust_decimal::Decimal;

use super::{Lambda, Query};
use crate::ir::{AggregateKind, BinaryOp, Method, ScalarExpr, UnaryOp};
use crate::types::{RecordType, Type};
use crate::value::Value;

/// Reference a lambda parameter by name.
pub fn param(name: &str) -> ScalarExpr {
    ScalarExpr::Param(name.to_string())
}

/// A literal value.
pub fn lit(value: impl Into<Value>) -> ScalarExpr {
    ScalarExpr::constant(value.into())
}

/// A typed NULL literal.
pub fn null(ty: Type) -> ScalarExpr {
    ScalarExpr::Constant {
        value: Value::Null,
        ty: ty.nullable(),
    }
}

/// A captured host variable; folded into a literal before binding.
pub fn var(name: &str, value: impl Into<Value>) -> ScalarExpr {
    let value = value.into();
    ScalarExpr::Variable {
        name: name.to_string(),
        ty: value.natural_type(),
        value,
    }
}

/// A captured host variable with an explicit type.
pub fn typed_var(name: &str, value: impl Into<Value>, ty: Type) -> ScalarExpr {
    ScalarExpr::Variable {
        name: name.to_string(),
        value: value.into(),
        ty,
    }
}

/// Construct a record from named members.
pub fn new_record(name: &str, members: Vec<(&str, ScalarExpr)>) -> ScalarExpr {
    let mut ty = RecordType::new(name);
    let members: Vec<(String, ScalarExpr)> = members
        .into_iter()
        .map(|(n, e)| (n.to_string(), e))
        .collect();
    for (n, e) in &members {
        ty = ty.with_field(n.clone(), e.ty());
    }
    ScalarExpr::New { ty, members }
}

/// `test ? then : otherwise`
pub fn cond(
    test: impl Into<ScalarExpr>,
    then: impl Into<ScalarExpr>,
    otherwise: impl Into<ScalarExpr>,
) -> ScalarExpr {
    ScalarExpr::Conditional {
        test: Box::new(test.into()),
        then: Box::new(then.into()),
        otherwise: Box::new(otherwise.into()),
    }
}

/// A one-parameter lambda.
pub fn lambda(name: &str, body: impl FnOnce(ScalarExpr) -> ScalarExpr) -> Lambda {
    Lambda::new(&[name], body(param(name)))
}

/// A two-parameter lambda.
pub fn lambda2(
    first: &str,
    second: &str,
    body: impl FnOnce(ScalarExpr, ScalarExpr) -> ScalarExpr,
) -> Lambda {
    Lambda::new(&[first, second], body(param(first), param(second)))
}

macro_rules! literal_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for ScalarExpr {
                fn from(v: $t) -> Self {
                    lit(v)
                }
            }
        )*
    };
}

literal_from!(bool, i32, i64, f64, &str, String, char, Decimal, NaiveDateTime, uuid::Uuid);

/// Extension trait adding fluent operators to [`ScalarExpr`].
pub trait ExprExt: Sized {
    fn into_expr(self) -> ScalarExpr;

    /// Null-safe equality; renders as `IS`.
    fn equals(self, other: impl Into<ScalarExpr>) -> ScalarExpr {
        binary(BinaryOp::Eq, self.into_expr(), other.into())
    }

    /// Null-safe inequality; renders as `IS NOT`.
    fn not_equals(self, other: impl Into<ScalarExpr>) -> ScalarExpr {
        binary(BinaryOp::Ne, self.into_expr(), other.into())
    }

    fn lt(self, other: impl Into<ScalarExpr>) -> ScalarExpr {
        binary(BinaryOp::Lt, self.into_expr(), other.into())
    }

    fn le(self, other: impl Into<ScalarExpr>) -> ScalarExpr {
        binary(BinaryOp::Le, self.into_expr(), other.into())
    }

    fn gt(self, other: impl Into<ScalarExpr>) -> ScalarExpr {
        binary(BinaryOp::Gt, self.into_expr(), other.into())
    }

    fn ge(self, other: impl Into<ScalarExpr>) -> ScalarExpr {
        binary(BinaryOp::Ge, self.into_expr(), other.into())
    }

    fn and(self, other: impl Into<ScalarExpr>) -> ScalarExpr {
        binary(BinaryOp::And, self.into_expr(), other.into())
    }

    fn or(self, other: impl Into<ScalarExpr>) -> ScalarExpr {
        binary(BinaryOp::Or, self.into_expr(), other.into())
    }

    fn negate(self) -> ScalarExpr {
        ScalarExpr::Unary {
            op: UnaryOp::Negate,
            operand: Box::new(self.into_expr()),
        }
    }

    fn logical_not(self) -> ScalarExpr {
        ScalarExpr::not(self.into_expr())
    }

    fn plus(self, other: impl Into<ScalarExpr>) -> ScalarExpr {
        binary(BinaryOp::Add, self.into_expr(), other.into())
    }

    fn minus(self, other: impl Into<ScalarExpr>) -> ScalarExpr {
        binary(BinaryOp::Sub, self.into_expr(), other.into())
    }

    fn times(self, other: impl Into<ScalarExpr>) -> ScalarExpr {
        binary(BinaryOp::Mul, self.into_expr(), other.into())
    }

    fn divided_by(self, other: impl Into<ScalarExpr>) -> ScalarExpr {
        binary(BinaryOp::Div, self.into_expr(), other.into())
    }

    fn modulo(self, other: impl Into<ScalarExpr>) -> ScalarExpr {
        binary(BinaryOp::Rem, self.into_expr(), other.into())
    }

    fn concat(self, other: impl Into<ScalarExpr>) -> ScalarExpr {
        binary(BinaryOp::Concat, self.into_expr(), other.into())
    }

    /// `self ?? fallback`, rendered as `COALESCE`.
    fn or_else(self, fallback: impl Into<ScalarExpr>) -> ScalarExpr {
        binary(BinaryOp::Coalesce, self.into_expr(), fallback.into())
    }

    /// Member access: a record field or a known property.
    fn field(self, name: &str) -> ScalarExpr {
        ScalarExpr::Member {
            target: Box::new(self.into_expr()),
            name: name.to_string(),
        }
    }

    fn call(self, method: Method, args: Vec<ScalarExpr>) -> ScalarExpr {
        ScalarExpr::Call {
            method,
            target: Box::new(self.into_expr()),
            args,
        }
    }

    fn contains(self, needle: impl Into<ScalarExpr>) -> ScalarExpr {
        self.call(Method::Contains, vec![needle.into()])
    }

    fn starts_with(self, prefix: impl Into<ScalarExpr>) -> ScalarExpr {
        self.call(Method::StartsWith, vec![prefix.into()])
    }

    fn ends_with(self, suffix: impl Into<ScalarExpr>) -> ScalarExpr {
        self.call(Method::EndsWith, vec![suffix.into()])
    }

    fn to_upper(self) -> ScalarExpr {
        self.call(Method::ToUpper, vec![])
    }

    fn to_lower(self) -> ScalarExpr {
        self.call(Method::ToLower, vec![])
    }

    fn trim(self) -> ScalarExpr {
        self.call(Method::Trim, vec![])
    }

    fn substring(self, start: impl Into<ScalarExpr>, length: Option<ScalarExpr>) -> ScalarExpr {
        let mut args = vec![start.into()];
        args.extend(length);
        self.call(Method::Substring, args)
    }

    fn replace(self, from: impl Into<ScalarExpr>, to: impl Into<ScalarExpr>) -> ScalarExpr {
        self.call(Method::Replace, vec![from.into(), to.into()])
    }

    fn index_of(self, needle: impl Into<ScalarExpr>) -> ScalarExpr {
        self.call(Method::IndexOf, vec![needle.into()])
    }

    fn length(self) -> ScalarExpr {
        self.field("Length")
    }

    fn add_days(self, days: impl Into<ScalarExpr>) -> ScalarExpr {
        self.call(Method::AddDays, vec![days.into()])
    }

    fn add_months(self, months: impl Into<ScalarExpr>) -> ScalarExpr {
        self.call(Method::AddMonths, vec![months.into()])
    }

    fn add_hours(self, hours: impl Into<ScalarExpr>) -> ScalarExpr {
        self.call(Method::AddHours, vec![hours.into()])
    }

    fn abs(self) -> ScalarExpr {
        self.call(Method::Abs, vec![])
    }

    fn convert(self, ty: Type) -> ScalarExpr {
        ScalarExpr::Convert {
            operand: Box::new(self.into_expr()),
            ty,
        }
    }

    fn has_value(self) -> ScalarExpr {
        self.field("HasValue")
    }
}

impl ExprExt for ScalarExpr {
    fn into_expr(self) -> ScalarExpr {
        self
    }
}

fn binary(op: BinaryOp, left: ScalarExpr, right: ScalarExpr) -> ScalarExpr {
    ScalarExpr::binary(op, left, right)
}

/// Fluent combinator methods.
impl Query {
    pub fn table(entity: &str) -> Query {
        Query::Table(entity.to_string())
    }

    pub fn view(entity: &str) -> Query {
        Query::View(entity.to_string())
    }

    pub fn raw(entity: &str, sql: &str) -> Query {
        Query::Raw {
            entity: entity.to_string(),
            sql: sql.to_string(),
        }
    }

    pub fn local(values: Vec<Value>, element: Type) -> Query {
        Query::Local { values, element }
    }

    /// A sequence-valued expression, typically a group or lambda parameter.
    pub fn of(expr: ScalarExpr) -> Query {
        Query::Of(Box::new(expr))
    }

    fn boxed(self) -> Box<Query> {
        Box::new(self)
    }

    pub fn filter(self, predicate: Lambda) -> Query {
        Query::Filter {
            source: self.boxed(),
            predicate,
        }
    }

    pub fn project(self, selector: Lambda) -> Query {
        Query::Project {
            source: self.boxed(),
            selector,
        }
    }

    pub fn select_many(self, collection: Lambda, result: Option<Lambda>) -> Query {
        Query::SelectMany {
            source: self.boxed(),
            collection,
            result,
        }
    }

    pub fn join(self, inner: Query, outer_key: Lambda, inner_key: Lambda, result: Lambda) -> Query {
        Query::Join {
            outer: self.boxed(),
            inner: inner.boxed(),
            outer_key,
            inner_key,
            result,
        }
    }

    pub fn group_join(
        self,
        inner: Query,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
    ) -> Query {
        Query::GroupJoin {
            outer: self.boxed(),
            inner: inner.boxed(),
            outer_key,
            inner_key,
            result,
        }
    }

    pub fn order_by(self, key: Lambda) -> Query {
        Query::OrderBy {
            source: self.boxed(),
            key,
            descending: false,
        }
    }

    pub fn order_by_descending(self, key: Lambda) -> Query {
        Query::OrderBy {
            source: self.boxed(),
            key,
            descending: true,
        }
    }

    pub fn then_by(self, key: Lambda) -> Query {
        Query::ThenBy {
            source: self.boxed(),
            key,
            descending: false,
        }
    }

    pub fn then_by_descending(self, key: Lambda) -> Query {
        Query::ThenBy {
            source: self.boxed(),
            key,
            descending: true,
        }
    }

    pub fn group_by(self, key: Lambda) -> Query {
        Query::GroupBy {
            source: self.boxed(),
            key,
            element: None,
            result: None,
        }
    }

    /// `GroupBy` with an element selector and/or a `(key, group)` result selector.
    pub fn group_by_with(self, key: Lambda, element: Option<Lambda>, result: Option<Lambda>) -> Query {
        Query::GroupBy {
            source: self.boxed(),
            key,
            element,
            result,
        }
    }

    pub fn distinct(self) -> Query {
        Query::Distinct {
            source: self.boxed(),
        }
    }

    pub fn skip(self, count: impl Into<ScalarExpr>) -> Query {
        Query::Skip {
            source: self.boxed(),
            count: Box::new(count.into()),
        }
    }

    pub fn take(self, count: impl Into<ScalarExpr>) -> Query {
        Query::Take {
            source: self.boxed(),
            count: Box::new(count.into()),
        }
    }

    pub fn cast(self, ty: Type) -> Query {
        Query::Cast {
            source: self.boxed(),
            ty,
        }
    }

    pub fn default_if_empty(self) -> Query {
        Query::DefaultIfEmpty {
            source: self.boxed(),
        }
    }

    fn aggregate(self, kind: AggregateKind, selector: Option<Lambda>) -> Query {
        Query::Aggregate {
            source: self.boxed(),
            kind,
            selector,
        }
    }

    pub fn count(self) -> Query {
        self.aggregate(AggregateKind::Count, None)
    }

    pub fn count_where(self, predicate: Lambda) -> Query {
        self.aggregate(AggregateKind::Count, Some(predicate))
    }

    pub fn sum(self, selector: Option<Lambda>) -> Query {
        self.aggregate(AggregateKind::Sum, selector)
    }

    pub fn min(self, selector: Option<Lambda>) -> Query {
        self.aggregate(AggregateKind::Min, selector)
    }

    pub fn max(self, selector: Option<Lambda>) -> Query {
        self.aggregate(AggregateKind::Max, selector)
    }

    pub fn average(self, selector: Option<Lambda>) -> Query {
        self.aggregate(AggregateKind::Average, selector)
    }

    pub fn element_at(self, index: impl Into<ScalarExpr>) -> Query {
        Query::ElementAt {
            source: self.boxed(),
            index: Box::new(index.into()),
            or_default: false,
        }
    }

    pub fn element_at_or_default(self, index: impl Into<ScalarExpr>) -> Query {
        Query::ElementAt {
            source: self.boxed(),
            index: Box::new(index.into()),
            or_default: true,
        }
    }

    pub fn first(self) -> Query {
        Query::First {
            source: self.boxed(),
            predicate: None,
            or_default: false,
        }
    }

    pub fn first_where(self, predicate: Lambda) -> Query {
        Query::First {
            source: self.boxed(),
            predicate: Some(predicate),
            or_default: false,
        }
    }

    pub fn first_or_default(self) -> Query {
        Query::First {
            source: self.boxed(),
            predicate: None,
            or_default: true,
        }
    }

    pub fn single(self) -> Query {
        Query::Single {
            source: self.boxed(),
            predicate: None,
            or_default: false,
        }
    }

    pub fn single_where(self, predicate: Lambda) -> Query {
        Query::Single {
            source: self.boxed(),
            predicate: Some(predicate),
            or_default: false,
        }
    }

    pub fn single_or_default(self) -> Query {
        Query::Single {
            source: self.boxed(),
            predicate: None,
            or_default: true,
        }
    }

    pub fn any(self) -> Query {
        Query::Any {
            source: self.boxed(),
            predicate: None,
        }
    }

    pub fn any_where(self, predicate: Lambda) -> Query {
        Query::Any {
            source: self.boxed(),
            predicate: Some(predicate),
        }
    }

    pub fn all(self, predicate: Lambda) -> Query {
        Query::All {
            source: self.boxed(),
            predicate,
        }
    }

    pub fn contains(self, value: impl Into<ScalarExpr>) -> Query {
        Query::Contains {
            source: self.boxed(),
            value: Box::new(value.into()),
        }
    }

    pub fn reverse(self) -> Query {
        Query::Reverse {
            source: self.boxed(),
        }
    }

    pub fn last(self) -> Query {
        Query::Last {
            source: self.boxed(),
            predicate: None,
            or_default: false,
        }
    }

    pub fn union(self, other: Query) -> Query {
        Query::Union {
            left: self.boxed(),
            right: other.boxed(),
        }
    }

    pub fn concat(self, other: Query) -> Query {
        Query::Concat {
            left: self.boxed(),
            right: other.boxed(),
        }
    }

    /// Use the query as a scalar expression inside a lambda body.
    pub fn into_expr(self) -> ScalarExpr {
        ScalarExpr::Query(Box::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lambda_binds_param() {
        let l = lambda("t", |t| t.field("Id").ge(10));
        assert_eq!(l.params, vec!["t".to_string()]);
        assert!(matches!(
            *l.body,
            ScalarExpr::Binary {
                op: BinaryOp::Ge,
                ..
            }
        ));
    }

    #[test]
    fn test_new_record_types() {
        let r = new_record("Pair", vec![("A", lit(1)), ("B", lit("x"))]);
        match r {
            ScalarExpr::New { ty, .. } => {
                assert_eq!(ty.field("A"), Some(&Type::I64));
                assert_eq!(ty.field("B"), Some(&Type::Text));
            }
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn test_var_carries_natural_type() {
        match var("limit", 5) {
            ScalarExpr::Variable { ty, value, .. } => {
                assert_eq!(ty, Type::I64);
                assert_eq!(value, Value::Int(5));
            }
            other => panic!("expected variable, got {:?}", other),
        }
    }
}
