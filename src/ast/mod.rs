//! Combinator query tree.
//!
//! A [`Query`] is what application code builds: a source (table, view,
//! raw SQL, in-memory values) wrapped in combinators whose bodies are
//! [`Lambda`]s over [`ScalarExpr`]. The whole tree is serde-serializable so
//! queries can also be loaded from JSON.

pub mod builders;

use serde::{Deserialize, Serialize};

use crate::ir::AggregateKind;
use crate::ir::ScalarExpr;
use crate::types::Type;
use crate::value::Value;

/// A scalar body with named row parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Box<ScalarExpr>,
}

impl Lambda {
    pub fn new(params: &[&str], body: ScalarExpr) -> Self {
        Self {
            params: params.iter().map(|p| p.to_string()).collect(),
            body: Box::new(body),
        }
    }

    fn map_body(self, f: &mut dyn FnMut(ScalarExpr) -> ScalarExpr) -> Self {
        Self {
            params: self.params,
            body: Box::new(f(*self.body)),
        }
    }
}

/// A combinator query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    /// All rows of a registered entity's table.
    Table(String),
    /// All rows of a registered entity's view.
    View(String),
    /// Literal SQL whose rows have the entity's shape.
    Raw { entity: String, sql: String },
    /// An in-memory sequence.
    Local { values: Vec<Value>, element: Type },
    /// A sequence-valued scalar (a group, a lambda parameter, a captured list).
    Of(Box<ScalarExpr>),

    Filter { source: Box<Query>, predicate: Lambda },
    Project { source: Box<Query>, selector: Lambda },
    SelectMany {
        source: Box<Query>,
        collection: Lambda,
        result: Option<Lambda>,
    },
    Join {
        outer: Box<Query>,
        inner: Box<Query>,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
    },
    GroupJoin {
        outer: Box<Query>,
        inner: Box<Query>,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
    },
    OrderBy {
        source: Box<Query>,
        key: Lambda,
        descending: bool,
    },
    ThenBy {
        source: Box<Query>,
        key: Lambda,
        descending: bool,
    },
    GroupBy {
        source: Box<Query>,
        key: Lambda,
        element: Option<Lambda>,
        result: Option<Lambda>,
    },
    Distinct { source: Box<Query> },
    Skip { source: Box<Query>, count: Box<ScalarExpr> },
    Take { source: Box<Query>, count: Box<ScalarExpr> },
    Cast { source: Box<Query>, ty: Type },
    DefaultIfEmpty { source: Box<Query> },

    /// `Count` treats its selector as a predicate; the others as the argument.
    Aggregate {
        source: Box<Query>,
        kind: AggregateKind,
        selector: Option<Lambda>,
    },
    ElementAt {
        source: Box<Query>,
        index: Box<ScalarExpr>,
        or_default: bool,
    },
    First {
        source: Box<Query>,
        predicate: Option<Lambda>,
        or_default: bool,
    },
    Single {
        source: Box<Query>,
        predicate: Option<Lambda>,
        or_default: bool,
    },
    Any {
        source: Box<Query>,
        predicate: Option<Lambda>,
    },
    All { source: Box<Query>, predicate: Lambda },
    Contains { source: Box<Query>, value: Box<ScalarExpr> },

    Reverse { source: Box<Query> },
    Last {
        source: Box<Query>,
        predicate: Option<Lambda>,
        or_default: bool,
    },
    Union { left: Box<Query>, right: Box<Query> },
    Concat { left: Box<Query>, right: Box<Query> },
    Window { source: Box<Query>, function: String },
}

impl Query {
    /// The combinator name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Query::Table(_) => "Table",
            Query::View(_) => "View",
            Query::Raw { .. } => "Raw",
            Query::Local { .. } => "Local",
            Query::Of(_) => "Of",
            Query::Filter { .. } => "Where",
            Query::Project { .. } => "Select",
            Query::SelectMany { .. } => "SelectMany",
            Query::Join { .. } => "Join",
            Query::GroupJoin { .. } => "GroupJoin",
            Query::OrderBy { descending: false, .. } => "OrderBy",
            Query::OrderBy { .. } => "OrderByDescending",
            Query::ThenBy { descending: false, .. } => "ThenBy",
            Query::ThenBy { .. } => "ThenByDescending",
            Query::GroupBy { .. } => "GroupBy",
            Query::Distinct { .. } => "Distinct",
            Query::Skip { .. } => "Skip",
            Query::Take { .. } => "Take",
            Query::Cast { .. } => "Cast",
            Query::DefaultIfEmpty { .. } => "DefaultIfEmpty",
            Query::Aggregate { kind, .. } => match kind {
                AggregateKind::Count => "Count",
                AggregateKind::Min => "Min",
                AggregateKind::Max => "Max",
                AggregateKind::Sum => "Sum",
                AggregateKind::Average => "Average",
            },
            Query::ElementAt { or_default: false, .. } => "ElementAt",
            Query::ElementAt { .. } => "ElementAtOrDefault",
            Query::First { or_default: false, .. } => "First",
            Query::First { .. } => "FirstOrDefault",
            Query::Single { or_default: false, .. } => "Single",
            Query::Single { .. } => "SingleOrDefault",
            Query::Any { .. } => "Any",
            Query::All { .. } => "All",
            Query::Contains { .. } => "Contains",
            Query::Reverse { .. } => "Reverse",
            Query::Last { .. } => "Last",
            Query::Union { .. } => "Union",
            Query::Concat { .. } => "Concat",
            Query::Window { .. } => "Window",
        }
    }

    /// Whether the query collapses to one value rather than a sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Query::Aggregate { .. }
                | Query::ElementAt { .. }
                | Query::First { .. }
                | Query::Single { .. }
                | Query::Any { .. }
                | Query::All { .. }
                | Query::Contains { .. }
                | Query::Last { .. }
        )
    }

    /// Rebuild the query with every embedded scalar expression mapped by `f`.
    /// Nested queries inside those expressions are left to `f`.
    pub fn map_exprs(self, f: &mut dyn FnMut(ScalarExpr) -> ScalarExpr) -> Query {
        fn sub(q: Box<Query>, f: &mut dyn FnMut(ScalarExpr) -> ScalarExpr) -> Box<Query> {
            Box::new(q.map_exprs(f))
        }
        match self {
            leaf @ (Query::Table(_) | Query::View(_) | Query::Raw { .. } | Query::Local { .. }) => {
                leaf
            }
            Query::Of(expr) => Query::Of(Box::new(f(*expr))),
            Query::Filter { source, predicate } => Query::Filter {
                source: sub(source, f),
                predicate: predicate.map_body(f),
            },
            Query::Project { source, selector } => Query::Project {
                source: sub(source, f),
                selector: selector.map_body(f),
            },
            Query::SelectMany {
                source,
                collection,
                result,
            } => Query::SelectMany {
                source: sub(source, f),
                collection: collection.map_body(f),
                result: result.map(|r| r.map_body(f)),
            },
            Query::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => Query::Join {
                outer: sub(outer, f),
                inner: sub(inner, f),
                outer_key: outer_key.map_body(f),
                inner_key: inner_key.map_body(f),
                result: result.map_body(f),
            },
            Query::GroupJoin {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => Query::GroupJoin {
                outer: sub(outer, f),
                inner: sub(inner, f),
                outer_key: outer_key.map_body(f),
                inner_key: inner_key.map_body(f),
                result: result.map_body(f),
            },
            Query::OrderBy {
                source,
                key,
                descending,
            } => Query::OrderBy {
                source: sub(source, f),
                key: key.map_body(f),
                descending,
            },
            Query::ThenBy {
                source,
                key,
                descending,
            } => Query::ThenBy {
                source: sub(source, f),
                key: key.map_body(f),
                descending,
            },
            Query::GroupBy {
                source,
                key,
                element,
                result,
            } => Query::GroupBy {
                source: sub(source, f),
                key: key.map_body(f),
                element: element.map(|e| e.map_body(f)),
                result: result.map(|r| r.map_body(f)),
            },
            Query::Distinct { source } => Query::Distinct {
                source: sub(source, f),
            },
            Query::Skip { source, count } => Query::Skip {
                source: sub(source, f),
                count: Box::new(f(*count)),
            },
            Query::Take { source, count } => Query::Take {
                source: sub(source, f),
                count: Box::new(f(*count)),
            },
            Query::Cast { source, ty } => Query::Cast {
                source: sub(source, f),
                ty,
            },
            Query::DefaultIfEmpty { source } => Query::DefaultIfEmpty {
                source: sub(source, f),
            },
            Query::Aggregate {
                source,
                kind,
                selector,
            } => Query::Aggregate {
                source: sub(source, f),
                kind,
                selector: selector.map(|s| s.map_body(f)),
            },
            Query::ElementAt {
                source,
                index,
                or_default,
            } => Query::ElementAt {
                source: sub(source, f),
                index: Box::new(f(*index)),
                or_default,
            },
            Query::First {
                source,
                predicate,
                or_default,
            } => Query::First {
                source: sub(source, f),
                predicate: predicate.map(|p| p.map_body(f)),
                or_default,
            },
            Query::Single {
                source,
                predicate,
                or_default,
            } => Query::Single {
                source: sub(source, f),
                predicate: predicate.map(|p| p.map_body(f)),
                or_default,
            },
            Query::Any { source, predicate } => Query::Any {
                source: sub(source, f),
                predicate: predicate.map(|p| p.map_body(f)),
            },
            Query::All { source, predicate } => Query::All {
                source: sub(source, f),
                predicate: predicate.map_body(f),
            },
            Query::Contains { source, value } => Query::Contains {
                source: sub(source, f),
                value: Box::new(f(*value)),
            },
            Query::Reverse { source } => Query::Reverse {
                source: sub(source, f),
            },
            Query::Last {
                source,
                predicate,
                or_default,
            } => Query::Last {
                source: sub(source, f),
                predicate: predicate.map(|p| p.map_body(f)),
                or_default,
            },
            Query::Union { left, right } => Query::Union {
                left: sub(left, f),
                right: sub(right, f),
            },
            Query::Concat { left, right } => Query::Concat {
                left: sub(left, f),
                right: sub(right, f),
            },
            Query::Window { source, function } => Query::Window {
                source: sub(source, f),
                function,
            },
        }
    }

    /// Parse a query from its JSON form.
    pub fn from_json(json: &str) -> crate::error::RelqResult<Query> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<Query> for ScalarExpr {
    fn from(query: Query) -> Self {
        ScalarExpr::Query(Box::new(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::*;

    #[test]
    fn test_combinator_names() {
        let q = Query::table("Track").order_by_descending(lambda("t", |t| t.field("Name")));
        assert_eq!(q.name(), "OrderByDescending");
        assert_eq!(Query::table("Track").count().name(), "Count");
        assert!(Query::table("Track").count().is_terminal());
    }

    #[test]
    fn test_json_roundtrip() {
        let q = Query::table("Track").filter(lambda("t", |t| t.field("AlbumId").equals(lit(3))));
        let json = serde_json::to_string(&q).unwrap();
        assert_eq!(Query::from_json(&json).unwrap(), q);
    }
}
