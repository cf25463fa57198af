//! Relational intermediate representation.
//!
//! All nodes are plain values; rewrite passes consume a tree and return a
//! new one. Aliases are allocated from a per-translation
//! [`AliasGenerator`] so the same input always yields the same tree.

pub mod expr;
pub mod visit;

use serde::{Deserialize, Serialize};

pub use expr::{BinaryOp, Method, ScalarExpr, UnaryOp, member_type};

use crate::types::Type;

/// A compilation-scoped source name, rendered `t{n}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Alias(pub u32);

impl std::fmt::Display for Alias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Monotonic alias counter, one per translation.
#[derive(Debug, Default)]
pub struct AliasGenerator {
    next: u32,
}

impl AliasGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start above every alias already used by `projection`.
    pub fn after(projection: &Projection) -> Self {
        let mut declared = visit::DeclaredAliases::default();
        visit::Visit::visit_projection(&mut declared, projection);
        Self {
            next: declared.aliases.iter().map(|a| a.0 + 1).max().unwrap_or(0),
        }
    }

    pub fn next_alias(&mut self) -> Alias {
        let alias = Alias(self.next);
        self.next += 1;
        alias
    }
}

/// A column of the source or select identified by `alias`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub alias: Alias,
    pub name: String,
    pub ty: Type,
}

impl ColumnRef {
    pub fn new(alias: Alias, name: impl Into<String>, ty: Type) -> Self {
        Self {
            alias,
            name: name.into(),
            ty,
        }
    }

    /// Same alias and name; types are not compared.
    pub fn same_column(&self, other: &ColumnRef) -> bool {
        self.alias == other.alias && self.name == other.name
    }
}

/// A named result column of a select.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDecl {
    pub name: String,
    pub expr: ScalarExpr,
}

impl ColumnDecl {
    pub fn new(name: impl Into<String>, expr: ScalarExpr) -> Self {
        Self {
            name: name.into(),
            expr,
        }
    }
}

/// A stored table or view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSource {
    pub alias: Alias,
    pub entity: String,
    pub name: String,
}

/// Literal SQL used as a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSource {
    pub alias: Alias,
    pub sql: String,
}

/// Anything that can appear in a FROM clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Table(TableSource),
    View(TableSource),
    Raw(RawSource),
    Select(Box<Select>),
    Join(Box<Join>),
}

impl Source {
    /// The alias this source declares; joins declare none of their own.
    pub fn alias(&self) -> Option<Alias> {
        match self {
            Source::Table(t) | Source::View(t) => Some(t.alias),
            Source::Raw(r) => Some(r.alias),
            Source::Select(s) => Some(s.alias),
            Source::Join(_) => None,
        }
    }

    /// Aliases declared at this level (through joins, not into selects).
    pub fn declared_aliases(&self) -> Vec<Alias> {
        match self {
            Source::Join(j) => {
                let mut aliases = j.left.declared_aliases();
                aliases.extend(j.right.declared_aliases());
                aliases
            }
            other => other.alias().into_iter().collect(),
        }
    }

    pub fn as_select(&self) -> Option<&Select> {
        match self {
            Source::Select(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Cross,
    Inner,
    Outer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub kind: JoinKind,
    pub left: Source,
    pub right: Source,
    pub condition: Option<ScalarExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderExpr {
    pub expr: ScalarExpr,
    pub descending: bool,
}

impl OrderExpr {
    pub fn new(expr: ScalarExpr, descending: bool) -> Self {
        Self { expr, descending }
    }
}

/// A SELECT statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Select {
    pub alias: Alias,
    pub columns: Vec<ColumnDecl>,
    /// Absent only for root predicate selects (`SELECT EXISTS(..)`).
    pub from: Option<Source>,
    pub where_clause: Option<ScalarExpr>,
    pub group_by: Vec<ScalarExpr>,
    pub having: Option<ScalarExpr>,
    pub order_by: Vec<OrderExpr>,
    pub offset: Option<ScalarExpr>,
    pub limit: Option<ScalarExpr>,
    pub distinct: bool,
}

impl Select {
    pub fn new(alias: Alias, columns: Vec<ColumnDecl>, from: Source) -> Self {
        Self {
            alias,
            columns,
            from: Some(from),
            where_clause: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            offset: None,
            limit: None,
            distinct: false,
        }
    }

    /// A select with no FROM clause (`SELECT EXISTS(..) AS c0`).
    pub fn scalar(alias: Alias, columns: Vec<ColumnDecl>) -> Self {
        Self {
            from: None,
            ..Self::new(alias, columns, Source::Raw(RawSource { alias, sql: String::new() }))
        }
    }

    pub fn with_where(mut self, predicate: Option<ScalarExpr>) -> Self {
        self.where_clause = predicate;
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDecl> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// A column name not yet used by this select.
    pub fn available_name(&self, base: &str) -> String {
        available_name(&self.columns, base)
    }
}

/// `base`, or `base1`, `base2`, ... until unused in `columns`.
pub fn available_name(columns: &[ColumnDecl], base: &str) -> String {
    let taken = |name: &str| columns.iter().any(|c| c.name == name);
    if !taken(base) {
        return base.to_string();
    }
    let mut n = 1;
    loop {
        let candidate = format!("{}{}", base, n);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    Count,
    Min,
    Max,
    Sum,
    Average,
}

impl AggregateKind {
    pub fn sql_name(self) -> &'static str {
        match self {
            AggregateKind::Count => "COUNT",
            AggregateKind::Min => "MIN",
            AggregateKind::Max => "MAX",
            AggregateKind::Sum => "SUM",
            AggregateKind::Average => "AVG",
        }
    }

    /// Result type given the argument type.
    pub fn result_type(self, argument: Option<&Type>) -> Type {
        match (self, argument) {
            (AggregateKind::Count, _) => Type::I64,
            (AggregateKind::Average, Some(t)) if matches!(t.non_null(), Type::Decimal) => t.clone(),
            (AggregateKind::Average, Some(t)) if t.is_nullable() => Type::F64.nullable(),
            (AggregateKind::Average, _) => Type::F64,
            (_, Some(t)) => t.clone(),
            (_, None) => Type::Unknown,
        }
    }
}

impl std::fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub kind: AggregateKind,
    pub argument: Option<Box<ScalarExpr>>,
    pub distinct: bool,
    pub ty: Type,
}

/// Where the right side of an `IN` comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InSource {
    Select(Box<Select>),
    Values(Vec<ScalarExpr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subquery {
    /// One row, one column.
    Scalar { select: Box<Select>, ty: Type },
    Exists { select: Box<Select> },
    In { expr: Box<ScalarExpr>, source: InSource },
}

impl Subquery {
    pub fn ty(&self) -> Type {
        match self {
            Subquery::Scalar { ty, .. } => ty.clone(),
            Subquery::Exists { .. } | Subquery::In { .. } => Type::Bool,
        }
    }

    pub fn select(&self) -> Option<&Select> {
        match self {
            Subquery::Scalar { select, .. } | Subquery::Exists { select } => Some(select),
            Subquery::In {
                source: InSource::Select(select),
                ..
            } => Some(select),
            Subquery::In { .. } => None,
        }
    }
}

/// How a projection's rows collapse into one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregator {
    /// Exactly one row is produced (aggregates, root predicates).
    Scalar,
    /// First row; none is `NoElement` unless defaulted.
    First { or_default: bool },
    /// Only row; more than one is `MultipleElements`.
    Single { or_default: bool },
}

/// A bound query: a select plus how to rebuild one value from one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub select: Select,
    pub projector: ScalarExpr,
    pub aggregator: Option<Aggregator>,
}

impl Projection {
    pub fn new(select: Select, projector: ScalarExpr) -> Self {
        Self {
            select,
            projector,
            aggregator: None,
        }
    }

    pub fn ty(&self) -> Type {
        match self.aggregator {
            Some(_) => self.projector.ty(),
            None => Type::Sequence(Box::new(self.projector.ty())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_generator_is_monotonic() {
        let mut aliases = AliasGenerator::new();
        assert_eq!(aliases.next_alias(), Alias(0));
        assert_eq!(aliases.next_alias(), Alias(1));
        assert_eq!(Alias(7).to_string(), "t7");
    }

    #[test]
    fn test_available_name() {
        let columns = vec![
            ColumnDecl::new("Id", ScalarExpr::constant(1.into())),
            ColumnDecl::new("Id1", ScalarExpr::constant(2.into())),
        ];
        assert_eq!(available_name(&columns, "Id"), "Id2");
        assert_eq!(available_name(&columns, "Name"), "Name");
    }

    #[test]
    fn test_aggregate_result_types() {
        assert_eq!(AggregateKind::Count.result_type(None), Type::I64);
        assert_eq!(AggregateKind::Average.result_type(Some(&Type::I32)), Type::F64);
        assert_eq!(AggregateKind::Sum.result_type(Some(&Type::Decimal)), Type::Decimal);
    }
}
