//! Lowers a combinator [`Query`] into a [`Projection`].
//!
//! Every combinator binds its input sequence first, substitutes the input's
//! projector for the lambda parameters of its bodies, then wraps the input
//! select in a fresh one whose columns come from the column projector.

use std::collections::HashMap;

use crate::ast::{Lambda, Query};
use crate::error::{RelqError, RelqResult};
use crate::ir::visit::{ColumnReplacer, Fold, ReferencedAliases, Visit};
use crate::ir::{
    Aggregate, AggregateKind, Aggregator, Alias, AliasGenerator, BinaryOp, ColumnDecl, ColumnRef,
    InSource, Join, JoinKind, Method, OrderExpr, Projection, RawSource, ScalarExpr, Select, Source,
    Subquery, TableSource, member_type,
};
use crate::schema::{SchemaResolver, SourceKind};
use crate::types::{RecordType, Type};
use crate::value::Value;

use super::escape;
use super::projector::project_columns;

/// Name of the single column of aggregate and predicate selects.
pub const SCALAR_COLUMN: &str = "c0";

/// A bound input sequence.
enum Sequence {
    /// Values known before execution.
    Memory { values: Vec<Value>, element: Type },
    Rows(Projection),
}

pub struct Binder<'a> {
    schema: &'a dyn SchemaResolver,
    aliases: &'a mut AliasGenerator,
    map: HashMap<String, ScalarExpr>,
}

impl<'a> Binder<'a> {
    pub fn new(schema: &'a dyn SchemaResolver, aliases: &'a mut AliasGenerator) -> Self {
        Self {
            schema,
            aliases,
            map: HashMap::new(),
        }
    }

    /// Bind a root query. Terminal combinators yield a projection with an
    /// aggregator describing how the rows collapse.
    pub fn bind(&mut self, query: &Query) -> RelqResult<Projection> {
        if !query.is_terminal() {
            return self.bind_sequence(query);
        }
        match self.bind_terminal(query, true)? {
            ScalarExpr::Projection(p) => Ok(*p),
            expr => Ok(self.scalar_projection(expr)),
        }
    }

    fn scalar_projection(&mut self, expr: ScalarExpr) -> Projection {
        let alias = self.aliases.next_alias();
        let ty = expr.ty();
        Projection {
            select: Select::scalar(alias, vec![ColumnDecl::new(SCALAR_COLUMN, expr)]),
            projector: ScalarExpr::Column(ColumnRef::new(alias, SCALAR_COLUMN, ty)),
            aggregator: Some(Aggregator::Scalar),
        }
    }

    fn bind_sequence(&mut self, query: &Query) -> RelqResult<Projection> {
        match query {
            Query::Table(entity) => {
                let kind = self.schema.kind(entity)?;
                self.bind_entity(entity, |alias, name| {
                    let table = TableSource {
                        alias,
                        entity: entity.clone(),
                        name,
                    };
                    match kind {
                        SourceKind::Table => Source::Table(table),
                        SourceKind::View => Source::View(table),
                    }
                })
            }
            Query::View(entity) => self.bind_entity(entity, |alias, name| {
                Source::View(TableSource {
                    alias,
                    entity: entity.clone(),
                    name,
                })
            }),
            Query::Raw { entity, sql } => self.bind_entity(entity, |alias, _| {
                Source::Raw(RawSource {
                    alias,
                    sql: sql.clone(),
                })
            }),
            Query::Local { .. } | Query::Of(_) => match self.bind_source(query)? {
                Sequence::Rows(p) => Ok(p),
                Sequence::Memory { .. } => Err(RelqError::shape(
                    "an in-memory sequence can only be consumed by Any, All or Contains",
                )),
            },
            Query::Filter { source, predicate } => {
                let p = self.bind_sequence(source)?;
                self.filter(p, predicate)
            }
            Query::Project { source, selector } => {
                let p = self.bind_sequence(source)?;
                let body = self.bind_lambda(selector, vec![p.projector.clone()])?;
                Ok(self.wrap(p.select, body, |s| s))
            }
            Query::SelectMany {
                source,
                collection,
                result,
            } => self.bind_select_many(source, collection, result.as_ref()),
            Query::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => self.bind_join(outer, inner, outer_key, inner_key, result),
            Query::GroupJoin {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => self.bind_group_join(outer, inner, outer_key, inner_key, result),
            Query::OrderBy { .. } | Query::ThenBy { .. } => self.bind_order_by(query),
            Query::GroupBy {
                source,
                key,
                element,
                result,
            } => self.bind_group_by(source, key, element.as_ref(), result.as_ref()),
            Query::Distinct { source } => {
                let p = self.bind_sequence(source)?;
                let projector = p.projector.clone();
                Ok(self.wrap(p.select, projector, |mut s| {
                    s.distinct = true;
                    s
                }))
            }
            Query::Skip { source, count } => {
                let p = self.bind_sequence(source)?;
                let count = self.bind_expr(count)?;
                let projector = p.projector.clone();
                Ok(self.wrap(p.select, projector, |mut s| {
                    s.offset = Some(count);
                    s
                }))
            }
            Query::Take { source, count } => {
                let p = self.bind_sequence(source)?;
                let count = self.bind_expr(count)?;
                let projector = p.projector.clone();
                Ok(self.wrap(p.select, projector, |mut s| {
                    s.limit = Some(count);
                    s
                }))
            }
            Query::Cast { source, ty } => {
                let p = self.bind_sequence(source)?;
                let from = p.projector.ty();
                if &from == ty || !from.is_column_type() || !ty.is_column_type() {
                    return Ok(p);
                }
                Ok(Projection {
                    projector: ScalarExpr::Convert {
                        operand: Box::new(p.projector),
                        ty: ty.clone(),
                    },
                    ..p
                })
            }
            Query::DefaultIfEmpty { .. }
            | Query::Reverse { .. }
            | Query::Union { .. }
            | Query::Concat { .. }
            | Query::Window { .. } => Err(RelqError::UnsupportedOperation(query.name().into())),
            terminal => Err(RelqError::shape(format!(
                "'{}' produces a single value where a sequence is required",
                terminal.name()
            ))),
        }
    }

    /// `SELECT <columns> FROM <entity source>` with a record projector.
    fn bind_entity(
        &mut self,
        entity: &str,
        make_source: impl FnOnce(Alias, String) -> Source,
    ) -> RelqResult<Projection> {
        let name = self.schema.table_name(entity)?;
        let stored: Vec<_> = self
            .schema
            .columns(entity)?
            .into_iter()
            .filter(|c| !c.ignored)
            .collect();
        let table_alias = self.aliases.next_alias();
        let select_alias = self.aliases.next_alias();

        let mut record = RecordType::new(entity);
        let mut columns = Vec::with_capacity(stored.len());
        let mut members = Vec::with_capacity(stored.len());
        for column in stored {
            let ty = column.column_type();
            record = record.with_field(column.name.clone(), ty.clone());
            columns.push(ColumnDecl::new(
                column.name.clone(),
                ScalarExpr::Column(ColumnRef::new(table_alias, column.name.clone(), ty.clone())),
            ));
            members.push((
                column.name.clone(),
                ScalarExpr::Column(ColumnRef::new(select_alias, column.name, ty)),
            ));
        }
        let select = Select::new(select_alias, columns, make_source(table_alias, name));
        Ok(Projection::new(
            select,
            ScalarExpr::New {
                ty: record,
                members,
            },
        ))
    }

    /// Wrap `inner` in a new select projecting `projector`.
    fn wrap(
        &mut self,
        inner: Select,
        projector: ScalarExpr,
        finish: impl FnOnce(Select) -> Select,
    ) -> Projection {
        let alias = self.aliases.next_alias();
        let existing = [inner.alias];
        let pc = project_columns(projector, alias, &existing);
        let select = Select::new(alias, pc.columns, Source::Select(Box::new(inner)));
        Projection::new(finish(select), pc.projector)
    }

    fn filter(&mut self, p: Projection, predicate: &Lambda) -> RelqResult<Projection> {
        let condition = self.bind_lambda(predicate, vec![p.projector.clone()])?;
        let projector = p.projector.clone();
        Ok(self.wrap(p.select, projector, |s| s.with_where(Some(condition))))
    }

    fn bind_order_by(&mut self, query: &Query) -> RelqResult<Projection> {
        let mut keys = Vec::new();
        let mut current = query;
        let source = loop {
            match current {
                Query::ThenBy {
                    source,
                    key,
                    descending,
                } => {
                    keys.push((key, *descending));
                    current = source;
                }
                Query::OrderBy {
                    source,
                    key,
                    descending,
                } => {
                    keys.push((key, *descending));
                    break source;
                }
                other => {
                    return Err(RelqError::shape(format!(
                        "ThenBy must follow OrderBy, found '{}'",
                        other.name()
                    )));
                }
            }
        };
        keys.reverse();

        let p = self.bind_sequence(source)?;
        let mut order_by = Vec::new();
        for (key, descending) in keys {
            match self.bind_lambda(key, vec![p.projector.clone()])? {
                ScalarExpr::New { members, .. } => order_by.extend(
                    members
                        .into_iter()
                        .map(|(_, e)| OrderExpr::new(e, descending)),
                ),
                expr => order_by.push(OrderExpr::new(expr, descending)),
            }
        }
        let projector = p.projector.clone();
        Ok(self.wrap(p.select, projector, |mut s| {
            s.order_by = order_by;
            s
        }))
    }

    fn bind_join(
        &mut self,
        outer: &Query,
        inner: &Query,
        outer_key: &Lambda,
        inner_key: &Lambda,
        result: &Lambda,
    ) -> RelqResult<Projection> {
        let o = self.bind_sequence(outer)?;
        let i = self.bind_sequence(inner)?;
        let ok = self.bind_lambda(outer_key, vec![o.projector.clone()])?;
        let ik = self.bind_lambda(inner_key, vec![i.projector.clone()])?;
        let condition = equality(ok, ik)?;
        let body = self.bind_lambda(result, vec![o.projector, i.projector])?;

        let alias = self.aliases.next_alias();
        let existing = [o.select.alias, i.select.alias];
        let pc = project_columns(body, alias, &existing);
        let join = Join {
            kind: JoinKind::Inner,
            left: Source::Select(Box::new(o.select)),
            right: Source::Select(Box::new(i.select)),
            condition: Some(condition),
        };
        Ok(Projection::new(
            Select::new(alias, pc.columns, Source::Join(Box::new(join))),
            pc.projector,
        ))
    }

    /// Each outer row carries a correlated projection of its matches.
    fn bind_group_join(
        &mut self,
        outer: &Query,
        inner: &Query,
        outer_key: &Lambda,
        inner_key: &Lambda,
        result: &Lambda,
    ) -> RelqResult<Projection> {
        let o = self.bind_sequence(outer)?;
        let ok = self.bind_lambda(outer_key, vec![o.projector.clone()])?;
        let i = self.bind_sequence(inner)?;
        let ik = self.bind_lambda(inner_key, vec![i.projector.clone()])?;
        let correlation = equality(ik, ok)?;
        let projector = i.projector.clone();
        let elements = self.wrap(i.select, projector, |s| s.with_where(Some(correlation)));

        let body = self.bind_lambda(
            result,
            vec![o.projector.clone(), ScalarExpr::Projection(Box::new(elements))],
        )?;
        Ok(self.wrap(o.select, body, |s| s))
    }

    fn bind_select_many(
        &mut self,
        source: &Query,
        collection: &Lambda,
        result: Option<&Lambda>,
    ) -> RelqResult<Projection> {
        let p = self.bind_sequence(source)?;

        // `x => <seq>.DefaultIfEmpty()` makes the join an outer one
        let (collection, outer) = match collection.body.as_ref() {
            ScalarExpr::Query(q) => match q.as_ref() {
                Query::DefaultIfEmpty { source } => (
                    Lambda {
                        params: collection.params.clone(),
                        body: Box::new(ScalarExpr::Query(source.clone())),
                    },
                    true,
                ),
                _ => (collection.clone(), false),
            },
            _ => (collection.clone(), false),
        };

        let inner = match self.bind_lambda(&collection, vec![p.projector.clone()])? {
            ScalarExpr::Projection(inner) => *inner,
            ScalarExpr::Group { elements, .. } => match *elements {
                ScalarExpr::Projection(inner) => *inner,
                _ => return Err(RelqError::shape("SelectMany collection is not a sequence")),
            },
            other => {
                return Err(RelqError::shape(format!(
                    "SelectMany collection of type {} is not a sequence",
                    other.ty()
                )));
            }
        };

        let mut referenced = ReferencedAliases::default();
        referenced.visit_select(&inner.select);
        let correlated = referenced.aliases.contains(&p.select.alias);

        if !correlated {
            let kind = if outer { JoinKind::Outer } else { JoinKind::Cross };
            let right = Source::Select(Box::new(inner.select));
            return self.finish_select_many(p, right, kind, None, inner.projector, result);
        }

        // a correlated collection that only filters becomes a join on its predicate
        let select = inner.select;
        let filters_only = select.group_by.is_empty()
            && select.having.is_none()
            && select.order_by.is_empty()
            && select.limit.is_none()
            && select.offset.is_none()
            && !select.distinct
            && select.from.as_ref().is_some_and(|from| {
                let mut refs = ReferencedAliases::default();
                refs.visit_source(from);
                !refs.aliases.contains(&p.select.alias)
            });
        if !filters_only {
            return Err(RelqError::UnsupportedOperation("SelectMany".into()));
        }
        let projector = ColumnReplacer::for_select(&select).fold_expr(inner.projector);
        let Some(right) = select.from else {
            return Err(RelqError::UnsupportedOperation("SelectMany".into()));
        };
        let kind = if outer { JoinKind::Outer } else { JoinKind::Inner };
        self.finish_select_many(p, right, kind, select.where_clause, projector, result)
    }

    fn finish_select_many(
        &mut self,
        p: Projection,
        right: Source,
        kind: JoinKind,
        condition: Option<ScalarExpr>,
        inner_projector: ScalarExpr,
        result: Option<&Lambda>,
    ) -> RelqResult<Projection> {
        let body = match result {
            Some(result) => self.bind_lambda(result, vec![p.projector, inner_projector])?,
            None => inner_projector,
        };
        let mut existing = vec![p.select.alias];
        existing.extend(right.declared_aliases());
        let alias = self.aliases.next_alias();
        let pc = project_columns(body, alias, &existing);
        let join = Join {
            kind,
            left: Source::Select(Box::new(p.select)),
            right,
            condition,
        };
        Ok(Projection::new(
            Select::new(alias, pc.columns, Source::Join(Box::new(join))),
            pc.projector,
        ))
    }

    /// The source is bound twice: once for the grouped select and once as
    /// the basis of the per-group element select, correlated on the key.
    fn bind_group_by(
        &mut self,
        source: &Query,
        key: &Lambda,
        element: Option<&Lambda>,
        result: Option<&Lambda>,
    ) -> RelqResult<Projection> {
        let p = self.bind_sequence(source)?;
        let key_expr = self.bind_lambda(key, vec![p.projector.clone()])?;
        let existing = [p.select.alias];
        let group_exprs: Vec<ScalarExpr> =
            project_columns(key_expr.clone(), p.select.alias, &existing)
                .columns
                .into_iter()
                .map(|c| c.expr)
                .collect();

        let basis = self.bind_sequence(source)?;
        let basis_key = self.bind_lambda(key, vec![basis.projector.clone()])?;
        let basis_existing = [basis.select.alias];
        let basis_exprs: Vec<ScalarExpr> =
            project_columns(basis_key, basis.select.alias, &basis_existing)
                .columns
                .into_iter()
                .map(|c| c.expr)
                .collect();
        let correlation = ScalarExpr::conjunction(
            basis_exprs
                .into_iter()
                .zip(group_exprs.iter().cloned())
                .map(|(inner, outer)| ScalarExpr::binary(BinaryOp::Eq, inner, outer)),
        );
        let element_expr = match element {
            Some(element) => self.bind_lambda(element, vec![basis.projector.clone()])?,
            None => basis.projector.clone(),
        };
        let elements = self.wrap(basis.select, element_expr, |s| s.with_where(correlation));
        let elements = ScalarExpr::Projection(Box::new(elements));

        let body = match result {
            Some(result) => self.bind_lambda(result, vec![key_expr, elements])?,
            None => ScalarExpr::Group {
                key: Box::new(key_expr),
                elements: Box::new(elements),
            },
        };
        Ok(self.wrap(p.select, body, |mut s| {
            s.group_by = group_exprs;
            s
        }))
    }

    /// Bind a source that may be known in memory.
    fn bind_source(&mut self, query: &Query) -> RelqResult<Sequence> {
        match query {
            Query::Local { values, element } => Ok(Sequence::Memory {
                values: values.clone(),
                element: element.clone(),
            }),
            Query::Of(expr) => match self.bind_expr(expr)? {
                ScalarExpr::Projection(p) => Ok(Sequence::Rows(*p)),
                ScalarExpr::Group { elements, .. } => match *elements {
                    ScalarExpr::Projection(p) => Ok(Sequence::Rows(*p)),
                    other => Err(not_a_sequence(&other)),
                },
                ScalarExpr::Constant {
                    value: Value::List(values),
                    ty,
                } => {
                    let element = ty
                        .element()
                        .cloned()
                        .or_else(|| values.first().map(Value::natural_type))
                        .unwrap_or(Type::Unknown);
                    Ok(Sequence::Memory { values, element })
                }
                other => Err(not_a_sequence(&other)),
            },
            other => Ok(Sequence::Rows(self.bind_sequence(other)?)),
        }
    }

    /// Bind a combinator that collapses its input to one value. At the root
    /// the result is a projection carrying an aggregator; nested, it is a
    /// scalar expression.
    fn bind_terminal(&mut self, query: &Query, root: bool) -> RelqResult<ScalarExpr> {
        match query {
            Query::Aggregate {
                source,
                kind,
                selector,
            } => self.bind_aggregate(source, *kind, selector.as_ref(), root),
            Query::ElementAt {
                source,
                index,
                or_default,
            } => {
                let index = self.bind_expr(index)?;
                let p = self.bind_sequence(source)?;
                self.bind_element(p, Some(index), Aggregator::First { or_default: *or_default }, root)
            }
            Query::First {
                source,
                predicate,
                or_default,
            } => {
                let p = self.bind_filtered(source, predicate.as_ref())?;
                self.bind_element(p, None, Aggregator::First { or_default: *or_default }, root)
            }
            Query::Single {
                source,
                predicate,
                or_default,
            } => {
                let p = self.bind_filtered(source, predicate.as_ref())?;
                self.bind_element(p, None, Aggregator::Single { or_default: *or_default }, root)
            }
            Query::Any { source, predicate } => match self.bind_source(source)? {
                Sequence::Memory { values, element } => {
                    let parts = match predicate {
                        Some(predicate) => self.per_element(predicate, values, &element)?,
                        None => vec![bool_constant(!values.is_empty())],
                    };
                    Ok(ScalarExpr::disjunction(parts).unwrap_or_else(|| bool_constant(false)))
                }
                Sequence::Rows(p) => {
                    let p = match predicate {
                        Some(predicate) => self.filter(p, predicate)?,
                        None => p,
                    };
                    Ok(ScalarExpr::Subquery(Subquery::Exists {
                        select: Box::new(p.select),
                    }))
                }
            },
            Query::All { source, predicate } => match self.bind_source(source)? {
                Sequence::Memory { values, element } => {
                    let parts = self.per_element(predicate, values, &element)?;
                    Ok(ScalarExpr::conjunction(parts).unwrap_or_else(|| bool_constant(true)))
                }
                Sequence::Rows(p) => {
                    let negated = Lambda {
                        params: predicate.params.clone(),
                        body: Box::new(ScalarExpr::not((*predicate.body).clone())),
                    };
                    let p = self.filter(p, &negated)?;
                    Ok(ScalarExpr::not(ScalarExpr::Subquery(Subquery::Exists {
                        select: Box::new(p.select),
                    })))
                }
            },
            Query::Contains { source, value } => {
                let value = self.bind_expr(value)?;
                match self.bind_source(source)? {
                    Sequence::Memory { values, element } => Ok(contains_in_memory(value, values, element)),
                    Sequence::Rows(p) => {
                        let projector = p.projector.clone();
                        let inner = self.wrap(p.select, projector, |s| s);
                        if inner.select.columns.len() != 1 || !inner.projector.ty().is_column_type() {
                            return Err(RelqError::shape(
                                "Contains requires a sequence of single column values",
                            ));
                        }
                        Ok(ScalarExpr::Subquery(Subquery::In {
                            expr: Box::new(value),
                            source: InSource::Select(Box::new(inner.select)),
                        }))
                    }
                }
            }
            Query::Last { .. } => Err(RelqError::UnsupportedOperation(query.name().into())),
            other => Err(RelqError::shape(format!(
                "'{}' is a sequence where a single value is required",
                other.name()
            ))),
        }
    }

    fn bind_filtered(&mut self, source: &Query, predicate: Option<&Lambda>) -> RelqResult<Projection> {
        let p = self.bind_sequence(source)?;
        match predicate {
            Some(predicate) => self.filter(p, predicate),
            None => Ok(p),
        }
    }

    fn per_element(
        &mut self,
        predicate: &Lambda,
        values: Vec<Value>,
        element: &Type,
    ) -> RelqResult<Vec<ScalarExpr>> {
        values
            .into_iter()
            .map(|value| {
                let item = in_memory_item(value, element);
                self.bind_lambda(predicate, vec![item])
            })
            .collect()
    }

    fn bind_aggregate(
        &mut self,
        source: &Query,
        kind: AggregateKind,
        selector: Option<&Lambda>,
        root: bool,
    ) -> RelqResult<ScalarExpr> {
        let (p, argument, distinct) = match (kind, selector, source) {
            (AggregateKind::Count, Some(predicate), _) => {
                (self.bind_filtered(source, Some(predicate))?, None, false)
            }
            (_, _, Query::Distinct { source: inner }) => {
                let p = self.bind_sequence(inner)?;
                let argument = match selector {
                    Some(selector) => self.bind_lambda(selector, vec![p.projector.clone()])?,
                    None => p.projector.clone(),
                };
                if argument.ty().is_column_type() {
                    (p, Some(argument), true)
                } else {
                    let p = self.bind_sequence(source)?;
                    let argument = self.aggregate_argument(kind, selector, &p)?;
                    (p, argument, false)
                }
            }
            _ => {
                let p = self.bind_sequence(source)?;
                let argument = self.aggregate_argument(kind, selector, &p)?;
                (p, argument, false)
            }
        };
        let ty = kind.result_type(argument.as_ref().map(ScalarExpr::ty).as_ref());
        let aggregate = ScalarExpr::Aggregate(Aggregate {
            kind,
            argument: argument.map(Box::new),
            distinct,
            ty: ty.clone(),
        });
        let alias = self.aliases.next_alias();
        let select = Select::new(
            alias,
            vec![ColumnDecl::new(SCALAR_COLUMN, aggregate)],
            Source::Select(Box::new(p.select)),
        );
        if root {
            Ok(ScalarExpr::Projection(Box::new(Projection {
                select,
                projector: ScalarExpr::Column(ColumnRef::new(alias, SCALAR_COLUMN, ty)),
                aggregator: Some(Aggregator::Scalar),
            })))
        } else {
            Ok(ScalarExpr::Subquery(Subquery::Scalar {
                select: Box::new(select),
                ty,
            }))
        }
    }

    fn aggregate_argument(
        &mut self,
        kind: AggregateKind,
        selector: Option<&Lambda>,
        p: &Projection,
    ) -> RelqResult<Option<ScalarExpr>> {
        let argument = match selector {
            Some(selector) => self.bind_lambda(selector, vec![p.projector.clone()])?,
            None if kind == AggregateKind::Count => return Ok(None),
            None => p.projector.clone(),
        };
        if !argument.ty().is_column_type() {
            return Err(RelqError::shape(format!(
                "{} needs a single column argument, found {}",
                kind,
                argument.ty()
            )));
        }
        Ok(Some(argument))
    }

    fn bind_element(
        &mut self,
        p: Projection,
        offset: Option<ScalarExpr>,
        aggregator: Aggregator,
        root: bool,
    ) -> RelqResult<ScalarExpr> {
        let limit = match aggregator {
            Aggregator::Single { .. } if root => 2,
            _ => 1,
        };
        let projector = p.projector.clone();
        let inner = self.wrap(p.select, projector, |mut s| {
            s.limit = Some(ScalarExpr::constant(Value::Int(limit)));
            s.offset = offset;
            s
        });
        let scalar = !root
            && inner.select.columns.len() == 1
            && matches!(inner.projector, ScalarExpr::Column(_))
            && inner.projector.ty().is_column_type();
        if scalar {
            let ty = inner.projector.ty();
            return Ok(ScalarExpr::Subquery(Subquery::Scalar {
                select: Box::new(inner.select),
                ty,
            }));
        }
        Ok(ScalarExpr::Projection(Box::new(Projection {
            aggregator: Some(aggregator),
            ..inner
        })))
    }

    /// Bind `lambda` with its parameters standing for `args`.
    fn bind_lambda(&mut self, lambda: &Lambda, args: Vec<ScalarExpr>) -> RelqResult<ScalarExpr> {
        if lambda.params.len() != args.len() {
            return Err(RelqError::shape(format!(
                "lambda takes {} parameters, {} supplied",
                lambda.params.len(),
                args.len()
            )));
        }
        let saved: Vec<_> = lambda
            .params
            .iter()
            .zip(args)
            .map(|(name, arg)| (name.clone(), self.map.insert(name.clone(), arg)))
            .collect();
        let bound = self.bind_expr(&lambda.body);
        for (name, previous) in saved.into_iter().rev() {
            match previous {
                Some(previous) => self.map.insert(name, previous),
                None => self.map.remove(&name),
            };
        }
        bound
    }

    /// Bind an embedded scalar expression.
    pub fn bind_expr(&mut self, expr: &ScalarExpr) -> RelqResult<ScalarExpr> {
        match expr {
            ScalarExpr::Param(name) => self
                .map
                .get(name)
                .cloned()
                .ok_or_else(|| RelqError::shape(format!("parameter '{}' is not in scope", name))),
            ScalarExpr::Variable { value, ty, .. } => Ok(ScalarExpr::Constant {
                value: value.clone(),
                ty: ty.clone(),
            }),
            ScalarExpr::Binary { op, left, right } => {
                let left = self.bind_expr(left)?;
                let right = self.bind_expr(right)?;
                match op {
                    BinaryOp::Eq => equality(left, right),
                    BinaryOp::Ne => match (&left, &right) {
                        (ScalarExpr::New { .. }, ScalarExpr::New { .. }) => {
                            Ok(ScalarExpr::not(equality(left, right)?))
                        }
                        _ => Ok(ScalarExpr::binary(BinaryOp::Ne, left, right)),
                    },
                    op => Ok(ScalarExpr::binary(*op, left, right)),
                }
            }
            ScalarExpr::Unary { op, operand } => Ok(ScalarExpr::Unary {
                op: *op,
                operand: Box::new(self.bind_expr(operand)?),
            }),
            ScalarExpr::Member { target, name } => {
                let target = self.bind_expr(target)?;
                bind_member(target, name)
            }
            ScalarExpr::Call {
                method,
                target,
                args,
            } => {
                let target = self.bind_expr(target)?;
                let args = args
                    .iter()
                    .map(|a| self.bind_expr(a))
                    .collect::<RelqResult<Vec<_>>>()?;
                self.bind_call(method, target, args)
            }
            ScalarExpr::Conditional {
                test,
                then,
                otherwise,
            } => Ok(ScalarExpr::Conditional {
                test: Box::new(self.bind_expr(test)?),
                then: Box::new(self.bind_expr(then)?),
                otherwise: Box::new(self.bind_expr(otherwise)?),
            }),
            ScalarExpr::New { ty, members } => {
                let mut record = RecordType::new(ty.name.clone());
                let mut bound = Vec::with_capacity(members.len());
                for (name, member) in members {
                    let member = self.bind_expr(member)?;
                    record = record.with_field(name.clone(), member.ty());
                    bound.push((name.clone(), member));
                }
                Ok(ScalarExpr::New {
                    ty: record,
                    members: bound,
                })
            }
            ScalarExpr::Convert { operand, ty } => Ok(ScalarExpr::Convert {
                operand: Box::new(self.bind_expr(operand)?),
                ty: ty.clone(),
            }),
            ScalarExpr::Function { name, args, ty } => Ok(ScalarExpr::Function {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|a| self.bind_expr(a))
                    .collect::<RelqResult<Vec<_>>>()?,
                ty: ty.clone(),
            }),
            ScalarExpr::Query(query) => {
                if query.is_terminal() {
                    self.bind_terminal(query, false)
                } else {
                    Ok(ScalarExpr::Projection(Box::new(self.bind_sequence(query)?)))
                }
            }
            ScalarExpr::Constant { .. }
            | ScalarExpr::HostParameter { .. }
            | ScalarExpr::Column(_)
            | ScalarExpr::Aggregate(_)
            | ScalarExpr::Subquery(_)
            | ScalarExpr::Projection(_)
            | ScalarExpr::Group { .. } => Ok(expr.clone()),
        }
    }

    fn bind_call(
        &mut self,
        method: &Method,
        target: ScalarExpr,
        args: Vec<ScalarExpr>,
    ) -> RelqResult<ScalarExpr> {
        let target_ty = target.ty();
        if !method.is_translatable() {
            return Err(RelqError::unsupported_expression(format!(
                "{}.{}",
                target_ty,
                method.name()
            )));
        }
        let (min, max) = method.arity();
        if args.len() < min || args.len() > max {
            return Err(RelqError::unsupported_expression(format!(
                "{}.{} with {} arguments",
                target_ty,
                method.name(),
                args.len()
            )));
        }
        // `sequence.Contains(x)` is the Contains combinator
        if *method == Method::Contains
            && (target_ty.is_sequence() || matches!(target, ScalarExpr::Projection(_)))
        {
            let mut args = args;
            let query = Query::Contains {
                source: Box::new(Query::Of(Box::new(target))),
                value: Box::new(args.remove(0)),
            };
            return self.bind_terminal(&query, false);
        }
        if !method_applies(method, &target_ty) {
            return Err(RelqError::unsupported_expression(format!(
                "{}.{}",
                target_ty,
                method.name()
            )));
        }
        match method {
            Method::Equals => {
                let mut args = args;
                equality(target, args.remove(0))
            }
            _ => Ok(ScalarExpr::Call {
                method: method.clone(),
                target: Box::new(target),
                args,
            }),
        }
    }
}

fn not_a_sequence(expr: &ScalarExpr) -> RelqError {
    RelqError::shape(format!("expression of type {} is not a sequence", expr.ty()))
}

fn bool_constant(value: bool) -> ScalarExpr {
    ScalarExpr::constant(Value::Bool(value))
}

/// Null-safe equality, member-wise for records.
fn equality(left: ScalarExpr, right: ScalarExpr) -> RelqResult<ScalarExpr> {
    match (left, right) {
        (ScalarExpr::New { members: l, .. }, ScalarExpr::New { members: r, .. }) => {
            if l.len() != r.len() {
                return Err(RelqError::shape("compared records have different members"));
            }
            let parts = l
                .into_iter()
                .zip(r)
                .map(|((_, a), (_, b))| equality(a, b))
                .collect::<RelqResult<Vec<_>>>()?;
            Ok(ScalarExpr::conjunction(parts).unwrap_or_else(|| bool_constant(true)))
        }
        (left, right) => Ok(ScalarExpr::binary(BinaryOp::Eq, left, right)),
    }
}

/// An element of a local sequence, sent as a host parameter when it has a column type.
fn in_memory_item(value: Value, element: &Type) -> ScalarExpr {
    escape::escape(ScalarExpr::Constant {
        value,
        ty: element.clone(),
    })
}

fn contains_in_memory(value: ScalarExpr, values: Vec<Value>, element: Type) -> ScalarExpr {
    if values.is_empty() {
        return bool_constant(false);
    }
    let items: Vec<ScalarExpr> = values
        .into_iter()
        .map(|v| in_memory_item(v, &element))
        .collect();
    if element.is_column_type() && !element.is_nullable() {
        ScalarExpr::Subquery(Subquery::In {
            expr: Box::new(value),
            source: InSource::Values(items),
        })
    } else {
        ScalarExpr::disjunction(
            items
                .into_iter()
                .map(|item| ScalarExpr::binary(BinaryOp::Eq, value.clone(), item)),
        )
        .unwrap_or_else(|| bool_constant(false))
    }
}

fn bind_member(target: ScalarExpr, name: &str) -> RelqResult<ScalarExpr> {
    match target {
        ScalarExpr::New { ty, members } => members
            .into_iter()
            .find(|(member, _)| member == name)
            .map(|(_, e)| e)
            .ok_or_else(|| RelqError::unsupported_expression(format!("{}.{}", ty.name, name))),
        ScalarExpr::Constant {
            value: Value::Record(record),
            ty,
        } => match record.get(name) {
            Some(value) => {
                let ty = member_type(&ty, name).unwrap_or_else(|| value.natural_type());
                Ok(ScalarExpr::Constant {
                    value: value.clone(),
                    ty,
                })
            }
            None => Err(RelqError::unsupported_expression(format!(
                "{}.{}",
                record.name, name
            ))),
        },
        ScalarExpr::Group { key, .. } if name == "Key" => Ok(*key),
        ScalarExpr::Conditional {
            test,
            then,
            otherwise,
        } if !then.ty().is_column_type() => Ok(ScalarExpr::Conditional {
            test,
            then: Box::new(bind_member(*then, name)?),
            otherwise: Box::new(bind_member(*otherwise, name)?),
        }),
        target => {
            let ty = target.ty();
            if ty.is_nullable() && name == "HasValue" {
                return Ok(ScalarExpr::binary(
                    BinaryOp::Ne,
                    target,
                    ScalarExpr::Constant {
                        value: Value::Null,
                        ty,
                    },
                ));
            }
            if ty.is_nullable() && name == "Value" {
                return Ok(target);
            }
            match member_type(&ty, name) {
                Some(_) => Ok(ScalarExpr::Member {
                    target: Box::new(target),
                    name: name.to_string(),
                }),
                None => Err(RelqError::unsupported_expression(format!("{}.{}", ty, name))),
            }
        }
    }
}

fn method_applies(method: &Method, target: &Type) -> bool {
    let ty = target.non_null();
    if matches!(ty, Type::Unknown) {
        return true;
    }
    match method {
        Method::Contains
        | Method::StartsWith
        | Method::EndsWith
        | Method::ToUpper
        | Method::ToLower
        | Method::Trim
        | Method::TrimStart
        | Method::TrimEnd
        | Method::Substring
        | Method::Replace
        | Method::IndexOf
        | Method::IsNullOrEmpty => target.is_text(),
        Method::AddYears
        | Method::AddMonths
        | Method::AddDays
        | Method::AddHours
        | Method::AddMinutes
        | Method::AddSeconds
        | Method::AddMilliseconds => matches!(ty, Type::DateTime),
        Method::Abs | Method::Round => target.is_numeric(),
        Method::Equals | Method::ToText => target.is_column_type(),
        Method::Other(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::*;
    use crate::schema::{Catalog, ColumnSchema, TableSchema};

    fn catalog() -> Catalog {
        Catalog::new()
            .with(
                TableSchema::new("Track")
                    .column(ColumnSchema::new("TrackId", Type::I64))
                    .column(ColumnSchema::new("AlbumId", Type::I64))
                    .column(ColumnSchema::new("Name", Type::Text))
                    .column(ColumnSchema::new("Composer", Type::Text).nullable())
                    .column(ColumnSchema::new("Cached", Type::Text).ignored()),
            )
            .with(
                TableSchema::new("Album")
                    .column(ColumnSchema::new("AlbumId", Type::I64))
                    .column(ColumnSchema::new("Title", Type::Text)),
            )
    }

    fn bind(query: &Query) -> RelqResult<Projection> {
        let catalog = catalog();
        let mut aliases = AliasGenerator::new();
        Binder::new(&catalog, &mut aliases).bind(query)
    }

    #[test]
    fn test_table_skips_ignored_columns() {
        let p = bind(&Query::table("Track")).unwrap();
        let names: Vec<_> = p.select.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["TrackId", "AlbumId", "Name", "Composer"]);
        assert_eq!(p.select.alias, Alias(1));
        assert!(matches!(p.projector, ScalarExpr::New { .. }));
    }

    #[test]
    fn test_filter_wraps_source() {
        let q = Query::table("Track").filter(lambda("t", |t| t.field("AlbumId").equals(3)));
        let p = bind(&q).unwrap();
        assert!(p.select.where_clause.is_some());
        assert!(matches!(p.select.from, Some(Source::Select(_))));
    }

    #[test]
    fn test_root_count_is_scalar() {
        let p = bind(&Query::table("Track").count()).unwrap();
        assert_eq!(p.aggregator, Some(Aggregator::Scalar));
        assert_eq!(p.select.columns.len(), 1);
        assert!(matches!(p.select.columns[0].expr, ScalarExpr::Aggregate(_)));
    }

    #[test]
    fn test_unknown_member_is_unsupported() {
        let q = Query::table("Track").project(lambda("t", |t| t.field("Name").field("Reversed")));
        match bind(&q) {
            Err(RelqError::UnsupportedExpression(name)) => assert_eq!(name, "text.Reversed"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_untranslatable_combinator() {
        let q = Query::table("Track").reverse();
        assert!(matches!(bind(&q), Err(RelqError::UnsupportedOperation(n)) if n == "Reverse"));
    }

    #[test]
    fn test_then_by_without_order_by() {
        let q = Query::table("Track").then_by(lambda("t", |t| t.field("Name")));
        assert!(matches!(bind(&q), Err(RelqError::Shape(_))));
    }

    #[test]
    fn test_group_by_correlates_elements() {
        let q = Query::table("Track").group_by(lambda("t", |t| t.field("AlbumId")));
        let p = bind(&q).unwrap();
        assert_eq!(p.select.group_by.len(), 1);
        match p.projector {
            ScalarExpr::Group { elements, .. } => match *elements {
                ScalarExpr::Projection(inner) => {
                    assert!(inner.select.where_clause.is_some());
                    assert!(inner.aggregator.is_none());
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_in_memory_any_is_disjunction() {
        let q = Query::table("Track").filter(lambda("t", |t| {
            Query::local(vec![Value::Int(1), Value::Int(2)], Type::I64)
                .any_where(lambda("id", |id| id.equals(t.field("AlbumId"))))
                .into_expr()
        }));
        let p = bind(&q).unwrap();
        assert!(matches!(
            p.select.where_clause,
            Some(ScalarExpr::Binary {
                op: BinaryOp::Or,
                ..
            })
        ));
    }

    #[test]
    fn test_in_memory_values_are_host_parameters() {
        let q = Query::table("Track").filter(lambda("t", |t| {
            Query::local(vec![Value::Int(1), Value::Int(4)], Type::I64)
                .contains(t.field("AlbumId"))
                .into_expr()
        }));
        let p = bind(&q).unwrap();
        let Some(ScalarExpr::Subquery(Subquery::In {
            source: InSource::Values(items),
            ..
        })) = p.select.where_clause
        else {
            panic!("unexpected {:?}", p.select.where_clause);
        };
        assert_eq!(
            items,
            vec![
                ScalarExpr::HostParameter {
                    value: Value::Int(1),
                    ty: Type::I64
                },
                ScalarExpr::HostParameter {
                    value: Value::Int(4),
                    ty: Type::I64
                },
            ]
        );

        let q = Query::table("Track").filter(lambda("t", |t| {
            Query::local(vec![Value::Int(2)], Type::I64)
                .all(lambda("id", |id| id.equals(t.field("AlbumId"))))
                .into_expr()
        }));
        let where_clause = format!("{:?}", bind(&q).unwrap().select.where_clause);
        assert!(where_clause.contains("HostParameter"), "{}", where_clause);
        assert!(!where_clause.contains("Constant { value: Int(2)"), "{}", where_clause);
    }

    #[test]
    fn test_empty_in_memory_contains_is_false() {
        let q = Query::table("Track").filter(lambda("t", |t| {
            Query::local(vec![], Type::I64)
                .contains(t.field("AlbumId"))
                .into_expr()
        }));
        let p = bind(&q).unwrap();
        assert_eq!(p.select.where_clause, Some(bool_constant(false)));
    }

    #[test]
    fn test_cross_join_for_uncorrelated_collection() {
        let q = Query::table("Album").select_many(
            lambda("a", |_| Query::table("Track").into_expr()),
            None,
        );
        let p = bind(&q).unwrap();
        match p.select.from {
            Some(Source::Join(join)) => assert_eq!(join.kind, JoinKind::Cross),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unbound_parameter() {
        let q = Query::table("Track").filter(lambda("t", |_| param("x").field("Id").equals(1)));
        assert!(matches!(bind(&q), Err(RelqError::Shape(_))));
    }
}
