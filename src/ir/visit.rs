//! Generic tree walkers.
//!
//! [`Fold`] consumes a tree and rebuilds it from folded children; every
//! rewrite pass implements it and overrides only the nodes it cares about.
//! [`Visit`] is the borrowing counterpart for analyses.

use std::collections::{HashMap, HashSet};

use super::{
    Aggregate, Alias, ColumnDecl, ColumnRef, InSource, Join, OrderExpr, Projection, ScalarExpr,
    Select, Source, Subquery,
};

pub trait Fold {
    fn fold_expr(&mut self, expr: ScalarExpr) -> ScalarExpr {
        fold_expr(self, expr)
    }

    fn fold_column(&mut self, column: ColumnRef) -> ScalarExpr {
        ScalarExpr::Column(column)
    }

    fn fold_aggregate(&mut self, aggregate: Aggregate) -> ScalarExpr {
        ScalarExpr::Aggregate(fold_aggregate(self, aggregate))
    }

    fn fold_subquery(&mut self, subquery: Subquery) -> ScalarExpr {
        ScalarExpr::Subquery(fold_subquery(self, subquery))
    }

    fn fold_projection(&mut self, projection: Projection) -> Projection {
        fold_projection(self, projection)
    }

    fn fold_select(&mut self, select: Select) -> Select {
        fold_select(self, select)
    }

    fn fold_source(&mut self, source: Source) -> Source {
        fold_source(self, source)
    }

    fn fold_join(&mut self, join: Join) -> Join {
        fold_join(self, join)
    }
}

fn fold_box<F: Fold + ?Sized>(f: &mut F, expr: Box<ScalarExpr>) -> Box<ScalarExpr> {
    Box::new(f.fold_expr(*expr))
}

pub fn fold_expr<F: Fold + ?Sized>(f: &mut F, expr: ScalarExpr) -> ScalarExpr {
    match expr {
        ScalarExpr::Column(c) => f.fold_column(c),
        ScalarExpr::Aggregate(a) => f.fold_aggregate(a),
        ScalarExpr::Subquery(s) => f.fold_subquery(s),
        ScalarExpr::Projection(p) => ScalarExpr::Projection(Box::new(f.fold_projection(*p))),
        ScalarExpr::Binary { op, left, right } => ScalarExpr::Binary {
            op,
            left: fold_box(f, left),
            right: fold_box(f, right),
        },
        ScalarExpr::Unary { op, operand } => ScalarExpr::Unary {
            op,
            operand: fold_box(f, operand),
        },
        ScalarExpr::Member { target, name } => ScalarExpr::Member {
            target: fold_box(f, target),
            name,
        },
        ScalarExpr::Call {
            method,
            target,
            args,
        } => ScalarExpr::Call {
            method,
            target: fold_box(f, target),
            args: args.into_iter().map(|a| f.fold_expr(a)).collect(),
        },
        ScalarExpr::Conditional {
            test,
            then,
            otherwise,
        } => ScalarExpr::Conditional {
            test: fold_box(f, test),
            then: fold_box(f, then),
            otherwise: fold_box(f, otherwise),
        },
        ScalarExpr::New { ty, members } => ScalarExpr::New {
            ty,
            members: members
                .into_iter()
                .map(|(name, e)| (name, f.fold_expr(e)))
                .collect(),
        },
        ScalarExpr::Convert { operand, ty } => ScalarExpr::Convert {
            operand: fold_box(f, operand),
            ty,
        },
        ScalarExpr::Function { name, args, ty } => ScalarExpr::Function {
            name,
            args: args.into_iter().map(|a| f.fold_expr(a)).collect(),
            ty,
        },
        ScalarExpr::Group { key, elements } => ScalarExpr::Group {
            key: fold_box(f, key),
            elements: fold_box(f, elements),
        },
        leaf @ (ScalarExpr::Param(_)
        | ScalarExpr::Variable { .. }
        | ScalarExpr::Constant { .. }
        | ScalarExpr::HostParameter { .. }
        | ScalarExpr::Query(_)) => leaf,
    }
}

pub fn fold_aggregate<F: Fold + ?Sized>(f: &mut F, aggregate: Aggregate) -> Aggregate {
    Aggregate {
        argument: aggregate.argument.map(|a| fold_box(f, a)),
        ..aggregate
    }
}

pub fn fold_subquery<F: Fold + ?Sized>(f: &mut F, subquery: Subquery) -> Subquery {
    match subquery {
        Subquery::Scalar { select, ty } => Subquery::Scalar {
            select: Box::new(f.fold_select(*select)),
            ty,
        },
        Subquery::Exists { select } => Subquery::Exists {
            select: Box::new(f.fold_select(*select)),
        },
        Subquery::In { expr, source } => Subquery::In {
            expr: fold_box(f, expr),
            source: match source {
                InSource::Select(select) => InSource::Select(Box::new(f.fold_select(*select))),
                InSource::Values(values) => {
                    InSource::Values(values.into_iter().map(|v| f.fold_expr(v)).collect())
                }
            },
        },
    }
}

pub fn fold_projection<F: Fold + ?Sized>(f: &mut F, projection: Projection) -> Projection {
    let select = f.fold_select(projection.select);
    let projector = f.fold_expr(projection.projector);
    Projection {
        select,
        projector,
        aggregator: projection.aggregator,
    }
}

pub fn fold_select<F: Fold + ?Sized>(f: &mut F, select: Select) -> Select {
    let from = select.from.map(|s| f.fold_source(s));
    let where_clause = select.where_clause.map(|w| f.fold_expr(w));
    let columns = select
        .columns
        .into_iter()
        .map(|c| ColumnDecl::new(c.name, f.fold_expr(c.expr)))
        .collect();
    let group_by = select.group_by.into_iter().map(|g| f.fold_expr(g)).collect();
    let having = select.having.map(|h| f.fold_expr(h));
    let order_by = fold_order_by(f, select.order_by);
    let offset = select.offset.map(|o| f.fold_expr(o));
    let limit = select.limit.map(|l| f.fold_expr(l));
    Select {
        alias: select.alias,
        columns,
        from,
        where_clause,
        group_by,
        having,
        order_by,
        offset,
        limit,
        distinct: select.distinct,
    }
}

pub fn fold_order_by<F: Fold + ?Sized>(f: &mut F, order_by: Vec<OrderExpr>) -> Vec<OrderExpr> {
    order_by
        .into_iter()
        .map(|o| OrderExpr::new(f.fold_expr(o.expr), o.descending))
        .collect()
}

pub fn fold_source<F: Fold + ?Sized>(f: &mut F, source: Source) -> Source {
    match source {
        Source::Select(select) => Source::Select(Box::new(f.fold_select(*select))),
        Source::Join(join) => Source::Join(Box::new(f.fold_join(*join))),
        other => other,
    }
}

pub fn fold_join<F: Fold + ?Sized>(f: &mut F, join: Join) -> Join {
    let left = f.fold_source(join.left);
    let right = f.fold_source(join.right);
    let condition = join.condition.map(|c| f.fold_expr(c));
    Join {
        kind: join.kind,
        left,
        right,
        condition,
    }
}

pub trait Visit {
    fn visit_expr(&mut self, expr: &ScalarExpr) {
        visit_expr(self, expr)
    }

    fn visit_column(&mut self, _column: &ColumnRef) {}

    fn visit_aggregate(&mut self, aggregate: &Aggregate) {
        if let Some(arg) = &aggregate.argument {
            self.visit_expr(arg);
        }
    }

    fn visit_subquery(&mut self, subquery: &Subquery) {
        visit_subquery(self, subquery)
    }

    fn visit_projection(&mut self, projection: &Projection) {
        self.visit_select(&projection.select);
        self.visit_expr(&projection.projector);
    }

    fn visit_select(&mut self, select: &Select) {
        visit_select(self, select)
    }

    fn visit_source(&mut self, source: &Source) {
        visit_source(self, source)
    }

    fn visit_join(&mut self, join: &Join) {
        self.visit_source(&join.left);
        self.visit_source(&join.right);
        if let Some(c) = &join.condition {
            self.visit_expr(c);
        }
    }
}

pub fn visit_expr<V: Visit + ?Sized>(v: &mut V, expr: &ScalarExpr) {
    match expr {
        ScalarExpr::Column(c) => v.visit_column(c),
        ScalarExpr::Aggregate(a) => v.visit_aggregate(a),
        ScalarExpr::Subquery(s) => v.visit_subquery(s),
        ScalarExpr::Projection(p) => v.visit_projection(p),
        ScalarExpr::Binary { left, right, .. } => {
            v.visit_expr(left);
            v.visit_expr(right);
        }
        ScalarExpr::Unary { operand, .. } | ScalarExpr::Convert { operand, .. } => {
            v.visit_expr(operand)
        }
        ScalarExpr::Member { target, .. } => v.visit_expr(target),
        ScalarExpr::Call { target, args, .. } => {
            v.visit_expr(target);
            args.iter().for_each(|a| v.visit_expr(a));
        }
        ScalarExpr::Conditional {
            test,
            then,
            otherwise,
        } => {
            v.visit_expr(test);
            v.visit_expr(then);
            v.visit_expr(otherwise);
        }
        ScalarExpr::New { members, .. } => members.iter().for_each(|(_, e)| v.visit_expr(e)),
        ScalarExpr::Function { args, .. } => args.iter().for_each(|a| v.visit_expr(a)),
        ScalarExpr::Group { key, elements } => {
            v.visit_expr(key);
            v.visit_expr(elements);
        }
        ScalarExpr::Param(_)
        | ScalarExpr::Variable { .. }
        | ScalarExpr::Constant { .. }
        | ScalarExpr::HostParameter { .. }
        | ScalarExpr::Query(_) => {}
    }
}

pub fn visit_subquery<V: Visit + ?Sized>(v: &mut V, subquery: &Subquery) {
    match subquery {
        Subquery::Scalar { select, .. } | Subquery::Exists { select } => v.visit_select(select),
        Subquery::In { expr, source } => {
            v.visit_expr(expr);
            match source {
                InSource::Select(select) => v.visit_select(select),
                InSource::Values(values) => values.iter().for_each(|e| v.visit_expr(e)),
            }
        }
    }
}

pub fn visit_select<V: Visit + ?Sized>(v: &mut V, select: &Select) {
    if let Some(from) = &select.from {
        v.visit_source(from);
    }
    if let Some(w) = &select.where_clause {
        v.visit_expr(w);
    }
    select.columns.iter().for_each(|c| v.visit_expr(&c.expr));
    select.group_by.iter().for_each(|g| v.visit_expr(g));
    if let Some(h) = &select.having {
        v.visit_expr(h);
    }
    select.order_by.iter().for_each(|o| v.visit_expr(&o.expr));
    if let Some(o) = &select.offset {
        v.visit_expr(o);
    }
    if let Some(l) = &select.limit {
        v.visit_expr(l);
    }
}

pub fn visit_source<V: Visit + ?Sized>(v: &mut V, source: &Source) {
    match source {
        Source::Select(select) => v.visit_select(select),
        Source::Join(join) => v.visit_join(join),
        Source::Table(_) | Source::View(_) | Source::Raw(_) => {}
    }
}

/// Every alias declared anywhere in a tree.
#[derive(Debug, Default)]
pub struct DeclaredAliases {
    pub aliases: Vec<Alias>,
}

impl Visit for DeclaredAliases {
    fn visit_select(&mut self, select: &Select) {
        self.aliases.push(select.alias);
        visit_select(self, select);
    }

    fn visit_source(&mut self, source: &Source) {
        match source {
            Source::Table(t) | Source::View(t) => self.aliases.push(t.alias),
            Source::Raw(r) => self.aliases.push(r.alias),
            other => visit_source(self, other),
        }
    }
}

/// Aliases referenced by column references.
#[derive(Debug, Default)]
pub struct ReferencedAliases {
    pub aliases: HashSet<Alias>,
}

impl Visit for ReferencedAliases {
    fn visit_column(&mut self, column: &ColumnRef) {
        self.aliases.insert(column.alias);
    }
}

/// Whether any column in `expr` belongs to one of `aliases`.
pub fn references_any(expr: &ScalarExpr, aliases: &[Alias]) -> bool {
    let mut referenced = ReferencedAliases::default();
    referenced.visit_expr(expr);
    aliases.iter().any(|a| referenced.aliases.contains(a))
}

/// Whether a select computes aggregates at its own level.
pub fn has_aggregates(select: &Select) -> bool {
    struct Checker {
        found: bool,
    }
    impl Visit for Checker {
        fn visit_aggregate(&mut self, _aggregate: &Aggregate) {
            self.found = true;
        }
        fn visit_subquery(&mut self, _subquery: &Subquery) {}
        fn visit_projection(&mut self, _projection: &Projection) {}
    }
    let mut checker = Checker { found: false };
    select.columns.iter().for_each(|c| checker.visit_expr(&c.expr));
    if let Some(h) = &select.having {
        checker.visit_expr(h);
    }
    select.order_by.iter().for_each(|o| checker.visit_expr(&o.expr));
    checker.found
}

/// Replaces references to `(alias, column)` pairs with expressions.
#[derive(Debug, Default)]
pub struct ColumnReplacer {
    pub map: HashMap<(Alias, String), ScalarExpr>,
}

impl ColumnReplacer {
    /// Map every column of `select` to the expression it declares.
    pub fn for_select(select: &Select) -> Self {
        let mut replacer = Self::default();
        replacer.add_select(select);
        replacer
    }

    pub fn add_select(&mut self, select: &Select) {
        for decl in &select.columns {
            self.map
                .insert((select.alias, decl.name.clone()), decl.expr.clone());
        }
    }
}

impl Fold for ColumnReplacer {
    fn fold_column(&mut self, column: ColumnRef) -> ScalarExpr {
        match self.map.get(&(column.alias, column.name.clone())) {
            Some(expr) => expr.clone(),
            None => ScalarExpr::Column(column),
        }
    }
}

/// Rewrites column references from one alias to another.
#[derive(Debug)]
pub struct AliasRenamer {
    pub from: Alias,
    pub to: Alias,
}

impl Fold for AliasRenamer {
    fn fold_column(&mut self, column: ColumnRef) -> ScalarExpr {
        if column.alias == self.from {
            ScalarExpr::Column(ColumnRef {
                alias: self.to,
                ..column
            })
        } else {
            ScalarExpr::Column(column)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, TableSource};
    use crate::types::Type;

    fn table(alias: u32) -> Source {
        Source::Table(TableSource {
            alias: Alias(alias),
            entity: "Track".into(),
            name: "Track".into(),
        })
    }

    #[test]
    fn test_declared_aliases() {
        let inner = Select::new(Alias(1), vec![], table(0));
        let outer = Select::new(Alias(2), vec![], Source::Select(Box::new(inner)));
        let mut declared = DeclaredAliases::default();
        declared.visit_select(&outer);
        assert_eq!(declared.aliases, vec![Alias(2), Alias(1), Alias(0)]);
    }

    #[test]
    fn test_column_replacer() {
        let col = ColumnRef::new(Alias(1), "Id", Type::I64);
        let mut replacer = ColumnReplacer::default();
        replacer.map.insert(
            (Alias(1), "Id".into()),
            ScalarExpr::Column(ColumnRef::new(Alias(0), "TrackId", Type::I64)),
        );
        let expr = ScalarExpr::binary(
            BinaryOp::Eq,
            ScalarExpr::Column(col),
            ScalarExpr::constant(3.into()),
        );
        let folded = replacer.fold_expr(expr);
        assert!(references_any(&folded, &[Alias(0)]));
        assert!(!references_any(&folded, &[Alias(1)]));
    }
}
