//! Replaces per-group correlated aggregate subqueries with aggregates of
//! the grouped select itself.
//!
//! Grouping binds an element select correlated to the group key, so
//! `g.Count()` first becomes
//! `(SELECT COUNT(*) FROM T AS t3 WHERE t3.k IS t0.k)` next to a
//! `SELECT .. FROM T AS t0 GROUP BY t0.k`. When the inner select reads the
//! same table under the same filters, the subquery is just `COUNT(*)` of
//! the group.

use crate::ir::visit::{self, AliasRenamer, Fold, ReferencedAliases, Visit};
use crate::ir::{
    Aggregate, BinaryOp, ColumnDecl, ColumnRef, OrderExpr, Projection, ScalarExpr, Select, Source,
    Subquery, TableSource, available_name,
};

pub fn simplify(projection: Projection) -> Projection {
    AggregateSimplifier.fold_projection(projection)
}

fn table_of(source: Option<&Source>) -> Option<&TableSource> {
    match source? {
        Source::Table(t) | Source::View(t) => Some(t),
        _ => None,
    }
}

fn is_grouped_table(select: &Select) -> bool {
    !select.group_by.is_empty() && table_of(select.from.as_ref()).is_some()
}

/// Match `sub` against the grouped select `group`. `outer_key` maps the
/// outer side of a correlation equality to the GROUP BY expression it
/// stands for. Returns the aggregate expressed over `group`'s table.
fn match_group_aggregate(
    sub: &Select,
    group: &Select,
    outer_key: &dyn Fn(&ScalarExpr) -> Option<ScalarExpr>,
) -> Option<Aggregate> {
    let [decl] = sub.columns.as_slice() else {
        return None;
    };
    let ScalarExpr::Aggregate(aggregate) = &decl.expr else {
        return None;
    };
    if !sub.group_by.is_empty()
        || sub.having.is_some()
        || !sub.order_by.is_empty()
        || sub.limit.is_some()
        || sub.offset.is_some()
        || sub.distinct
    {
        return None;
    }
    let inner = table_of(sub.from.as_ref())?;
    let outer = table_of(group.from.as_ref())?;
    if inner.name != outer.name {
        return None;
    }
    let mut rename = AliasRenamer {
        from: inner.alias,
        to: outer.alias,
    };

    let group_filters: Vec<&ScalarExpr> = group
        .where_clause
        .as_ref()
        .map(|w| w.conjuncts())
        .unwrap_or_default();
    let mut filters_covered = vec![false; group_filters.len()];
    let mut keys_covered = vec![false; group.group_by.len()];

    let conjuncts = sub
        .where_clause
        .as_ref()
        .map(|w| w.conjuncts())
        .unwrap_or_default();
    for conjunct in conjuncts {
        if let ScalarExpr::Binary {
            op: BinaryOp::Eq,
            left,
            right,
        } = conjunct
        {
            let key = [(left, right), (right, left)].into_iter().find_map(|(inner_side, outer_side)| {
                let key = outer_key(&**outer_side)?;
                let position = group.group_by.iter().position(|g| *g == key)?;
                (rename.fold_expr((**inner_side).clone()) == key).then_some(position)
            });
            if let Some(position) = key {
                keys_covered[position] = true;
                continue;
            }
        }
        let renamed = rename.fold_expr(conjunct.clone());
        match group_filters.iter().position(|f| **f == renamed) {
            Some(position) => filters_covered[position] = true,
            None => return None,
        }
    }
    if !keys_covered.iter().all(|c| *c) || !filters_covered.iter().all(|c| *c) {
        return None;
    }

    if let Some(argument) = &aggregate.argument {
        let mut referenced = ReferencedAliases::default();
        referenced.visit_expr(argument);
        if referenced.aliases.iter().any(|a| *a != inner.alias) {
            return None;
        }
    }
    Some(Aggregate {
        argument: aggregate
            .argument
            .clone()
            .map(|a| Box::new(rename.fold_expr(*a))),
        ..aggregate.clone()
    })
}

/// Rewrites scalar subqueries in the expressions of a grouped select.
struct InlineAggregates<'g> {
    group: &'g Select,
}

impl Fold for InlineAggregates<'_> {
    fn fold_subquery(&mut self, subquery: Subquery) -> ScalarExpr {
        if let Subquery::Scalar { select, .. } = &subquery {
            let group = self.group;
            let outer_key = |e: &ScalarExpr| group.group_by.contains(e).then(|| e.clone());
            if let Some(aggregate) = match_group_aggregate(select, group, &outer_key) {
                return ScalarExpr::Aggregate(aggregate);
            }
        }
        ScalarExpr::Subquery(subquery)
    }
}

/// Rewrites scalar subqueries of a select reading from a grouped select
/// into new columns of that grouped select.
struct LiftAggregates<'g> {
    group: &'g mut Select,
}

impl Fold for LiftAggregates<'_> {
    fn fold_subquery(&mut self, subquery: Subquery) -> ScalarExpr {
        if let Subquery::Scalar { select, ty } = &subquery {
            let group = &*self.group;
            let outer_key = |e: &ScalarExpr| match e {
                ScalarExpr::Column(c) if c.alias == group.alias => group
                    .column(&c.name)
                    .map(|decl| decl.expr.clone())
                    .filter(|expr| group.group_by.contains(expr)),
                _ => None,
            };
            if let Some(aggregate) = match_group_aggregate(select, group, &outer_key) {
                let expr = ScalarExpr::Aggregate(aggregate);
                let name = match self.group.columns.iter().find(|c| c.expr == expr) {
                    Some(existing) => existing.name.clone(),
                    None => {
                        let base = format!("c{}", self.group.columns.len());
                        let name = available_name(&self.group.columns, &base);
                        self.group.columns.push(ColumnDecl::new(name.clone(), expr));
                        name
                    }
                };
                return ScalarExpr::Column(ColumnRef::new(self.group.alias, name, ty.clone()));
            }
        }
        ScalarExpr::Subquery(subquery)
    }
}

struct AggregateSimplifier;

impl Fold for AggregateSimplifier {
    fn fold_select(&mut self, select: Select) -> Select {
        let mut select = visit::fold_select(self, select);

        if is_grouped_table(&select) {
            let columns = std::mem::take(&mut select.columns);
            let having = select.having.take();
            let mut inline = InlineAggregates { group: &select };
            let columns: Vec<ColumnDecl> = columns
                .into_iter()
                .map(|c| ColumnDecl::new(c.name, inline.fold_expr(c.expr)))
                .collect();
            let having = having.map(|h| inline.fold_expr(h));
            select.columns = columns;
            select.having = having;
        }

        if let Some(Source::Select(group)) = select.from.as_mut() {
            if is_grouped_table(group) {
                let mut lift = LiftAggregates { group };
                select.columns = std::mem::take(&mut select.columns)
                    .into_iter()
                    .map(|c| ColumnDecl::new(c.name, lift.fold_expr(c.expr)))
                    .collect();
                select.where_clause = select.where_clause.take().map(|w| lift.fold_expr(w));
                select.order_by = std::mem::take(&mut select.order_by)
                    .into_iter()
                    .map(|o| OrderExpr::new(lift.fold_expr(o.expr), o.descending))
                    .collect();
            }
        }
        select
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AggregateKind, Alias};
    use crate::types::Type;

    fn col(alias: u32, name: &str) -> ScalarExpr {
        ScalarExpr::Column(ColumnRef::new(Alias(alias), name, Type::I64))
    }

    fn track(alias: u32) -> Source {
        Source::Table(TableSource {
            alias: Alias(alias),
            entity: "Track".into(),
            name: "Track".into(),
        })
    }

    fn count_star() -> ScalarExpr {
        ScalarExpr::Aggregate(Aggregate {
            kind: AggregateKind::Count,
            argument: None,
            distinct: false,
            ty: Type::I64,
        })
    }

    fn correlated_count(outer_key: ScalarExpr) -> ScalarExpr {
        let inner = Select::new(Alias(3), vec![ColumnDecl::new("c0", count_star())], track(3))
            .with_where(Some(ScalarExpr::binary(
                BinaryOp::Eq,
                col(3, "AlbumId"),
                outer_key,
            )));
        ScalarExpr::Subquery(Subquery::Scalar {
            select: Box::new(inner),
            ty: Type::I64,
        })
    }

    #[test]
    fn test_subquery_in_grouped_select() {
        let mut grouped = Select::new(
            Alias(1),
            vec![
                ColumnDecl::new("AlbumId", col(0, "AlbumId")),
                ColumnDecl::new("c0", correlated_count(col(0, "AlbumId"))),
            ],
            track(0),
        );
        grouped.group_by = vec![col(0, "AlbumId")];
        let projection = simplify(Projection::new(grouped, col(1, "c0")));
        assert_eq!(projection.select.columns[1].expr, count_star());
    }

    #[test]
    fn test_subquery_over_grouped_select_is_lifted() {
        let mut grouped = Select::new(
            Alias(1),
            vec![ColumnDecl::new("AlbumId", col(0, "AlbumId"))],
            track(0),
        );
        grouped.group_by = vec![col(0, "AlbumId")];
        let consumer = Select::new(
            Alias(2),
            vec![
                ColumnDecl::new("AlbumId", col(1, "AlbumId")),
                ColumnDecl::new("c0", correlated_count(col(1, "AlbumId"))),
            ],
            Source::Select(Box::new(grouped)),
        );
        let projection = simplify(Projection::new(consumer, col(2, "c0")));
        assert_eq!(projection.select.columns[1].expr, col(1, "c1"));
        match projection.select.from {
            Some(Source::Select(group)) => assert_eq!(group.columns[1].expr, count_star()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_different_filter_is_kept() {
        let mut grouped = Select::new(
            Alias(1),
            vec![ColumnDecl::new("c0", correlated_count(col(0, "AlbumId")))],
            track(0),
        )
        .with_where(Some(ScalarExpr::binary(
            BinaryOp::Gt,
            col(0, "Milliseconds"),
            ScalarExpr::constant(1000.into()),
        )));
        grouped.group_by = vec![col(0, "AlbumId")];
        let projection = simplify(Projection::new(grouped, col(1, "c0")));
        assert!(matches!(
            projection.select.columns[0].expr,
            ScalarExpr::Subquery(_)
        ));
    }
}
