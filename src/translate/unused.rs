//! Drops columns no consumer references.
//!
//! Consumers are visited before producers: a projection's projector before
//! its select, a select's columns before its FROM clause, and the right
//! side of a join before the left. By the time a select's own columns are
//! visited every reference to them has been recorded.

use std::collections::{HashMap, HashSet};

use crate::ir::visit::{self, Fold};
use crate::ir::{
    Aggregate, AggregateKind, Alias, ColumnDecl, ColumnRef, InSource, Join, Projection,
    ScalarExpr, Select, Subquery,
};

pub fn remove(projection: Projection) -> Projection {
    UnusedColumnRemover::default().fold_projection(projection)
}

#[derive(Default)]
struct UnusedColumnRemover {
    used: HashMap<Alias, HashSet<String>>,
    /// Set by `COUNT(*)`: the select it counts keeps all of its columns.
    retain_all: bool,
}

impl UnusedColumnRemover {
    fn mark(&mut self, alias: Alias, name: &str) {
        self.used.entry(alias).or_default().insert(name.to_string());
    }

    fn is_used(&self, alias: Alias, name: &str) -> bool {
        self.used.get(&alias).is_some_and(|names| names.contains(name))
    }
}

impl Fold for UnusedColumnRemover {
    fn fold_column(&mut self, column: ColumnRef) -> ScalarExpr {
        self.mark(column.alias, &column.name);
        ScalarExpr::Column(column)
    }

    fn fold_aggregate(&mut self, aggregate: Aggregate) -> ScalarExpr {
        if aggregate.kind == AggregateKind::Count && aggregate.argument.is_none() {
            self.retain_all = true;
        }
        ScalarExpr::Aggregate(visit::fold_aggregate(self, aggregate))
    }

    fn fold_subquery(&mut self, subquery: Subquery) -> ScalarExpr {
        let single = match &subquery {
            Subquery::Scalar { select, .. }
            | Subquery::In {
                source: InSource::Select(select),
                ..
            } => select.columns.first().map(|c| (select.alias, c.name.clone())),
            _ => None,
        };
        if let Some((alias, name)) = single {
            self.mark(alias, &name);
        }
        let saved = std::mem::replace(&mut self.retain_all, false);
        let folded = visit::fold_subquery(self, subquery);
        self.retain_all = saved;
        ScalarExpr::Subquery(folded)
    }

    fn fold_select(&mut self, select: Select) -> Select {
        let keep_all = std::mem::replace(&mut self.retain_all, false) || select.distinct;
        let alias = select.alias;

        let mut columns = Vec::with_capacity(select.columns.len());
        for decl in select.columns {
            if keep_all || self.is_used(alias, &decl.name) {
                let expr = self.fold_expr(decl.expr);
                columns.push(ColumnDecl::new(decl.name, expr));
            }
        }
        let retain_from = std::mem::replace(&mut self.retain_all, false);

        let limit = select.limit.map(|e| self.fold_expr(e));
        let offset = select.offset.map(|e| self.fold_expr(e));
        let group_by = select.group_by.into_iter().map(|e| self.fold_expr(e)).collect();
        let having = select.having.map(|e| self.fold_expr(e));
        let order_by = visit::fold_order_by(self, select.order_by);
        let where_clause = select.where_clause.map(|e| self.fold_expr(e));
        self.retain_all = retain_from;
        let from = select.from.map(|s| self.fold_source(s));
        self.retain_all = false;

        self.used.remove(&alias);
        Select {
            alias,
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

    fn fold_join(&mut self, join: Join) -> Join {
        let retain = self.retain_all;
        let condition = join.condition.map(|c| self.fold_expr(c));
        self.retain_all = retain;
        let right = self.fold_source(join.right);
        self.retain_all = retain;
        let left = self.fold_source(join.left);
        Join {
            kind: join.kind,
            left,
            right,
            condition,
        }
    }

    fn fold_projection(&mut self, projection: Projection) -> Projection {
        let projector = self.fold_expr(projection.projector);
        let select = self.fold_select(projection.select);
        Projection {
            select,
            projector,
            aggregator: projection.aggregator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Source, TableSource};
    use crate::types::Type;

    fn col(alias: u32, name: &str) -> ScalarExpr {
        ScalarExpr::Column(ColumnRef::new(Alias(alias), name, Type::I64))
    }

    fn inner(distinct: bool) -> Select {
        let mut select = Select::new(
            Alias(1),
            vec![
                ColumnDecl::new("Id", col(0, "Id")),
                ColumnDecl::new("Name", col(0, "Name")),
            ],
            Source::Table(TableSource {
                alias: Alias(0),
                entity: "Artist".into(),
                name: "Artist".into(),
            }),
        );
        select.distinct = distinct;
        select
    }

    fn outer(from: Select) -> Projection {
        Projection::new(
            Select::new(
                Alias(2),
                vec![ColumnDecl::new("Id", col(1, "Id"))],
                Source::Select(Box::new(from)),
            ),
            col(2, "Id"),
        )
    }

    fn inner_columns(projection: &Projection) -> Vec<String> {
        match &projection.select.from {
            Some(Source::Select(s)) => s.columns.iter().map(|c| c.name.clone()).collect(),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unreferenced_column_is_dropped() {
        let projection = remove(outer(inner(false)));
        assert_eq!(inner_columns(&projection), vec!["Id"]);
    }

    #[test]
    fn test_distinct_keeps_columns() {
        let projection = remove(outer(inner(true)));
        assert_eq!(inner_columns(&projection), vec!["Id", "Name"]);
    }

    #[test]
    fn test_count_star_keeps_columns() {
        let count = Select::new(
            Alias(2),
            vec![ColumnDecl::new(
                "c0",
                ScalarExpr::Aggregate(Aggregate {
                    kind: AggregateKind::Count,
                    argument: None,
                    distinct: false,
                    ty: Type::I64,
                }),
            )],
            Source::Select(Box::new(inner(false))),
        );
        let projection = remove(Projection::new(count, col(2, "c0")));
        assert_eq!(inner_columns(&projection), vec!["Id", "Name"]);
    }
}
