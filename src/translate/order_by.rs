//! Moves ORDER BY clauses to the outermost select that can honour them.
//!
//! SQLite ignores the ordering of a sub-select, so orderings of inner
//! selects are gathered on the way up and re-attached to the outermost
//! select, or to the first select with a LIMIT/OFFSET that needs them.

use std::collections::HashSet;

use crate::ir::visit::{self, DeclaredAliases, Fold, Visit, has_aggregates};
use crate::ir::{
    Alias, ColumnDecl, ColumnRef, InSource, Join, OrderExpr, Projection, ScalarExpr, Select,
    Subquery, available_name,
};

pub fn rewrite(projection: Projection) -> Projection {
    let mut rewriter = OrderByRewriter {
        gathered: None,
        outermost: true,
        subquery_root: false,
    };
    rewriter.fold_projection(projection)
}

struct OrderByRewriter {
    gathered: Option<Vec<OrderExpr>>,
    outermost: bool,
    /// The next select is the statement of a subquery; its column list is
    /// its result and must not grow.
    subquery_root: bool,
}

impl OrderByRewriter {
    /// Put `orderings` in front of the gathered ones, dropping repeated columns.
    fn prepend(&mut self, orderings: Vec<OrderExpr>) {
        let mut combined = orderings;
        combined.extend(self.gathered.take().unwrap_or_default());
        let mut seen = HashSet::new();
        combined.retain(|o| match &o.expr {
            ScalarExpr::Column(c) => seen.insert((c.alias, c.name.clone())),
            _ => true,
        });
        self.gathered = Some(combined);
    }
}

/// Re-express `orderings` through the columns of the select aliased `alias`,
/// adding columns for keys not yet projected.
fn rebind(
    orderings: Vec<OrderExpr>,
    alias: Alias,
    declared: &HashSet<Alias>,
    columns: &mut Vec<ColumnDecl>,
) -> Vec<OrderExpr> {
    let mut rebound = Vec::with_capacity(orderings.len());
    for ordering in orderings {
        let column = ordering.expr.as_column();
        if let Some(c) = column {
            if !declared.contains(&c.alias) {
                continue;
            }
        }
        let existing = columns
            .iter()
            .find(|decl| {
                decl.expr == ordering.expr
                    || matches!((column, decl.expr.as_column()), (Some(a), Some(b)) if a.same_column(b))
            })
            .map(|decl| decl.name.clone());
        let ty = ordering.expr.ty();
        let expr = match existing {
            Some(name) => ScalarExpr::Column(ColumnRef::new(alias, name, ty)),
            None => {
                let base = match column {
                    Some(c) => c.name.clone(),
                    None => format!("c{}", columns.len()),
                };
                let name = available_name(columns, &base);
                columns.push(ColumnDecl::new(name.clone(), ordering.expr.clone()));
                ScalarExpr::Column(ColumnRef::new(alias, name, ty))
            }
        };
        rebound.push(OrderExpr::new(expr, ordering.descending));
    }
    rebound
}

impl OrderByRewriter {
    fn fold_subquery_root(&mut self, select: Select) -> Select {
        self.subquery_root = true;
        let folded = self.fold_select(select);
        self.subquery_root = false;
        folded
    }
}

impl Fold for OrderByRewriter {
    fn fold_select(&mut self, select: Select) -> Select {
        let was_outermost = self.outermost;
        let subquery_root = std::mem::replace(&mut self.subquery_root, false);
        self.outermost = false;
        let mut select = visit::fold_select(self, select);
        self.outermost = was_outermost;

        let has_order_by = !select.order_by.is_empty();
        let has_group_by = !select.group_by.is_empty();
        let can_have_order_by = was_outermost || select.limit.is_some() || select.offset.is_some();
        let can_receive =
            can_have_order_by && !has_group_by && !select.distinct && !has_aggregates(&select);

        let own = std::mem::take(&mut select.order_by);
        if has_order_by {
            self.prepend(own.clone());
        }
        select.order_by = if can_receive {
            self.gathered.clone().unwrap_or_default()
        } else if can_have_order_by {
            own
        } else {
            Vec::new()
        };

        let can_pass_on = !was_outermost && !subquery_root && !has_group_by && !select.distinct;
        if let Some(gathered) = self.gathered.take() {
            if can_pass_on {
                let mut declared = DeclaredAliases::default();
                if let Some(from) = &select.from {
                    declared.visit_source(from);
                }
                let declared: HashSet<Alias> = declared.aliases.into_iter().collect();
                let rebound = rebind(gathered, select.alias, &declared, &mut select.columns);
                self.prepend(rebound);
            }
        }
        select
    }

    fn fold_subquery(&mut self, subquery: Subquery) -> ScalarExpr {
        let saved = self.gathered.take();
        let folded = match subquery {
            Subquery::In { expr, source } => {
                let expr = Box::new(self.fold_expr(*expr));
                let source = match source {
                    InSource::Select(select) => {
                        InSource::Select(Box::new(self.fold_subquery_root(*select)))
                    }
                    InSource::Values(values) => {
                        InSource::Values(values.into_iter().map(|v| self.fold_expr(v)).collect())
                    }
                };
                Subquery::In { expr, source }
            }
            Subquery::Scalar { select, ty } => Subquery::Scalar {
                select: Box::new(self.fold_subquery_root(*select)),
                ty,
            },
            Subquery::Exists { select } => Subquery::Exists {
                select: Box::new(self.fold_subquery_root(*select)),
            },
        };
        self.gathered = saved;
        ScalarExpr::Subquery(folded)
    }

    fn fold_join(&mut self, join: Join) -> Join {
        let left = self.fold_source(join.left);
        let left_orderings = self.gathered.take();
        let right = self.fold_source(join.right);
        if let Some(left_orderings) = left_orderings {
            self.prepend(left_orderings);
        }
        let condition = join.condition.map(|c| self.fold_expr(c));
        Join {
            kind: join.kind,
            left,
            right,
            condition,
        }
    }

    /// A nested projection is a statement of its own.
    fn fold_projection(&mut self, projection: Projection) -> Projection {
        let saved = (self.gathered.take(), self.outermost);
        self.outermost = true;
        let folded = visit::fold_projection(self, projection);
        (self.gathered, self.outermost) = saved;
        folded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, Source, TableSource};
    use crate::types::Type;

    fn col(alias: u32, name: &str) -> ScalarExpr {
        ScalarExpr::Column(ColumnRef::new(Alias(alias), name, Type::I64))
    }

    fn table() -> Source {
        Source::Table(TableSource {
            alias: Alias(0),
            entity: "Track".into(),
            name: "Track".into(),
        })
    }

    #[test]
    fn test_inner_ordering_moves_outward() {
        let mut inner = Select::new(
            Alias(1),
            vec![
                ColumnDecl::new("Id", col(0, "Id")),
                ColumnDecl::new("Name", col(0, "Name")),
            ],
            table(),
        );
        inner.order_by = vec![OrderExpr::new(col(0, "Name"), false)];
        let outer = Select::new(
            Alias(2),
            vec![ColumnDecl::new("Id", col(1, "Id"))],
            Source::Select(Box::new(inner)),
        )
        .with_where(Some(ScalarExpr::binary(
            BinaryOp::Gt,
            col(1, "Id"),
            ScalarExpr::constant(3.into()),
        )));
        let projection = rewrite(Projection::new(outer, col(2, "Id")));

        assert_eq!(projection.select.order_by.len(), 1);
        assert_eq!(projection.select.order_by[0].expr, col(1, "Name"));
        match projection.select.from {
            Some(Source::Select(inner)) => assert!(inner.order_by.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_limited_select_keeps_ordering() {
        let mut inner = Select::new(Alias(1), vec![ColumnDecl::new("Id", col(0, "Id"))], table());
        inner.order_by = vec![OrderExpr::new(col(0, "Id"), true)];
        inner.limit = Some(ScalarExpr::constant(5.into()));
        let outer = Select::new(
            Alias(2),
            vec![ColumnDecl::new("Id", col(1, "Id"))],
            Source::Select(Box::new(inner)),
        );
        let projection = rewrite(Projection::new(outer, col(2, "Id")));
        match &projection.select.from {
            Some(Source::Select(inner)) => assert_eq!(inner.order_by.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(projection.select.order_by.len(), 1);
    }

    #[test]
    fn test_subquery_statement_keeps_its_columns() {
        let mut inner = Select::new(
            Alias(1),
            vec![
                ColumnDecl::new("Name", col(0, "Name")),
                ColumnDecl::new("Milliseconds", col(0, "Milliseconds")),
            ],
            table(),
        );
        inner.order_by = vec![OrderExpr::new(col(0, "Milliseconds"), true)];
        let mut first = Select::new(
            Alias(2),
            vec![ColumnDecl::new("Name", col(1, "Name"))],
            Source::Select(Box::new(inner)),
        );
        first.limit = Some(ScalarExpr::constant(1.into()));
        let scalar = ScalarExpr::Subquery(Subquery::Scalar {
            select: Box::new(first),
            ty: Type::Text,
        });
        let root = Select::scalar(Alias(3), vec![ColumnDecl::new("c0", scalar)]);
        let projection = rewrite(Projection::new(root, col(3, "c0")));

        let ScalarExpr::Subquery(Subquery::Scalar { select, .. }) = &projection.select.columns[0].expr
        else {
            panic!("unexpected {:?}", projection.select.columns[0].expr);
        };
        assert_eq!(select.columns.len(), 1);
        assert_eq!(select.order_by, vec![OrderExpr::new(col(1, "Milliseconds"), true)]);
    }
}
