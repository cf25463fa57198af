//! Removes selects that only forward their source's columns and merges
//! filtering selects into their source where that cannot change results.

use std::collections::{HashMap, HashSet};

use crate::ir::visit::{self, Fold, has_aggregates};
use crate::ir::{Alias, ColumnRef, Projection, ScalarExpr, Select, Source};

pub fn remove(projection: Projection) -> Projection {
    let projection = RedundantSubqueryRemover.fold_projection(projection);
    SubqueryMerger { top_level: true }.fold_projection(projection)
}

/// Every column is a reference to a source column of the same name.
pub fn is_simple_projection(select: &Select) -> bool {
    select
        .columns
        .iter()
        .all(|decl| matches!(&decl.expr, ScalarExpr::Column(c) if c.name == decl.name))
}

/// Every column refers, by name, to the column at the same position of the
/// source select.
pub fn is_name_map_projection(select: &Select) -> bool {
    let Some(Source::Select(from)) = &select.from else {
        return false;
    };
    select.columns.len() == from.columns.len()
        && select
            .columns
            .iter()
            .zip(&from.columns)
            .all(|(decl, source)| {
                matches!(&decl.expr, ScalarExpr::Column(c) if c.name == source.name)
            })
}

/// Every column is a plain column or a literal.
pub fn is_column_projection(select: &Select) -> bool {
    select.columns.iter().all(|decl| {
        matches!(
            decl.expr,
            ScalarExpr::Column(_) | ScalarExpr::Constant { .. } | ScalarExpr::HostParameter { .. }
        )
    })
}

fn is_redundant(select: &Select) -> bool {
    (is_simple_projection(select) || is_name_map_projection(select))
        && select.from.is_some()
        && !select.distinct
        && select.where_clause.is_none()
        && select.group_by.is_empty()
        && select.having.is_none()
        && select.order_by.is_empty()
        && select.limit.is_none()
        && select.offset.is_none()
}

/// Redundant selects directly in `source`, looking through joins only.
fn gather<'s>(source: &'s Source, found: &mut Vec<&'s Select>) {
    match source {
        Source::Select(select) if is_redundant(select) => found.push(select),
        Source::Join(join) => {
            gather(&join.left, found);
            gather(&join.right, found);
        }
        _ => {}
    }
}

/// Splices selects out of a tree, replacing references to their columns
/// with the expressions those columns stand for.
struct SubqueryRemover {
    removed: HashSet<Alias>,
    map: HashMap<(Alias, String), ScalarExpr>,
}

impl SubqueryRemover {
    fn new(selects: &[&Select]) -> Self {
        let mut remover = Self {
            removed: HashSet::new(),
            map: HashMap::new(),
        };
        for select in selects {
            remover.removed.insert(select.alias);
            for decl in &select.columns {
                remover
                    .map
                    .insert((select.alias, decl.name.clone()), decl.expr.clone());
            }
        }
        remover
    }
}

impl Fold for SubqueryRemover {
    fn fold_source(&mut self, source: Source) -> Source {
        match source {
            Source::Select(select) if self.removed.contains(&select.alias) => match select.from {
                Some(from) => self.fold_source(from),
                None => Source::Select(select),
            },
            other => visit::fold_source(self, other),
        }
    }

    fn fold_column(&mut self, column: ColumnRef) -> ScalarExpr {
        match self.map.get(&(column.alias, column.name.clone())) {
            Some(expr) => {
                let expr = expr.clone();
                self.fold_expr(expr)
            }
            None => ScalarExpr::Column(column),
        }
    }
}

struct RedundantSubqueryRemover;

impl Fold for RedundantSubqueryRemover {
    fn fold_select(&mut self, select: Select) -> Select {
        let select = visit::fold_select(self, select);
        let mut redundant = Vec::new();
        if let Some(from) = &select.from {
            gather(from, &mut redundant);
        }
        if redundant.is_empty() {
            return select;
        }
        let mut remover = SubqueryRemover::new(&redundant);
        remover.fold_select(select)
    }

    fn fold_projection(&mut self, projection: Projection) -> Projection {
        let projection = visit::fold_projection(self, projection);
        remove_root(projection)
    }
}

/// Drop a projection's own select when it only forwards a sub-select.
fn remove_root(projection: Projection) -> Projection {
    let forwards = is_redundant(&projection.select)
        && matches!(projection.select.from, Some(Source::Select(_)));
    if !forwards {
        return projection;
    }
    let mut remover = SubqueryRemover::new(&[&projection.select]);
    let Projection {
        select,
        projector,
        aggregator,
    } = projection;
    match select.from {
        Some(Source::Select(inner)) => Projection {
            select: remover.fold_select(*inner),
            projector: remover.fold_expr(projector),
            aggregator,
        },
        from => Projection {
            select: Select { from, ..select },
            projector,
            aggregator,
        },
    }
}

fn leftmost_select(source: &Source) -> Option<&Select> {
    match source {
        Source::Select(select) => Some(select),
        Source::Join(join) => leftmost_select(&join.left),
        _ => None,
    }
}

/// Whether `select` can absorb the leftmost select of its FROM clause
/// without changing which rows DISTINCT, LIMIT/OFFSET, WHERE or an
/// aggregate apply to.
fn can_merge_with_from(select: &Select, top_level: bool) -> bool {
    let Some(from) = select.from.as_ref().and_then(leftmost_select) else {
        return false;
    };
    if !is_column_projection(from) {
        return false;
    }
    let sel_name_map = is_name_map_projection(select);
    // an ordering handed up from the source select restates it
    let sel_order = !select.order_by.is_empty() && !restates_ordering(select, from);
    let sel_group = !select.group_by.is_empty();
    let sel_aggregates = has_aggregates(select);
    let sel_join = matches!(select.from, Some(Source::Join(_)));
    let sel_where = select.where_clause.is_some();
    let from_order = !from.order_by.is_empty();
    let from_group = !from.group_by.is_empty();
    let from_aggregates = has_aggregates(from);

    if sel_order && from_order {
        return false;
    }
    if sel_group && from_group {
        return false;
    }
    if from_order && (sel_group || sel_aggregates || select.distinct) {
        return false;
    }
    if from_group || from.having.is_some() {
        return false;
    }
    if from.limit.is_some()
        && (select.limit.is_some()
            || select.offset.is_some()
            || select.distinct
            || sel_aggregates
            || sel_group
            || sel_join
            || sel_where
            || sel_order)
    {
        return false;
    }
    if from.offset.is_some()
        && (select.offset.is_some()
            || select.distinct
            || sel_aggregates
            || sel_group
            || sel_join
            || sel_where
            || sel_order)
    {
        return false;
    }
    if from.distinct
        && (select.limit.is_some()
            || select.offset.is_some()
            || !sel_name_map
            || sel_group
            || sel_aggregates
            || (sel_order && !top_level)
            || sel_join)
    {
        return false;
    }
    if from_aggregates
        && (select.limit.is_some()
            || select.offset.is_some()
            || select.distinct
            || sel_aggregates
            || sel_group
            || sel_join
            || sel_where)
    {
        return false;
    }
    true
}

/// The outer ordering is the source's ordering seen through its columns.
fn restates_ordering(select: &Select, from: &Select) -> bool {
    if select.order_by.len() != from.order_by.len() {
        return false;
    }
    let mut remover = SubqueryRemover::new(&[from]);
    select.order_by.iter().zip(&from.order_by).all(|(outer, inner)| {
        outer.descending == inner.descending && remover.fold_expr(outer.expr.clone()) == inner.expr
    })
}

struct SubqueryMerger {
    top_level: bool,
}

impl Fold for SubqueryMerger {
    fn fold_select(&mut self, select: Select) -> Select {
        let was_top_level = self.top_level;
        self.top_level = false;
        let mut select = visit::fold_select(self, select);
        while can_merge_with_from(&select, was_top_level) {
            let Some(from) = select.from.as_ref().and_then(leftmost_select).cloned() else {
                break;
            };
            let mut remover = SubqueryRemover::new(&[&from]);
            let merged = remover.fold_select(select);
            let where_clause = match (from.where_clause, merged.where_clause) {
                (Some(inner), Some(outer)) => ScalarExpr::conjunction([inner, outer]),
                (inner, outer) => inner.or(outer),
            };
            select = Select {
                where_clause,
                order_by: if merged.order_by.is_empty() {
                    from.order_by
                } else {
                    merged.order_by
                },
                group_by: if merged.group_by.is_empty() {
                    from.group_by
                } else {
                    merged.group_by
                },
                offset: merged.offset.or(from.offset),
                limit: merged.limit.or(from.limit),
                distinct: merged.distinct || from.distinct,
                ..merged
            };
        }
        select
    }
}
