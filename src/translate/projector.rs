//! Column projection.
//!
//! Splits a projector expression into the part a `SELECT` can compute (named
//! columns) and the part rebuilt on the client, rewriting the latter to
//! reference the new columns.

use crate::ir::visit::Fold;
use crate::ir::{Alias, ColumnDecl, ColumnRef, ScalarExpr, available_name};

/// Result of [`project_columns`].
#[derive(Debug)]
pub struct ProjectedColumns {
    pub projector: ScalarExpr,
    pub columns: Vec<ColumnDecl>,
}

/// Nominate and extract the columns of `expr` for a select aliased
/// `new_alias` whose sources declare `existing`.
pub fn project_columns(expr: ScalarExpr, new_alias: Alias, existing: &[Alias]) -> ProjectedColumns {
    let mut projector = ColumnProjector {
        new_alias,
        existing,
        columns: Vec::new(),
        mapped: Vec::new(),
        next_synthetic: 0,
    };
    let projected = match projector.nominate(expr) {
        Nominated::Candidate(e) => projector.make_column(e),
        Nominated::Rewritten(e) => e,
    };
    ProjectedColumns {
        projector: projected,
        columns: projector.columns,
    }
}

/// Must always be computed by the database.
fn must_be_column(expr: &ScalarExpr) -> bool {
    matches!(
        expr,
        ScalarExpr::Column(_) | ScalarExpr::Aggregate(_) | ScalarExpr::Subquery(_)
    )
}

/// May be computed by the database if all of its children can.
fn can_be_column(expr: &ScalarExpr) -> bool {
    match expr {
        ScalarExpr::Param(_)
        | ScalarExpr::Query(_)
        | ScalarExpr::New { .. }
        | ScalarExpr::Projection(_)
        | ScalarExpr::Group { .. } => false,
        ScalarExpr::Call { method, .. } if !method.is_translatable() => false,
        other => must_be_column(other) || other.ty().is_column_type(),
    }
}

enum Nominated {
    /// The whole sub-tree can become one column.
    Candidate(ScalarExpr),
    /// Some descendant could not; candidate children are already columns.
    Rewritten(ScalarExpr),
}

struct ColumnProjector<'a> {
    new_alias: Alias,
    existing: &'a [Alias],
    columns: Vec<ColumnDecl>,
    mapped: Vec<(ScalarExpr, String)>,
    next_synthetic: usize,
}

impl ColumnProjector<'_> {
    fn make_column(&mut self, expr: ScalarExpr) -> ScalarExpr {
        if let ScalarExpr::Column(c) = &expr {
            if !self.existing.contains(&c.alias) {
                // outer-scope reference, left for the enclosing select
                return expr;
            }
        }
        let ty = expr.ty();
        if let Some((_, name)) = self.mapped.iter().find(|(e, _)| same_expr(e, &expr)) {
            return ScalarExpr::Column(ColumnRef::new(self.new_alias, name.clone(), ty));
        }
        let name = match &expr {
            ScalarExpr::Column(c) => available_name(&self.columns, &c.name),
            _ => self.next_synthetic_name(),
        };
        self.columns.push(ColumnDecl::new(name.clone(), expr.clone()));
        self.mapped.push((expr, name.clone()));
        ScalarExpr::Column(ColumnRef::new(self.new_alias, name, ty))
    }

    fn next_synthetic_name(&mut self) -> String {
        loop {
            let name = format!("c{}", self.next_synthetic);
            self.next_synthetic += 1;
            if !self.columns.iter().any(|c| c.name == name) {
                return name;
            }
        }
    }

    fn settle(&mut self, nominated: Nominated) -> ScalarExpr {
        match nominated {
            Nominated::Candidate(e) => self.make_column(e),
            Nominated::Rewritten(e) => e,
        }
    }

    fn nominate(&mut self, expr: ScalarExpr) -> Nominated {
        if must_be_column(&expr) {
            return Nominated::Candidate(expr);
        }
        if let ScalarExpr::Projection(p) = expr {
            let mut lifter = OuterColumnLifter { projector: self };
            return Nominated::Rewritten(ScalarExpr::Projection(Box::new(
                lifter.fold_projection(*p),
            )));
        }
        let candidate = can_be_column(&expr);
        let mut children = Vec::new();
        let shell = take_children(expr, &mut children);
        let nominated: Vec<Nominated> = children.into_iter().map(|c| self.nominate(c)).collect();
        let all_candidates = nominated.iter().all(|n| matches!(n, Nominated::Candidate(_)));
        if candidate && all_candidates {
            let children = nominated
                .into_iter()
                .map(|n| match n {
                    Nominated::Candidate(e) | Nominated::Rewritten(e) => e,
                })
                .collect();
            Nominated::Candidate(put_children(shell, children))
        } else {
            let children = nominated.into_iter().map(|n| self.settle(n)).collect();
            Nominated::Rewritten(put_children(shell, children))
        }
    }
}

/// Inside a nested projection only bare references to the sources of the
/// select being built are lifted into its columns.
struct OuterColumnLifter<'p, 'a> {
    projector: &'p mut ColumnProjector<'a>,
}

impl Fold for OuterColumnLifter<'_, '_> {
    fn fold_column(&mut self, column: ColumnRef) -> ScalarExpr {
        if self.projector.existing.contains(&column.alias) {
            self.projector.make_column(ScalarExpr::Column(column))
        } else {
            ScalarExpr::Column(column)
        }
    }
}

fn same_expr(a: &ScalarExpr, b: &ScalarExpr) -> bool {
    match (a, b) {
        (ScalarExpr::Column(x), ScalarExpr::Column(y)) => x.same_column(y),
        _ => a == b,
    }
}

/// Detach the direct scalar children of a node, leaving placeholders.
fn take_children(expr: ScalarExpr, out: &mut Vec<ScalarExpr>) -> ScalarExpr {
    let hole = || Box::new(ScalarExpr::Param(String::new()));
    match expr {
        ScalarExpr::Binary { op, left, right } => {
            out.push(*left);
            out.push(*right);
            ScalarExpr::Binary {
                op,
                left: hole(),
                right: hole(),
            }
        }
        ScalarExpr::Unary { op, operand } => {
            out.push(*operand);
            ScalarExpr::Unary { op, operand: hole() }
        }
        ScalarExpr::Member { target, name } => {
            out.push(*target);
            ScalarExpr::Member {
                target: hole(),
                name,
            }
        }
        ScalarExpr::Call {
            method,
            target,
            args,
        } => {
            out.push(*target);
            let n = args.len();
            out.extend(args);
            ScalarExpr::Call {
                method,
                target: hole(),
                args: vec![ScalarExpr::Param(String::new()); n],
            }
        }
        ScalarExpr::Conditional {
            test,
            then,
            otherwise,
        } => {
            out.push(*test);
            out.push(*then);
            out.push(*otherwise);
            ScalarExpr::Conditional {
                test: hole(),
                then: hole(),
                otherwise: hole(),
            }
        }
        ScalarExpr::New { ty, members } => {
            let names = members
                .into_iter()
                .map(|(name, e)| {
                    out.push(e);
                    (name, ScalarExpr::Param(String::new()))
                })
                .collect();
            ScalarExpr::New { ty, members: names }
        }
        ScalarExpr::Convert { operand, ty } => {
            out.push(*operand);
            ScalarExpr::Convert {
                operand: hole(),
                ty,
            }
        }
        ScalarExpr::Function { name, args, ty } => {
            let n = args.len();
            out.extend(args);
            ScalarExpr::Function {
                name,
                args: vec![ScalarExpr::Param(String::new()); n],
                ty,
            }
        }
        ScalarExpr::Group { key, elements } => {
            out.push(*key);
            out.push(*elements);
            ScalarExpr::Group {
                key: hole(),
                elements: hole(),
            }
        }
        leaf => leaf,
    }
}

/// Refill the placeholders left by [`take_children`], in order.
fn put_children(shell: ScalarExpr, children: Vec<ScalarExpr>) -> ScalarExpr {
    let mut it = children.into_iter();
    let mut next = || it.next().unwrap_or(ScalarExpr::Param(String::new()));
    match shell {
        ScalarExpr::Binary { op, .. } => {
            let left = next();
            let right = next();
            ScalarExpr::binary(op, left, right)
        }
        ScalarExpr::Unary { op, .. } => ScalarExpr::Unary {
            op,
            operand: Box::new(next()),
        },
        ScalarExpr::Member { name, .. } => ScalarExpr::Member {
            target: Box::new(next()),
            name,
        },
        ScalarExpr::Call { method, args, .. } => {
            let target = Box::new(next());
            let args = args.iter().map(|_| next()).collect();
            ScalarExpr::Call {
                method,
                target,
                args,
            }
        }
        ScalarExpr::Conditional { .. } => {
            let test = Box::new(next());
            let then = Box::new(next());
            let otherwise = Box::new(next());
            ScalarExpr::Conditional {
                test,
                then,
                otherwise,
            }
        }
        ScalarExpr::New { ty, members } => {
            let members = members.into_iter().map(|(name, _)| (name, next())).collect();
            ScalarExpr::New { ty, members }
        }
        ScalarExpr::Convert { ty, .. } => ScalarExpr::Convert {
            operand: Box::new(next()),
            ty,
        },
        ScalarExpr::Function { name, args, ty } => ScalarExpr::Function {
            name,
            args: args.iter().map(|_| next()).collect(),
            ty,
        },
        ScalarExpr::Group { .. } => {
            let key = Box::new(next());
            let elements = Box::new(next());
            ScalarExpr::Group { key, elements }
        }
        leaf => leaf,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Aggregate, AggregateKind, BinaryOp};
    use crate::types::{RecordType, Type};

    fn col(alias: u32, name: &str) -> ScalarExpr {
        ScalarExpr::Column(ColumnRef::new(Alias(alias), name, Type::I64))
    }

    #[test]
    fn test_record_members_become_columns() {
        let expr = ScalarExpr::New {
            ty: RecordType::new("Row")
                .with_field("Id", Type::I64)
                .with_field("Next", Type::I64),
            members: vec![
                ("Id".into(), col(0, "Id")),
                (
                    "Next".into(),
                    ScalarExpr::binary(BinaryOp::Add, col(0, "Id"), ScalarExpr::constant(1.into())),
                ),
            ],
        };
        let pc = project_columns(expr, Alias(1), &[Alias(0)]);
        let names: Vec<_> = pc.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Id", "c0"]);
        match pc.projector {
            ScalarExpr::New { members, .. } => {
                assert_eq!(members[0].1, ScalarExpr::Column(ColumnRef::new(Alias(1), "Id", Type::I64)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_names_get_suffix() {
        let expr = ScalarExpr::New {
            ty: RecordType::new("Pair"),
            members: vec![("A".into(), col(0, "Id")), ("B".into(), col(2, "Id"))],
        };
        let pc = project_columns(expr, Alias(3), &[Alias(0), Alias(2)]);
        let names: Vec<_> = pc.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Id", "Id1"]);
    }

    #[test]
    fn test_identical_columns_are_reused() {
        let expr = ScalarExpr::New {
            ty: RecordType::new("Twice"),
            members: vec![("A".into(), col(0, "Id")), ("B".into(), col(0, "Id"))],
        };
        let pc = project_columns(expr, Alias(1), &[Alias(0)]);
        assert_eq!(pc.columns.len(), 1);
    }

    #[test]
    fn test_outer_references_are_kept() {
        let pc = project_columns(col(9, "Id"), Alias(1), &[Alias(0)]);
        assert!(pc.columns.is_empty());
        assert_eq!(pc.projector, col(9, "Id"));
    }

    #[test]
    fn test_aggregate_is_single_column() {
        let agg = ScalarExpr::Aggregate(Aggregate {
            kind: AggregateKind::Count,
            argument: None,
            distinct: false,
            ty: Type::I64,
        });
        let pc = project_columns(agg, Alias(1), &[Alias(0)]);
        assert_eq!(pc.columns.len(), 1);
        assert_eq!(pc.columns[0].name, "c0");
    }
}
