//! Validates alias scoping of a finished tree.
//!
//! A select's FROM clause is checked under the enclosing scope only; the
//! aliases it declares become visible to the rest of the select. Join
//! conditions see both sides. A projector sees its select's alias, and a
//! nested projection is a statement of its own.

use std::collections::HashSet;

use crate::error::{RelqError, RelqResult};
use crate::ir::visit::{self, Visit};
use crate::ir::{Alias, ColumnRef, Join, Projection, Select, Source};

pub fn check(projection: &Projection) -> RelqResult<()> {
    let mut checker = AliasChecker::default();
    checker.visit_projection(projection);
    match checker.error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

#[derive(Default)]
struct AliasChecker {
    scope: Vec<Alias>,
    declared: HashSet<Alias>,
    error: Option<RelqError>,
}

impl AliasChecker {
    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(RelqError::AliasResolution(message));
        }
    }

    fn declare(&mut self, alias: Alias) {
        if !self.declared.insert(alias) {
            self.fail(format!("alias {} is declared more than once", alias));
        }
    }
}

impl Visit for AliasChecker {
    fn visit_column(&mut self, column: &ColumnRef) {
        if !self.scope.contains(&column.alias) {
            self.fail(format!(
                "column {}.{} refers to an alias not in scope",
                column.alias, column.name
            ));
        }
    }

    fn visit_projection(&mut self, projection: &Projection) {
        let declared = std::mem::take(&mut self.declared);
        self.visit_select(&projection.select);
        self.scope.push(projection.select.alias);
        self.visit_expr(&projection.projector);
        self.scope.pop();
        self.declared = declared;
    }

    fn visit_select(&mut self, select: &Select) {
        self.declare(select.alias);
        let depth = self.scope.len();
        if let Some(from) = &select.from {
            self.visit_source(from);
            self.scope.extend(from.declared_aliases());
        }
        if let Some(w) = &select.where_clause {
            self.visit_expr(w);
        }
        select.columns.iter().for_each(|c| self.visit_expr(&c.expr));
        select.group_by.iter().for_each(|g| self.visit_expr(g));
        if let Some(h) = &select.having {
            self.visit_expr(h);
        }
        select.order_by.iter().for_each(|o| self.visit_expr(&o.expr));
        if let Some(o) = &select.offset {
            self.visit_expr(o);
        }
        if let Some(l) = &select.limit {
            self.visit_expr(l);
        }
        self.scope.truncate(depth);
    }

    fn visit_source(&mut self, source: &Source) {
        match source {
            Source::Table(t) | Source::View(t) => self.declare(t.alias),
            Source::Raw(r) => self.declare(r.alias),
            other => visit::visit_source(self, other),
        }
    }

    fn visit_join(&mut self, join: &Join) {
        self.visit_source(&join.left);
        self.visit_source(&join.right);
        if let Some(condition) = &join.condition {
            let depth = self.scope.len();
            self.scope.extend(join.left.declared_aliases());
            self.scope.extend(join.right.declared_aliases());
            self.visit_expr(condition);
            self.scope.truncate(depth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, ColumnDecl, ScalarExpr, TableSource};
    use crate::types::Type;

    fn col(alias: u32, name: &str) -> ScalarExpr {
        ScalarExpr::Column(ColumnRef::new(Alias(alias), name, Type::I64))
    }

    fn table(alias: u32) -> Source {
        Source::Table(TableSource {
            alias: Alias(alias),
            entity: "Artist".into(),
            name: "Artist".into(),
        })
    }

    #[test]
    fn test_well_scoped_projection() {
        let select = Select::new(Alias(1), vec![ColumnDecl::new("Id", col(0, "Id"))], table(0));
        assert!(check(&Projection::new(select, col(1, "Id"))).is_ok());
    }

    #[test]
    fn test_projector_cannot_see_source_alias() {
        let select = Select::new(Alias(1), vec![ColumnDecl::new("Id", col(0, "Id"))], table(0));
        let err = check(&Projection::new(select, col(0, "Id"))).unwrap_err();
        assert!(matches!(err, RelqError::AliasResolution(_)));
    }

    #[test]
    fn test_duplicate_alias_is_rejected() {
        let inner = Select::new(Alias(1), vec![ColumnDecl::new("Id", col(0, "Id"))], table(0));
        let outer = Select::new(
            Alias(2),
            vec![ColumnDecl::new("Id", col(1, "Id"))],
            Source::Join(Box::new(Join {
                kind: crate::ir::JoinKind::Inner,
                left: Source::Select(Box::new(inner)),
                right: table(0),
                condition: Some(ScalarExpr::binary(BinaryOp::Eq, col(1, "Id"), col(0, "Id"))),
            })),
        );
        let err = check(&Projection::new(outer, col(2, "Id"))).unwrap_err();
        assert!(matches!(err, RelqError::AliasResolution(_)));
    }
}
