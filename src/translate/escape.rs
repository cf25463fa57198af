//! Turns surviving literals of column types into host parameters.

use crate::ast::Query;
use crate::ir::ScalarExpr;
use crate::ir::visit::{self, Fold};

/// Escape every literal embedded in a query, nested queries included.
pub fn escape_query(query: Query) -> Query {
    query.map_exprs(&mut |e| ConstantEscaper.fold_expr(e))
}

/// Escape the literals of a bound expression or projection.
pub fn escape(expr: ScalarExpr) -> ScalarExpr {
    ConstantEscaper.fold_expr(expr)
}

pub struct ConstantEscaper;

impl Fold for ConstantEscaper {
    fn fold_expr(&mut self, expr: ScalarExpr) -> ScalarExpr {
        match expr {
            ScalarExpr::Constant { value, ty } if !value.is_null() && ty.is_column_type() => {
                ScalarExpr::HostParameter { value, ty }
            }
            ScalarExpr::Query(query) => ScalarExpr::Query(Box::new(escape_query(*query))),
            other => visit::fold_expr(self, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::*;
    use crate::types::Type;

    #[test]
    fn test_escapes_column_literals_only() {
        let expr = param("t").field("Name").equals(lit("AC/DC")).or(param("t").field("Name").equals(null(Type::Text)));
        let escaped = format!("{:?}", escape(expr));
        assert!(escaped.contains("HostParameter"));
        assert!(escaped.contains("Constant { value: Null"));
    }
}
