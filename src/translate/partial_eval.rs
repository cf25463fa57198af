//! Folds row-independent sub-trees into literals before binding.

use tracing::warn;

use crate::ast::Query;
use crate::eval;
use crate::ir::ScalarExpr;
use crate::ir::visit::{self, Fold, Visit};

/// Whether an expression may be computed on the client.
pub type CanEvaluate = fn(&ScalarExpr) -> bool;

/// Everything but lambda parameters, nested queries, relational IR nodes
/// and dialect functions.
pub fn can_evaluate_locally(expr: &ScalarExpr) -> bool {
    !matches!(
        expr,
        ScalarExpr::Param(_)
            | ScalarExpr::Query(_)
            | ScalarExpr::Column(_)
            | ScalarExpr::Aggregate(_)
            | ScalarExpr::Subquery(_)
            | ScalarExpr::Projection(_)
            | ScalarExpr::Group { .. }
            | ScalarExpr::Function { .. }
    )
}

/// Fold every embedded expression of a query.
pub fn evaluate_query(query: Query) -> Query {
    evaluate_query_with(query, can_evaluate_locally)
}

pub fn evaluate_query_with(query: Query, can_evaluate: CanEvaluate) -> Query {
    query.map_exprs(&mut |e| evaluate_with(e, can_evaluate))
}

/// Fold the maximal evaluable sub-trees of `expr`.
pub fn evaluate(expr: ScalarExpr) -> ScalarExpr {
    evaluate_with(expr, can_evaluate_locally)
}

pub fn evaluate_with(expr: ScalarExpr, can_evaluate: CanEvaluate) -> ScalarExpr {
    PartialEvaluator { can_evaluate }.fold_expr(expr)
}

/// Nominates sub-trees whose every node passes the predicate.
struct Nominator {
    can_evaluate: CanEvaluate,
    evaluable: bool,
}

impl Visit for Nominator {
    fn visit_expr(&mut self, expr: &ScalarExpr) {
        if !self.evaluable {
            return;
        }
        if !(self.can_evaluate)(expr) {
            self.evaluable = false;
            return;
        }
        visit::visit_expr(self, expr);
    }
}

fn is_evaluable(expr: &ScalarExpr, can_evaluate: CanEvaluate) -> bool {
    let mut nominator = Nominator {
        can_evaluate,
        evaluable: true,
    };
    nominator.visit_expr(expr);
    nominator.evaluable
}

struct PartialEvaluator {
    can_evaluate: CanEvaluate,
}

impl Fold for PartialEvaluator {
    fn fold_expr(&mut self, expr: ScalarExpr) -> ScalarExpr {
        match expr {
            ScalarExpr::Constant { .. } => expr,
            ScalarExpr::Query(query) => {
                let can_evaluate = self.can_evaluate;
                ScalarExpr::Query(Box::new(evaluate_query_with(*query, can_evaluate)))
            }
            expr if is_evaluable(&expr, self.can_evaluate) => match eval::evaluate(&expr) {
                Ok(value) => {
                    let ty = match expr.ty() {
                        crate::types::Type::Unknown => value.natural_type(),
                        ty => ty,
                    };
                    ScalarExpr::Constant { value, ty }
                }
                Err(err) => {
                    warn!(error = %err, "leaving sub-expression unevaluated");
                    visit::fold_expr(self, expr)
                }
            },
            expr => visit::fold_expr(self, expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::*;
    use crate::ir::BinaryOp;
    use crate::value::Value;

    #[test]
    fn test_folds_captured_variables() {
        let expr = param("t").field("Id").ge(var("min", 5).plus(5));
        match evaluate(expr) {
            ScalarExpr::Binary { op, right, .. } => {
                assert_eq!(op, BinaryOp::Ge);
                assert!(matches!(
                    *right,
                    ScalarExpr::Constant {
                        value: Value::Int(10),
                        ..
                    }
                ));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_failed_evaluation_keeps_subtree() {
        let expr = lit(1).divided_by(lit(0));
        assert!(matches!(evaluate(expr), ScalarExpr::Binary { .. }));
    }

    #[test]
    fn test_descends_into_nested_queries() {
        let q = Query::table("Track").filter(lambda("t", |t| {
            Query::table("Album")
                .any_where(lambda("a", |a| a.field("AlbumId").equals(var("id", 1).plus(1))))
                .into_expr()
                .and(t.field("Id").gt(0))
        }));
        let folded = format!("{:?}", evaluate_query(q));
        assert!(folded.contains("Int(2)"));
        assert!(!folded.contains("Variable"));
    }
}
