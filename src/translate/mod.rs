//! Query compiler: binding, rewrite passes and SQL generation.
//!
//! ```text
//! Query ─ partial_eval ─ escape ─ Binder ─ order_by ─ redundant ─ aggregates
//!       ─ redundant ─ unused ─ alias_check ─ SqlFormatter
//! ```

pub mod aggregates;
pub mod alias_check;
pub mod binder;
pub mod escape;
pub mod order_by;
pub mod partial_eval;
pub mod projector;
pub mod redundant;
pub mod unused;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::ast::Query;
use crate::error::{RelqError, RelqResult};
use crate::ir::{AliasGenerator, Projection, ScalarExpr};
use crate::schema::SchemaResolver;
use crate::transpiler::format_select;
use crate::value::SqlValue;

pub use binder::Binder;

/// Switches for the optional rewrite passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateOptions {
    pub remove_redundant_subqueries: bool,
    pub remove_unused_columns: bool,
    pub simplify_aggregates: bool,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self {
            remove_redundant_subqueries: true,
            remove_unused_columns: true,
            simplify_aggregates: true,
        }
    }
}

impl TranslateOptions {
    /// Only the passes needed for correct SQL.
    pub fn minimal() -> Self {
        Self {
            remove_redundant_subqueries: false,
            remove_unused_columns: false,
            simplify_aggregates: false,
        }
    }
}

/// SQL text, its positional parameters and the projection that reads the rows.
#[derive(Debug, Clone)]
pub struct Translation {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub projection: Projection,
}

pub struct Translator<'a> {
    schema: &'a dyn SchemaResolver,
    options: TranslateOptions,
}

impl<'a> Translator<'a> {
    pub fn new(schema: &'a dyn SchemaResolver) -> Self {
        Self {
            schema,
            options: TranslateOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TranslateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> TranslateOptions {
        self.options
    }

    /// Bind and rewrite `query`, literals escaped into host parameters.
    pub fn compile(&self, query: &Query) -> RelqResult<Projection> {
        self.compile_with(escape::escape_query(partial_eval::evaluate_query(query.clone())))
    }

    fn compile_with(&self, query: Query) -> RelqResult<Projection> {
        let mut aliases = AliasGenerator::new();
        let projection = Binder::new(self.schema, &mut aliases).bind(&query)?;
        trace!(pass = "bind", root = %projection.select.alias, "rewrite pass finished");

        let mut projection = order_by::rewrite(projection);
        trace!(pass = "order_by", "rewrite pass finished");

        if self.options.remove_redundant_subqueries {
            projection = redundant::remove(projection);
            trace!(pass = "redundant", "rewrite pass finished");
        }
        if self.options.simplify_aggregates {
            projection = aggregates::simplify(projection);
            trace!(pass = "aggregates", "rewrite pass finished");
            if self.options.remove_redundant_subqueries {
                projection = redundant::remove(projection);
                trace!(pass = "redundant", "rewrite pass finished");
            }
        }
        if self.options.remove_unused_columns {
            projection = unused::remove(projection);
            trace!(pass = "unused", "rewrite pass finished");
        }

        alias_check::check(&projection)?;
        Ok(projection)
    }

    /// Compile and format `query`.
    pub fn translate(&self, query: &Query) -> RelqResult<Translation> {
        let projection = self.compile(query)?;
        let mut params = Vec::new();
        let sql = format_select(&projection.select, Some(&mut params))?;
        debug!(sql = %sql, params = params.len(), "translated query");
        Ok(Translation {
            sql,
            params,
            projection,
        })
    }
}

/// SQL for a view body: literals inlined, only plain columns projected.
pub fn compile_view_definition(schema: &dyn SchemaResolver, query: &Query) -> RelqResult<String> {
    let translator = Translator::new(schema);
    let projection = translator.compile_with(partial_eval::evaluate_query(query.clone()))?;
    if projection.aggregator.is_some() || !is_column_mapping(&projection) {
        return Err(RelqError::shape(
            "a view must project plain columns of its query",
        ));
    }
    let sql = format_select(&projection.select, None)?;
    debug!(sql = %sql, "compiled view definition");
    Ok(sql)
}

/// The projector reads columns of the final select that are themselves
/// plain source columns.
fn is_column_mapping(projection: &Projection) -> bool {
    let select = &projection.select;
    let is_column = |e: &ScalarExpr| match e {
        ScalarExpr::Column(c) if c.alias == select.alias => select
            .column(&c.name)
            .is_some_and(|decl| matches!(decl.expr, ScalarExpr::Column(_))),
        _ => false,
    };
    match &projection.projector {
        ScalarExpr::New { members, .. } => members.iter().all(|(_, e)| is_column(e)),
        other => is_column(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::*;
    use crate::schema::{Catalog, ColumnSchema, TableSchema};
    use crate::types::Type;
    use pretty_assertions::assert_eq;

    fn catalog() -> Catalog {
        Catalog::new().with(
            TableSchema::new("DataTable")
                .column(ColumnSchema::new("Id", Type::I64))
                .column(ColumnSchema::new("Value", Type::Text)),
        )
    }

    #[test]
    fn test_options_default_enable_every_pass() {
        let options: TranslateOptions = toml::from_str("remove_unused_columns = false").unwrap();
        assert!(options.remove_redundant_subqueries);
        assert!(!options.remove_unused_columns);
        assert!(options.simplify_aggregates);
    }

    #[test]
    fn test_view_definition_inlines_literals() {
        let catalog = catalog();
        let query = Query::table("DataTable").filter(lambda("d", |d| d.field("Id").ge(10)));
        let sql = compile_view_definition(&catalog, &query).unwrap();
        assert_eq!(sql, "SELECT [Id], [Value] FROM [DataTable] WHERE [Id] >= 10");
    }

    #[test]
    fn test_view_definition_rejects_computed_projector() {
        let catalog = catalog();
        let query = Query::table("DataTable").project(lambda("d", |d| d.field("Id").plus(1)));
        let err = compile_view_definition(&catalog, &query).unwrap_err();
        assert!(matches!(err, RelqError::Shape(_)));
    }
}
