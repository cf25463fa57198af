//! # relq: combinator queries compiled to SQLite
//!
//! > **Build queries as values. Run them as SQL.**
//!
//! relq takes a tree of sequence combinators (filter, project, join, group,
//! order, page, aggregate), binds it against a schema catalog, rewrites the
//! relational form and prints SQLite SQL. A [`Session`](engine::Session)
//! runs the statement and materializes typed [`Value`](value::Value)s.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use relq::prelude::*;
//!
//! let catalog = Catalog::new().with(
//!     TableSchema::new("DataTable")
//!         .column(ColumnSchema::new("Id", Type::I64))
//!         .column(ColumnSchema::new("Value", Type::Text)),
//! );
//!
//! let query = Query::table("DataTable")
//!     .filter(lambda("d", |d| d.field("Id").ge(var("min", 10))))
//!     .project(lambda("d", |d| d.field("Value")));
//!
//! let translation = relq::translate(&catalog, &query)?;
//! // => "SELECT [Value] FROM [DataTable] WHERE [Id] >= ?"
//! ```
//!
//! ## Pipeline
//!
//! | Stage          | Module                         |
//! |----------------|--------------------------------|
//! | Combinators    | [`ast`]                        |
//! | Relational IR  | [`ir`]                         |
//! | Bind + rewrite | [`translate`]                  |
//! | SQL text       | [`transpiler`]                 |
//! | Rows to values | [`materialize`], [`cursor`]    |
//! | SQLite         | [`engine`]                     |

pub mod ast;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod eval;
pub mod ir;
pub mod materialize;
pub mod schema;
pub mod translate;
pub mod transpiler;
pub mod types;
pub mod value;

pub mod prelude {
    pub use crate::ast::builders::*;
    pub use crate::ast::{Lambda, Query};
    pub use crate::config::Config;
    pub use crate::cursor::{RowCursor, StatementExecutor};
    pub use crate::engine::{Session, SqliteExecutor};
    pub use crate::error::*;
    pub use crate::schema::{Catalog, ColumnSchema, SchemaResolver, TableSchema};
    pub use crate::translate::{TranslateOptions, Translation, Translator};
    pub use crate::transpiler::ToSql;
    pub use crate::types::{EnumType, RecordType, Type};
    pub use crate::value::{Record, SqlValue, Value};
}

/// Compile a query to SQL with the default rewrite passes.
///
/// # Example
///
/// ```
/// use relq::prelude::*;
///
/// let catalog = Catalog::new().with(
///     TableSchema::new("Track").column(ColumnSchema::new("Name", Type::Text)),
/// );
/// let t = relq::translate(&catalog, &Query::table("Track").count()).unwrap();
/// assert_eq!(t.sql, "SELECT COUNT(*) AS [c0] FROM [Track]");
/// ```
pub fn translate(
    schema: &dyn schema::SchemaResolver,
    query: &ast::Query,
) -> error::RelqResult<translate::Translation> {
    translate::Translator::new(schema).translate(query)
}
