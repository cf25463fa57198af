//! Execution against SQLite.
//!
//! [`SqliteExecutor`] runs statements through a `sqlx` pool on an owned
//! `tokio` runtime and buffers every result set. [`Session`] ties the
//! compiler, an executor and the materializer together.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tokio::runtime::Runtime;
use tracing::debug;

use crate::ast::Query;
use crate::cursor::{RowBuffer, RowCursor, StatementExecutor};
use crate::error::{RelqError, RelqResult};
use crate::materialize::Materializer;
use crate::schema::Catalog;
use crate::translate::{TranslateOptions, Translation, Translator};
use crate::value::{SqlValue, Value};

/// A SQLite database behind a blocking facade.
///
/// The executor owns its runtime, so it must not be used from inside
/// another `tokio` runtime.
pub struct SqliteExecutor {
    runtime: Runtime,
    pool: SqlitePool,
}

impl SqliteExecutor {
    /// Connect using a URL such as `sqlite://chinook.db` or `sqlite::memory:`.
    ///
    /// The pool holds one connection that is never recycled, so an
    /// in-memory database lives as long as the executor.
    pub fn connect(url: &str) -> RelqResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let pool = runtime.block_on(
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(url),
        )?;
        debug!(url, "connected");
        Ok(Self { runtime, pool })
    }

    pub fn in_memory() -> RelqResult<Self> {
        Self::connect("sqlite::memory:")
    }

    /// Run one or more statements that return no rows.
    pub fn execute_batch(&self, sql: &str) -> RelqResult<u64> {
        debug!(sql, "executing batch");
        let result = self
            .runtime
            .block_on(sqlx::Executor::execute(&self.pool, sql))?;
        Ok(result.rows_affected())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl StatementExecutor for SqliteExecutor {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> RelqResult<Box<dyn RowCursor>> {
        debug!(sql, params = params.len(), "executing statement");
        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                SqlValue::Null => query.bind(Option::<i64>::None),
                SqlValue::Integer(n) => query.bind(*n),
                SqlValue::Real(f) => query.bind(*f),
                SqlValue::Text(s) => query.bind(s.clone()),
                SqlValue::Blob(b) => query.bind(b.clone()),
            };
        }
        let rows = self.runtime.block_on(query.fetch_all(&self.pool))?;

        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let rows = rows
            .iter()
            .map(row_to_values)
            .collect::<RelqResult<Vec<_>>>()?;
        Ok(Box::new(RowBuffer::new(columns, rows)))
    }
}

/// Convert a row by the storage class of each cell.
fn row_to_values(row: &SqliteRow) -> RelqResult<Vec<SqlValue>> {
    let mut values = Vec::with_capacity(row.len());
    for i in 0..row.len() {
        let raw = row.try_get_raw(i)?;
        if raw.is_null() {
            values.push(SqlValue::Null);
            continue;
        }
        let storage = raw.type_info().name().to_string();
        let value = match storage.as_str() {
            "INTEGER" | "BOOLEAN" | "INT8" => SqlValue::Integer(row.try_get_unchecked::<i64, _>(i)?),
            "REAL" | "NUMERIC" => SqlValue::Real(row.try_get_unchecked::<f64, _>(i)?),
            "BLOB" => SqlValue::Blob(row.try_get_unchecked::<Vec<u8>, _>(i)?),
            _ => SqlValue::Text(row.try_get_unchecked::<String, _>(i)?),
        };
        values.push(value);
    }
    Ok(values)
}

/// Compiles, runs and materializes queries against one executor.
pub struct Session<E> {
    executor: E,
    catalog: Catalog,
    options: TranslateOptions,
}

impl<E: StatementExecutor> Session<E> {
    pub fn new(executor: E, catalog: Catalog) -> Self {
        Self {
            executor,
            catalog,
            options: TranslateOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TranslateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn translate(&self, query: &Query) -> RelqResult<Translation> {
        Translator::new(&self.catalog)
            .with_options(self.options)
            .translate(query)
    }

    /// The whole result: a list for sequences, one value for terminals.
    pub fn fetch(&self, query: &Query) -> RelqResult<Value> {
        let translation = self.translate(query)?;
        let mut cursor = self.executor.execute(&translation.sql, &translation.params)?;
        Materializer::new(&translation.projection, &self.executor)?.read_all(cursor.as_mut())
    }

    /// Lazily materialized rows of a sequence query.
    pub fn rows(&self, query: &Query) -> RelqResult<Rows<'_>> {
        let translation = self.translate(query)?;
        if translation.projection.aggregator.is_some() {
            return Err(RelqError::shape(
                "a terminal query yields one value; use fetch",
            ));
        }
        let materializer = Materializer::new(&translation.projection, &self.executor)?;
        let cursor = self.executor.execute(&translation.sql, &translation.params)?;
        Ok(Rows {
            cursor,
            materializer,
            done: false,
        })
    }
}

/// Iterator over materialized rows; stops after the first error.
pub struct Rows<'e> {
    cursor: Box<dyn RowCursor>,
    materializer: Materializer<'e>,
    done: bool,
}

impl Iterator for Rows<'_> {
    type Item = RelqResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let row = match self.cursor.step() {
            Ok(true) => self.materializer.read_row(self.cursor.as_ref()).map(Some),
            Ok(false) => Ok(None),
            Err(e) => Err(e),
        };
        match row {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
