//! Row cursors and the statement executor seam.

use crate::error::{RelqError, RelqResult};
use crate::value::SqlValue;

/// Forward-only access to the rows of one executed statement.
pub trait RowCursor {
    fn column_count(&self) -> usize;

    /// Advance to the next row; `false` once the rows are exhausted.
    fn step(&mut self) -> RelqResult<bool>;

    fn is_null(&self, index: usize) -> bool;

    fn get_int(&self, index: usize) -> RelqResult<i32>;

    fn get_long(&self, index: usize) -> RelqResult<i64>;

    fn get_double(&self, index: usize) -> RelqResult<f64>;

    fn get_text(&self, index: usize) -> RelqResult<String>;

    fn get_blob(&self, index: usize) -> RelqResult<Vec<u8>>;

    fn column_index_of(&self, name: &str) -> Option<usize>;
}

/// Runs SQL text with positional parameters.
pub trait StatementExecutor {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> RelqResult<Box<dyn RowCursor>>;
}

impl<E: StatementExecutor + ?Sized> StatementExecutor for &E {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> RelqResult<Box<dyn RowCursor>> {
        (**self).execute(sql, params)
    }
}

/// A fully fetched result set.
///
/// Correlated sub-executions run while an outer cursor is mid-iteration;
/// buffering each statement completely keeps them from interleaving on the
/// connection.
#[derive(Debug, Clone, Default)]
pub struct RowBuffer {
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
    /// One past the current row; 0 before the first `step`.
    position: usize,
}

impl RowBuffer {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self {
            columns,
            rows,
            position: 0,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn cell(&self, index: usize) -> RelqResult<&SqlValue> {
        let row = self
            .position
            .checked_sub(1)
            .and_then(|p| self.rows.get(p))
            .ok_or_else(|| RelqError::Database("cursor is not positioned on a row".into()))?;
        row.get(index)
            .ok_or_else(|| RelqError::Database(format!("column index {} out of range", index)))
    }

    fn mismatch(&self, index: usize, wanted: &str) -> RelqError {
        let name = self.columns.get(index).map(String::as_str).unwrap_or("?");
        RelqError::conversion(format!("column {} ({}) is not {}", index, name, wanted))
    }
}

impl RowCursor for RowBuffer {
    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn step(&mut self) -> RelqResult<bool> {
        if self.position < self.rows.len() {
            self.position += 1;
            Ok(true)
        } else {
            self.position = self.rows.len() + 1;
            Ok(false)
        }
    }

    fn is_null(&self, index: usize) -> bool {
        matches!(self.cell(index), Ok(SqlValue::Null) | Err(_))
    }

    fn get_int(&self, index: usize) -> RelqResult<i32> {
        let value = self.get_long(index)?;
        i32::try_from(value).map_err(|_| self.mismatch(index, "a 32-bit integer"))
    }

    fn get_long(&self, index: usize) -> RelqResult<i64> {
        match self.cell(index)? {
            SqlValue::Integer(n) => Ok(*n),
            SqlValue::Real(f) => Ok(*f as i64),
            SqlValue::Text(s) => s.trim().parse().map_err(|_| self.mismatch(index, "an integer")),
            _ => Err(self.mismatch(index, "an integer")),
        }
    }

    fn get_double(&self, index: usize) -> RelqResult<f64> {
        match self.cell(index)? {
            SqlValue::Integer(n) => Ok(*n as f64),
            SqlValue::Real(f) => Ok(*f),
            SqlValue::Text(s) => s.trim().parse().map_err(|_| self.mismatch(index, "a number")),
            _ => Err(self.mismatch(index, "a number")),
        }
    }

    fn get_text(&self, index: usize) -> RelqResult<String> {
        match self.cell(index)? {
            SqlValue::Text(s) => Ok(s.clone()),
            SqlValue::Integer(n) => Ok(n.to_string()),
            SqlValue::Real(f) => Ok(f.to_string()),
            SqlValue::Blob(b) => String::from_utf8(b.clone()).map_err(|_| self.mismatch(index, "text")),
            SqlValue::Null => Err(self.mismatch(index, "text")),
        }
    }

    fn get_blob(&self, index: usize) -> RelqResult<Vec<u8>> {
        match self.cell(index)? {
            SqlValue::Blob(b) => Ok(b.clone()),
            SqlValue::Text(s) => Ok(s.clone().into_bytes()),
            _ => Err(self.mismatch(index, "a blob")),
        }
    }

    fn column_index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> RowBuffer {
        RowBuffer::new(
            vec!["Id".into(), "Name".into()],
            vec![
                vec![SqlValue::Integer(1), SqlValue::Text("AC/DC".into())],
                vec![SqlValue::Integer(2), SqlValue::Null],
            ],
        )
    }

    #[test]
    fn test_steps_through_rows() {
        let mut rows = buffer();
        assert!(rows.get_long(0).is_err());
        assert!(rows.step().unwrap());
        assert_eq!(rows.get_long(0).unwrap(), 1);
        assert_eq!(rows.get_text(1).unwrap(), "AC/DC");
        assert!(rows.step().unwrap());
        assert!(rows.is_null(1));
        assert!(!rows.step().unwrap());
        assert!(!rows.step().unwrap());
    }

    #[test]
    fn test_column_lookup() {
        let rows = buffer();
        assert_eq!(rows.column_count(), 2);
        assert_eq!(rows.column_index_of("Name"), Some(1));
        assert_eq!(rows.column_index_of("Missing"), None);
    }
}
