//! Error types for relq.

use thiserror::Error;

/// The main error type for relq operations.
#[derive(Debug, Error)]
pub enum RelqError {
    /// A combinator the compiler does not know how to lower.
    #[error("Unsupported operation: '{0}'")]
    UnsupportedOperation(String),

    /// A member or method call with no SQL translation.
    #[error("Unsupported expression: '{0}'")]
    UnsupportedExpression(String),

    /// A sub-expression has the wrong shape (e.g. not a sequence).
    #[error("Shape error: {0}")]
    Shape(String),

    /// A column references an alias that is not in scope.
    #[error("Alias resolution error: {0}")]
    AliasResolution(String),

    /// `Single`/`First`/`ElementAt` found no rows.
    #[error("Sequence contains no elements")]
    NoElement,

    /// `Single` found more than one row.
    #[error("Sequence contains more than one element")]
    MultipleElements,

    /// No schema descriptor is registered for the entity.
    #[error("Unknown entity: '{0}'")]
    UnknownEntity(String),

    /// Client-side evaluation of an expression failed.
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// A cell could not be converted to the requested type.
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RelqError {
    /// Create a shape error.
    pub fn shape(message: impl Into<String>) -> Self {
        Self::Shape(message.into())
    }

    /// Create an unsupported-expression error naming the member.
    pub fn unsupported_expression(member: impl Into<String>) -> Self {
        Self::UnsupportedExpression(member.into())
    }

    /// Create an evaluation error.
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation(message.into())
    }

    /// Create a conversion error.
    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion(message.into())
    }
}

impl From<sqlx::Error> for RelqError {
    fn from(err: sqlx::Error) -> Self {
        RelqError::Database(err.to_string())
    }
}

/// Result type alias for relq operations.
pub type RelqResult<T> = Result<T, RelqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelqError::UnsupportedOperation("Reverse".into());
        assert_eq!(err.to_string(), "Unsupported operation: 'Reverse'");
    }

    #[test]
    fn test_shape_helper() {
        let err = RelqError::shape("not a sequence");
        assert_eq!(err.to_string(), "Shape error: not a sequence");
    }
}
