//! Query error types
//!
//! Validation and date errors are raised before any storage access and only
//! mention the offending field or value, so they are safe to show to end users.
//! Storage errors are passed through from the driver untouched.

use thiserror::Error;

/// Errors that can occur during query compilation and execution
#[derive(Error, Debug)]
pub enum QueryError {
    /// The query or aggregation request is malformed
    #[error("Query validation error: {0}")]
    Validation(String),

    /// A date expression could not be parsed as relative, ISO or numeric
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// Query string syntax error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Storage driver error
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// IO error while opening the store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueryError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        QueryError::Validation(msg.into())
    }

    /// True for errors raised before the store was touched
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            QueryError::Validation(_) | QueryError::InvalidDate(_) | QueryError::Parse(_)
        )
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
