//! Error types for the ORM core.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Configuration problems are fatal and surface at first use; provider failures are
//! propagated after local cleanup. Invalid transaction states are not errors at all:
//! `begin_transaction`/`commit`/`rollback` report them as `Ok(false)`.

use thiserror::Error;

/// Conversion failure while turning a [`Value`](crate::expr::Value) into a Rust field type.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot convert {found} into {expected}")]
pub struct ValueError {
    pub expected: &'static str,
    pub found: &'static str,
}

impl ValueError {
    pub fn new(expected: &'static str, found: &'static str) -> Self {
        Self { expected, found }
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Permission denied: {operation} - {reason}")]
    Permission { operation: String, reason: String },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Failed to assign property '{property}' on '{entity}'")]
    PropertyAssignment {
        entity: String,
        property: String,
        #[source]
        source: ValueError,
    },

    #[error("Schema reconciliation failed for data source '{data_source}'")]
    Reconciliation {
        data_source: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a permission error.
    pub fn permission(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Permission {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a configuration error (bad metadata, unknown pool name, ...).
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a property assignment error.
    pub fn property_assignment(
        entity: impl Into<String>,
        property: impl Into<String>,
        source: ValueError,
    ) -> Self {
        Self::PropertyAssignment {
            entity: entity.into(),
            property: property.into(),
            source,
        }
    }

    /// Wrap a failure raised while reconciling one data source.
    pub fn reconciliation(data_source: impl Into<String>, source: DbError) -> Self {
        Self::Reconciliation {
            data_source: data_source.into(),
            source: Box::new(source),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// True when the failure means the underlying connection can no longer be trusted.
    ///
    /// A context that hits one of these is marked broken and discarded by its pool.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection acquire", 30),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => DbError::schema(
                format!("Type not found: {}", type_name),
                type_name.to_string(),
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::schema(format!("Column not found: {}", col), col.to_string())
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::AnyDriverError(err) => DbError::connection(
                format!("Driver error: {}", err),
                "Check database driver configuration",
            ),
            sqlx::Error::WorkerCrashed => {
                DbError::connection("Database worker crashed", "Reopen the connection")
            }
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for ORM operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert_eq!(DbError::configuration("x").suggestion(), None);
    }

    #[test]
    fn test_connection_failure_classification() {
        assert!(DbError::connection("reset", "retry").is_connection_failure());
        assert!(DbError::timeout("query", 30).is_connection_failure());
        assert!(!DbError::database("dup key", None, "fix").is_connection_failure());
        assert!(!DbError::permission("write", "read-only").is_connection_failure());
        assert!(!DbError::configuration("unknown pool").is_connection_failure());
    }

    #[test]
    fn test_property_assignment_keeps_cause() {
        let err = DbError::property_assignment("User", "Age", ValueError::new("i64", "text"));
        assert!(err.to_string().contains("'Age'"));
        assert!(err.to_string().contains("'User'"));
        let source = err.source().expect("cause is attached");
        assert_eq!(source.to_string(), "cannot convert text into i64");
    }

    #[test]
    fn test_reconciliation_wraps_source() {
        let err = DbError::reconciliation("main", DbError::schema("boom", "users"));
        assert!(err.to_string().contains("'main'"));
        assert!(err.source().unwrap().to_string().contains("boom"));
    }
}
