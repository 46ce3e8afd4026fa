//! Error types for the Redshift provider.

use thiserror::Error;

/// SQLSTATE raised when a transaction cannot be serialized against a concurrent one.
pub const SERIALIZATION_FAILURE: &str = "40001";
/// SQLSTATE raised when a deadlock is detected.
pub const DEADLOCK_DETECTED: &str = "40P01";
/// SQLSTATE Redshift uses for most internal errors, including some concurrency conflicts.
pub const INTERNAL_ERROR: &str = "XX000";

/// Errors that can occur while serving provider requests.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested object was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The provider broke one of its own invariants.
    #[error("Internal error: {0}")]
    Sdk(String),

    /// A configuration error occurred, or the provider was used before `Configure`.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource or data source type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A gRPC transport error occurred.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The statement failed on the cluster.
    #[error("Database error{}: {message}", code.as_deref().map(|c| format!(" ({})", c)).unwrap_or_default())]
    Database {
        /// SQLSTATE reported by the server, if any.
        code: Option<String>,
        /// Server or driver message.
        message: String,
    },

    /// Object already exists (create conflict).
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// The connected user lacks a privilege.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Quota or connection limit exceeded.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The cluster is unreachable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Operation timed out.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Operation failed due to current state (precondition not met).
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Operation not implemented.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// Invalid request from the host.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Get the error message as a string.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::Sdk(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg)
            | Self::AlreadyExists(msg)
            | Self::PermissionDenied(msg)
            | Self::ResourceExhausted(msg)
            | Self::Unavailable(msg)
            | Self::DeadlineExceeded(msg)
            | Self::FailedPrecondition(msg)
            | Self::Unimplemented(msg)
            | Self::InvalidRequest(msg) => msg,
            Self::Database { message, .. } => message,
            Self::Serialization(_err) => "serialization error (see Debug output)",
            Self::Transport(_err) => "transport error (see Debug output)",
        }
    }

    /// SQLSTATE of a database error.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Whether the operation that produced this error should be attempted again.
    ///
    /// Redshift aborts concurrent DDL/DCL on the same catalog rows with a
    /// serialization failure, or with an `XX000` internal error whose message
    /// mentions the concurrent transaction.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database { code, message } => match code.as_deref() {
                Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => true,
                Some(INTERNAL_ERROR) => message.contains("concurrent transaction"),
                _ => false,
            },
            _ => false,
        }
    }
}

impl From<sqlx::Error> for ProviderError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.into_owned());
                let message = db.message().to_string();
                match code.as_deref() {
                    // undefined_object, invalid_catalog_name, invalid_schema_name
                    Some("42704") | Some("3D000") | Some("3F000") => Self::NotFound(message),
                    // duplicate_object, duplicate_database, duplicate_schema
                    Some("42710") | Some("42P04") | Some("42P06") => Self::AlreadyExists(message),
                    Some("42501") => Self::PermissionDenied(message),
                    Some("53300") => Self::ResourceExhausted(message),
                    _ => Self::Database { code, message },
                }
            }
            sqlx::Error::RowNotFound => Self::NotFound("no rows returned".to_string()),
            sqlx::Error::PoolTimedOut => {
                Self::Unavailable("timed out waiting for a database connection".to_string())
            }
            sqlx::Error::PoolClosed => {
                Self::Unavailable("connection pool has been closed".to_string())
            }
            sqlx::Error::Io(e) => Self::Unavailable(e.to_string()),
            sqlx::Error::Tls(e) => Self::Unavailable(format!("TLS error: {}", e)),
            sqlx::Error::Configuration(e) => Self::Configuration(e.to_string()),
            other => Self::Database {
                code: None,
                message: other.to_string(),
            },
        }
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(msg) => tonic::Status::not_found(msg),
            ProviderError::Validation(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Configuration(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::UnknownResource(msg) => tonic::Status::not_found(msg),
            ProviderError::Sdk(msg) => tonic::Status::internal(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            },
            ProviderError::Transport(err) => {
                tonic::Status::unavailable(format!("Transport error: {}", err))
            },
            err @ ProviderError::Database { .. } => tonic::Status::internal(err.to_string()),
            ProviderError::AlreadyExists(msg) => tonic::Status::already_exists(msg),
            ProviderError::PermissionDenied(msg) => tonic::Status::permission_denied(msg),
            ProviderError::ResourceExhausted(msg) => tonic::Status::resource_exhausted(msg),
            ProviderError::Unavailable(msg) => tonic::Status::unavailable(msg),
            ProviderError::DeadlineExceeded(msg) => tonic::Status::deadline_exceeded(msg),
            ProviderError::FailedPrecondition(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::Unimplemented(msg) => tonic::Status::unimplemented(msg),
            ProviderError::InvalidRequest(msg) => tonic::Status::invalid_argument(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_error(code: &str, message: &str) -> ProviderError {
        ProviderError::Database {
            code: Some(code.to_string()),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("user alice".to_string());
        assert_eq!(format!("{}", err), "Resource not found: user alice");

        let err = ProviderError::UnknownResource("redshift_table".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: redshift_table");

        let err = db_error("XX000", "boom");
        assert_eq!(format!("{}", err), "Database error (XX000): boom");

        let err = ProviderError::Database {
            code: None,
            message: "protocol error".to_string(),
        };
        assert_eq!(format!("{}", err), "Database error: protocol error");
    }

    #[test]
    fn test_retryable_codes() {
        assert!(db_error(SERIALIZATION_FAILURE, "serializable isolation violation").is_retryable());
        assert!(db_error(DEADLOCK_DETECTED, "deadlock detected").is_retryable());
        assert!(db_error(
            INTERNAL_ERROR,
            "could not complete because of conflict with concurrent transaction"
        )
        .is_retryable());

        assert!(!db_error(INTERNAL_ERROR, "disk full").is_retryable());
        assert!(!db_error("42601", "syntax error").is_retryable());
        assert!(!ProviderError::NotFound("x".to_string()).is_retryable());
    }

    #[test]
    fn test_sql_state() {
        assert_eq!(db_error("40001", "x").sql_state(), Some("40001"));
        assert_eq!(ProviderError::Sdk("x".to_string()).sql_state(), None);
    }

    #[test]
    fn test_sqlx_pool_errors_map_to_unavailable() {
        let err: ProviderError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, ProviderError::Unavailable(_)));

        let err: ProviderError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, ProviderError::Unavailable(_)));

        let err: ProviderError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[test]
    fn test_error_to_status() {
        let status: tonic::Status = ProviderError::NotFound("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let status: tonic::Status = ProviderError::Configuration("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);

        let status: tonic::Status = ProviderError::PermissionDenied("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);

        let status: tonic::Status = db_error("XX000", "boom").into();
        assert_eq!(status.code(), tonic::Code::Internal);
        assert!(status.message().contains("boom"));
    }

    #[test]
    fn test_message_method() {
        assert_eq!(
            ProviderError::Validation("bad privilege".to_string()).message(),
            "bad privilege"
        );
        assert_eq!(db_error("40001", "conflict").message(), "conflict");
    }
}
