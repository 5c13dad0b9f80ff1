//! Error types for the resilient executor.
//!
//! Two layers are defined here:
//! - [`DriverError`] is what the low-level connection/pool capabilities return.
//!   The retry loop switches on it explicitly to decide between retrying,
//!   failing fast, and cleaning up.
//! - [`DbError`] is what callers of the executor see.

use crate::db::retry::CR_SERVER_LOST;
use sqlx::error::DatabaseError as _;
use thiserror::Error;

/// Error reported by a [`DatabaseConnection`](crate::db::DatabaseConnection) or
/// [`ConnectionPool`](crate::db::ConnectionPool).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The server (or client library) reported a numbered MySQL error.
    #[error("MySQL error {code}: {message}")]
    Database { code: u16, message: String },

    /// Anything else: decode failures, bad arguments, pool misconfiguration.
    #[error("{message}")]
    Other { message: String },
}

impl DriverError {
    pub fn database(code: u16, message: impl Into<String>) -> Self {
        Self::Database {
            code,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// A dropped or unusable connection, reported as `CR_SERVER_LOST`.
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::database(CR_SERVER_LOST, message)
    }

    /// MySQL error number, if this is a database error.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Database { code, .. } => Some(*code),
            Self::Other { .. } => None,
        }
    }
}

/// Convert sqlx errors to DriverError.
///
/// Transport-level failures have no server error number in sqlx, so they are
/// reported as `CR_SERVER_LOST` and handled like a dropped connection.
impl From<sqlx::Error> for DriverError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                match db_err.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>() {
                    Some(mysql_err) => DriverError::database(mysql_err.number(), mysql_err.message()),
                    None => DriverError::database(0, db_err.message()),
                }
            }
            sqlx::Error::Io(io_err) => DriverError::connection_lost(format!("I/O error: {}", io_err)),
            sqlx::Error::Protocol(msg) => {
                DriverError::connection_lost(format!("Protocol error: {}", msg))
            }
            sqlx::Error::WorkerCrashed => DriverError::connection_lost("Database worker crashed"),
            sqlx::Error::PoolTimedOut => {
                DriverError::other("Timed out waiting for a pooled connection")
            }
            sqlx::Error::PoolClosed => DriverError::other("Connection pool is closed"),
            other => DriverError::other(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Database error {code}: {message}")]
    Database {
        code: u16,
        message: String,
        suggestion: String,
    },

    #[error("Unexpected error: {message}")]
    Unexpected { message: String },

    #[error(
        "Maximum retries reached or termination requested: {attempts} attempt(s), {waited_ms}ms spent in backoff"
    )]
    RetryExhausted {
        attempts: u32,
        waited_ms: u64,
        /// True when the termination signal ended the retry loop.
        terminated: bool,
        #[source]
        last: Option<DriverError>,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl DbError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a database error with a suggestion derived from the error number.
    pub fn database(code: u16, message: impl Into<String>) -> Self {
        Self::Database {
            code,
            message: message.into(),
            suggestion: suggestion_for_code(code).to_string(),
        }
    }

    /// Create an unexpected (non-database) error.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    /// Create a retry exhaustion error.
    pub fn retry_exhausted(
        attempts: u32,
        waited_ms: u64,
        terminated: bool,
        last: Option<DriverError>,
    ) -> Self {
        Self::RetryExhausted {
            attempts,
            waited_ms,
            terminated,
            last,
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::RetryExhausted {
                terminated: false, ..
            } => Some("The database stayed busy; try again later"),
            _ => None,
        }
    }

    /// MySQL error number carried by this error, if any.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Database { code, .. } => Some(*code),
            Self::RetryExhausted { last, .. } => last.as_ref().and_then(DriverError::code),
            _ => None,
        }
    }

    /// Check if a later, independent retry by the caller may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::RetryExhausted {
                    terminated: false,
                    ..
                }
        )
    }
}

impl From<DriverError> for DbError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Database { code, message } => DbError::database(code, message),
            DriverError::Other { message } => DbError::unexpected(message),
        }
    }
}

/// Convert sqlx errors raised outside the executor (pool creation) to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out waiting for a pooled connection",
                "Increase max_connections or acquire_timeout",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            other => DriverError::from(other).into(),
        }
    }
}

/// Result type alias for executor operations.
pub type DbResult<T> = Result<T, DbError>;

fn suggestion_for_code(code: u16) -> &'static str {
    match code {
        1062 => "A row with the same unique key already exists",
        1064 => "Check the SQL syntax",
        1146 => "Check that the referenced table exists",
        1054 => "Check the referenced column names",
        1406 => "A value is too long for its column",
        1452 => "A referenced parent row does not exist",
        _ => "Check the SQL statement and its parameters",
    }
}
