//! Database layer.
//!
//! This module provides:
//! - Connection and pool capabilities with a buffered session cursor
//! - Retry classification and backoff
//! - The resilient query executor
//! - The MySQL implementation, row decoding and pool start-up
//! - Periodic pool monitoring

pub mod connection;
pub mod executor;
pub mod monitor;
pub mod mysql;
pub mod retry;
pub mod types;

pub use connection::{ConnectionPool, DatabaseConnection, Session, StatementOutcome};
pub use executor::{Executed, QueryExecutor};
pub use monitor::{PoolMonitor, PoolStatus};
pub use mysql::{MySqlConnection, MySqlConnectionPool, connect_with_retry, create_pool};
pub use retry::{FailureClass, RetryPolicy};
