//! db-exec library
//!
//! Runs MySQL reads and writes through a pooled connection with transient-error
//! retry, exponential backoff with jitter, optional transaction wrapping and
//! cooperative shutdown.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod shutdown;

pub use config::Config;
pub use db::{QueryExecutor, Session};
pub use error::{DbError, DbResult, DriverError};
pub use shutdown::TerminationSignal;
