//! Data models for the executor.
//!
//! This module re-exports all model types used throughout the crate.

pub mod query;

// Re-export commonly used types
pub use query::{ExecRequest, FetchMode, QueryOutcome, QueryParam, Row, Statement, Writes};
