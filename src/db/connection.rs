//! Connection capabilities used by the executor.
//!
//! The executor is generic over a [`ConnectionPool`] whose connections
//! implement [`DatabaseConnection`]. Everything is resolved at compile time;
//! the MySQL implementation lives in [`crate::db::mysql`].
//!
//! A [`Session`] is a connection together with its cursor state. The cursor
//! buffers the rows of the last statement (dictionary-shaped) and remembers
//! its row count. Because the cursor is part of the same value as the
//! connection, the two are always released together.

use crate::error::DriverError;
use crate::models::{QueryParam, Row};
use crate::db::retry::CR_SERVER_GONE_ERROR;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;

/// Everything one statement produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementOutcome {
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

impl StatementOutcome {
    /// Number of rows returned by a read, otherwise the affected-row count.
    pub fn rowcount(&self) -> u64 {
        if self.rows.is_empty() {
            self.rows_affected
        } else {
            self.rows.len() as u64
        }
    }
}

/// One live database session.
#[async_trait]
pub trait DatabaseConnection: Send + 'static {
    /// Execute one statement and collect its rows and affected-row count.
    async fn run(&mut self, sql: &str, params: &[QueryParam])
    -> Result<StatementOutcome, DriverError>;

    /// Execute one statement once per parameter set; returns total affected rows.
    async fn run_many(
        &mut self,
        sql: &str,
        param_sets: &[Vec<QueryParam>],
    ) -> Result<u64, DriverError>;

    async fn set_autocommit(&mut self, enabled: bool) -> Result<(), DriverError>;

    /// Mark the connection as dead so that releasing it does not return it to service.
    async fn close(&mut self);
}

/// A bounded set of reusable connections.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    type Connection: DatabaseConnection;

    /// Wait for a free connection.
    async fn acquire(&self) -> Result<Self::Connection, DriverError>;

    /// Return a connection to the pool.
    async fn release(&self, conn: Self::Connection);

    /// Current number of connections (idle and in use).
    fn size(&self) -> u32;

    /// Number of idle connections.
    fn idle(&self) -> usize;
}

/// A connection plus its buffered cursor.
pub struct Session<C> {
    conn: Option<C>,
    buffered: VecDeque<Row>,
    rowcount: Option<u64>,
    autocommit_disabled: bool,
}

impl<C: DatabaseConnection> Session<C> {
    pub fn new(conn: C) -> Self {
        Self {
            conn: Some(conn),
            buffered: VecDeque::new(),
            rowcount: None,
            autocommit_disabled: false,
        }
    }

    /// False once the connection was discarded after a connection loss.
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Row count of the last executed statement; `None` before the first one.
    pub fn rowcount(&self) -> Option<u64> {
        self.rowcount
    }

    /// True while a locking read has left autocommit turned off.
    pub fn autocommit_disabled(&self) -> bool {
        self.autocommit_disabled
    }

    /// Execute a statement, replacing any buffered rows. Returns the row count.
    pub async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> Result<u64, DriverError> {
        self.close_cursor();
        let outcome = self.connection()?.run(sql, params).await?;
        let rowcount = outcome.rowcount();
        self.rowcount = Some(rowcount);
        self.buffered = outcome.rows.into();
        Ok(rowcount)
    }

    /// Execute one statement per parameter set. Returns the total affected rows.
    pub async fn execute_many(
        &mut self,
        sql: &str,
        param_sets: &[Vec<QueryParam>],
    ) -> Result<u64, DriverError> {
        self.close_cursor();
        let affected = self.connection()?.run_many(sql, param_sets).await?;
        self.rowcount = Some(affected);
        Ok(affected)
    }

    /// Next buffered row of the last statement.
    pub fn fetch_one(&mut self) -> Option<Row> {
        self.buffered.pop_front()
    }

    /// All remaining buffered rows of the last statement.
    pub fn fetch_all(&mut self) -> Vec<Row> {
        self.buffered.drain(..).collect()
    }

    pub async fn autocommit(&mut self, enabled: bool) -> Result<(), DriverError> {
        self.connection()?.set_autocommit(enabled).await?;
        self.autocommit_disabled = !enabled;
        Ok(())
    }

    /// Borrow the underlying connection.
    pub fn connection_mut(&mut self) -> Option<&mut C> {
        self.conn.as_mut()
    }

    /// Give up the session and take the connection out of it.
    pub fn into_connection(mut self) -> Option<C> {
        self.close_cursor();
        self.conn.take()
    }

    /// Take the connection out, leaving a closed session behind.
    pub(crate) fn detach(&mut self) -> Option<C> {
        self.close_cursor();
        self.autocommit_disabled = false;
        self.conn.take()
    }

    /// Put a fresh connection into a closed session.
    pub(crate) fn attach(&mut self, conn: C) {
        self.close_cursor();
        self.rowcount = None;
        self.autocommit_disabled = false;
        self.conn = Some(conn);
    }

    fn close_cursor(&mut self) {
        self.buffered.clear();
    }

    fn connection(&mut self) -> Result<&mut C, DriverError> {
        self.conn.as_mut().ok_or_else(|| {
            DriverError::database(CR_SERVER_GONE_ERROR, "Session has no open connection")
        })
    }
}

impl<C> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("open", &self.conn.is_some())
            .field("buffered_rows", &self.buffered.len())
            .field("rowcount", &self.rowcount)
            .field("autocommit_disabled", &self.autocommit_disabled)
            .finish()
    }
}
