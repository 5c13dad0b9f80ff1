//! Scripted in-memory pool for executor tests.
//!
//! Connections record every statement they see; failures and result rows are
//! scripted by SQL prefix.

#![allow(dead_code)]

use async_trait::async_trait;
use db_exec::db::{ConnectionPool, DatabaseConnection, StatementOutcome};
use db_exec::error::DriverError;
use db_exec::models::{QueryParam, Row};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct Failure {
    prefix: String,
    code: Option<u16>,
    remaining: u32,
}

#[derive(Debug, Default)]
struct State {
    next_id: u32,
    acquired: u32,
    released: u32,
    closed: Vec<u32>,
    acquire_failures: Vec<Failure>,
    failures: Vec<Failure>,
    rows: HashMap<String, Vec<Row>>,
    statements: Vec<(u32, String)>,
    autocommit: Vec<(u32, bool)>,
}

impl State {
    fn take_failure(failures: &mut [Failure], sql: &str) -> Option<DriverError> {
        let failure = failures
            .iter_mut()
            .find(|f| f.remaining > 0 && sql.starts_with(&f.prefix))?;
        failure.remaining -= 1;
        Some(match failure.code {
            Some(code) => DriverError::database(code, format!("scripted failure for {}", sql)),
            None => DriverError::other(format!("scripted failure for {}", sql)),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakePool {
    state: Arc<Mutex<State>>,
}

impl FakePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` statements starting with `prefix` with a server error.
    pub fn fail_on(self, prefix: &str, code: u16, times: u32) -> Self {
        self.push_failure(prefix, Some(code), times)
    }

    /// Fail every statement starting with `prefix` with a server error.
    pub fn always_fail_on(self, prefix: &str, code: u16) -> Self {
        self.push_failure(prefix, Some(code), u32::MAX)
    }

    /// Fail the next statement starting with `prefix` without an error code.
    pub fn fail_unexpectedly_on(self, prefix: &str) -> Self {
        self.push_failure(prefix, None, 1)
    }

    pub fn fail_acquire(self, code: u16, times: u32) -> Self {
        self.state.lock().unwrap().acquire_failures.push(Failure {
            prefix: String::new(),
            code: Some(code),
            remaining: times,
        });
        self
    }

    /// Rows returned by statements equal to `sql`.
    pub fn with_rows(self, sql: &str, rows: Vec<Row>) -> Self {
        self.state
            .lock()
            .unwrap()
            .rows
            .insert(sql.to_string(), rows);
        self
    }

    fn push_failure(self, prefix: &str, code: Option<u16>, times: u32) -> Self {
        self.state.lock().unwrap().failures.push(Failure {
            prefix: prefix.to_string(),
            code,
            remaining: times,
        });
        self
    }

    pub fn acquired(&self) -> u32 {
        self.state.lock().unwrap().acquired
    }

    pub fn released(&self) -> u32 {
        self.state.lock().unwrap().released
    }

    /// Connections handed out and not yet returned.
    pub fn outstanding(&self) -> u32 {
        let state = self.state.lock().unwrap();
        state.acquired - state.released
    }

    /// Ids of connections closed before release.
    pub fn closed(&self) -> Vec<u32> {
        self.state.lock().unwrap().closed.clone()
    }

    /// Every statement attempted, in order.
    pub fn statements(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .statements
            .iter()
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    /// Statements attempted on one connection.
    pub fn statements_on(&self, conn_id: u32) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .statements
            .iter()
            .filter(|(id, _)| *id == conn_id)
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.statements()
            .iter()
            .filter(|sql| sql.starts_with(prefix))
            .count()
    }

    /// Autocommit changes as `(connection id, enabled)`.
    pub fn autocommit_log(&self) -> Vec<(u32, bool)> {
        self.state.lock().unwrap().autocommit.clone()
    }
}

#[async_trait]
impl ConnectionPool for FakePool {
    type Connection = FakeConnection;

    async fn acquire(&self) -> Result<FakeConnection, DriverError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = State::take_failure(&mut state.acquire_failures, "") {
            return Err(err);
        }
        state.next_id += 1;
        state.acquired += 1;
        Ok(FakeConnection {
            id: state.next_id,
            state: Arc::clone(&self.state),
        })
    }

    async fn release(&self, _conn: FakeConnection) {
        self.state.lock().unwrap().released += 1;
    }

    fn size(&self) -> u32 {
        self.outstanding()
    }

    fn idle(&self) -> usize {
        0
    }
}

#[derive(Debug)]
pub struct FakeConnection {
    pub id: u32,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl DatabaseConnection for FakeConnection {
    async fn run(
        &mut self,
        sql: &str,
        _params: &[QueryParam],
    ) -> Result<StatementOutcome, DriverError> {
        let mut state = self.state.lock().unwrap();
        state.statements.push((self.id, sql.to_string()));
        if let Some(err) = State::take_failure(&mut state.failures, sql) {
            return Err(err);
        }

        if let Some(rows) = state.rows.get(sql) {
            return Ok(StatementOutcome {
                rows: rows.clone(),
                rows_affected: 0,
            });
        }
        let upper = sql.to_uppercase();
        let is_write = ["INSERT", "UPDATE", "DELETE"]
            .iter()
            .any(|kw| upper.starts_with(kw));
        Ok(StatementOutcome {
            rows: Vec::new(),
            rows_affected: u64::from(is_write),
        })
    }

    async fn run_many(
        &mut self,
        sql: &str,
        param_sets: &[Vec<QueryParam>],
    ) -> Result<u64, DriverError> {
        let mut state = self.state.lock().unwrap();
        state.statements.push((self.id, sql.to_string()));
        if let Some(err) = State::take_failure(&mut state.failures, sql) {
            return Err(err);
        }
        Ok(param_sets.len() as u64)
    }

    async fn set_autocommit(&mut self, enabled: bool) -> Result<(), DriverError> {
        self.state.lock().unwrap().autocommit.push((self.id, enabled));
        Ok(())
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().closed.push(self.id);
    }
}

/// A two-column `id`/`name` row.
pub fn row(id: i64, name: &str) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), json!(id));
    row.insert("name".to_string(), json!(name));
    row
}
