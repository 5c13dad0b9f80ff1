//! Resilient query execution.
//!
//! [`QueryExecutor`] runs an [`ExecRequest`] against a pooled connection:
//! - optional read query, fetched as one row or all rows
//! - optional writes, sequential or batched
//! - optional transaction wrapping with best-effort rollback
//! - retry of transient errors with exponential backoff and jitter
//! - cooperative cancellation through the [`TerminationSignal`]
//!
//! # Connection ownership
//!
//! [`QueryExecutor::execute`] acquires its own connection. Every failure path
//! releases it; on success the [`Session`] is handed to the caller inside
//! [`Executed`], and the caller gives it back with
//! [`QueryExecutor::reset_connection`].
//!
//! [`QueryExecutor::execute_on`] runs on a caller-supplied session and never
//! releases it. If that session's connection is lost, the dead connection is
//! released and a fresh one is attached to the caller's session on the next
//! attempt; the caller still owns it afterwards.

use crate::db::connection::{ConnectionPool, DatabaseConnection, Session};
use crate::db::retry::{FailureClass, RetryPolicy};
use crate::error::{DbError, DbResult, DriverError};
use crate::models::{ExecRequest, FetchMode, QueryOutcome, Writes};
use crate::shutdown::TerminationSignal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Output of a successful [`QueryExecutor::execute`].
#[derive(Debug)]
pub struct Executed<C> {
    pub outcome: QueryOutcome,
    /// The connection used, now owned by the caller.
    pub session: Session<C>,
}

/// Who is responsible for the connection during one call.
enum Lease<'s, C> {
    /// Nothing acquired yet, or the last connection was discarded.
    Vacant,
    /// Acquired by this call.
    Owned(Session<C>),
    /// Supplied by the caller, who keeps ownership.
    Borrowed(&'s mut Session<C>),
}

impl<C: DatabaseConnection> Lease<'_, C> {
    fn session(&mut self) -> Option<&mut Session<C>> {
        match self {
            Lease::Vacant => None,
            Lease::Owned(session) => Some(session),
            Lease::Borrowed(session) => Some(&mut **session),
        }
    }
}

/// Executes requests against a shared connection pool.
pub struct QueryExecutor<P: ConnectionPool> {
    pool: Arc<P>,
    policy: RetryPolicy,
    signal: TerminationSignal,
}

impl<P: ConnectionPool> QueryExecutor<P> {
    /// Create an executor with the default retry policy.
    pub fn new(pool: Arc<P>, signal: TerminationSignal) -> Self {
        Self::with_policy(pool, RetryPolicy::default(), signal)
    }

    pub fn with_policy(pool: Arc<P>, policy: RetryPolicy, signal: TerminationSignal) -> Self {
        Self {
            pool,
            policy,
            signal,
        }
    }

    /// Execute on a freshly acquired connection and hand it to the caller on success.
    pub async fn execute(&self, request: &ExecRequest) -> DbResult<Executed<P::Connection>> {
        match self.run(request, Lease::Vacant).await? {
            (outcome, Lease::Owned(session)) => Ok(Executed { outcome, session }),
            (_, _) => Err(DbError::unexpected(
                "Execution finished without holding a connection",
            )),
        }
    }

    /// Execute on a caller-supplied session. The session is never released here.
    pub async fn execute_on(
        &self,
        request: &ExecRequest,
        session: &mut Session<P::Connection>,
    ) -> DbResult<QueryOutcome> {
        let (outcome, _) = self.run(request, Lease::Borrowed(session)).await?;
        Ok(outcome)
    }

    /// Restore autocommit and return the session's connection to the pool.
    ///
    /// A failed autocommit reset is logged, never propagated; the release
    /// always happens.
    pub async fn reset_connection(&self, mut session: Session<P::Connection>) {
        if let Err(e) = session.autocommit(true).await {
            error!(error = %e, "Failed to reset autocommit on connection");
        }
        if let Some(conn) = session.into_connection() {
            self.pool.release(conn).await;
        }
    }

    async fn run<'s>(
        &self,
        request: &ExecRequest,
        lease: Lease<'s, P::Connection>,
    ) -> DbResult<(QueryOutcome, Lease<'s, P::Connection>)> {
        request.validate()?;

        let span = info_span!(
            "db_exec",
            call_id = %uuid::Uuid::new_v4().simple(),
            caller = %request.caller
        );
        self.retry_loop(request, lease).instrument(span).await
    }

    async fn retry_loop<'s>(
        &self,
        request: &ExecRequest,
        mut lease: Lease<'s, P::Connection>,
    ) -> DbResult<(QueryOutcome, Lease<'s, P::Connection>)> {
        let policy = &self.policy;
        let mut attempts: u32 = 0;
        let mut waited = Duration::ZERO;
        let mut last_error: Option<DriverError> = None;

        while attempts < policy.max_attempts
            && waited < policy.wait_budget
            && !self.signal.is_set()
        {
            let started = Instant::now();
            let result = match self.open_session(&mut lease).await {
                Ok(session) => self.attempt(request, session).await,
                Err(e) => Err(e),
            };

            let err = match result {
                Ok(outcome) => return Ok((outcome, lease)),
                Err(err) => err,
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match policy.classify(&err) {
                FailureClass::Retryable { connection_lost } => {
                    attempts += 1;
                    if connection_lost {
                        self.discard_connection(&mut lease).await;
                    }

                    let wait = if attempts < policy.max_attempts {
                        let wait = policy.backoff(attempts);
                        (waited + wait <= policy.wait_budget).then_some(wait)
                    } else {
                        None
                    };

                    warn!(
                        caller = %request.caller,
                        code = ?err.code(),
                        error = %err,
                        attempt = attempts,
                        max_attempts = policy.max_attempts,
                        elapsed_ms,
                        wait_ms = wait.map(|w| w.as_millis() as u64),
                        connection_lost,
                        "Retryable database error"
                    );
                    last_error = Some(err);

                    let Some(wait) = wait else {
                        break;
                    };
                    waited += wait;
                    self.backoff(wait).await;
                }
                FailureClass::Fatal => {
                    error!(
                        caller = %request.caller,
                        code = ?err.code(),
                        error = %err,
                        elapsed_ms,
                        request = ?request,
                        "Query or update failed (not retryable)"
                    );
                    self.cleanup(lease).await;
                    return Err(err.into());
                }
                FailureClass::Unexpected => {
                    error!(
                        caller = %request.caller,
                        error = %err,
                        elapsed_ms,
                        request = ?request,
                        "Unexpected error during execution"
                    );
                    self.cleanup(lease).await;
                    return Err(DbError::unexpected(err.to_string()));
                }
            }
        }

        let terminated = self.signal.is_set();
        error!(
            caller = %request.caller,
            attempts,
            waited_ms = waited.as_millis() as u64,
            terminated,
            last_error = ?last_error,
            request = ?request,
            "Maximum retries reached or termination requested"
        );
        self.cleanup(lease).await;
        Err(DbError::retry_exhausted(
            attempts,
            waited.as_millis() as u64,
            terminated,
            last_error,
        ))
    }

    /// Make sure the lease holds an open session, acquiring a connection if needed.
    async fn open_session<'a>(
        &self,
        lease: &'a mut Lease<'_, P::Connection>,
    ) -> Result<&'a mut Session<P::Connection>, DriverError> {
        if matches!(lease, Lease::Vacant) {
            let conn = self.pool.acquire().await?;
            debug!(pool_size = self.pool.size(), "Acquired connection");
            *lease = Lease::Owned(Session::new(conn));
        } else if let Lease::Borrowed(session) = lease {
            if !session.is_open() {
                let conn = self.pool.acquire().await?;
                debug!(pool_size = self.pool.size(), "Attached fresh connection to caller session");
                session.attach(conn);
            }
        }
        lease
            .session()
            .ok_or_else(|| DriverError::other("No session available"))
    }

    /// One attempt, rolled back on failure when running in a transaction.
    async fn attempt(
        &self,
        request: &ExecRequest,
        session: &mut Session<P::Connection>,
    ) -> Result<QueryOutcome, DriverError> {
        let result = self.run_statements(request, session).await;
        if result.is_err() && request.lock && session.is_open() {
            if let Err(e) = session.execute("ROLLBACK", &[]).await {
                debug!(error = %e, "Rollback failed");
            }
        }
        result
    }

    async fn run_statements(
        &self,
        request: &ExecRequest,
        session: &mut Session<P::Connection>,
    ) -> Result<QueryOutcome, DriverError> {
        if request.lock {
            session.execute("START TRANSACTION", &[]).await?;
        }

        let mut outcome = QueryOutcome::Empty;

        if let Some(select) = &request.select {
            if select.is_locking_read() {
                session.autocommit(false).await?;
            }
            session.execute(&select.sql, &select.params).await?;
            outcome = match request.fetch {
                FetchMode::One => QueryOutcome::Row(session.fetch_one()),
                FetchMode::All => QueryOutcome::Rows(session.fetch_all()),
            };
        }

        match &request.writes {
            Some(Writes::Batch { sql, param_sets }) if !param_sets.is_empty() => {
                let rows_affected = session.execute_many(sql, param_sets).await?;
                info!(
                    caller = %request.caller,
                    sql = %sql,
                    params = ?param_sets,
                    rows_affected,
                    "Executed batched update"
                );
                outcome = QueryOutcome::RowsAffected(rows_affected);
            }
            Some(Writes::Sequential(statements)) => {
                for statement in statements {
                    let rows_affected = session.execute(&statement.sql, &statement.params).await?;
                    info!(
                        caller = %request.caller,
                        sql = %statement.sql,
                        params = ?statement.params,
                        rows_affected,
                        "Executed update"
                    );
                    outcome = QueryOutcome::RowsAffected(rows_affected);
                }
            }
            _ => {}
        }

        if request.lock {
            session.execute("COMMIT", &[]).await?;
        }

        Ok(outcome)
    }

    /// Close and release the current connection after a connection loss.
    async fn discard_connection(&self, lease: &mut Lease<'_, P::Connection>) {
        let conn = match std::mem::replace(lease, Lease::Vacant) {
            Lease::Vacant => None,
            Lease::Owned(session) => session.into_connection(),
            Lease::Borrowed(session) => {
                let conn = session.detach();
                *lease = Lease::Borrowed(session);
                conn
            }
        };
        if let Some(mut conn) = conn {
            conn.close().await;
            self.pool.release(conn).await;
            debug!("Discarded lost connection");
        }
    }

    /// Release a connection this call acquired; caller-supplied sessions are left alone.
    async fn cleanup(&self, lease: Lease<'_, P::Connection>) {
        if let Lease::Owned(session) = lease {
            if session.autocommit_disabled() {
                self.reset_connection(session).await;
            } else if let Some(conn) = session.into_connection() {
                self.pool.release(conn).await;
            }
        }
    }

    /// Sleep for `wait`, returning early if termination is requested.
    async fn backoff(&self, wait: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = self.signal.wait() => {
                debug!("Termination requested during backoff");
            }
        }
    }
}
