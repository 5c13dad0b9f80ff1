//! Periodic pool status sampling.
//!
//! The monitor runs as a background task: every `interval` it records the
//! pool's size, idle count and the highest size seen so far, keeps the latest
//! sample for readers and logs it. It stops as soon as the termination signal
//! is set.

use crate::db::connection::ConnectionPool;
use crate::error::{DbError, DbResult};
use crate::shutdown::TerminationSignal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock as TokioRwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One pool sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Connections currently open (idle and in use).
    pub current: u32,
    pub idle: usize,
    /// Largest `current` observed since the monitor started.
    pub highest: u32,
    pub min_connections: u32,
    pub max_connections: u32,
    pub checked_at: DateTime<Utc>,
}

/// Handle to a running monitor task.
pub struct PoolMonitor {
    status: Arc<TokioRwLock<Option<PoolStatus>>>,
    handle: JoinHandle<()>,
}

impl PoolMonitor {
    /// Start sampling `pool` every `interval` until `signal` is set.
    ///
    /// The first sample is taken immediately. A zero `interval` is rejected.
    pub fn spawn<P>(
        pool: Arc<P>,
        min_connections: u32,
        max_connections: u32,
        interval: Duration,
        signal: TerminationSignal,
    ) -> DbResult<Self>
    where
        P: ConnectionPool + 'static,
    {
        if interval.is_zero() {
            return Err(DbError::config("Pool monitor interval must be greater than 0"));
        }

        let status = Arc::new(TokioRwLock::new(None));
        let shared = Arc::clone(&status);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut highest = 0;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = signal.wait() => {
                        debug!("Pool monitor stopping");
                        break;
                    }
                }

                let status = sample(&*pool, &mut highest, min_connections, max_connections);
                info!(
                    current = status.current,
                    idle = status.idle,
                    highest = status.highest,
                    min = status.min_connections,
                    max = status.max_connections,
                    "Pool status"
                );
                *shared.write().await = Some(status);
            }
        });

        Ok(Self { status, handle })
    }

    /// Latest sample, `None` before the first tick.
    pub async fn status(&self) -> Option<PoolStatus> {
        self.status.read().await.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to exit after the signal was set.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Pool monitor task failed");
        }
    }
}

/// Take one sample, updating the running maximum.
pub fn sample<P: ConnectionPool + ?Sized>(
    pool: &P,
    highest: &mut u32,
    min_connections: u32,
    max_connections: u32,
) -> PoolStatus {
    let current = pool.size();
    *highest = (*highest).max(current);
    PoolStatus {
        current,
        idle: pool.idle(),
        highest: *highest,
        min_connections,
        max_connections,
        checked_at: Utc::now(),
    }
}
