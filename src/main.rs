//! db-exec - Main entry point.
//!
//! Runs one request against MySQL with retry and prints the outcome as JSON,
//! or monitors the connection pool until interrupted.

use clap::Parser;
use db_exec::config::{Config, DatabaseConfig, Plan};
use db_exec::db::{
    MySqlConnectionPool, PoolMonitor, QueryExecutor, RetryPolicy, connect_with_retry,
};
use db_exec::error::{DbError, DbResult};
use db_exec::models::ExecRequest;
use db_exec::shutdown::TerminationSignal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // stdout carries the JSON outcome
    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run_exec(
    pool: Arc<MySqlConnectionPool>,
    request: ExecRequest,
    policy: RetryPolicy,
    signal: TerminationSignal,
) -> DbResult<()> {
    let executor = QueryExecutor::with_policy(pool, policy, signal);

    let executed = executor.execute(&request).await?;
    executor.reset_connection(executed.session).await;

    let json = serde_json::to_string_pretty(&executed.outcome)
        .map_err(|e| DbError::unexpected(format!("Failed to encode outcome: {}", e)))?;
    println!("{}", json);
    Ok(())
}

async fn run_monitor(
    pool: Arc<MySqlConnectionPool>,
    db_config: &DatabaseConfig,
    interval: Duration,
    signal: TerminationSignal,
) -> DbResult<()> {
    let monitor = PoolMonitor::spawn(
        pool,
        db_config.pool_options.min_connections_or_default(),
        db_config.pool_options.max_connections_or_default(),
        interval,
        signal.clone(),
    )?;
    info!(
        interval_secs = interval.as_secs(),
        "Pool monitor running, press Ctrl-C to stop"
    );

    signal.wait().await;
    monitor.join().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!("Starting db-exec v{}", env!("CARGO_PKG_VERSION"));

    let signal = TerminationSignal::new();
    let ctrl_c = signal.set_on_ctrl_c();

    // Reject bad arguments before dialing the database
    let db_config = config.parse_database()?;
    let plan = config.plan()?;

    let pool = Arc::new(
        connect_with_retry(&db_config, config.reconnect_interval_duration(), &signal).await?,
    );

    let result = match plan {
        Plan::Exec { request, policy } => {
            run_exec(Arc::clone(&pool), request, policy, signal.clone()).await
        }
        Plan::Monitor { interval } => {
            run_monitor(Arc::clone(&pool), &db_config, interval, signal.clone()).await
        }
    };

    pool.close().await;
    signal.set();
    let _ = ctrl_c.await;

    if let Err(e) = result {
        error!(error = %e, "db-exec failed");
        if let Some(suggestion) = e.suggestion() {
            eprintln!("Suggestion: {}", suggestion);
        }
        return Err(e.into());
    }

    info!("Shutdown complete");
    Ok(())
}
