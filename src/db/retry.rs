//! Retry policy for the query executor.
//!
//! Failures are classified by MySQL error number into three classes
//! ([`FailureClass`]). Retryable failures are retried with exponential backoff
//! plus uniform jitter, bounded by an attempt budget and a cumulative wait
//! budget.

use crate::error::DriverError;
use rand::Rng;
use std::collections::BTreeSet;
use std::time::Duration;

/// `ER_LOCK_WAIT_TIMEOUT`: lock wait timeout exceeded.
pub const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;
/// `ER_LOCK_DEADLOCK`: deadlock found when trying to get lock.
pub const ER_LOCK_DEADLOCK: u16 = 1213;
/// `CR_SERVER_GONE_ERROR`: MySQL server has gone away.
pub const CR_SERVER_GONE_ERROR: u16 = 2006;
/// `CR_SERVER_LOST`: lost connection to MySQL server during query.
pub const CR_SERVER_LOST: u16 = 2013;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.5;
pub const DEFAULT_WAIT_BUDGET_SECS: u64 = 30;

/// How the executor reacts to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Back off and try again. When `connection_lost` is set the current
    /// connection is discarded and the next attempt acquires a fresh one.
    Retryable { connection_lost: bool },
    /// A database error outside the retryable set.
    Fatal,
    /// A failure that did not come from the database.
    Unexpected,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub growth_factor: f64,
    /// Upper bound on the cumulative time spent in backoff.
    pub wait_budget: Duration,
    pub retryable_codes: BTreeSet<u16>,
    /// Subset of `retryable_codes` meaning the connection itself is dead.
    pub connection_lost_codes: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            growth_factor: DEFAULT_GROWTH_FACTOR,
            wait_budget: Duration::from_secs(DEFAULT_WAIT_BUDGET_SECS),
            retryable_codes: BTreeSet::from([
                ER_LOCK_WAIT_TIMEOUT,
                ER_LOCK_DEADLOCK,
                CR_SERVER_GONE_ERROR,
                CR_SERVER_LOST,
            ]),
            connection_lost_codes: BTreeSet::from([CR_SERVER_GONE_ERROR, CR_SERVER_LOST]),
        }
    }
}

impl RetryPolicy {
    /// Classify a failed attempt.
    pub fn classify(&self, err: &DriverError) -> FailureClass {
        match err.code() {
            Some(code) if self.retryable_codes.contains(&code) => FailureClass::Retryable {
                connection_lost: self.connection_lost_codes.contains(&code),
            },
            Some(_) => FailureClass::Fatal,
            None => FailureClass::Unexpected,
        }
    }

    /// Backoff before the attempt following failure number `attempt` (1-based):
    /// `base * growth^attempt + U(0, 2 * base)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..=1.0);
        self.backoff_with_jitter(attempt, jitter)
    }

    /// Deterministic backoff; `jitter` is the fraction of the `2 * base` range.
    pub fn backoff_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = base * self.growth_factor.powi(exponent) + jitter.clamp(0.0, 1.0) * 2.0 * base;
        Duration::try_from_secs_f64(secs).unwrap_or(self.wait_budget)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }
        if self.wait_budget.is_zero() {
            return Err("wait_budget must be greater than 0".to_string());
        }
        if !self.growth_factor.is_finite() || self.growth_factor < 1.0 {
            return Err(format!(
                "growth_factor must be a finite number >= 1.0 (got {})",
                self.growth_factor
            ));
        }
        if !self
            .connection_lost_codes
            .is_subset(&self.retryable_codes)
        {
            return Err("connection_lost_codes must also be retryable".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.wait_budget, Duration::from_secs(30));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_classify_retryable_codes() {
        let policy = RetryPolicy::default();
        for code in [ER_LOCK_DEADLOCK, ER_LOCK_WAIT_TIMEOUT] {
            assert_eq!(
                policy.classify(&DriverError::database(code, "busy")),
                FailureClass::Retryable {
                    connection_lost: false
                }
            );
        }
        for code in [CR_SERVER_GONE_ERROR, CR_SERVER_LOST] {
            assert_eq!(
                policy.classify(&DriverError::database(code, "gone")),
                FailureClass::Retryable {
                    connection_lost: true
                }
            );
        }
    }

    #[test]
    fn test_classify_fatal_and_unexpected() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.classify(&DriverError::database(1406, "Data too long")),
            FailureClass::Fatal
        );
        assert_eq!(
            policy.classify(&DriverError::other("decode failed")),
            FailureClass::Unexpected
        );
    }

    #[test]
    fn test_backoff_growth() {
        let policy = RetryPolicy::default();
        // 0.5 * 1.5^1 = 0.75
        assert_eq!(policy.backoff_with_jitter(1, 0.0), Duration::from_millis(750));
        // 0.5 * 1.5^2 + 1.0 = 2.125
        assert_eq!(
            policy.backoff_with_jitter(2, 1.0),
            Duration::from_millis(2125)
        );
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let wait = policy.backoff(1);
            assert!(wait >= Duration::from_millis(750));
            assert!(wait <= Duration::from_millis(1750));
        }
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());

        let policy = RetryPolicy {
            wait_budget: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());

        let policy = RetryPolicy {
            growth_factor: 0.5,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());

        let mut policy = RetryPolicy::default();
        policy.connection_lost_codes.insert(9999);
        assert!(policy.validate().is_err());
    }
}
