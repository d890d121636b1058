use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One failed attempt of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// What to do after an attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Run the job again after `delay`.
    Retry { next_attempt: u32, delay: Duration },
    /// Give up; the job is failed for good.
    Exhausted,
}

/// Bounded retry schedule for job handlers.
///
/// Attempt `n` (1-based) that fails is retried after
/// `min(base * 2^(n-1) + jitter, max)` as long as `n < max_attempts`.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Default: 3.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt. Default: 2000 ms.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Ceiling for any single delay. Default: 30000 ms.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    2_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Decide the fate of a job whose attempt `attempt` (1-based) just failed.
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts.max(1) {
            RetryDecision::Exhausted
        } else {
            RetryDecision::Retry {
                next_attempt: attempt + 1,
                delay: self.backoff(attempt),
            }
        }
    }

    /// Delay to wait after failed attempt `attempt`, with 0-25% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(16);
        let base = self.base_delay_ms.saturating_mul(1u64 << exp);
        let jitter = if base >= 4 {
            rand::rng().random_range(0..=base / 4)
        } else {
            0
        };
        Duration::from_millis(base.saturating_add(jitter).min(self.max_delay_ms))
    }
}

/// Ordered record of failed attempts for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryHistory(Vec<RetryAttempt>);

impl RetryHistory {
    pub fn record(&mut self, attempt: u32, error: impl Into<String>) {
        self.0.push(RetryAttempt {
            attempt,
            error: error.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn attempts(&self) -> &[RetryAttempt] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first_failed_at(&self) -> Option<DateTime<Utc>> {
        self.0.first().map(|a| a.timestamp)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.0.last().map(|a| a.error.as_str())
    }
}
