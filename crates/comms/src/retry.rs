//! Retry policy with fixed or exponential backoff.
//!
//! One policy object is shared by the delivery layer (per-handler retries)
//! and the protocol layer (store/routing retries), so a transient failure is
//! never amplified by two independently-configured loops.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1000;
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// Backoff shape between retry attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Constant delay: `base` between every attempt.
    Fixed,
    /// Doubling delay: `base * 2^attempt`.
    #[default]
    Exponential,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first try.
    pub max_retries: u32,
    /// Backoff shape.
    pub backoff: BackoffKind,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Cap applied to the computed delay.
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 - 1.0) added to spread retries; 0 keeps delays exact.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: BackoffKind::default(),
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with custom bounds.
    pub fn new(max_retries: u32, backoff: BackoffKind, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            backoff,
            base_delay_ms,
            ..Self::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Cap the computed delay.
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Set the jitter factor.
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Total invocation attempts this policy allows.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the retry following `attempt` (0-indexed).
    ///
    /// Exponential: `min(base * 2^attempt, max) + jitter`. Fixed: `base`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let raw = match self.backoff {
            BackoffKind::Fixed => self.base_delay_ms,
            BackoffKind::Exponential => self
                .base_delay_ms
                .saturating_mul(2u64.saturating_pow(attempt)),
        };
        let capped = raw.min(self.max_delay_ms);

        let jitter = if self.jitter_factor > 0.0 {
            let range = (capped as f64) * self.jitter_factor;
            rand::thread_rng().gen_range(0.0..range.max(f64::MIN_POSITIVE)) as u64
        } else {
            0
        };

        Duration::from_millis(capped.saturating_add(jitter))
    }
}
