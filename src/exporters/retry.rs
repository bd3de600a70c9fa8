// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(2);

/// Linear backoff between send attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub backoff_unit: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_unit: DEFAULT_BACKOFF_UNIT,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: Option<usize>, backoff_unit: Option<Duration>) -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: max_attempts.unwrap_or(defaults.max_attempts).max(1),
            backoff_unit: backoff_unit.unwrap_or(defaults.backoff_unit),
        }
    }

    /// Delay to wait after the given failed attempt, numbered from 1.
    pub fn delay_after(&self, attempt: usize) -> Duration {
        self.backoff_unit
            .saturating_mul(u32::try_from(attempt).unwrap_or(u32::MAX))
    }
}
