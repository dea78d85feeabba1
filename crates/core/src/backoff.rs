//! Capped exponential backoff for status polling.
//!
//! After the first failed poll the loop waits [`BackoffConfig::initial_delay`];
//! each further consecutive failure multiplies the delay until it reaches
//! [`BackoffConfig::max_delay`]. A successful poll resets the sequence.

use std::time::Duration;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Stateful backoff sequence for one polling loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            current: None,
        }
    }

    /// Delay to wait after another consecutive failure.
    pub fn next(&mut self) -> Duration {
        let delay = match self.current {
            None => self.config.initial_delay.min(self.config.max_delay),
            Some(current) => next_delay(current, &self.config),
        };
        self.current = Some(delay);
        delay
    }

    /// Back to the base delay after a success.
    pub fn reset(&mut self) {
        self.current = None;
    }

    /// The most recently returned delay, if any failure is outstanding.
    pub fn current(&self) -> Option<Duration> {
        self.current
    }
}
