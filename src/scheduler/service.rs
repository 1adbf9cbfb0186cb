//! Retry and backoff policy for one rate-limited service.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{PacerError, Result};

use super::limits::Limits;
use super::timer::Timer;

/// Static retry and backoff settings for a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePolicy {
    /// Max rounds of retries within one `process` call
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,

    /// Whether to jitter the backoff when requests are deferred
    #[serde(default = "default_jitter")]
    pub jitter: bool,

    /// Delay to assume when nothing is known about the limits, in seconds
    #[serde(default = "default_guess_delay_secs")]
    pub guess_delay_secs: f64,

    /// Upper bound for any computed delay, in seconds
    #[serde(default = "default_delay_max_secs")]
    pub delay_max_secs: f64,
}

fn default_max_retry_count() -> u32 {
    4
}

fn default_jitter() -> bool {
    true
}

fn default_guess_delay_secs() -> f64 {
    1.0
}

fn default_delay_max_secs() -> f64 {
    60.0
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            max_retry_count: default_max_retry_count(),
            jitter: default_jitter(),
            guess_delay_secs: default_guess_delay_secs(),
            delay_max_secs: default_delay_max_secs(),
        }
    }
}

impl ServicePolicy {
    /// Get the guessed delay as a Duration
    pub fn guess_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.guess_delay_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_guess_delay_secs()))
    }

    /// Get the maximum delay as a Duration
    pub fn delay_max(&self) -> Duration {
        Duration::try_from_secs_f64(self.delay_max_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_delay_max_secs()))
    }

    /// Check that the values can be turned into durations and retry counts.
    pub fn validate(&self) -> Result<()> {
        if self.max_retry_count == 0 {
            return Err(PacerError::InvalidConfig(
                "max_retry_count must be at least 1".to_string(),
            ));
        }

        for (name, value) in [
            ("guess_delay_secs", self.guess_delay_secs),
            ("delay_max_secs", self.delay_max_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PacerError::InvalidConfig(format!(
                    "{name} must be a non-negative number of seconds, got {value}"
                )));
            }
        }

        Ok(())
    }
}

/// How to access a given service.
///
/// Holds the limits learned so far. The limits outlive any single round so
/// that knowledge of the service carries over between calls.
#[derive(Debug, Clone, Default)]
pub struct Service {
    pub request_limits: Option<Limits>,
    pub policy: ServicePolicy,
}

impl Service {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a service from a validated policy.
    pub fn from_policy(policy: ServicePolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            request_limits: None,
            policy,
        })
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    pub fn with_max_retry_count(mut self, max_retry_count: u32) -> Self {
        self.policy.max_retry_count = max_retry_count;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.policy.jitter = jitter;
        self
    }

    pub fn with_guess_delay(mut self, guess_delay: Duration) -> Self {
        self.policy.guess_delay_secs = guess_delay.as_secs_f64();
        self
    }

    pub fn with_delay_max(mut self, delay_max: Duration) -> Self {
        self.policy.delay_max_secs = delay_max.as_secs_f64();
        self
    }

    pub fn max_retry_count(&self) -> u32 {
        self.policy.max_retry_count
    }

    pub fn jitter(&self) -> bool {
        self.policy.jitter
    }

    pub fn guess_delay(&self) -> Duration {
        self.policy.guess_delay()
    }

    pub fn delay_max(&self) -> Duration {
        self.policy.delay_max()
    }

    /// When the service should be processed again.
    ///
    /// Outcomes are checked in order: errors, then deferred work, then
    /// successes, then idle.
    pub fn next_delay(
        &self,
        success_count: u64,
        deferred_cost: u64,
        error_count: u64,
        naptime: Duration,
        clock: &dyn Clock,
    ) -> Timer {
        let delay = match &self.request_limits {
            Some(limits) => limits
                .base_delay(deferred_cost, self.guess_delay())
                .map(|base| self.scaled_delay(base, limits.delay_factor)),
            // Nothing is known about the service, nap
            None => Some(naptime),
        };

        let (delay, urgent) = if error_count > 0 {
            // Never retry faster than the ambient poll interval after an error
            (Some(delay.map_or(naptime, |delay| delay.max(naptime))), false)
        } else if deferred_cost > 0 {
            (delay, true)
        } else if success_count > 0 {
            // Check again right away in case more work showed up
            (None, true)
        } else {
            (Some(naptime), false)
        };

        Timer::create_delay(delay, urgent, clock)
    }

    /// Apply the backoff factor, bounded by `delay_max`.
    ///
    /// The bound keeps a service with a very large factor from going unchecked
    /// for a long time.
    fn scaled_delay(&self, base: Duration, delay_factor: f64) -> Duration {
        let delay_max = self.delay_max();
        Duration::try_from_secs_f64(base.as_secs_f64() * delay_factor)
            .unwrap_or(delay_max)
            .min(delay_max)
    }
}
