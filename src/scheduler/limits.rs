//! Rate limit state learned from a remote service.
//!
//! A service's limits are rarely published up front. `Limits` starts from
//! whatever is known (possibly nothing) and is refined from the limits reported
//! alongside individual responses.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Length of the window a `Total` budget applies to.
pub const LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Headroom applied on top of the even per-request spacing.
const SAFETY_MARGIN: f64 = 1.1;

/// Total capacity of a service per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Total {
    /// Nothing is known about the capacity.
    #[default]
    Unknown,
    /// The service is not rate limited.
    Unlimited,
    /// At most this many units per window.
    Bounded(u64),
}

/// Snapshot of a service's rate limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub total: Total,

    /// Budget left before the limit is hit.
    ///
    /// Only shrinks while requests are executing, and is cleared afterwards
    /// because nothing is known about how long it stays valid.
    pub remaining: Option<u64>,

    /// Multiplier for exponential backoff. Never below 1.
    pub delay_factor: f64,
}

impl Limits {
    pub fn new(total: Total) -> Self {
        Self {
            total,
            remaining: None,
            delay_factor: 1.0,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(Total::Unlimited)
    }

    pub fn bounded(total: u64) -> Self {
        Self::new(Total::Bounded(total))
    }

    pub fn with_remaining(mut self, remaining: u64) -> Self {
        self.remaining = Some(remaining);
        self
    }

    pub fn with_delay_factor(mut self, delay_factor: f64) -> Self {
        self.delay_factor = delay_factor;
        self
    }

    /// Delay needed before spending `request_cost`, or `None` if it can be
    /// spent right away.
    pub fn base_delay(&self, request_cost: u64, guess: Duration) -> Option<Duration> {
        if self.total == Total::Unlimited {
            return None;
        }

        if self.remaining.is_some_and(|remaining| request_cost <= remaining) {
            return None;
        }

        match self.total {
            Total::Bounded(total) => Some(LIMIT_WINDOW.div_f64(total.max(1) as f64).mul_f64(SAFETY_MARGIN)),
            Total::Unknown | Total::Unlimited => Some(guess),
        }
    }

    /// Take the latest total if one was reported.
    pub fn update_total(&mut self, latest: &Limits) -> &mut Self {
        if latest.total != Total::Unknown {
            self.total = latest.total;
        }

        self
    }

    /// Merge a reported remaining budget, keeping the smallest value seen.
    ///
    /// A positive remaining budget means the total is not actually unlimited.
    pub fn update_remaining(&mut self, latest: &Limits) -> &mut Self {
        self.remaining = match (self.remaining, latest.remaining) {
            (None, latest) => latest,
            (Some(current), Some(latest)) => Some(current.min(latest)),
            (Some(current), None) => Some(current),
        };

        if self.total == Total::Unlimited && self.remaining.is_some_and(|remaining| remaining > 0) {
            self.total = Total::Unknown;
        }

        self
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new(Total::Unknown)
    }
}
