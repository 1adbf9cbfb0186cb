//! A fake rate-limited service.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::trace;

use crate::clock::Clock;
use crate::scheduler::{LIMIT_WINDOW, Limits};

/// Outcome of one call to the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The call was served; `remaining` budget is left in the window.
    Accepted { remaining: u64 },
    /// The window budget is spent.
    Throttled,
    /// A transient failure unrelated to the budget.
    Unavailable,
}

/// Call counters of an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EndpointStats {
    pub calls: u64,
    pub accepted: u64,
    pub throttled: u64,
    pub unavailable: u64,
}

struct Window {
    start: Instant,
    used: u64,
    rng: StdRng,
    stats: EndpointStats,
}

/// An endpoint serving at most `capacity` units per window.
pub struct RateLimitedEndpoint {
    capacity: u64,
    failure_rate: f64,
    clock: Arc<dyn Clock>,
    window: Mutex<Window>,
}

impl RateLimitedEndpoint {
    pub fn new(capacity: u64, clock: Arc<dyn Clock>) -> Self {
        let start = clock.now();
        Self {
            capacity,
            failure_rate: 0.0,
            clock,
            window: Mutex::new(Window {
                start,
                used: 0,
                rng: StdRng::seed_from_u64(0),
                stats: EndpointStats::default(),
            }),
        }
    }

    /// Fail this fraction of calls with a transient error, using a seeded RNG.
    pub fn with_failures(mut self, failure_rate: f64, seed: u64) -> Self {
        self.failure_rate = failure_rate.clamp(0.0, 1.0);
        self.window.get_mut().unwrap_or_else(PoisonError::into_inner).rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Spend `cost` units if the current window allows it.
    pub fn call(&self, cost: u64) -> Admission {
        let now = self.clock.now();
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);

        if now >= window.start + LIMIT_WINDOW {
            window.start = now;
            window.used = 0;
        }

        window.stats.calls += 1;

        if self.failure_rate > 0.0 && window.rng.random::<f64>() < self.failure_rate {
            window.stats.unavailable += 1;
            return Admission::Unavailable;
        }

        if window.used + cost > self.capacity {
            window.stats.throttled += 1;
            trace!(cost, used = window.used, "Endpoint throttled call");
            return Admission::Throttled;
        }

        window.used += cost;
        window.stats.accepted += 1;
        Admission::Accepted {
            remaining: self.capacity - window.used,
        }
    }

    /// The limits the endpoint advertises with a reply.
    pub fn advertised_limits(&self, remaining: u64) -> Limits {
        Limits::bounded(self.capacity).with_remaining(remaining)
    }

    pub fn stats(&self) -> EndpointStats {
        self.window.lock().unwrap_or_else(PoisonError::into_inner).stats
    }
}
