//! When a scheduler should next act.

use std::time::{Duration, Instant};

use crate::clock::Clock;

/// Slack added to urgent waits so a wake-up never lands just before the deadline.
const WAKE_SLACK: Duration = Duration::from_millis(1);

/// A point after which an action should be taken.
///
/// | time     | urgent | meaning                           |
/// |----------|--------|-----------------------------------|
/// | `None`   | true   | act immediately                   |
/// | `None`   | false  | act any time                      |
/// | `Some(t)`| true   | act as soon as `t` has passed     |
/// | `Some(t)`| false  | act any time after `t`            |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    /// Deadline, or `None` when any time will do.
    pub time: Option<Instant>,
    /// Whether to act as soon as possible once `time` passes.
    pub urgent: bool,
}

impl Timer {
    pub fn new(time: Option<Instant>, urgent: bool) -> Self {
        Self { time, urgent }
    }

    /// A timer that is ready and urgent right now.
    pub fn immediate() -> Self {
        Self::new(None, true)
    }

    /// A timer firing at a fixed instant.
    pub fn at(time: Instant, urgent: bool) -> Self {
        Self::new(Some(time), urgent)
    }

    /// A timer `delay` from now, or with no deadline when `delay` is `None`.
    pub fn create_delay(delay: Option<Duration>, urgent: bool, clock: &dyn Clock) -> Self {
        let time = delay.map(|delay| clock.now() + delay);
        Self::new(time, urgent)
    }

    pub fn is_ready(&self, clock: &dyn Clock) -> bool {
        match self.time {
            None => true,
            Some(time) => time <= clock.now(),
        }
    }

    pub fn is_ready_and_urgent(&self, clock: &dyn Clock) -> bool {
        self.is_ready(clock) && self.urgent
    }

    /// How long to wait before acting, capped at `max_delay`.
    ///
    /// Non-urgent timers have no hard deadline, so the caller may wait as long
    /// as it tolerates.
    pub fn remaining_time(&self, max_delay: Duration, clock: &dyn Clock) -> Duration {
        if !self.urgent {
            return max_delay;
        }

        match self.time {
            None => Duration::ZERO,
            Some(time) => (time + WAKE_SLACK).saturating_duration_since(clock.now()).min(max_delay),
        }
    }

    /// Combine timers into the single point at which to next act.
    ///
    /// Given `(1, false)`, `(2, false)` and `(3, true)` it is wasteful to wake
    /// at 1, 2 and 3. Only the urgent timer forces a wake-up, so the result is
    /// `(3, true)`. Returns `None` when there are no timers.
    pub fn combine(timers: impl IntoIterator<Item = Timer>) -> Option<Timer> {
        let timers: Vec<Timer> = timers.into_iter().collect();

        for urgency in [true, false] {
            let mut class = timers.iter().filter(|timer| timer.urgent == urgency).peekable();
            if class.peek().is_none() {
                continue;
            }

            let mut earliest: Option<Instant> = None;
            for timer in class {
                match timer.time {
                    None => return Some(Timer::new(None, urgency)),
                    Some(time) => earliest = Some(earliest.map_or(time, |e| e.min(time))),
                }
            }

            if let Some(time) = earliest {
                return Some(Timer::at(time, urgency));
            }
        }

        None
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::immediate()
    }
}
