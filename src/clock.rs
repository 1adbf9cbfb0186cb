//! Injectable time source.
//!
//! Everything that needs "now" takes a [`Clock`] instead of reading the system
//! time directly, so schedulers can be driven deterministically in tests with a
//! [`MockClock`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;

/// Future returned by [`Clock::sleep`].
pub type Sleep = BoxFuture<'static, ()>;

/// A monotonic time source that can also wait.
pub trait Clock: Send + Sync + 'static {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// A future that completes once `duration` has passed on this clock.
    fn sleep(&self, duration: Duration) -> Sleep;
}

/// Real time, backed by the Tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Virtual time that only moves when told to.
///
/// Sleeping on a `MockClock` advances it by the requested duration and
/// completes immediately. Clones share the same virtual time.
#[derive(Debug, Clone)]
pub struct MockClock {
    origin: Instant,
    elapsed_nanos: Arc<AtomicU64>,
}

impl MockClock {
    /// Create a clock whose origin is the current system instant.
    pub fn new() -> Self {
        Self::with_origin(Instant::now())
    }

    /// Create a clock with a fixed origin.
    pub fn with_origin(origin: Instant) -> Self {
        Self {
            origin,
            elapsed_nanos: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The instant this clock started at.
    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// Move virtual time forward.
    pub fn advance(&self, delta: Duration) {
        let nanos = u64::try_from(delta.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Virtual time elapsed since the origin.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos.load(Ordering::SeqCst))
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        self.advance(duration);
        Box::pin(futures::future::ready(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_clock_starts_at_origin() {
        let origin = Instant::now();
        let clock = MockClock::with_origin(origin);
        assert_eq!(clock.now(), origin);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::new();
        clock.advance(Duration::from_secs(10));
        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.elapsed(), Duration::from_millis(10_500));
        assert_eq!(clock.now(), clock.origin() + Duration::from_millis(10_500));
    }

    #[test]
    fn test_mock_clock_clones_share_time() {
        let clock = MockClock::new();
        let other = clock.clone();
        other.advance(Duration::from_secs(3));
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_mock_clock_sleep_advances() {
        let clock = MockClock::new();
        clock.sleep(Duration::from_secs(30)).await;
        assert_eq!(clock.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_system_clock_sleep() {
        let clock = SystemClock;
        let start = clock.now();
        clock.sleep(Duration::from_millis(5)).await;
        assert!(clock.now() >= start + Duration::from_millis(5));
    }
}
