//! The top-level scheduler: asks for work, runs it, decides when to come back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::Result;

use super::execute::{ExecutionReport, SharedParams, execute_no_sleep};
use super::service::Service;
use super::timer::Timer;

/// Information passed to a scheduler on every round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    /// How long to nap when there is nothing else to do.
    pub naptime: Duration,
}

impl Context {
    pub fn new(naptime: Duration) -> Self {
        Self { naptime }
    }
}

/// Produces the requests for a scheduler and consumes the round reports.
#[async_trait]
pub trait WorkSource: Send {
    type Output: Send + 'static;

    /// The requests to run this round. An error counts as a failed round.
    async fn get_params(&mut self, context: &Context) -> Result<Vec<SharedParams<Self::Output>>>;

    /// Called with the report of every round that executed requests.
    fn finalize(&mut self, report: &ExecutionReport);
}

/// Anything that can be driven round by round and tells when it wants to run.
#[async_trait]
pub trait Schedule: Send {
    /// Run a round if the timer is ready. Returns whether a round ran.
    async fn process(&mut self, context: &Context) -> bool;

    /// When this scheduler next wants to run.
    fn timer(&self) -> Timer;

    fn name(&self) -> &str;
}

/// A scheduler for requests to one rate-limited service.
///
/// Never sleeps. The caller re-invokes [`Scheduler::process`] once the timer
/// allows it.
pub struct Scheduler<S: WorkSource> {
    name: String,
    source: S,
    service: Service,
    timer: Timer,
    clock: Arc<dyn Clock>,
}

impl<S: WorkSource> Scheduler<S> {
    /// Create a scheduler that is ready to run immediately.
    pub fn new(name: impl Into<String>, source: S, service: Service, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            source,
            service,
            timer: Timer::immediate(),
            clock,
        }
    }

    pub fn with_timer(mut self, timer: Timer) -> Self {
        self.timer = timer;
        self
    }

    pub fn timer(&self) -> Timer {
        self.timer
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Run one round if the timer is ready.
    ///
    /// Failures of the work source or the requests never escape; they only
    /// make the next round come later.
    pub async fn process(&mut self, context: &Context) -> bool {
        if !self.timer.is_ready(self.clock.as_ref()) {
            return false;
        }

        let mut error_count = 0;
        let mut deferred_cost = 0;
        let mut success_count = 0;

        match self.source.get_params(context).await {
            Err(e) => {
                warn!(scheduler = %self.name, error = %e, "Failed to get request params");
                error_count = 1;
            }
            Ok(params) if params.is_empty() => {
                debug!(scheduler = %self.name, "No requests to run");
            }
            Ok(params) => {
                let report = execute_no_sleep(&params, &self.service).await;

                self.source.finalize(&report);
                self.cache_limits(&report);

                error_count = report.error_count();
                deferred_cost = report.deferred_cost;
                success_count = report.success_count;

                debug!(
                    scheduler = %self.name,
                    requests = params.len(),
                    success_count,
                    error_count,
                    deferred_cost,
                    "Executed requests"
                );
            }
        }

        self.timer = self
            .service
            .next_delay(success_count, deferred_cost, error_count, context.naptime, self.clock.as_ref());

        true
    }

    /// Keep what was learned about the limits for the next round.
    fn cache_limits(&mut self, report: &ExecutionReport) {
        let Some(updated) = &report.updated_limits else {
            return;
        };

        match &mut self.service.request_limits {
            Some(limits) => {
                limits.update_total(updated);
                limits.delay_factor = updated.delay_factor;
            }
            None => self.service.request_limits = Some(updated.clone()),
        }
    }
}

#[async_trait]
impl<S: WorkSource> Schedule for Scheduler<S> {
    async fn process(&mut self, context: &Context) -> bool {
        Scheduler::process(self, context).await
    }

    fn timer(&self) -> Timer {
        self.timer
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// When the earliest urgent scheduler wants to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyTime {
    /// Some scheduler wants to run right now.
    Immediate,
    /// The earliest urgent deadline.
    At(Instant),
    /// Nothing is urgent; poll at the ambient rate.
    Idle,
}

/// Combine the ready times of several schedulers.
///
/// Only urgent timers are considered. Non-urgent work is picked up whenever
/// the caller next polls.
pub fn get_combined_ready_time<'a, I, S>(schedulers: I) -> ReadyTime
where
    I: IntoIterator<Item = &'a S>,
    S: Schedule + ?Sized + 'a,
{
    let mut earliest: Option<Instant> = None;

    for scheduler in schedulers {
        let timer = scheduler.timer();
        if !timer.urgent {
            continue;
        }

        match timer.time {
            None => return ReadyTime::Immediate,
            Some(time) => earliest = Some(earliest.map_or(time, |e| e.min(time))),
        }
    }

    earliest.map_or(ReadyTime::Idle, ReadyTime::At)
}
