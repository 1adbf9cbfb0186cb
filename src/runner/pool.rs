//! Driving many schedulers from one loop.
//!
//! Each scheduler keeps its own timer. The pool combines them so it wakes once
//! at the point that actually matters instead of at every scheduler's instant.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::scheduler::{Context, ReadyTime, Schedule, Timer, get_combined_ready_time};

/// A set of independent schedulers sharing one wait loop.
pub struct SchedulerPool {
    schedulers: Vec<Box<dyn Schedule>>,
    clock: Arc<dyn Clock>,
    context: Context,
}

impl SchedulerPool {
    pub fn new(clock: Arc<dyn Clock>, context: Context) -> Self {
        Self {
            schedulers: Vec::new(),
            clock,
            context,
        }
    }

    pub fn add(&mut self, scheduler: impl Schedule + 'static) {
        debug!(scheduler = scheduler.name(), "Adding scheduler to pool");
        self.schedulers.push(Box::new(scheduler));
    }

    pub fn len(&self) -> usize {
        self.schedulers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedulers.is_empty()
    }

    /// Give every ready scheduler one round. Returns how many ran.
    pub async fn tick(&mut self) -> usize {
        let mut processed = 0;
        for scheduler in self.schedulers.iter_mut() {
            if scheduler.process(&self.context).await {
                processed += 1;
            }
        }
        processed
    }

    /// The combined timer of all schedulers.
    pub fn next_timer(&self) -> Option<Timer> {
        Timer::combine(self.schedulers.iter().map(|scheduler| scheduler.timer()))
    }

    /// How long to wait before the next tick.
    pub fn next_wait(&self) -> Duration {
        let naptime = self.context.naptime;
        self.next_timer()
            .map_or(naptime, |timer| timer.remaining_time(naptime, self.clock.as_ref()))
    }

    /// When the earliest urgent scheduler wants to run.
    pub fn ready_time(&self) -> ReadyTime {
        get_combined_ready_time(self.schedulers.iter().map(|scheduler| scheduler.as_ref()))
    }

    /// Tick and wait until `keep_going` says stop or `max_ticks` is reached.
    ///
    /// Returns the number of ticks run.
    pub async fn run_while(&mut self, mut keep_going: impl FnMut() -> bool, max_ticks: usize) -> usize {
        let mut ticks = 0;
        while ticks < max_ticks && keep_going() {
            self.tick().await;
            ticks += 1;

            let wait = self.next_wait();
            self.clock.sleep(wait).await;
        }
        ticks
    }

    /// Run until a shutdown message arrives or the sender is dropped.
    pub async fn run(&mut self, mut shutdown: mpsc::Receiver<()>) {
        info!(schedulers = self.schedulers.len(), "Scheduler pool started");

        loop {
            let processed = self.tick().await;
            let wait = self.next_wait();
            debug!(processed, wait_ms = wait.as_millis() as u64, "Pool tick complete");

            tokio::select! {
                _ = self.clock.sleep(wait) => {}
                _ = shutdown.recv() => {
                    info!("Scheduler pool shutting down");
                    break;
                }
            }
        }
    }
}
