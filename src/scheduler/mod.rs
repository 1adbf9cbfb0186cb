//! Scheduler module for rate-limited request execution.
//!
//! This module provides:
//! - **Timer**: when a scheduler should next act, and how timers combine.
//! - **Limits**: rate limit state learned from service responses.
//! - **Service**: retry/backoff policy and the next-delay calculation.
//! - **Requests**: `Params`, `Task` and `TaskResult`, the unit of work.
//! - **Execution**: running a batch without sleeping, with retries.
//! - **Scheduler**: the round-by-round driver for one service.
//!
//! # Architecture
//!
//! The scheduler uses a polling model:
//! 1. The caller invokes `Scheduler::process` once the scheduler's timer is ready
//! 2. The scheduler asks its `WorkSource` for the requests to run
//! 3. `execute_no_sleep` runs as many as the known budget allows, retrying failures
//! 4. The learned limits are kept and a new timer is computed
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pacer::clock::SystemClock;
//! use pacer::scheduler::{Context, Scheduler, Service};
//!
//! let mut scheduler = Scheduler::new("embeddings", source, Service::new(), Arc::new(SystemClock));
//! let context = Context::new(Duration::from_secs(10));
//!
//! loop {
//!     scheduler.process(&context).await;
//!     let wait = scheduler.timer().remaining_time(context.naptime, scheduler.clock());
//!     tokio::time::sleep(wait).await;
//! }
//! ```

mod driver;
mod execute;
mod limits;
mod request;
mod service;
mod timer;

#[cfg(test)]
mod testing;

pub use driver::{Context, ReadyTime, Schedule, Scheduler, WorkSource, get_combined_ready_time};
pub use execute::{ExecutionReport, SharedParams, execute_no_sleep, execute_specified};
pub use limits::{LIMIT_WINDOW, Limits, Total};
pub use request::{Finalizer, Params, PendingTask, RequestError, Task, TaskResult};
pub use service::{Service, ServicePolicy};
pub use timer::Timer;
