//! Simulation module - a rate-limited service and a backlog of jobs for it.
//!
//! This module provides:
//! - RateLimitedEndpoint, a fake service with a fixed budget per window
//! - SimulatedParams, one job against that endpoint
//! - BacklogSource, a work source handing out unfinished jobs in batches
//!
//! Driven by a `MockClock`, a whole backlog drains in virtual time, which is
//! how the `pacer simulate` command and the integration tests exercise the
//! scheduler.

mod backlog;
mod endpoint;

pub use backlog::{BacklogSource, Completed, History, RoundRecord, SimulatedParams};
pub use endpoint::{Admission, EndpointStats, RateLimitedEndpoint};
