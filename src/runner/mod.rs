//! Runner module - drives schedulers over time.
//!
//! This module provides:
//! - SchedulerPool for multiplexing many schedulers behind one wait loop
//! - Combined wake-up times so urgent deadlines are never masked

mod pool;

pub use pool::SchedulerPool;
