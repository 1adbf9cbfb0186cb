//! Pacer - adaptive scheduling of requests against rate-limited services
//!
//! Pacer learns a service's rate limits from the responses it gets, runs as
//! much work as the known budget allows, and backs off exponentially when it
//! runs into the limit.

pub mod clock;
pub mod config;
pub mod error;
pub mod runner;
pub mod scheduler;
pub mod simulation;

pub use error::{PacerError, Result};
