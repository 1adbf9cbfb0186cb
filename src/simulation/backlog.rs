//! Jobs against the simulated endpoint, and a work source handing them out.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::clock::Clock;
use crate::error::Result;
use crate::scheduler::{Context, ExecutionReport, Params, RequestError, SharedParams, Task, TaskResult, WorkSource};

use super::endpoint::{Admission, RateLimitedEndpoint};

/// Ids of the jobs that have completed.
pub type Completed = Arc<Mutex<BTreeSet<u64>>>;

/// One job: a request of some cost against the endpoint.
pub struct SimulatedParams {
    id: u64,
    cost: u64,
    endpoint: Arc<RateLimitedEndpoint>,
    attempts: AtomicU32,
    completed: Completed,
}

impl SimulatedParams {
    pub fn new(id: u64, cost: u64, endpoint: Arc<RateLimitedEndpoint>, completed: Completed) -> Self {
        Self {
            id,
            cost,
            endpoint,
            attempts: AtomicU32::new(0),
            completed,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of tasks created for this job so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Params<u64> for SimulatedParams {
    fn cost(&self) -> u64 {
        self.cost
    }

    fn create_task(&self) -> Box<dyn Task<u64>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Box::new(SimulatedTask {
            id: self.id,
            cost: self.cost,
            endpoint: self.endpoint.clone(),
            completed: self.completed.clone(),
        })
    }
}

struct SimulatedTask {
    id: u64,
    cost: u64,
    endpoint: Arc<RateLimitedEndpoint>,
    completed: Completed,
}

#[async_trait]
impl Task<u64> for SimulatedTask {
    async fn run(&mut self) -> Option<TaskResult<u64>> {
        tokio::task::yield_now().await;

        let result = match self.endpoint.call(self.cost) {
            Admission::Accepted { remaining } => {
                let id = self.id;
                let completed = self.completed.clone();
                TaskResult::success(id)
                    .with_limits(self.endpoint.advertised_limits(remaining))
                    .with_finalizer(move || async move {
                        completed.lock().unwrap_or_else(PoisonError::into_inner).insert(id);
                    })
            }
            Admission::Throttled => TaskResult::failure(RequestError::retryable("429 Too Many Requests"))
                .with_limits(self.endpoint.advertised_limits(0)),
            Admission::Unavailable => TaskResult::failure(RequestError::retryable("503 Service Unavailable")),
        };

        Some(result)
    }
}

/// One executed round, stamped with the time since the source was created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundRecord {
    pub elapsed: Duration,
    pub report: ExecutionReport,
}

/// Shared list of executed rounds.
pub type History = Arc<Mutex<Vec<RoundRecord>>>;

/// Hands out unfinished jobs in batches.
pub struct BacklogSource {
    /// Jobs not yet seen completed. Pruned on every `get_params`.
    jobs: Vec<Arc<SimulatedParams>>,
    total_jobs: usize,
    batch_size: usize,
    completed: Completed,
    history: History,
    clock: Arc<dyn Clock>,
    started: Instant,
}

impl BacklogSource {
    /// Create `costs.len()` jobs with the given costs against `endpoint`.
    pub fn new(costs: &[u64], batch_size: usize, endpoint: Arc<RateLimitedEndpoint>, clock: Arc<dyn Clock>) -> Self {
        let completed: Completed = Arc::new(Mutex::new(BTreeSet::new()));
        let jobs: Vec<_> = costs
            .iter()
            .enumerate()
            .map(|(id, &cost)| Arc::new(SimulatedParams::new(id as u64, cost, endpoint.clone(), completed.clone())))
            .collect();
        let started = clock.now();

        Self {
            total_jobs: jobs.len(),
            jobs,
            batch_size: batch_size.max(1),
            completed,
            history: Arc::new(Mutex::new(Vec::new())),
            clock,
            started,
        }
    }

    pub fn completed(&self) -> Completed {
        self.completed.clone()
    }

    pub fn history(&self) -> History {
        self.history.clone()
    }

    /// Size of the backlog when it was created.
    pub fn total_jobs(&self) -> usize {
        self.total_jobs
    }

    /// Jobs not completed yet.
    pub fn outstanding(&self) -> usize {
        self.total_jobs.saturating_sub(self.completed_count())
    }

    fn completed_count(&self) -> usize {
        self.completed.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl WorkSource for BacklogSource {
    type Output = u64;

    async fn get_params(&mut self, _context: &Context) -> Result<Vec<SharedParams<u64>>> {
        let completed = self.completed.lock().unwrap_or_else(PoisonError::into_inner).clone();
        self.jobs.retain(|job| !completed.contains(&job.id()));

        let batch: Vec<SharedParams<u64>> = self
            .jobs
            .iter()
            .take(self.batch_size)
            .map(|job| job.clone() as SharedParams<u64>)
            .collect();

        debug!(batch = batch.len(), outstanding = self.jobs.len(), "Handing out backlog batch");
        Ok(batch)
    }

    fn finalize(&mut self, report: &ExecutionReport) {
        let elapsed = self.clock.now().saturating_duration_since(self.started);
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RoundRecord {
                elapsed,
                report: report.clone(),
            });
    }
}
