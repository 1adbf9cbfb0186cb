//! Scripted request doubles shared by the scheduler tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::limits::Limits;
use super::request::{Params, RequestError, Task, TaskResult};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Value(u32),
    ValueWithLimits(u32, Limits),
    Error(RequestError),
}

/// Values finalized so far, in finalize order.
pub type Finalized = Arc<Mutex<Vec<u32>>>;

/// Params whose n-th attempt returns the n-th scripted reply, and no result
/// once the script runs out.
pub struct ScriptedParams {
    cost: u64,
    replies: Vec<Reply>,
    attempts: Arc<AtomicUsize>,
    finalized: Finalized,
}

impl ScriptedParams {
    pub fn new(cost: u64, replies: Vec<Reply>, finalized: &Finalized) -> Self {
        Self {
            cost,
            replies,
            attempts: Arc::new(AtomicUsize::new(0)),
            finalized: finalized.clone(),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Params<u32> for ScriptedParams {
    fn cost(&self) -> u64 {
        self.cost
    }

    fn create_task(&self) -> Box<dyn Task<u32>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedTask {
            reply: self.replies.get(attempt).cloned(),
            finalized: self.finalized.clone(),
        })
    }
}

struct ScriptedTask {
    reply: Option<Reply>,
    finalized: Finalized,
}

#[async_trait]
impl Task<u32> for ScriptedTask {
    async fn run(&mut self) -> Option<TaskResult<u32>> {
        tokio::task::yield_now().await;

        let (result, value) = match self.reply.take()? {
            Reply::Value(value) => (TaskResult::success(value), Some(value)),
            Reply::ValueWithLimits(value, limits) => (TaskResult::success(value).with_limits(limits), Some(value)),
            Reply::Error(error) => (TaskResult::failure(error), None),
        };

        let finalized = self.finalized.clone();
        Some(result.with_finalizer(move || async move {
            if let Some(value) = value {
                finalized.lock().unwrap().push(value);
            }
        }))
    }
}

pub fn finalized() -> Finalized {
    Arc::new(Mutex::new(Vec::new()))
}

/// Params that succeed once with `value`.
pub fn succeeds(cost: u64, value: u32, finalized: &Finalized) -> Arc<dyn Params<u32>> {
    Arc::new(ScriptedParams::new(cost, vec![Reply::Value(value)], finalized))
}

pub fn retryable(message: &str) -> Reply {
    Reply::Error(RequestError::retryable(message))
}

pub fn fatal(message: &str) -> Reply {
    Reply::Error(RequestError::fatal(message))
}
