//! The unit of work: parameters, in-flight tasks and their results.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::task::JoinHandle;

use super::limits::Limits;

/// Failure reported by a single request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RequestError {
    pub message: String,

    /// Whether the request may be retried, e.g. after a 429 Too Many Requests.
    pub retry: bool,
}

impl RequestError {
    pub fn new(message: impl Into<String>, retry: bool) -> Self {
        Self {
            message: message.into(),
            retry,
        }
    }

    /// An error that is worth trying again.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(message, true)
    }

    /// An error that will not go away by retrying.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(message, false)
    }
}

/// Side effect run once a result has been collected.
pub type Finalizer = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// The outcome of one request attempt.
pub struct TaskResult<T> {
    pub data: Result<T, RequestError>,

    /// Limits reported by the service alongside this response.
    pub request_limits: Option<Limits>,

    finalizer: Option<Finalizer>,
}

impl<T> TaskResult<T> {
    pub fn new(data: Result<T, RequestError>) -> Self {
        Self {
            data,
            request_limits: None,
            finalizer: None,
        }
    }

    pub fn success(value: T) -> Self {
        Self::new(Ok(value))
    }

    pub fn failure(error: RequestError) -> Self {
        Self::new(Err(error))
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Attach a side effect to run when the result is finalized.
    ///
    /// Finalizers of one round run one at a time, in request order, after every
    /// request of the round has completed.
    pub fn with_finalizer<F, Fut>(mut self, finalizer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.finalizer = Some(Box::new(move || Box::pin(finalizer())));
        self
    }

    pub fn is_success(&self) -> bool {
        self.data.is_ok()
    }

    /// Run the attached finalizer, if it has not run yet.
    pub async fn finalize(&mut self) {
        if let Some(finalizer) = self.finalizer.take() {
            finalizer().await;
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for TaskResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskResult")
            .field("data", &self.data)
            .field("request_limits", &self.request_limits)
            .field("finalizer", &self.finalizer.is_some())
            .finish()
    }
}

/// A single attempt at a request.
#[async_trait]
pub trait Task<T>: Send + 'static {
    /// Perform the request. `None` means the outcome is unknown.
    async fn run(&mut self) -> Option<TaskResult<T>>;
}

/// Parameters of a request.
///
/// One `Params` may create several tasks when attempts fail and are retried.
/// Implementations that behave differently per attempt must count attempts
/// themselves.
pub trait Params<T>: Send + Sync {
    /// Budget consumed by one attempt.
    fn cost(&self) -> u64;

    /// Create a task for the next attempt.
    fn create_task(&self) -> Box<dyn Task<T>>;
}

/// A task that has been started on the runtime.
pub struct PendingTask<T> {
    handle: Option<JoinHandle<Option<TaskResult<T>>>>,
    result: Option<TaskResult<T>>,
}

impl<T: Send + 'static> PendingTask<T> {
    /// Start running `task` in the background.
    pub fn spawn(mut task: Box<dyn Task<T>>) -> Self {
        let handle = tokio::spawn(async move { task.run().await });
        Self {
            handle: Some(handle),
            result: None,
        }
    }

    /// Wait for the task to complete.
    ///
    /// A task that panicked completes with no result.
    pub async fn wait_result(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(error = %e, "Request task did not complete");
                    None
                }
            };
        }
    }

    /// Take the result of a completed task.
    pub fn get_result(&mut self) -> Option<TaskResult<T>> {
        self.result.take()
    }
}
