//! Running a batch of requests against the currently known budget.
//!
//! [`execute_no_sleep`] never waits on the clock. Work that cannot run yet is
//! reported as deferred, and the caller schedules a later round instead.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::limits::Limits;
use super::request::{Params, PendingTask, TaskResult};
use super::service::Service;

/// Factor applied to `delay_factor` after a clean round.
const DECAY: f64 = 0.95;

/// Params shared between the scheduler and the tasks it spawns.
pub type SharedParams<T> = Arc<dyn Params<T>>;

/// What happened to a batch of requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub success_count: u64,
    pub unknown_error_count: u64,
    pub known_error_messages: Vec<String>,

    /// Cost of the requests that neither completed nor failed for good.
    pub deferred_cost: u64,
    pub deferred_request_count: u64,

    /// Limits learned while executing, for the next round.
    pub updated_limits: Option<Limits>,
}

impl ExecutionReport {
    /// Errors of any kind.
    pub fn error_count(&self) -> u64 {
        self.known_error_messages.len() as u64 + self.unknown_error_count
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }
}

/// Execute as many requests as possible without sleeping.
///
/// With no known limits the first attempt assumes there are none. When the
/// budget does not cover every pending request, the first round runs a single
/// request, whose response may report enough remaining budget for the rest.
/// Retryable failures are retried for up to `max_retry_count` rounds.
pub async fn execute_no_sleep<T: Send + 'static>(params: &[SharedParams<T>], service: &Service) -> ExecutionReport {
    let mut report = ExecutionReport::default();
    let mut limits = service.request_limits.clone().unwrap_or_else(Limits::unlimited);

    let mut pending: Vec<usize> = (0..params.len()).collect();
    let mut retry_count: u32 = 0;

    while !pending.is_empty() && retry_count < service.max_retry_count() {
        let pending_cost = total_cost(params, &pending);
        let base_delay = limits.base_delay(pending_cost, service.guess_delay());

        let (active, inactive) = match base_delay {
            None => (std::mem::take(&mut pending), Vec::new()),
            Some(_) if retry_count == 0 => {
                let inactive = pending.split_off(1);
                (std::mem::take(&mut pending), inactive)
            }
            Some(_) => break,
        };

        debug!(
            round = retry_count,
            active = active.len(),
            inactive = inactive.len(),
            pending_cost,
            "Executing request round"
        );

        let mut results = execute_specified(params, &active).await;

        // Only this round's responses say anything about the remaining budget
        limits.remaining = None;

        let mut retry = Vec::new();
        for index in active {
            let Some(mut result) = results.remove(&index) else {
                report.unknown_error_count += 1;
                continue;
            };

            match &result.data {
                Err(error) if error.retry => retry.push(index),
                Err(error) => report.known_error_messages.push(error.message.clone()),
                Ok(_) => report.success_count += 1,
            }

            result.finalize().await;

            if let Some(latest) = &result.request_limits {
                limits.update_total(latest).update_remaining(latest);
            }
        }

        pending = retry;
        pending.extend(inactive);
        retry_count += 1;
    }

    report.deferred_cost = total_cost(params, &pending);
    report.deferred_request_count = pending.len() as u64;

    if report.deferred_cost != 0 {
        limits.delay_factor *= if service.jitter() { 1.0 + rand::random::<f64>() } else { 2.0 };
    } else if !report.has_errors() {
        limits.delay_factor = (DECAY * limits.delay_factor).max(1.0);
    }

    // Nothing is known about when the next round will be
    limits.remaining = None;
    report.updated_limits = Some(limits);

    report
}

/// Run the requests at `indexes` concurrently and collect their results.
///
/// Results are collected in index order. Requests with no result are left out.
pub async fn execute_specified<T: Send + 'static>(
    params: &[SharedParams<T>],
    indexes: &[usize],
) -> BTreeMap<usize, TaskResult<T>> {
    let mut tasks: Vec<(usize, PendingTask<T>)> = indexes
        .iter()
        .map(|&index| (index, PendingTask::spawn(params[index].create_task())))
        .collect();

    let mut results = BTreeMap::new();
    for (index, task) in tasks.iter_mut() {
        task.wait_result().await;
        if let Some(result) = task.get_result() {
            results.insert(*index, result);
        }
    }

    results
}

fn total_cost<T>(params: &[SharedParams<T>], indexes: &[usize]) -> u64 {
    indexes.iter().map(|&index| params[index].cost()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::limits::Total;
    use crate::scheduler::testing::{Reply, ScriptedParams, fatal, finalized, retryable, succeeds};
    use proptest::prelude::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "expected {expected}, got {actual}");
    }

    fn updated(report: &ExecutionReport) -> &Limits {
        report.updated_limits.as_ref().unwrap()
    }

    #[tokio::test]
    async fn test_unlimited_runs_everything() {
        let done = finalized();
        let params = vec![
            succeeds(1, 1, &done),
            succeeds(2, 2, &done),
            succeeds(3, 3, &done),
            succeeds(4, 4, &done),
        ];
        let service = Service::new()
            .with_jitter(false)
            .with_limits(Limits::unlimited().with_delay_factor(1.0));

        let report = execute_no_sleep(&params, &service).await;

        assert_eq!(*done.lock().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(report.success_count, 4);
        assert_eq!(report.unknown_error_count, 0);
        assert!(report.known_error_messages.is_empty());
        assert_eq!(report.deferred_cost, 0);
        assert_eq!(updated(&report).total, Total::Unlimited);
        assert!(updated(&report).remaining.is_none());
        // Already at the floor
        assert_close(updated(&report).delay_factor, 1.0);
    }

    #[tokio::test]
    async fn test_no_limits_assumes_unlimited() {
        let done = finalized();
        let params = vec![succeeds(1, 1, &done), succeeds(5, 2, &done)];
        let service = Service::new().with_jitter(false);

        let report = execute_no_sleep(&params, &service).await;

        assert_eq!(report.success_count, 2);
        assert_eq!(updated(&report).total, Total::Unlimited);
    }

    #[tokio::test]
    async fn test_errors_without_deferral_keep_delay_factor() {
        let done = finalized();
        let params: Vec<SharedParams<u32>> = vec![
            succeeds(1, 1, &done),
            // Succeeds on retry
            Arc::new(ScriptedParams::new(2, vec![retryable("B"), Reply::Value(2)], &done)),
            // No result at all
            Arc::new(ScriptedParams::new(3, vec![], &done)),
            Arc::new(ScriptedParams::new(4, vec![fatal("D")], &done)),
        ];
        let service = Service::new()
            .with_jitter(false)
            .with_limits(Limits::unlimited().with_delay_factor(2.0));

        let report = execute_no_sleep(&params, &service).await;

        assert_eq!(*done.lock().unwrap(), vec![1, 2]);
        assert_eq!(report.success_count, 2);
        assert_eq!(report.unknown_error_count, 1);
        assert_eq!(report.known_error_messages, vec!["D".to_string()]);
        assert_eq!(report.deferred_cost, 0);
        assert_close(updated(&report).delay_factor, 2.0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_deferred() {
        let done = finalized();
        let flaky = Arc::new(ScriptedParams::new(2, vec![retryable("B"); 4], &done));
        let params: Vec<SharedParams<u32>> = vec![
            succeeds(1, 1, &done),
            flaky.clone(),
            Arc::new(ScriptedParams::new(3, vec![], &done)),
            Arc::new(ScriptedParams::new(4, vec![fatal("D")], &done)),
        ];
        let service = Service::new()
            .with_jitter(false)
            .with_limits(Limits::unlimited().with_delay_factor(2.0));

        let report = execute_no_sleep(&params, &service).await;

        assert_eq!(*done.lock().unwrap(), vec![1]);
        assert_eq!(flaky.attempts(), 4);
        assert_eq!(report.success_count, 1);
        assert_eq!(report.unknown_error_count, 1);
        assert_eq!(report.known_error_messages, vec!["D".to_string()]);
        assert_eq!(report.deferred_cost, 2);
        assert_eq!(report.deferred_request_count, 1);
        assert_close(updated(&report).delay_factor, 4.0);
    }

    #[tokio::test]
    async fn test_insufficient_budget_runs_one_request() {
        let done = finalized();
        let params = vec![
            succeeds(1, 1, &done),
            succeeds(2, 2, &done),
            succeeds(3, 3, &done),
            succeeds(4, 4, &done),
        ];
        let service = Service::new()
            .with_jitter(false)
            .with_max_retry_count(10)
            .with_limits(Limits::bounded(6).with_delay_factor(2.0));

        let report = execute_no_sleep(&params, &service).await;

        assert_eq!(*done.lock().unwrap(), vec![1]);
        assert_eq!(report.success_count, 1);
        assert_eq!(report.deferred_cost, 2 + 3 + 4);
        assert_eq!(report.deferred_request_count, 3);
        assert_eq!(updated(&report).total, Total::Bounded(6));
        assert!(updated(&report).remaining.is_none());
        assert_close(updated(&report).delay_factor, 4.0);
    }

    #[tokio::test]
    async fn test_sufficient_remaining_runs_everything() {
        let done = finalized();
        let params = vec![
            succeeds(1, 1, &done),
            succeeds(2, 2, &done),
            succeeds(3, 3, &done),
        ];
        let service = Service::new()
            .with_jitter(false)
            .with_limits(Limits::bounded(6).with_remaining(6).with_delay_factor(2.0));

        let report = execute_no_sleep(&params, &service).await;

        assert_eq!(*done.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(report.deferred_cost, 0);
        assert!(updated(&report).remaining.is_none());
        assert_close(updated(&report).delay_factor, 1.9);
    }

    #[tokio::test]
    async fn test_reported_remaining_unblocks_the_rest() {
        let done = finalized();
        let params: Vec<SharedParams<u32>> = vec![
            Arc::new(ScriptedParams::new(
                1,
                vec![Reply::ValueWithLimits(1, Limits::default().with_remaining(9))],
                &done,
            )),
            succeeds(2, 2, &done),
            succeeds(3, 3, &done),
            succeeds(4, 4, &done),
        ];
        let service = Service::new()
            .with_jitter(false)
            .with_limits(Limits::bounded(12).with_delay_factor(2.0));

        let report = execute_no_sleep(&params, &service).await;

        assert_eq!(*done.lock().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(report.success_count, 4);
        assert_eq!(report.deferred_cost, 0);
        assert_eq!(updated(&report).total, Total::Bounded(12));
        assert!(updated(&report).remaining.is_none());
        assert_close(updated(&report).delay_factor, 1.9);
    }

    #[tokio::test]
    async fn test_reported_total_is_learned() {
        let done = finalized();
        let params: Vec<SharedParams<u32>> = vec![Arc::new(ScriptedParams::new(
            1,
            vec![Reply::ValueWithLimits(1, Limits::bounded(100).with_remaining(99))],
            &done,
        ))];
        let service = Service::new().with_jitter(false);

        let report = execute_no_sleep(&params, &service).await;

        assert_eq!(updated(&report).total, Total::Bounded(100));
        assert!(updated(&report).remaining.is_none());
    }

    #[tokio::test]
    async fn test_fatal_error_is_reported() {
        let done = finalized();
        let params: Vec<SharedParams<u32>> = vec![Arc::new(ScriptedParams::new(1, vec![fatal("msg")], &done))];
        let service = Service::new().with_jitter(false).with_limits(Limits::unlimited());

        let report = execute_no_sleep(&params, &service).await;

        assert_eq!(report.success_count, 0);
        assert_eq!(report.known_error_messages, vec!["msg".to_string()]);
        assert_eq!(report.deferred_cost, 0);
        assert_eq!(report.error_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let params: Vec<SharedParams<u32>> = Vec::new();
        let service = Service::new().with_limits(Limits::bounded(6).with_delay_factor(2.0));

        let report = execute_no_sleep(&params, &service).await;

        assert_eq!(report.success_count, 0);
        assert_eq!(report.deferred_cost, 0);
        assert_close(updated(&report).delay_factor, 1.9);
    }

    #[tokio::test]
    async fn test_finalize_order_follows_indexes() {
        let done = finalized();
        let params: Vec<SharedParams<u32>> = (0..8).map(|value| succeeds(1, value, &done)).collect();
        let service = Service::new().with_limits(Limits::unlimited());

        execute_no_sleep(&params, &service).await;

        assert_eq!(*done.lock().unwrap(), (0..8).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn test_execute_specified_omits_missing_results() {
        let done = finalized();
        let params: Vec<SharedParams<u32>> = vec![
            succeeds(1, 10, &done),
            Arc::new(ScriptedParams::new(1, vec![], &done)),
            succeeds(1, 30, &done),
        ];

        let results = execute_specified(&params, &[0, 1, 2]).await;

        assert_eq!(results.keys().copied().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(results[&2].data, Ok(30));
    }

    #[tokio::test]
    async fn test_jitter_bounds_backoff() {
        let done = finalized();
        let params: Vec<SharedParams<u32>> = vec![
            Arc::new(ScriptedParams::new(1, vec![retryable("busy")], &done)),
        ];
        let service = Service::new()
            .with_jitter(true)
            .with_max_retry_count(1)
            .with_limits(Limits::unlimited().with_delay_factor(3.0));

        let report = execute_no_sleep(&params, &service).await;

        let factor = updated(&report).delay_factor;
        assert!((3.0..6.0).contains(&factor), "factor {factor} out of range");
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
    }

    proptest! {
        #[test]
        fn prop_deferral_doubles_delay_factor(factor in 1.0f64..1000.0, costs in proptest::collection::vec(1u64..10, 2..6)) {
            let done = finalized();
            let params: Vec<SharedParams<u32>> = costs.iter().map(|&cost| succeeds(cost, 0, &done)).collect();
            let service = Service::new()
                .with_jitter(false)
                .with_limits(Limits::bounded(1).with_delay_factor(factor));

            let report = runtime().block_on(execute_no_sleep(&params, &service));

            prop_assert!(report.deferred_cost > 0);
            prop_assert!((updated(&report).delay_factor - factor * 2.0).abs() < 1e-9);
        }

        #[test]
        fn prop_clean_rounds_decay_to_one(factor in 0.5f64..64.0, rounds in 1usize..200) {
            let done = finalized();
            let mut service = Service::new()
                .with_jitter(false)
                .with_limits(Limits::unlimited().with_delay_factor(factor));
            let rt = runtime();

            let mut expected = factor;
            for _ in 0..rounds {
                let params = vec![succeeds(1, 0, &done)];
                let report = rt.block_on(execute_no_sleep(&params, &service));
                expected = (0.95 * expected).max(1.0);
                let actual = updated(&report).delay_factor;
                prop_assert!((actual - expected).abs() < 1e-9);
                prop_assert!(actual >= 1.0);
                service.request_limits = report.updated_limits;
            }
        }
    }
}
