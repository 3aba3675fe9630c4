//! Agent worker pool.
//!
//! An agent process opens one RPC client to the orchestrator and runs N
//! worker fibers against it. Each iteration is pull → resolve
//! dependencies → compute (after the configured latency) → submit, with
//! bounded retries around the RPCs. Workers observe a shutdown flag at
//! the top of every iteration.

pub mod client;

use crate::models::{Operation, TaskErrorCode, TaskOutcome};
use crate::orchestrator::rpc::TaskPayload;
use client::OrchestratorClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Sleep between polls when the queue is empty or the fetch failed.
const EMPTY_QUEUE_BACKOFF: Duration = Duration::from_secs(1);
const DEPENDENCY_FETCH_ATTEMPTS: u64 = 10;
const SUBMIT_ATTEMPTS: u64 = 3;

pub struct AgentPool {
    client: Arc<OrchestratorClient>,
    computing_power: usize,
}

impl AgentPool {
    pub fn new(client: OrchestratorClient, computing_power: usize) -> Self {
        Self {
            client: Arc::new(client),
            computing_power: computing_power.max(1),
        }
    }

    /// Run the worker fibers until the shutdown flag flips to true.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!("agent started with {} workers", self.computing_power);

        let workers: Vec<_> = (0..self.computing_power)
            .map(|worker_id| {
                let client = self.client.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(worker_loop(worker_id, client, shutdown))
            })
            .collect();

        for worker in workers {
            if let Err(err) = worker.await {
                error!("worker panicked: {}", err);
            }
        }
        info!("agent stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    client: Arc<OrchestratorClient>,
    shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            debug!("worker {} shutting down", worker_id);
            break;
        }

        let task = match client.get_task().await {
            Ok(Some(task)) => task,
            Ok(None) => {
                tokio::time::sleep(EMPTY_QUEUE_BACKOFF).await;
                continue;
            }
            Err(err) => {
                warn!("worker {}: task fetch failed: {}", worker_id, err);
                tokio::time::sleep(EMPTY_QUEUE_BACKOFF).await;
                continue;
            }
        };

        debug!("worker {} picked up task {}", worker_id, task.task_id);
        process_task(&client, task).await;
    }
}

async fn process_task(client: &OrchestratorClient, mut task: TaskPayload) {
    if !resolve_dependencies(client, &mut task).await {
        // The lease stays with this task; without lease expiry it will
        // not be re-dispatched.
        warn!("abandoning task {}: dependencies unavailable", task.task_id);
        return;
    }

    tokio::time::sleep(Duration::from_millis(task.operation_time_ms)).await;
    let outcome = compute_outcome(&task);
    submit_with_retry(client, &task.task_id, outcome).await;
}

/// Which argument a dependency result lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgSlot {
    Arg1,
    Arg2,
}

/// Dependency order matches argument order: arg1's source first, then
/// arg2's source.
fn dependency_slots(task: &TaskPayload) -> Vec<ArgSlot> {
    let mut slots = Vec::new();
    if task.arg1_from_dep {
        slots.push(ArgSlot::Arg1);
    }
    if task.arg2_from_dep {
        slots.push(ArgSlot::Arg2);
    }
    slots
}

/// Fill placeholder arguments with dependency results.
///
/// Returns false when a dependency never became available; the task is
/// skipped in that case.
async fn resolve_dependencies(client: &OrchestratorClient, task: &mut TaskPayload) -> bool {
    let slots = dependency_slots(task);
    if slots.len() != task.depends_on.len() {
        warn!("task {} has inconsistent dependency tags", task.task_id);
        return false;
    }

    let dep_ids = task.depends_on.clone();
    for (dep_id, slot) in dep_ids.iter().zip(slots) {
        match fetch_dependency(client, dep_id).await {
            Some(value) => match slot {
                ArgSlot::Arg1 => task.arg1 = value,
                ArgSlot::Arg2 => task.arg2 = value,
            },
            None => {
                warn!(
                    "dependency {} not ready after {} attempts",
                    dep_id, DEPENDENCY_FETCH_ATTEMPTS
                );
                return false;
            }
        }
    }
    true
}

/// Poll for a dependency result, sleeping `attempt * 100 ms` between
/// tries.
async fn fetch_dependency(client: &OrchestratorClient, dep_id: &str) -> Option<f64> {
    for attempt in 1..=DEPENDENCY_FETCH_ATTEMPTS {
        match client.get_task_result(dep_id).await {
            Ok(Some(value)) => return Some(value),
            Ok(None) => debug!("dependency {} not completed yet", dep_id),
            Err(err) => warn!("dependency fetch for {} failed: {}", dep_id, err),
        }
        if attempt < DEPENDENCY_FETCH_ATTEMPTS {
            tokio::time::sleep(Duration::from_millis(attempt * 100)).await;
        }
    }
    None
}

/// Apply the operation to the resolved arguments.
///
/// Unknown operation strings and division by zero become error outcomes,
/// not transport failures.
fn compute_outcome(task: &TaskPayload) -> TaskOutcome {
    let operation: Operation = match task.operation.parse() {
        Ok(operation) => operation,
        Err(err) => {
            warn!("task {}: {}", task.task_id, err);
            return TaskOutcome::Error(TaskErrorCode::UnknownOperation);
        }
    };

    match operation.apply(task.arg1, task.arg2) {
        Ok(value) => TaskOutcome::Result(value),
        Err(err) => {
            warn!("task {}: {}", task.task_id, err);
            TaskOutcome::Error(err.code)
        }
    }
}

/// Submit an outcome, retrying with a growing backoff (1 s, 2 s, 3 s).
///
/// On exhaustion the task is logged and left behind; its lease is never
/// released.
async fn submit_with_retry(client: &OrchestratorClient, task_id: &str, outcome: TaskOutcome) {
    for attempt in 1..=SUBMIT_ATTEMPTS {
        match client.submit_result(task_id, outcome.clone()).await {
            Ok(success) => {
                debug!("task {} result submitted (accepted: {})", task_id, success);
                return;
            }
            Err(err) => {
                warn!(
                    "submit attempt {}/{} for task {} failed: {}",
                    attempt, SUBMIT_ATTEMPTS, task_id, err
                );
            }
        }
        tokio::time::sleep(Duration::from_secs(attempt)).await;
    }
    error!(
        "giving up on task {} after {} submit attempts",
        task_id, SUBMIT_ATTEMPTS
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(operation: &str, arg1: f64, arg2: f64) -> TaskPayload {
        TaskPayload {
            task_id: "expr-1".to_string(),
            operation: operation.to_string(),
            arg1,
            arg2,
            arg1_from_dep: false,
            arg2_from_dep: false,
            operation_time_ms: 0,
            depends_on: vec![],
            user_login: "alice".to_string(),
        }
    }

    #[test]
    fn test_compute_outcomes() {
        assert_eq!(compute_outcome(&payload("+", 2.0, 3.0)), TaskOutcome::Result(5.0));
        assert_eq!(compute_outcome(&payload("-", 2.0, 3.0)), TaskOutcome::Result(-1.0));
        assert_eq!(compute_outcome(&payload("*", 2.0, 3.0)), TaskOutcome::Result(6.0));
        assert_eq!(compute_outcome(&payload("/", 6.0, 3.0)), TaskOutcome::Result(2.0));
    }

    #[test]
    fn test_compute_division_by_zero() {
        assert_eq!(
            compute_outcome(&payload("/", 4.0, 0.0)),
            TaskOutcome::Error(TaskErrorCode::DivisionByZero)
        );
    }

    #[test]
    fn test_compute_unknown_operation() {
        assert_eq!(
            compute_outcome(&payload("%", 4.0, 2.0)),
            TaskOutcome::Error(TaskErrorCode::UnknownOperation)
        );
    }

    #[test]
    fn test_dependency_slots_follow_argument_order() {
        let mut task = payload("+", 0.0, 7.0);
        task.arg1_from_dep = true;
        assert_eq!(dependency_slots(&task), vec![ArgSlot::Arg1]);

        task.arg2_from_dep = true;
        assert_eq!(dependency_slots(&task), vec![ArgSlot::Arg1, ArgSlot::Arg2]);

        task.arg1_from_dep = false;
        assert_eq!(dependency_slots(&task), vec![ArgSlot::Arg2]);
    }

    #[test]
    fn test_zero_literal_argument_is_not_mistaken_for_dependency() {
        // 0*5 with a literal zero: no dependency tags, compute runs as-is.
        let task = payload("*", 0.0, 5.0);
        assert!(dependency_slots(&task).is_empty());
        assert_eq!(compute_outcome(&task), TaskOutcome::Result(0.0));
    }
}
