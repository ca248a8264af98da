//! Fixed-size worker pool for independent estimation tasks.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::thread;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::RlaError;

/// Result of one task, tagged with the task that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TaskOutcome<T> {
    Done { task_id: String, value: T },
    Failed { task_id: String, reason: String },
}

impl<T> TaskOutcome<T> {
    pub fn task_id(&self) -> &str {
        match self {
            TaskOutcome::Done { task_id, .. } | TaskOutcome::Failed { task_id, .. } => task_id,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            TaskOutcome::Done { value, .. } => Some(value),
            TaskOutcome::Failed { .. } => None,
        }
    }

    /// The value, or [`RlaError::TaskFailed`] carrying the failure reason.
    pub fn into_result(self) -> Result<T, RlaError> {
        match self {
            TaskOutcome::Done { value, .. } => Ok(value),
            TaskOutcome::Failed { task_id, reason } => Err(RlaError::TaskFailed {
                task: task_id,
                reason,
            }),
        }
    }
}

fn panic_reason(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("worker panicked: {s}")
    } else {
        "worker panicked".to_string()
    }
}

/// Runs every task on a pool of `n_workers` threads and waits for all of
/// them.
///
/// Workers pull tasks from a shared queue. A task that returns an error or
/// panics becomes [`TaskOutcome::Failed`]; the other tasks still run.
/// Outcomes are returned sorted by task id.
pub fn run_tasks<T, F>(tasks: Vec<(String, F)>, n_workers: usize) -> Vec<TaskOutcome<T>>
where
    T: Send,
    F: FnOnce() -> Result<T, RlaError> + Send,
{
    let n_tasks = tasks.len();
    let n_workers = n_workers.max(1).min(n_tasks.max(1));
    let queue = Mutex::new(tasks.into_iter().collect::<VecDeque<_>>());
    let results: Mutex<Vec<TaskOutcome<T>>> = Mutex::new(Vec::with_capacity(n_tasks));

    thread::scope(|scope| {
        for worker in 0..n_workers {
            let queue = &queue;
            let results = &results;
            scope.spawn(move || loop {
                let next = queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front();
                let Some((task_id, task)) = next else {
                    break;
                };
                debug!(worker, task = %task_id, "task started");
                let outcome = match catch_unwind(AssertUnwindSafe(task)) {
                    Ok(Ok(value)) => TaskOutcome::Done { task_id, value },
                    Ok(Err(err)) => TaskOutcome::Failed {
                        task_id,
                        reason: err.to_string(),
                    },
                    Err(payload) => TaskOutcome::Failed {
                        task_id,
                        reason: panic_reason(payload),
                    },
                };
                if let TaskOutcome::Failed { task_id, reason } = &outcome {
                    warn!(task = %task_id, %reason, "task failed");
                }
                results
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(outcome);
            });
        }
    });

    let mut outcomes = results.into_inner().unwrap_or_else(PoisonError::into_inner);
    outcomes.sort_by(|a, b| a.task_id().cmp(b.task_id()));
    outcomes
}
