//! Failure unwinding.
//!
//! When a task fails, every task that completed before it gets a chance
//! to undo its work. Rollbacks run most-recently-completed first and a
//! failing rollback never stops the ones after it.

use crate::core::task::TaskId;
use crate::core::taskset::FrozenTaskSet;
use crate::{vlog, vlog_debug, vlog_error};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// What happened to one completed task during unwinding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RollbackStatus {
    /// The rollback action ran and succeeded.
    RolledBack,
    /// The task declares no rollback action.
    Skipped,
    /// The rollback action failed.
    Failed {
        /// Error reported by the rollback action.
        error: String,
    },
}

impl std::fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackStatus::RolledBack => write!(f, "rolled back"),
            RollbackStatus::Skipped => write!(f, "skipped"),
            RollbackStatus::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub task: TaskId,
    #[serde(flatten)]
    pub status: RollbackStatus,
    pub duration_ms: u64,
}

/// Outcomes of an unwind, in the order rollbacks were attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    /// The task whose failure triggered the unwind.
    pub failed_task: TaskId,
    pub outcomes: Vec<RollbackOutcome>,
}

impl RollbackReport {
    pub fn rolled_back(&self) -> Vec<&TaskId> {
        self.with_status(|status| matches!(status, RollbackStatus::RolledBack))
    }

    pub fn skipped(&self) -> Vec<&TaskId> {
        self.with_status(|status| matches!(status, RollbackStatus::Skipped))
    }

    /// Tasks whose rollback failed, with the error.
    pub fn failures(&self) -> Vec<(&TaskId, &str)> {
        self.outcomes
            .iter()
            .filter_map(|outcome| match &outcome.status {
                RollbackStatus::Failed { error } => Some((&outcome.task, error.as_str())),
                _ => None,
            })
            .collect()
    }

    /// True when no rollback action failed.
    pub fn is_clean(&self) -> bool {
        self.failures().is_empty()
    }

    fn with_status(&self, pred: impl Fn(&RollbackStatus) -> bool) -> Vec<&TaskId> {
        self.outcomes
            .iter()
            .filter(|outcome| pred(&outcome.status))
            .map(|outcome| &outcome.task)
            .collect()
    }
}

/// Undo completed tasks after `failing` failed.
///
/// `completed` is the completion log in completion order.
pub fn unwind<C>(
    completed: &[TaskId],
    tasks: &FrozenTaskSet<C>,
    failing: &TaskId,
    ctx: &mut C,
) -> RollbackReport {
    unwind_observed(completed, tasks, failing, ctx, &mut |_| {})
}

/// Like [`unwind`], reporting each outcome as soon as it is known.
pub fn unwind_observed<C>(
    completed: &[TaskId],
    tasks: &FrozenTaskSet<C>,
    failing: &TaskId,
    ctx: &mut C,
    observer: &mut dyn FnMut(&RollbackOutcome),
) -> RollbackReport {
    vlog!(
        "Rolling back {} completed tasks after '{}' failed",
        completed.len(),
        failing
    );

    let mut outcomes = Vec::with_capacity(completed.len());
    for id in completed.iter().rev() {
        let start = Instant::now();
        let result = tasks.get(id).and_then(|task| task.run_rollback(ctx));
        let status = match result {
            None => {
                vlog_debug!("No rollback for '{}'", id);
                RollbackStatus::Skipped
            }
            Some(Ok(())) => {
                vlog!("Rolled back '{}'", id);
                RollbackStatus::RolledBack
            }
            Some(Err(e)) => {
                vlog_error!("Rollback of '{}' failed: {}", id, e);
                RollbackStatus::Failed {
                    error: e.to_string(),
                }
            }
        };
        let outcome = RollbackOutcome {
            task: id.clone(),
            status,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        observer(&outcome);
        outcomes.push(outcome);
    }

    RollbackReport {
        failed_task: failing.clone(),
        outcomes,
    }
}
