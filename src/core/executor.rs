//! Sequential task execution.
//!
//! The executor walks an [`ExecutionOrder`] one task at a time, lending
//! the context to each action. The first failing action stops the run and
//! the completion log is unwound through [`rollback::unwind_observed`].

use crate::core::dag::ExecutionOrder;
use crate::core::phase::Phase;
use crate::core::rollback::{self, RollbackOutcome, RollbackReport};
use crate::core::task::TaskId;
use crate::error::Error;
use crate::{vlog, vlog_debug, vlog_error};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Timing of one completed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub task: TaskId,
    pub phase: Phase,
    pub duration_ms: u64,
}

/// Result of a run in which every task succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Completed tasks in completion order.
    pub completed: Vec<TaskMetrics>,
    /// Tasks walked without running their action (dry run).
    pub skipped: Vec<TaskId>,
    pub total_duration_ms: u64,
}

impl RunSummary {
    pub fn task_duration_ms(&self, id: &TaskId) -> Option<u64> {
        self.completed
            .iter()
            .find(|metrics| &metrics.task == id)
            .map(|metrics| metrics.duration_ms)
    }
}

/// A run stopped by a failing task.
#[derive(Debug, thiserror::Error)]
#[error("Task '{task}' failed: {error}")]
pub struct RunFailure {
    /// The task whose action failed.
    pub task: TaskId,
    #[source]
    pub error: Error,
    /// Tasks that completed before the failure, in completion order.
    pub completed: Vec<TaskMetrics>,
    pub rollback: RollbackReport,
}

/// Progress notifications, delivered synchronously in run order.
#[derive(Debug)]
pub enum ExecutionEvent<'a> {
    TaskStarted {
        task: &'a TaskId,
        description: &'a str,
        phase: Phase,
        /// One-based position in the order.
        index: usize,
        total: usize,
    },
    TaskCompleted {
        task: &'a TaskId,
        duration_ms: u64,
    },
    TaskSkipped {
        task: &'a TaskId,
        description: &'a str,
    },
    /// Emitted before unwinding starts.
    TaskFailed {
        task: &'a TaskId,
        error: &'a Error,
    },
    RollbackStarted {
        failed: &'a TaskId,
        completed: usize,
    },
    TaskRolledBack(&'a RollbackOutcome),
    RollbackFinished(&'a RollbackReport),
}

type Observer<'o> = Box<dyn FnMut(&ExecutionEvent<'_>) + 'o>;

/// Runs an execution order against a context.
pub struct Executor<'o> {
    dry_run: bool,
    observer: Option<Observer<'o>>,
}

impl<'o> Executor<'o> {
    pub fn new() -> Self {
        Self {
            dry_run: false,
            observer: None,
        }
    }

    /// Walk the order without running any action.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&ExecutionEvent<'_>) + 'o,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    fn emit(&mut self, event: ExecutionEvent<'_>) {
        if let Some(observer) = self.observer.as_mut() {
            observer(&event);
        }
    }

    /// Run every task of `order` in sequence.
    ///
    /// Stops at the first failing task, rolls back the tasks completed so
    /// far and returns the failure with the rollback report.
    pub fn run<C>(
        &mut self,
        order: &ExecutionOrder<C>,
        ctx: &mut C,
    ) -> std::result::Result<RunSummary, RunFailure> {
        let total = order.len();
        let run_start = Instant::now();
        let mut completed: Vec<TaskMetrics> = Vec::with_capacity(total);
        let mut skipped = Vec::new();

        vlog!("Running {} tasks{}", total, if self.dry_run { " (dry run)" } else { "" });

        for (i, task) in order.iter().enumerate() {
            if self.dry_run {
                vlog_debug!("Skipping '{}' (dry run)", task.id);
                self.emit(ExecutionEvent::TaskSkipped {
                    task: &task.id,
                    description: &task.description,
                });
                skipped.push(task.id.clone());
                continue;
            }

            self.emit(ExecutionEvent::TaskStarted {
                task: &task.id,
                description: &task.description,
                phase: task.phase,
                index: i + 1,
                total,
            });
            vlog!("[{}/{}] {} ({})", i + 1, total, task.description, task.id);

            let start = Instant::now();
            match task.run(ctx) {
                Ok(()) => {
                    let duration_ms = start.elapsed().as_millis() as u64;
                    vlog_debug!("Task '{}' completed in {}ms", task.id, duration_ms);
                    self.emit(ExecutionEvent::TaskCompleted {
                        task: &task.id,
                        duration_ms,
                    });
                    completed.push(TaskMetrics {
                        task: task.id.clone(),
                        phase: task.phase,
                        duration_ms,
                    });
                }
                Err(error) => {
                    vlog_error!("Task '{}' failed: {}", task.id, error);
                    self.emit(ExecutionEvent::TaskFailed {
                        task: &task.id,
                        error: &error,
                    });

                    let log: Vec<TaskId> = completed.iter().map(|m| m.task.clone()).collect();
                    self.emit(ExecutionEvent::RollbackStarted {
                        failed: &task.id,
                        completed: log.len(),
                    });
                    let report = rollback::unwind_observed(
                        &log,
                        order.tasks(),
                        &task.id,
                        ctx,
                        &mut |outcome| self.emit(ExecutionEvent::TaskRolledBack(outcome)),
                    );
                    self.emit(ExecutionEvent::RollbackFinished(&report));

                    return Err(RunFailure {
                        task: task.id.clone(),
                        error,
                        completed,
                        rollback: report,
                    });
                }
            }
        }

        let total_duration_ms = run_start.elapsed().as_millis() as u64;
        vlog!("All {} tasks finished in {}ms", total, total_duration_ms);
        Ok(RunSummary {
            completed,
            skipped,
            total_duration_ms,
        })
    }
}

impl Default for Executor<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dag::resolve;
    use crate::core::rollback::RollbackStatus;
    use crate::core::task::Task;
    use crate::core::taskset::TaskSet;

    type Log = Vec<String>;

    fn step(id: &'static str, phase: Phase) -> Task<Log> {
        Task::new(id, phase, id, move |log: &mut Log| {
            log.push(format!("run {}", id));
            Ok(())
        })
        .with_rollback(move |log: &mut Log| {
            log.push(format!("undo {}", id));
            Ok(())
        })
    }

    fn failing(id: &'static str, phase: Phase) -> Task<Log> {
        Task::new(id, phase, id, move |log: &mut Log| {
            log.push(format!("run {}", id));
            Err(Error::Validation(format!("{} exploded", id)))
        })
        .with_rollback(move |log: &mut Log| {
            log.push(format!("undo {}", id));
            Ok(())
        })
    }

    fn order(tasks: Vec<Task<Log>>) -> ExecutionOrder<Log> {
        let mut set = TaskSet::new();
        set.extend(tasks);
        resolve(set.freeze()).unwrap()
    }

    #[test]
    fn test_run_success() {
        let order = order(vec![
            step("a", Phase::Preparation),
            step("b", Phase::Preparation).after(["a"]),
            step("c", Phase::VolumeCreation).after(["b"]),
        ]);
        let mut log = Vec::new();
        let summary = Executor::new().run(&order, &mut log).unwrap();

        assert_eq!(log, vec!["run a", "run b", "run c"]);
        let done: Vec<_> = summary.completed.iter().map(|m| m.task.as_str()).collect();
        assert_eq!(done, vec!["a", "b", "c"]);
        assert!(summary.skipped.is_empty());
        assert!(summary.task_duration_ms(&TaskId::new("b")).is_some());
        assert!(summary.task_duration_ms(&TaskId::new("zzz")).is_none());
    }

    #[test]
    fn test_run_failure_stops_and_unwinds() {
        let order = order(vec![
            step("a", Phase::Preparation),
            step("b", Phase::Preparation).after(["a"]),
            failing("c", Phase::VolumeCreation).after(["b"]),
            step("d", Phase::Cleaning),
        ]);
        let mut log = Vec::new();
        let failure = Executor::new().run(&order, &mut log).unwrap_err();

        assert_eq!(log, vec!["run a", "run b", "run c", "undo b", "undo a"]);
        assert_eq!(failure.task, TaskId::new("c"));
        assert!(failure.error.to_string().contains("c exploded"));
        assert_eq!(failure.completed.len(), 2);
        assert_eq!(failure.rollback.failed_task, TaskId::new("c"));
        assert_eq!(
            failure.rollback.rolled_back(),
            vec![&TaskId::new("b"), &TaskId::new("a")]
        );
        assert!(failure.to_string().contains("Task 'c' failed"));
    }

    #[test]
    fn test_run_first_task_failure_has_nothing_to_undo() {
        let order = order(vec![failing("a", Phase::Preparation), step("b", Phase::Cleaning)]);
        let mut log = Vec::new();
        let failure = Executor::new().run(&order, &mut log).unwrap_err();

        assert_eq!(log, vec!["run a"]);
        assert!(failure.completed.is_empty());
        assert!(failure.rollback.outcomes.is_empty());
    }

    #[test]
    fn test_run_rollback_failure_is_reported_and_unwind_continues() {
        let broken = Task::new("b", Phase::Preparation, "b", |log: &mut Log| {
            log.push("run b".to_string());
            Ok(())
        })
        .after(["a"])
        .with_rollback(|log: &mut Log| {
            log.push("undo b".to_string());
            Err(Error::Validation("b is stuck".to_string()))
        });
        let order = order(vec![
            step("a", Phase::Preparation),
            broken,
            failing("c", Phase::VolumeCreation).after(["b"]),
        ]);
        let mut log = Vec::new();
        let failure = Executor::new().run(&order, &mut log).unwrap_err();

        assert_eq!(log, vec!["run a", "run b", "run c", "undo b", "undo a"]);
        let statuses: Vec<_> = failure
            .rollback
            .outcomes
            .iter()
            .map(|o| (o.task.as_str().to_string(), o.status.clone()))
            .collect();
        assert_eq!(statuses[0].0, "b");
        assert!(matches!(statuses[0].1, RollbackStatus::Failed { .. }));
        assert_eq!(statuses[1], ("a".to_string(), RollbackStatus::RolledBack));
    }

    #[test]
    fn test_run_dry_run_calls_no_action() {
        let order = order(vec![step("a", Phase::Preparation), failing("b", Phase::Cleaning)]);
        let mut log = Vec::new();
        let summary = Executor::new().dry_run(true).run(&order, &mut log).unwrap();

        assert!(log.is_empty());
        assert!(summary.completed.is_empty());
        assert_eq!(summary.skipped, vec![TaskId::new("a"), TaskId::new("b")]);
    }

    #[test]
    fn test_run_emits_events_in_order() {
        let order = order(vec![step("a", Phase::Preparation), failing("b", Phase::Cleaning)]);
        let mut events = Vec::new();
        let mut log = Vec::new();
        {
            let mut executor = Executor::new().with_observer(|event| {
                let name = match event {
                    ExecutionEvent::TaskStarted { task, index, total, .. } => {
                        format!("start {} {}/{}", task, index, total)
                    }
                    ExecutionEvent::TaskCompleted { task, .. } => format!("done {}", task),
                    ExecutionEvent::TaskSkipped { task, .. } => format!("skip {}", task),
                    ExecutionEvent::TaskFailed { task, .. } => format!("fail {}", task),
                    ExecutionEvent::RollbackStarted { completed, .. } => {
                        format!("unwind {}", completed)
                    }
                    ExecutionEvent::TaskRolledBack(outcome) => format!("undo {}", outcome.task),
                    ExecutionEvent::RollbackFinished(report) => {
                        format!("unwound {}", report.outcomes.len())
                    }
                };
                events.push(name);
            });
            let _ = executor.run(&order, &mut log);
        }

        assert_eq!(
            events,
            vec![
                "start a 1/2",
                "done a",
                "start b 2/2",
                "fail b",
                "unwind 1",
                "undo a",
                "unwound 1",
            ]
        );
    }

    #[test]
    fn test_run_context_is_shared_across_tasks() {
        let producer = Task::new("produce", Phase::Preparation, "produce", |log: &mut Log| {
            log.push("artifact".to_string());
            Ok(())
        });
        let consumer = Task::new("consume", Phase::Cleaning, "consume", |log: &mut Log| {
            if log.contains(&"artifact".to_string()) {
                Ok(())
            } else {
                Err(Error::Validation("artifact missing".to_string()))
            }
        });
        let order = order(vec![consumer, producer]);
        let mut log = Vec::new();
        assert!(Executor::new().run(&order, &mut log).is_ok());
    }
}
