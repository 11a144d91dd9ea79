//! Engine integration tests.
//!
//! Several contributors register into one task set, which is frozen,
//! resolved and run against a recording context.

use vmstrap::core::{
    resolve, ExecutionEvent, Executor, Phase, RollbackStatus, TaskId, TaskSet,
};
use vmstrap::Error;

use crate::fixtures::{plain_task, recording_task, Behaviour, EventLog, Journal};

fn ids(order: &[TaskId]) -> Vec<&str> {
    order.iter().map(|id| id.as_str()).collect()
}

/// Test: Contributors interleave by phase, then by dependencies
/// Given tasks registered by two contributors out of phase order
/// When the set is resolved
/// Then phases run in order and dependencies hold inside each phase
#[test]
fn test_contributors_resolve_into_phase_order() {
    let ok = Behaviour::default();
    let mut tasks = TaskSet::new();

    tasks.set_contributor("base");
    tasks.add(recording_task("mount", Phase::VolumeMounting, &ok));
    tasks.add(recording_task("install", Phase::OsInstallation, &ok).after(["mount"]));
    tasks.add(recording_task("format", Phase::VolumePreparation, &ok));
    tasks.add(recording_task("unmount", Phase::VolumeUnmounting, &ok));

    tasks.set_contributor("provider");
    tasks.add(recording_task("modules", Phase::OsInstallation, &ok).before(["install"]));
    tasks.add(recording_task("prepare", Phase::Preparation, &ok));

    let order = resolve(tasks.freeze()).unwrap();
    assert_eq!(
        ids(&order.ids()),
        vec!["prepare", "format", "mount", "modules", "install", "unmount"]
    );
    assert_eq!(order.tasks().contributor_of(&"modules".into()), Some("provider"));

    let mut journal = Journal::default();
    let summary = Executor::new().run(&order, &mut journal).unwrap();
    assert_eq!(
        journal.runs(),
        vec!["prepare", "format", "mount", "modules", "install", "unmount"]
    );
    assert_eq!(summary.completed.len(), 6);
    assert!(journal.rollbacks().is_empty());
}

/// Test: Resolution is deterministic
/// Given the same registrations made twice
/// When both sets are resolved
/// Then the orders are identical
#[test]
fn test_resolution_is_deterministic() {
    let build = || {
        let ok = Behaviour::default();
        let mut tasks = TaskSet::new();
        for id in ["e", "d", "c", "b", "a"] {
            tasks.add(recording_task(id, Phase::SystemModification, &ok));
        }
        tasks.add(recording_task("z", Phase::SystemModification, &ok).after(["a"]).before(["e"]));
        resolve(tasks.freeze()).unwrap().ids()
    };
    let first = build();
    assert_eq!(first, build());
    assert_eq!(ids(&first), vec!["d", "c", "b", "a", "z", "e"]);
}

/// Test: Later contributors override earlier ones
/// Given a release contributor replacing a base task
/// When the set is resolved
/// Then the replacement keeps the original position and runs once
#[test]
fn test_override_keeps_position() {
    let ok = Behaviour::default();
    let mut tasks = TaskSet::new();
    tasks.set_contributor("base");
    tasks.add(plain_task("fstab", Phase::SystemModification));
    tasks.add(plain_task("grub", Phase::SystemModification));
    tasks.add(plain_task("hostname", Phase::SystemModification));

    tasks.set_contributor("release");
    let replaced = tasks.replace(recording_task("grub", Phase::SystemModification, &ok));
    assert!(replaced.is_some());

    let order = resolve(tasks.freeze()).unwrap();
    assert_eq!(ids(&order.ids()), vec!["fstab", "grub", "hostname"]);
    assert_eq!(order.tasks().contributor_of(&"grub".into()), Some("release"));
    assert!(order.tasks().get(&"grub".into()).unwrap().has_rollback());
}

/// Test: Removed tasks leave dangling edges behind
/// Given a plugin removing a task others depend on
/// When the set is resolved
/// Then resolution succeeds without the removed task
#[test]
fn test_removed_task_edges_are_dropped() {
    let ok = Behaviour::default();
    let mut tasks = TaskSet::new();
    tasks.set_contributor("base");
    tasks.add(recording_task("apt.clean", Phase::SystemCleaning, &ok));
    tasks.add(recording_task("shred", Phase::SystemCleaning, &ok).after(["apt.clean"]));

    tasks.set_contributor("minimize_size");
    tasks.remove(["apt.clean"]);
    tasks.add(recording_task("clean_apt", Phase::SystemCleaning, &ok));

    let order = resolve(tasks.freeze()).unwrap();
    assert_eq!(ids(&order.ids()), vec!["shred", "clean_apt"]);
}

/// Test: Cycles are rejected before anything runs
/// Given two tasks that wait on each other
/// When the set is resolved
/// Then a cycle error names both tasks
#[test]
fn test_cycle_is_rejected() {
    let ok = Behaviour::default();
    let mut tasks = TaskSet::new();
    tasks.add(recording_task("first", Phase::SystemModification, &ok).after(["second"]));
    tasks.add(recording_task("second", Phase::SystemModification, &ok).after(["first"]));
    tasks.add(recording_task("bystander", Phase::SystemModification, &ok));

    match resolve(tasks.freeze()) {
        Err(Error::Cycle { members }) => assert_eq!(ids(&members), vec!["first", "second"]),
        other => panic!("Expected cycle, got {:?}", other.map(|o| o.ids())),
    }
}

/// Test: Backward edges across phases are rejected
/// Given a preparation task declared to run after a volume task
/// When the set is resolved
/// Then a phase order error names both tasks
#[test]
fn test_backward_phase_edge_is_rejected() {
    let ok = Behaviour::default();
    let mut tasks = TaskSet::new();
    tasks.add(recording_task("late", Phase::VolumeCreation, &ok));
    tasks.add(recording_task("early", Phase::Preparation, &ok).after(["late"]));

    match resolve(tasks.freeze()) {
        Err(Error::PhaseOrder {
            predecessor,
            successor,
            ..
        }) => {
            assert_eq!(predecessor.as_str(), "late");
            assert_eq!(successor.as_str(), "early");
        }
        other => panic!("Expected phase order error, got {:?}", other.map(|o| o.ids())),
    }
}

/// Test: A failure unwinds completed tasks in reverse
/// Given five tasks where the fourth fails and the second cannot roll back
/// When the order runs
/// Then rollbacks run newest first, continue past the failed rollback
/// and the failing task itself is not rolled back
#[test]
fn test_failure_unwinds_in_reverse() {
    let behaviour = Behaviour::default().fail("d").fail_rollback("b");
    let mut tasks = TaskSet::new();
    for (id, phase) in [
        ("a", Phase::Preparation),
        ("b", Phase::VolumeCreation),
        ("c", Phase::VolumeMounting),
        ("d", Phase::OsInstallation),
        ("e", Phase::Cleaning),
    ] {
        tasks.add(recording_task(id, phase, &behaviour));
    }
    tasks.add(plain_task("no_undo", Phase::VolumeMounting));

    let order = resolve(tasks.freeze()).unwrap();
    let mut journal = Journal::default();
    let failure = Executor::new().run(&order, &mut journal).unwrap_err();

    assert_eq!(failure.task.as_str(), "d");
    assert_eq!(journal.runs(), vec!["a", "b", "c", "no_undo", "d"]);
    assert_eq!(journal.rollbacks(), vec!["c", "b", "a"]);

    let report = &failure.rollback;
    assert_eq!(report.failed_task.as_str(), "d");
    assert_eq!(ids(&report.rolled_back().into_iter().cloned().collect::<Vec<_>>()), vec!["c", "a"]);
    assert_eq!(report.skipped().len(), 1);
    assert_eq!(report.failures().len(), 1);
    assert_eq!(report.failures()[0].0.as_str(), "b");
    assert!(!report.is_clean());
    assert_eq!(report.outcomes[0].task.as_str(), "no_undo");
    assert_eq!(report.outcomes[0].status, RollbackStatus::Skipped);

    assert!(failure.to_string().contains("Task 'd' failed"));
}

/// Test: Observers see events in run order
/// Given an order whose second task fails
/// When the order runs with an observer
/// Then events arrive start, complete, start, fail, unwind
#[test]
fn test_observer_event_sequence() {
    let behaviour = Behaviour::default().fail("two");
    let mut tasks = TaskSet::new();
    tasks.add(recording_task("one", Phase::Preparation, &behaviour));
    tasks.add(recording_task("two", Phase::Preparation, &behaviour));
    let order = resolve(tasks.freeze()).unwrap();

    let log = EventLog::default();
    let sink = log.clone();
    let mut journal = Journal::default();
    let result = Executor::new()
        .with_observer(move |event: &ExecutionEvent<'_>| {
            sink.push(match event {
                ExecutionEvent::TaskStarted { task, index, total, .. } => {
                    format!("start {} {}/{}", task, index, total)
                }
                ExecutionEvent::TaskCompleted { task, .. } => format!("done {}", task),
                ExecutionEvent::TaskSkipped { task, .. } => format!("skip {}", task),
                ExecutionEvent::TaskFailed { task, .. } => format!("fail {}", task),
                ExecutionEvent::RollbackStarted { completed, .. } => {
                    format!("unwind {}", completed)
                }
                ExecutionEvent::TaskRolledBack(outcome) => {
                    format!("undo {} {}", outcome.task, outcome.status)
                }
                ExecutionEvent::RollbackFinished(report) => {
                    format!("unwound clean={}", report.is_clean())
                }
            })
        })
        .run(&order, &mut journal);
    assert!(result.is_err());

    assert_eq!(
        log.events(),
        vec![
            "start one 1/2",
            "done one",
            "start two 2/2",
            "fail two",
            "unwind 1",
            "undo one rolled back",
            "unwound clean=true",
        ]
    );
}

/// Test: Dry runs call nothing
/// Given a failing task
/// When the order runs dry
/// Then every task is skipped and the run succeeds
#[test]
fn test_dry_run_calls_no_action() {
    let behaviour = Behaviour::default().fail("b");
    let mut tasks = TaskSet::new();
    tasks.add(recording_task("a", Phase::Preparation, &behaviour));
    tasks.add(recording_task("b", Phase::Cleaning, &behaviour));
    let order = resolve(tasks.freeze()).unwrap();

    let mut journal = Journal::default();
    let summary = Executor::new().dry_run(true).run(&order, &mut journal).unwrap();
    assert!(journal.entries.is_empty());
    assert_eq!(ids(&summary.skipped), vec!["a", "b"]);
    assert!(summary.completed.is_empty());
}
