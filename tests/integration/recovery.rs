//! Failed builds cleaning up after themselves.
//!
//! These runs use base pipeline tasks that only touch the filesystem, so
//! they work without root or block devices.

use vmstrap::core::{resolve, Executor, Phase, RollbackStatus, Task, TaskSet};
use vmstrap::pipeline::{self, RunStatus};
use vmstrap::tasks::{loopback, workspace};
use vmstrap::{BuildContext, Error, Manifest};

use crate::fixtures::{TestDir, KVM_TOML};

fn context(dir: &TestDir) -> BuildContext {
    let manifest = Manifest::load(&dir.write("kvm.toml", KVM_TOML)).unwrap();
    BuildContext::new(manifest, &dir.workspace_dir(), &dir.output_dir()).unwrap()
}

/// Workspace and sparse image creation, then a task that always fails.
fn failing_build() -> TaskSet<BuildContext> {
    let mut tasks = TaskSet::new();
    tasks.set_contributor("base");
    tasks.extend(workspace::tasks());
    tasks.extend(loopback::tasks());
    tasks.remove([loopback::ADD_REQUIRED_COMMANDS, loopback::ATTACH, loopback::DETACH]);

    tasks.set_contributor("test");
    tasks.add(
        Task::new(
            "volume.break",
            Phase::VolumePreparation,
            "Breaking the build",
            |_ctx: &mut BuildContext| Err(Error::Validation("disk on fire".to_string())),
        )
        .after([loopback::CREATE]),
    );
    tasks
}

/// Test: Rollback removes what the build created
/// Given a build that creates its workspace and volume image, then fails
/// When the build runs
/// Then the image and the workspace are removed again
#[test]
fn test_failed_build_removes_workspace() {
    let dir = TestDir::new();
    let mut ctx = context(&dir);
    let order = resolve(failing_build().freeze()).unwrap();

    let failure = Executor::new().run(&order, &mut ctx).unwrap_err();
    assert_eq!(failure.task.as_str(), "volume.break");
    assert_eq!(
        failure
            .completed
            .iter()
            .map(|m| m.task.as_str())
            .collect::<Vec<_>>(),
        vec![workspace::CREATE, loopback::CREATE]
    );

    let outcomes: Vec<(&str, &RollbackStatus)> = failure
        .rollback
        .outcomes
        .iter()
        .map(|o| (o.task.as_str(), &o.status))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            (loopback::CREATE, &RollbackStatus::RolledBack),
            (workspace::CREATE, &RollbackStatus::RolledBack),
        ]
    );
    assert!(!ctx.volume.image_path.exists());
    assert!(!ctx.workspace.exists());
}

/// Test: A refusing rollback does not stop the others
/// Given a build whose root is still marked mounted when it fails
/// When the build is unwound
/// Then the workspace rollback fails, the image is still removed and the
/// report names the failure
#[test]
fn test_refused_rollback_is_reported() {
    let dir = TestDir::new();
    let mut ctx = context(&dir);

    let mut tasks = failing_build();
    tasks.add(
        Task::new(
            "volume.pretend_mount",
            Phase::VolumeCreation,
            "Pretending to mount",
            |ctx: &mut BuildContext| {
                ctx.volume.root.mounted = true;
                Ok(())
            },
        )
        .after([loopback::CREATE]),
    );
    let order = resolve(tasks.freeze()).unwrap();

    let report = pipeline::run(&order, &mut ctx, false, |_| {});
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failed_task.as_ref().unwrap().as_str(), "volume.break");
    assert!(report.error.as_ref().unwrap().contains("disk on fire"));

    let rollback = report.rollback.as_ref().unwrap();
    assert_eq!(rollback.failures().len(), 1);
    assert_eq!(rollback.failures()[0].0.as_str(), workspace::CREATE);
    assert_eq!(rollback.skipped().len(), 1);
    assert!(!ctx.volume.image_path.exists());
    assert!(ctx.workspace.exists());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "failed");
    assert_eq!(json["rollback"]["outcomes"][2]["status"], "failed");
}
