//! Turning a manifest into a resolved task order and running it.
//!
//! Contributors are applied in a fixed order: the base pipeline, release
//! logic, the manifest's provider, then its plugins sorted by name. The
//! assembled set is frozen before resolution, so nothing can register a
//! task once the order has been computed.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::BuildContext;
use crate::contributor::Contributor;
use crate::core::{
    resolve, ExecutionEvent, ExecutionOrder, Executor, Phase, RollbackReport, RunFailure,
    RunSummary, TaskId, TaskMetrics, TaskSet,
};
use crate::manifest::Manifest;
use crate::release::Release;
use crate::tasks::Base;
use crate::{plugins, providers, vlog, vlog_debug, Result};

/// Every contributor the manifest enables, in application order.
pub fn contributors(manifest: &Manifest) -> Result<Vec<Box<dyn Contributor>>> {
    let mut contributors: Vec<Box<dyn Contributor>> = vec![Box::new(Base), Box::new(Release)];
    contributors.push(providers::get_provider(&manifest.provider.name)?);
    for (name, settings) in &manifest.plugins {
        contributors.push(plugins::get_plugin(name, settings)?);
    }
    Ok(contributors)
}

/// Validate the manifest against the base rules and every contributor.
pub fn validate(manifest: &Manifest) -> Result<Vec<Box<dyn Contributor>>> {
    manifest.validate()?;
    let contributors = contributors(manifest)?;
    for contributor in &contributors {
        contributor.validate_manifest(manifest)?;
    }
    vlog_debug!(
        "Manifest valid for contributors: {}",
        contributors
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(contributors)
}

/// Let each contributor register its tasks into one set.
pub fn assemble(
    manifest: &Manifest,
    contributors: &[Box<dyn Contributor>],
) -> Result<TaskSet<BuildContext>> {
    let mut tasks = TaskSet::new();
    for contributor in contributors {
        tasks.set_contributor(contributor.name());
        let before = tasks.len();
        contributor.resolve_tasks(&mut tasks, manifest)?;
        vlog_debug!(
            "Contributor '{}' applied ({} -> {} tasks)",
            contributor.name(),
            before,
            tasks.len()
        );
    }
    Ok(tasks)
}

/// Validate, assemble and resolve a manifest.
pub fn plan(manifest: &Manifest) -> Result<ExecutionOrder<BuildContext>> {
    let contributors = validate(manifest)?;
    let tasks = assemble(manifest, &contributors)?;
    let order = resolve(tasks.freeze())?;
    vlog!("Resolved {} tasks", order.len());
    Ok(order)
}

/// One line of a printed plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// One-based position in the order.
    pub index: usize,
    pub task: TaskId,
    pub phase: Phase,
    pub contributor: String,
    pub description: String,
}

pub fn describe(order: &ExecutionOrder<BuildContext>) -> Vec<PlanEntry> {
    order
        .iter()
        .enumerate()
        .map(|(i, task)| PlanEntry {
            index: i + 1,
            task: task.id.clone(),
            phase: task.phase,
            contributor: order
                .tasks()
                .contributor_of(&task.id)
                .unwrap_or_default()
                .to_string(),
            description: task.description.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// Machine-readable account of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub image_name: String,
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
    pub completed: Vec<TaskMetrics>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub skipped: Vec<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_task: Option<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackReport>,
}

impl RunReport {
    pub fn new(
        ctx: &BuildContext,
        started_at: DateTime<Utc>,
        dry_run: bool,
        outcome: &std::result::Result<RunSummary, RunFailure>,
    ) -> Self {
        let mut report = Self {
            run_id: ctx.run_id,
            image_name: ctx.image_name.clone(),
            started_at,
            dry_run,
            status: RunStatus::Succeeded,
            image_path: ctx.image_path.clone(),
            completed: Vec::new(),
            skipped: Vec::new(),
            failed_task: None,
            error: None,
            rollback: None,
        };
        match outcome {
            Ok(summary) => {
                report.completed = summary.completed.clone();
                report.skipped = summary.skipped.clone();
            }
            Err(failure) => {
                report.status = RunStatus::Failed;
                report.completed = failure.completed.clone();
                report.failed_task = Some(failure.task.clone());
                report.error = Some(failure.error.to_string());
                report.rollback = Some(failure.rollback.clone());
            }
        }
        report
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// Run a resolved order against a fresh context.
///
/// `observer` sees every execution event; the CLI uses it for progress
/// output and to pause before rollback.
pub fn run<F>(
    order: &ExecutionOrder<BuildContext>,
    ctx: &mut BuildContext,
    dry_run: bool,
    observer: F,
) -> RunReport
where
    F: FnMut(&ExecutionEvent<'_>),
{
    let started_at = Utc::now();
    vlog!(
        "Build {} of '{}' started{}",
        ctx.run_id,
        ctx.image_name,
        if dry_run { " (dry run)" } else { "" }
    );
    let outcome = Executor::new()
        .dry_run(dry_run)
        .with_observer(observer)
        .run(order, ctx);
    RunReport::new(ctx, started_at, dry_run, &outcome)
}
