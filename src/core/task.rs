//! Task descriptors.
//!
//! A task is the unit of provisioning work: an identity, the phase it
//! belongs to, ordering constraints relative to other tasks, an action
//! over the shared build context and an optional rollback undoing it.

use crate::core::phase::Phase;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stable identity of a task within a run.
///
/// Identities are dotted names such as `grub.install`. They are the keys
/// of a task set and the node labels of the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Side-effecting operation over the context.
///
/// Shared so a descriptor can be cloned into several task sets.
pub type Action<C> = Arc<dyn Fn(&mut C) -> Result<()> + Send + Sync>;

/// A single provisioning step.
pub struct Task<C> {
    /// Unique identity of this task.
    pub id: TaskId,
    /// Human-readable description, used for progress output.
    pub description: String,
    /// Phase this task runs in.
    pub phase: Phase,
    /// Tasks that must complete strictly before this one, if present.
    pub predecessors: Vec<TaskId>,
    /// Tasks that must complete strictly after this one, if present.
    pub successors: Vec<TaskId>,
    action: Action<C>,
    rollback: Option<Action<C>>,
}

impl<C> Task<C> {
    /// Create a task with no ordering constraints and no rollback.
    pub fn new<F>(id: impl Into<TaskId>, phase: Phase, description: &str, action: F) -> Self
    where
        F: Fn(&mut C) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            description: description.to_string(),
            phase,
            predecessors: Vec::new(),
            successors: Vec::new(),
            action: Arc::new(action),
            rollback: None,
        }
    }

    /// Declare tasks that must run before this one.
    pub fn after<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        for id in ids {
            push_unique(&mut self.predecessors, id.into());
        }
        self
    }

    /// Declare tasks that must run after this one.
    pub fn before<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        for id in ids {
            push_unique(&mut self.successors, id.into());
        }
        self
    }

    /// Attach an action undoing this task's effects.
    pub fn with_rollback<F>(mut self, rollback: F) -> Self
    where
        F: Fn(&mut C) -> Result<()> + Send + Sync + 'static,
    {
        self.rollback = Some(Arc::new(rollback));
        self
    }

    pub fn run(&self, ctx: &mut C) -> Result<()> {
        (self.action)(ctx)
    }

    /// Run the rollback action, if one is declared.
    ///
    /// Returns `None` when the task has nothing to undo.
    pub fn run_rollback(&self, ctx: &mut C) -> Option<Result<()>> {
        self.rollback.as_ref().map(|rollback| rollback(ctx))
    }

    pub fn has_rollback(&self) -> bool {
        self.rollback.is_some()
    }
}

fn push_unique(ids: &mut Vec<TaskId>, id: TaskId) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

impl<C> Clone for Task<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            description: self.description.clone(),
            phase: self.phase,
            predecessors: self.predecessors.clone(),
            successors: self.successors.clone(),
            action: Arc::clone(&self.action),
            rollback: self.rollback.clone(),
        }
    }
}

impl<C> std::fmt::Debug for Task<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("predecessors", &self.predecessors)
            .field("successors", &self.successors)
            .field("rollback", &self.has_rollback())
            .finish()
    }
}
