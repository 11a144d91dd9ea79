//! Task sets.
//!
//! A [`TaskSet`] is assembled fresh for every run by an ordered list of
//! contributors, then frozen into a read-only [`FrozenTaskSet`] before it
//! is handed to the resolver.

use crate::core::task::{Task, TaskId};
use crate::{vlog_debug, vlog_warn};
use std::collections::HashMap;

const UNNAMED_CONTRIBUTOR: &str = "unnamed";

struct Entry<C> {
    task: Task<C>,
    contributor: String,
}

/// A task silently replaced by another contributor through [`TaskSet::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub task: TaskId,
    /// Contributor of the replaced task.
    pub previous: String,
    /// Contributor of the task that replaced it.
    pub replacement: String,
}

impl std::fmt::Display for Collision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Task '{}' registered by '{}' is replaced by '{}'",
            self.task, self.previous, self.replacement
        )
    }
}

/// Mutable collection of tasks keyed by identity.
///
/// Registration order is remembered and used by the resolver to break
/// ties. Replacing a task keeps its original position.
pub struct TaskSet<C> {
    entries: HashMap<TaskId, Entry<C>>,
    order: Vec<TaskId>,
    contributor: String,
    collisions: Vec<Collision>,
}

impl<C> TaskSet<C> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            contributor: UNNAMED_CONTRIBUTOR.to_string(),
            collisions: Vec::new(),
        }
    }

    /// Attribute subsequent insertions to the named contributor.
    pub fn set_contributor(&mut self, name: &str) {
        self.contributor = name.to_string();
    }

    pub fn contributor(&self) -> &str {
        &self.contributor
    }

    /// Insert a task, replacing any task with the same identity.
    ///
    /// Replacing a task registered by a different contributor is logged
    /// as a warning and recorded as a [`Collision`]. Use
    /// [`TaskSet::replace`] for intended overrides.
    /// Returns the replaced task, if any.
    pub fn add(&mut self, task: Task<C>) -> Option<Task<C>> {
        if let Some(existing) = self.entries.get(&task.id) {
            if existing.contributor != self.contributor {
                let collision = Collision {
                    task: task.id.clone(),
                    previous: existing.contributor.clone(),
                    replacement: self.contributor.clone(),
                };
                vlog_warn!("{}", collision);
                self.collisions.push(collision);
            }
        }
        self.insert(task)
    }

    /// Cross-contributor replacements made through [`TaskSet::add`].
    pub fn collisions(&self) -> &[Collision] {
        &self.collisions
    }

    /// Insert a task that deliberately overrides an existing one.
    pub fn replace(&mut self, task: Task<C>) -> Option<Task<C>> {
        if let Some(existing) = self.entries.get(&task.id) {
            vlog_debug!(
                "Task '{}' from '{}' overridden by '{}'",
                task.id,
                existing.contributor,
                self.contributor
            );
        }
        self.insert(task)
    }

    fn insert(&mut self, task: Task<C>) -> Option<Task<C>> {
        let id = task.id.clone();
        let entry = Entry {
            task,
            contributor: self.contributor.clone(),
        };
        match self.entries.insert(id.clone(), entry) {
            Some(previous) => Some(previous.task),
            None => {
                self.order.push(id);
                None
            }
        }
    }

    /// Insert several tasks, in iteration order.
    pub fn extend<I>(&mut self, tasks: I)
    where
        I: IntoIterator<Item = Task<C>>,
    {
        for task in tasks {
            self.add(task);
        }
    }

    /// Remove tasks by identity. Unknown identities are ignored.
    ///
    /// Edges other tasks declare towards removed tasks are left in place
    /// and dropped by the resolver.
    pub fn remove<I, T>(&mut self, ids: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        for id in ids {
            let id = id.into();
            if self.entries.remove(&id).is_some() {
                vlog_debug!("Task '{}' removed by '{}'", id, self.contributor);
                self.order.retain(|existing| existing != &id);
            }
        }
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task<C>> {
        self.entries.get(id).map(|entry| &entry.task)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Identities in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &TaskId> {
        self.order.iter()
    }

    /// Freeze the set. No task can be added or removed afterwards.
    pub fn freeze(mut self) -> FrozenTaskSet<C> {
        let mut entries = Vec::with_capacity(self.order.len());
        let mut index = HashMap::with_capacity(self.order.len());
        for id in self.order {
            if let Some(entry) = self.entries.remove(&id) {
                index.insert(id, entries.len());
                entries.push(entry);
            }
        }
        FrozenTaskSet {
            entries,
            index,
            collisions: self.collisions,
        }
    }
}

impl<C> Default for TaskSet<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> std::fmt::Debug for TaskSet<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSet")
            .field("tasks", &self.order)
            .field("contributor", &self.contributor)
            .finish()
    }
}

/// Read-only task set, indexed by registration position.
pub struct FrozenTaskSet<C> {
    entries: Vec<Entry<C>>,
    index: HashMap<TaskId, usize>,
    collisions: Vec<Collision>,
}

impl<C> FrozenTaskSet<C> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task<C>> {
        self.index.get(id).map(|&i| &self.entries[i].task)
    }

    /// Registration position of a task.
    pub fn position(&self, id: &TaskId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Task at a registration position.
    pub fn at(&self, position: usize) -> Option<&Task<C>> {
        self.entries.get(position).map(|entry| &entry.task)
    }

    /// Name of the contributor that registered a task.
    pub fn contributor_of(&self, id: &TaskId) -> Option<&str> {
        self.index
            .get(id)
            .map(|&i| self.entries[i].contributor.as_str())
    }

    /// Tasks in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Task<C>> {
        self.entries.iter().map(|entry| &entry.task)
    }

    pub fn collisions(&self) -> &[Collision] {
        &self.collisions
    }
}

impl<C> std::fmt::Debug for FrozenTaskSet<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrozenTaskSet")
            .field("tasks", &self.entries.len())
            .finish()
    }
}
