//! Dependency resolution.
//!
//! The resolver turns a frozen task set into a single execution order.
//! Declared predecessor and successor constraints become edges of a
//! petgraph `DiGraph` whose nodes are registration positions. Phases are
//! not encoded as edges: tasks are grouped by phase, each group is
//! sorted on its intra-phase edges, and the groups are concatenated in
//! phase order. Cross-phase edges only have to point forward.

use crate::core::phase::Phase;
use crate::core::task::{Task, TaskId};
use crate::core::taskset::FrozenTaskSet;
use crate::error::{Error, Result};
use crate::{vlog_debug, vlog_trace};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Tasks in the order they will run.
///
/// Owns the frozen task set so the executor can look up rollback actions
/// by identity.
pub struct ExecutionOrder<C> {
    tasks: FrozenTaskSet<C>,
    order: Vec<usize>,
}

impl<C> ExecutionOrder<C> {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Tasks in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &Task<C>> {
        self.order.iter().filter_map(|&i| self.tasks.at(i))
    }

    /// Identities in execution order.
    pub fn ids(&self) -> Vec<TaskId> {
        self.iter().map(|task| task.id.clone()).collect()
    }

    /// The task set the order was resolved from.
    pub fn tasks(&self) -> &FrozenTaskSet<C> {
        &self.tasks
    }
}

impl<C> std::fmt::Debug for ExecutionOrder<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter().map(|task| &task.id)).finish()
    }
}

/// Dependency graph over a frozen task set.
///
/// Node `i` is the task at registration position `i`. Edges point from
/// the task that must run first to the task that must run after it.
struct TaskGraph {
    graph: DiGraph<usize, ()>,
}

impl TaskGraph {
    fn build<C>(tasks: &FrozenTaskSet<C>) -> Self {
        let mut graph = DiGraph::with_capacity(tasks.len(), tasks.len());
        for position in 0..tasks.len() {
            graph.add_node(position);
        }

        for (position, task) in tasks.iter().enumerate() {
            let this = NodeIndex::new(position);
            for pred in &task.predecessors {
                match tasks.position(pred) {
                    Some(from) => {
                        graph.update_edge(NodeIndex::new(from), this, ());
                    }
                    None => vlog_debug!(
                        "Dropping edge {} -> {}: '{}' is not in the task set",
                        pred,
                        task.id,
                        pred
                    ),
                }
            }
            for succ in &task.successors {
                match tasks.position(succ) {
                    Some(to) => {
                        graph.update_edge(this, NodeIndex::new(to), ());
                    }
                    None => vlog_debug!(
                        "Dropping edge {} -> {}: '{}' is not in the task set",
                        task.id,
                        succ,
                        succ
                    ),
                }
            }
        }

        Self { graph }
    }

    fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Members of every cycle, each sorted by registration position.
    fn cycles(&self) -> Vec<Vec<usize>> {
        let mut cycles: Vec<Vec<usize>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || self.graph.find_edge(component[0], component[0]).is_some()
            })
            .map(|component| {
                let mut members: Vec<usize> = component.iter().map(|n| n.index()).collect();
                members.sort_unstable();
                members
            })
            .collect();
        cycles.sort();
        cycles
    }

    fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.graph
            .raw_edges()
            .iter()
            .map(|edge| (edge.source().index(), edge.target().index()))
    }

    /// Kahn's algorithm over the members of one phase, restricted to edges
    /// between those members. Ready tasks are taken lowest registration
    /// position first.
    fn sort_group(&self, members: &[usize], phase_of: &[Phase]) -> Vec<usize> {
        let phase = match members.first() {
            Some(&first) => phase_of[first],
            None => return Vec::new(),
        };

        let mut indegree = vec![0usize; phase_of.len()];
        for &member in members {
            indegree[member] = self
                .graph
                .neighbors_directed(NodeIndex::new(member), Direction::Incoming)
                .filter(|n| phase_of[n.index()] == phase)
                .count();
        }

        let mut ready: BinaryHeap<Reverse<usize>> = members
            .iter()
            .copied()
            .filter(|&member| indegree[member] == 0)
            .map(Reverse)
            .collect();

        let mut sorted = Vec::with_capacity(members.len());
        while let Some(Reverse(next)) = ready.pop() {
            sorted.push(next);
            for succ in self
                .graph
                .neighbors_directed(NodeIndex::new(next), Direction::Outgoing)
            {
                let succ = succ.index();
                if phase_of[succ] != phase {
                    continue;
                }
                indegree[succ] -= 1;
                if indegree[succ] == 0 {
                    ready.push(Reverse(succ));
                }
            }
        }
        sorted
    }
}

/// Resolve a frozen task set into an execution order.
///
/// # Errors
///
/// - [`Error::Cycle`] if the declared edges contain a cycle.
/// - [`Error::PhaseOrder`] if a task must run before a task of an
///   earlier phase.
pub fn resolve<C>(tasks: FrozenTaskSet<C>) -> Result<ExecutionOrder<C>> {
    let graph = TaskGraph::build(&tasks);
    vlog_debug!(
        "Resolving {} tasks with {} dependencies",
        tasks.len(),
        graph.edge_count()
    );

    let id_at = |position: usize| -> TaskId {
        tasks
            .at(position)
            .map(|task| task.id.clone())
            .unwrap_or_else(|| TaskId::new(format!("#{}", position)))
    };

    if let Some(cycle) = graph.cycles().into_iter().next() {
        return Err(Error::Cycle {
            members: cycle.into_iter().map(id_at).collect(),
        });
    }

    let phase_of: Vec<Phase> = tasks.iter().map(|task| task.phase).collect();

    let mut backward: Vec<(usize, usize)> = graph
        .edges()
        .filter(|&(from, to)| phase_of[from] > phase_of[to])
        .collect();
    backward.sort_unstable();
    if let Some(&(from, to)) = backward.first() {
        return Err(Error::PhaseOrder {
            predecessor: id_at(from),
            predecessor_phase: phase_of[from],
            successor: id_at(to),
            successor_phase: phase_of[to],
        });
    }

    let mut order = Vec::with_capacity(tasks.len());
    for phase in Phase::ALL {
        let members: Vec<usize> = (0..phase_of.len())
            .filter(|&position| phase_of[position] == phase)
            .collect();
        if members.is_empty() {
            continue;
        }
        let sorted = graph.sort_group(&members, &phase_of);
        if sorted.len() != members.len() {
            let remaining = members
                .into_iter()
                .filter(|member| !sorted.contains(member))
                .map(id_at)
                .collect();
            return Err(Error::Cycle { members: remaining });
        }
        vlog_trace!("Phase {}: {} tasks", phase, sorted.len());
        order.extend(sorted);
    }

    Ok(ExecutionOrder { tasks, order })
}
