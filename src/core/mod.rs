//! Task engine.
//!
//! Contributors register [`Task`]s into a [`TaskSet`], the set is frozen
//! and handed to [`resolve`], and the resulting [`ExecutionOrder`] is run
//! by an [`Executor`]. A failing task unwinds the completed ones through
//! [`unwind`].

pub mod dag;
pub mod executor;
pub mod phase;
pub mod rollback;
pub mod task;
pub mod taskset;

pub use dag::{resolve, ExecutionOrder};
pub use executor::{ExecutionEvent, Executor, RunFailure, RunSummary, TaskMetrics};
pub use phase::Phase;
pub use rollback::{unwind, unwind_observed, RollbackOutcome, RollbackReport, RollbackStatus};
pub use task::{Action, Task, TaskId};
pub use taskset::{Collision, FrozenTaskSet, TaskSet};
