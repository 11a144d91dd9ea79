use crate::core::phase::Phase;
use crate::core::task::TaskId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Command `{command}` failed with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Missing host commands: {}", .0.join(", "))]
    MissingCommands(Vec<String>),

    #[error("Dependency cycle between tasks: {}", join_ids(.members))]
    Cycle { members: Vec<TaskId> },

    #[error(
        "Task '{successor}' ({successor_phase}) must run after '{predecessor}' ({predecessor_phase}), which belongs to a later phase"
    )]
    PhaseOrder {
        predecessor: TaskId,
        predecessor_phase: Phase,
        successor: TaskId,
        successor_phase: Phase,
    },
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, Error>;
