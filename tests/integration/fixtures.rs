//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Temporary build directories with manifests on disk
//! - A recording context for engine tests
//! - Tasks that log, fail or fail to roll back on demand

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;

use tempfile::TempDir;

use vmstrap::core::{Phase, Task};
use vmstrap::Error;

/// A temporary directory holding manifests, workspaces and output.
pub struct TestDir {
    pub temp_dir: TempDir,
}

impl TestDir {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.path().join("workspace")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path().join("images")
    }

    /// Write `content` to `name` inside the directory.
    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path().join(name);
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }
}

/// A KVM manifest in TOML.
pub const KVM_TOML: &str = r#"
name = "debian-{system.release}-{system.architecture}-{provider.name}"

[provider]
name = "kvm"

[bootstrapper]
variant = "minbase"
include_packages = ["ca-certificates"]

[system]
release = "bookworm"
architecture = "amd64"
hostname = "vm"
timezone = "Europe/Berlin"

[volume]
backing = "qcow2"

[volume.partitions]
type = "msdos"

[volume.partitions.root]
size = "2GiB"
filesystem = "ext4"

[packages]
install = ["openssh-server", "sudo"]
"#;

/// An Azure manifest in JSON.
pub const AZURE_JSON: &str = r#"{
    "name": "debian-{system.release}-azure",
    "provider": { "name": "azure" },
    "system": { "release": "bookworm", "architecture": "amd64" },
    "volume": {
        "backing": "vhd",
        "partitions": { "type": "msdos", "root": { "size": "8GiB", "filesystem": "ext4" } }
    },
    "plugins": {
        "root_password": { "password": "correct horse" },
        "minimize_size": {}
    }
}"#;

/// Context recording what tasks did.
#[derive(Debug, Default)]
pub struct Journal {
    /// `run:<id>` and `rollback:<id>` entries in call order.
    pub entries: Vec<String>,
}

impl Journal {
    pub fn runs(&self) -> Vec<&str> {
        self.with_prefix("run:")
    }

    pub fn rollbacks(&self) -> Vec<&str> {
        self.with_prefix("rollback:")
    }

    fn with_prefix(&self, prefix: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|e| e.strip_prefix(prefix))
            .collect()
    }
}

/// How a recording task behaves.
#[derive(Debug, Clone, Default)]
pub struct Behaviour {
    /// Tasks whose action fails.
    pub failing: HashSet<String>,
    /// Tasks whose rollback fails.
    pub failing_rollback: HashSet<String>,
}

impl Behaviour {
    pub fn fail(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn fail_rollback(mut self, id: &str) -> Self {
        self.failing_rollback.insert(id.to_string());
        self
    }
}

/// A task that records its run and rollback in the journal.
pub fn recording_task(id: &str, phase: Phase, behaviour: &Behaviour) -> Task<Journal> {
    let behaviour = Arc::new(behaviour.clone());
    let run_id = id.to_string();
    let rollback_id = id.to_string();
    let run_behaviour = Arc::clone(&behaviour);
    Task::new(id, phase, &format!("Task {}", id), move |journal: &mut Journal| {
        journal.entries.push(format!("run:{}", run_id));
        if run_behaviour.failing.contains(&run_id) {
            return Err(Error::Validation(format!("{} failed", run_id)));
        }
        Ok(())
    })
    .with_rollback(move |journal: &mut Journal| {
        journal.entries.push(format!("rollback:{}", rollback_id));
        if behaviour.failing_rollback.contains(&rollback_id) {
            return Err(Error::Validation(format!("{} rollback failed", rollback_id)));
        }
        Ok(())
    })
}

/// A task without a rollback.
pub fn plain_task(id: &str, phase: Phase) -> Task<Journal> {
    let run_id = id.to_string();
    Task::new(id, phase, &format!("Task {}", id), move |journal: &mut Journal| {
        journal.entries.push(format!("run:{}", run_id));
        Ok(())
    })
}

/// Collects event names emitted by an executor.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn push(&self, event: String) {
        self.events.lock().expect("event log poisoned").push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("event log poisoned").clone()
    }
}
