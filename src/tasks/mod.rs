//! The base pipeline: tasks every image build runs.
//!
//! Each submodule owns one concern and exposes the identities of its
//! tasks as constants, so other contributors can order themselves
//! against them.

pub mod boot;
pub mod bootstrap;
pub mod filesystem;
pub mod host;
pub mod image;
pub mod initd;
pub mod loopback;
pub mod packages;
pub mod partitioning;
pub mod ssh;
pub mod system;
pub mod workspace;

use std::path::Path;

use crate::context::BuildContext;
use crate::contributor::Contributor;
use crate::core::TaskSet;
use crate::manifest::Manifest;
use crate::{Error, Result};

/// Contributor registering the base pipeline.
pub struct Base;

impl Contributor for Base {
    fn name(&self) -> &str {
        "base"
    }

    fn resolve_tasks(&self, tasks: &mut TaskSet<BuildContext>, manifest: &Manifest) -> Result<()> {
        tasks.extend(workspace::tasks());
        tasks.extend(host::tasks());
        tasks.extend(loopback::tasks());
        tasks.extend(partitioning::tasks(manifest));
        tasks.extend(filesystem::tasks(manifest));
        tasks.extend(bootstrap::tasks());
        tasks.extend(packages::tasks());
        tasks.extend(boot::tasks(manifest));
        tasks.extend(system::tasks(manifest));
        tasks.extend(image::tasks());
        Ok(())
    }
}

/// Render a path as a command argument.
pub(crate) fn arg(path: &Path) -> String {
    path.display().to_string()
}

pub(crate) fn not_attached() -> Error {
    Error::Validation("Volume is not attached to a loop device".to_string())
}

/// Remove everything inside `dir`, keeping `dir` itself.
pub(crate) fn clear_dir(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() && !path.is_symlink() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
        removed += 1;
    }
    Ok(removed)
}
