use std::fs;

use crate::context::{BuildContext, BuildTask};
use crate::core::{Phase, Task};
use crate::{vlog_debug, Error, Result};

pub const CREATE: &str = "workspace.create";
pub const DELETE: &str = "workspace.delete";

pub fn tasks() -> Vec<BuildTask> {
    vec![
        Task::new(CREATE, Phase::Preparation, "Creating workspace", create).with_rollback(delete),
        Task::new(DELETE, Phase::Cleaning, "Deleting workspace", delete),
    ]
}

fn create(ctx: &mut BuildContext) -> Result<()> {
    fs::create_dir_all(&ctx.root)?;
    vlog_debug!("Workspace created at {}", ctx.workspace.display());
    Ok(())
}

fn delete(ctx: &mut BuildContext) -> Result<()> {
    if ctx.volume.root.mounted || !ctx.mounts.is_empty() {
        return Err(Error::Validation(format!(
            "Refusing to delete {} while filesystems are mounted in it",
            ctx.workspace.display()
        )));
    }
    if ctx.workspace.exists() {
        fs::remove_dir_all(&ctx.workspace)?;
        vlog_debug!("Workspace {} deleted", ctx.workspace.display());
    }
    Ok(())
}
