//! Host dependency checking.
//!
//! Tasks that shell out register the commands they need during
//! preparation through [`require`]. `host.check_dependencies` runs after
//! all of them and fails with the complete list of missing commands.

use crate::context::{BuildContext, BuildTask};
use crate::core::{Phase, Task};
use crate::util::missing_commands;
use crate::{vlog_debug, Error, Result};

pub const CHECK_DEPENDENCIES: &str = "host.check_dependencies";

pub fn tasks() -> Vec<BuildTask> {
    vec![Task::new(
        CHECK_DEPENDENCIES,
        Phase::Preparation,
        "Checking host dependencies",
        check_dependencies,
    )]
}

/// A preparation task recording host commands needed later in the build.
pub fn require<S: Into<String>>(id: &str, description: &str, commands: Vec<S>) -> BuildTask {
    let commands: Vec<String> = commands.into_iter().map(Into::into).collect();
    Task::new(id, Phase::Preparation, description, move |ctx: &mut BuildContext| {
        ctx.require_commands(commands.iter().cloned());
        Ok(())
    })
    .before([CHECK_DEPENDENCIES])
}

fn check_dependencies(ctx: &mut BuildContext) -> Result<()> {
    let missing = missing_commands(&ctx.host_dependencies);
    if !missing.is_empty() {
        return Err(Error::MissingCommands(missing));
    }
    vlog_debug!("All {} host commands found", ctx.host_dependencies.len());
    Ok(())
}
