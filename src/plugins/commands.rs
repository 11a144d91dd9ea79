use serde::Deserialize;

use crate::context::BuildContext;
use crate::contributor::Contributor;
use crate::core::{Phase, Task, TaskSet};
use crate::manifest::Manifest;
use crate::tasks::arg;
use crate::util::log_check_call;
use crate::{vlog, Error, Result};

pub const RUN: &str = "commands.run";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Commands as argument lists. `{root}` expands to the image root.
    pub commands: Vec<Vec<String>>,
    #[serde(default = "default_phase")]
    pub phase: Phase,
}

fn default_phase() -> Phase {
    Phase::UserModification
}

pub struct Commands {
    settings: Settings,
}

impl Commands {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl Contributor for Commands {
    fn name(&self) -> &str {
        "commands"
    }

    fn validate_manifest(&self, _manifest: &Manifest) -> Result<()> {
        if self.settings.commands.is_empty() {
            return Err(Error::Validation("commands: no commands given".to_string()));
        }
        if let Some(i) = self.settings.commands.iter().position(|c| c.is_empty()) {
            return Err(Error::Validation(format!("commands: command {} is empty", i + 1)));
        }
        Ok(())
    }

    fn resolve_tasks(&self, tasks: &mut TaskSet<BuildContext>, _manifest: &Manifest) -> Result<()> {
        let commands = self.settings.commands.clone();
        tasks.add(Task::new(
            RUN,
            self.settings.phase,
            "Running user commands",
            move |ctx: &mut BuildContext| {
                let root = arg(&ctx.root);
                for command in &commands {
                    let args = expand(command, &root);
                    vlog!("Running {}", args.join(" "));
                    log_check_call(&args)?;
                }
                Ok(())
            },
        ));
        Ok(())
    }
}

fn expand(command: &[String], root: &str) -> Vec<String> {
    command.iter().map(|a| a.replace("{root}", root)).collect()
}
