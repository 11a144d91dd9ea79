use serde::Deserialize;

use crate::context::BuildContext;
use crate::contributor::Contributor;
use crate::core::{Phase, Task, TaskSet};
use crate::manifest::Manifest;
use crate::tasks::arg;
use crate::util::log_check_call_with_input;
use crate::{Error, Result};

pub const SET: &str = "root_password.set";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub password: String,
}

pub struct RootPassword {
    settings: Settings,
}

impl RootPassword {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl Contributor for RootPassword {
    fn name(&self) -> &str {
        "root_password"
    }

    fn validate_manifest(&self, _manifest: &Manifest) -> Result<()> {
        let password = &self.settings.password;
        if password.is_empty() {
            return Err(Error::Validation("root_password: password must not be empty".to_string()));
        }
        if password.contains(['\n', ':']) {
            return Err(Error::Validation(
                "root_password: password must not contain ':' or newlines".to_string(),
            ));
        }
        Ok(())
    }

    fn resolve_tasks(&self, tasks: &mut TaskSet<BuildContext>, _manifest: &Manifest) -> Result<()> {
        let input = format!("root:{}\n", self.settings.password);
        tasks.add(Task::new(
            SET,
            Phase::UserModification,
            "Setting the root password",
            move |ctx: &mut BuildContext| {
                let root = arg(&ctx.root);
                log_check_call_with_input(&["chroot", root.as_str(), "chpasswd"], &input)?;
                Ok(())
            },
        ));
        Ok(())
    }
}
