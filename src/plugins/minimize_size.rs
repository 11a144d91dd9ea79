use std::fs;

use serde::Deserialize;

use crate::context::BuildContext;
use crate::contributor::Contributor;
use crate::core::{Phase, Task, TaskSet};
use crate::manifest::Manifest;
use crate::tasks::{bootstrap, clear_dir, packages};
use crate::util::chroot;
use crate::{vlog_debug, Result};

pub const EXCLUDE_DOCS: &str = "minimize_size.exclude_docs";
pub const REMOVE_DOCS: &str = "minimize_size.remove_docs";
pub const CLEAN_APT: &str = "minimize_size.clean_apt";

const DOC_DIRS: &[&str] = &["usr/share/doc", "usr/share/man", "usr/share/info"];

const DPKG_NODOC: &str = "etc/dpkg/dpkg.cfg.d/01_nodoc";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_true")]
    pub remove_docs: bool,
}

fn default_true() -> bool {
    true
}

pub struct MinimizeSize {
    settings: Settings,
}

impl MinimizeSize {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl Contributor for MinimizeSize {
    fn name(&self) -> &str {
        "minimize_size"
    }

    fn resolve_tasks(&self, tasks: &mut TaskSet<BuildContext>, _manifest: &Manifest) -> Result<()> {
        tasks.remove([packages::APT_CLEAN]);
        tasks.add(Task::new(
            CLEAN_APT,
            Phase::SystemCleaning,
            "Removing the apt cache and package lists",
            clean_apt,
        ));
        if self.settings.remove_docs {
            tasks.add(
                Task::new(
                    EXCLUDE_DOCS,
                    Phase::OsInstallation,
                    "Excluding documentation from future installs",
                    exclude_docs,
                )
                .after([bootstrap::DEBOOTSTRAP]),
            );
            tasks.add(Task::new(
                REMOVE_DOCS,
                Phase::SystemCleaning,
                "Removing documentation",
                remove_docs,
            ));
        }
        Ok(())
    }
}

fn dpkg_nodoc() -> String {
    DOC_DIRS
        .iter()
        .map(|dir| format!("path-exclude=/{}/*\n", dir))
        .collect::<String>()
        + "path-include=/usr/share/doc/*/copyright\n"
}

fn exclude_docs(ctx: &mut BuildContext) -> Result<()> {
    let path = ctx.root_path(DPKG_NODOC);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, dpkg_nodoc())?;
    Ok(())
}

fn remove_docs(ctx: &mut BuildContext) -> Result<()> {
    let mut removed = 0;
    for dir in DOC_DIRS {
        removed += clear_dir(&ctx.root_path(dir))?;
    }
    vlog_debug!("Removed {} documentation entries", removed);
    Ok(())
}

fn clean_apt(ctx: &mut BuildContext) -> Result<()> {
    chroot(&ctx.root, &["apt-get", "clean"])?;
    let removed = clear_dir(&ctx.root_path("var/lib/apt/lists"))?;
    vlog_debug!("Removed {} apt list entries", removed);
    Ok(())
}
