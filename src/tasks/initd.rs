//! SysV init scripts.
//!
//! Tasks register scripts in [`BuildContext::init_scripts`];
//! `initd.install_scripts` writes them to `/etc/init.d` and enables them.

use std::fs;
use std::os::unix::fs::PermissionsExt;

use crate::context::{BuildContext, BuildTask};
use crate::core::{Phase, Task};
use crate::util::chroot;
use crate::{vlog_debug, Result};

pub const INSTALL_SCRIPTS: &str = "initd.install_scripts";

/// Releases booting with sysvinit rather than systemd.
const SYSVINIT_RELEASES: &[&str] = &["squeeze", "wheezy"];

pub fn uses_sysvinit(release: &str) -> bool {
    SYSVINIT_RELEASES.contains(&release)
}

pub fn tasks() -> Vec<BuildTask> {
    vec![Task::new(
        INSTALL_SCRIPTS,
        Phase::SystemModification,
        "Installing init scripts",
        install_scripts,
    )]
}

/// Write every registered script. Returns their names.
fn write_scripts(ctx: &BuildContext) -> Result<Vec<String>> {
    let dir = ctx.root_path("etc/init.d");
    if !ctx.init_scripts.is_empty() {
        fs::create_dir_all(&dir)?;
    }
    for (name, script) in &ctx.init_scripts {
        let path = dir.join(name);
        fs::write(&path, script)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(ctx.init_scripts.keys().cloned().collect())
}

fn install_scripts(ctx: &mut BuildContext) -> Result<()> {
    let names = write_scripts(ctx)?;
    for name in &names {
        chroot(&ctx.root, &["update-rc.d", name.as_str(), "defaults"])?;
    }
    vlog_debug!("Installed {} init scripts", names.len());
    Ok(())
}
