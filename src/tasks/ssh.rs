//! SSH server setup for images that boot without host keys.

use std::fs;

use super::{arg, host, initd, packages};
use crate::context::{BuildContext, BuildTask};
use crate::core::{Phase, Task};
use crate::util::{chroot, log_check_call};
use crate::{vlog_debug, Result};

pub const ADD_REQUIRED_COMMANDS: &str = "ssh.add_required_commands";
pub const ADD_PACKAGE: &str = "ssh.add_package";
pub const ADD_KEY_GENERATION: &str = "ssh.add_key_generation";
pub const SHRED_HOSTKEYS: &str = "ssh.shred_hostkeys";

const KEYGEN_UNIT: &str = "etc/systemd/system/ssh-keygen.service";

const KEYGEN_INIT_SCRIPT_NAME: &str = "generate-ssh-hostkeys";

const KEYGEN_INIT_SCRIPT: &str = "#!/bin/sh
### BEGIN INIT INFO
# Provides:          generate-ssh-hostkeys
# Required-Start:    $local_fs
# Required-Stop:
# X-Start-Before:    ssh
# Default-Start:     2 3 4 5
# Default-Stop:
# Short-Description: Generate SSH host keys
### END INIT INFO

case \"$1\" in
  start)
    [ -f /etc/ssh/ssh_host_rsa_key ] || ssh-keygen -q -t rsa -N '' -f /etc/ssh/ssh_host_rsa_key
    [ -f /etc/ssh/ssh_host_dsa_key ] || ssh-keygen -q -t dsa -N '' -f /etc/ssh/ssh_host_dsa_key
    [ -f /etc/ssh/ssh_host_ecdsa_key ] || ssh-keygen -q -t ecdsa -N '' -f /etc/ssh/ssh_host_ecdsa_key 2>/dev/null || true
    ;;
esac
exit 0
";

const KEYGEN_SERVICE: &str = "[Unit]
Description=Generate SSH host keys
Before=ssh.service
ConditionPathExistsGlob=!/etc/ssh/ssh_host_*_key

[Service]
Type=oneshot
ExecStart=/usr/bin/ssh-keygen -A

[Install]
WantedBy=multi-user.target
";

/// Install an SSH server whose host keys are generated on first boot.
pub fn tasks() -> Vec<BuildTask> {
    vec![
        host::require(ADD_REQUIRED_COMMANDS, "Adding SSH commands", vec!["shred"]),
        Task::new(
            ADD_PACKAGE,
            Phase::Preparation,
            "Adding the SSH server package",
            |ctx: &mut BuildContext| {
                ctx.packages.add("openssh-server");
                Ok(())
            },
        ),
        Task::new(
            ADD_KEY_GENERATION,
            Phase::SystemModification,
            "Generating SSH host keys on first boot",
            add_key_generation,
        )
        .before([initd::INSTALL_SCRIPTS]),
        Task::new(
            SHRED_HOSTKEYS,
            Phase::SystemCleaning,
            "Shredding SSH host keys",
            shred_hostkeys,
        )
        .after([packages::APT_CLEAN]),
    ]
}

fn add_key_generation(ctx: &mut BuildContext) -> Result<()> {
    if initd::uses_sysvinit(&ctx.manifest.system.release) {
        ctx.init_scripts.insert(
            KEYGEN_INIT_SCRIPT_NAME.to_string(),
            KEYGEN_INIT_SCRIPT.to_string(),
        );
        return Ok(());
    }
    let unit = ctx.root_path(KEYGEN_UNIT);
    if let Some(parent) = unit.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&unit, KEYGEN_SERVICE)?;
    chroot(&ctx.root, &["systemctl", "enable", "ssh-keygen.service"])?;
    Ok(())
}

fn is_host_key(name: &str) -> bool {
    name.starts_with("ssh_host_") && (name.ends_with("_key") || name.ends_with("_key.pub"))
}

fn shred_hostkeys(ctx: &mut BuildContext) -> Result<()> {
    let ssh_dir = ctx.root_path("etc/ssh");
    if !ssh_dir.is_dir() {
        return Ok(());
    }
    let mut keys = Vec::new();
    for entry in fs::read_dir(&ssh_dir)? {
        let path = entry?.path();
        if path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(is_host_key)
        {
            keys.push(path);
        }
    }
    keys.sort();
    for key in &keys {
        log_check_call(&["shred", "--remove", arg(key).as_str()])?;
    }
    vlog_debug!("Shredded {} SSH host key files", keys.len());
    Ok(())
}
