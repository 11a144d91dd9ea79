//! Installing the base system and the filesystems it needs while chrooted.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use super::{arg, filesystem, host};
use crate::context::{BuildContext, BuildTask};
use crate::core::{Phase, Task};
use crate::manifest::Manifest;
use crate::util::log_check_call;
use crate::{vlog, vlog_debug, vlog_error, vlog_warn, Result};

pub const ADD_REQUIRED_COMMANDS: &str = "bootstrap.add_required_commands";
pub const DEBOOTSTRAP: &str = "bootstrap.debootstrap";
pub const MOUNT_SPECIALS: &str = "bootstrap.mount_specials";
pub const DISABLE_DAEMON_AUTOSTART: &str = "bootstrap.disable_daemon_autostart";
pub const ENABLE_DAEMON_AUTOSTART: &str = "bootstrap.enable_daemon_autostart";
pub const UNMOUNT_SPECIALS: &str = "bootstrap.unmount_specials";

const POLICY_RC_D: &str = "usr/sbin/policy-rc.d";

/// Filesystems mounted inside the root: source, type (`None` for a bind mount), target.
const SPECIAL_MOUNTS: &[(&str, Option<&str>, &str)] = &[
    ("proc", Some("proc"), "proc"),
    ("sysfs", Some("sysfs"), "sys"),
    ("/dev", None, "dev"),
    ("devpts", Some("devpts"), "dev/pts"),
];

pub fn tasks() -> Vec<BuildTask> {
    vec![
        host::require(
            ADD_REQUIRED_COMMANDS,
            "Adding bootstrap commands",
            vec!["debootstrap", "chroot"],
        ),
        Task::new(DEBOOTSTRAP, Phase::OsInstallation, "Bootstrapping the base system", debootstrap)
            .after([filesystem::MOUNT_ROOT]),
        Task::new(
            MOUNT_SPECIALS,
            Phase::OsInstallation,
            "Mounting special filesystems",
            mount_specials,
        )
        .after([DEBOOTSTRAP])
        .with_rollback(unmount_specials),
        Task::new(
            DISABLE_DAEMON_AUTOSTART,
            Phase::OsInstallation,
            "Preventing daemons from starting in the chroot",
            disable_daemon_autostart,
        )
        .after([DEBOOTSTRAP])
        .with_rollback(enable_daemon_autostart),
        Task::new(
            ENABLE_DAEMON_AUTOSTART,
            Phase::SystemCleaning,
            "Allowing daemons to start again",
            enable_daemon_autostart,
        ),
        Task::new(
            UNMOUNT_SPECIALS,
            Phase::VolumeUnmounting,
            "Unmounting special filesystems",
            unmount_specials,
        ),
    ]
}

fn debootstrap_args(manifest: &Manifest, root: &str) -> Vec<String> {
    let bootstrapper = &manifest.bootstrapper;
    let mut args = vec![
        "debootstrap".to_string(),
        format!("--arch={}", manifest.system.architecture),
    ];
    if let Some(variant) = &bootstrapper.variant {
        args.push(format!("--variant={}", variant));
    }
    if !bootstrapper.include_packages.is_empty() {
        args.push(format!("--include={}", bootstrapper.include_packages.join(",")));
    }
    if !bootstrapper.exclude_packages.is_empty() {
        args.push(format!("--exclude={}", bootstrapper.exclude_packages.join(",")));
    }
    args.push(manifest.system.release.clone());
    args.push(root.to_string());
    args.push(manifest.mirror().to_string());
    args
}

fn debootstrap(ctx: &mut BuildContext) -> Result<()> {
    vlog!(
        "Bootstrapping {} ({}) from {}",
        ctx.manifest.system.release,
        ctx.manifest.system.architecture,
        ctx.manifest.mirror()
    );
    log_check_call(&debootstrap_args(&ctx.manifest, &arg(&ctx.root)))?;
    Ok(())
}

fn run_mount(args: &[String]) -> Result<()> {
    log_check_call(args).map(|_| ())
}

fn run_umount(target: &Path) -> Result<()> {
    log_check_call(&["umount", arg(target).as_str()]).map(|_| ())
}

pub(crate) fn mount_specials(ctx: &mut BuildContext) -> Result<()> {
    mount_specials_with(ctx, run_mount, run_umount)
}

pub(crate) fn unmount_specials(ctx: &mut BuildContext) -> Result<()> {
    unmount_specials_with(ctx, run_umount)
}

fn mount_args(source: &str, fs_type: Option<&str>, target: &Path) -> Vec<String> {
    let mut args = vec!["mount".to_string()];
    match fs_type {
        Some(fs_type) => args.extend(["-t".to_string(), fs_type.to_string()]),
        None => args.push("--bind".to_string()),
    }
    args.push(source.to_string());
    args.push(arg(target));
    args
}

/// Mount every special filesystem, or none of them.
///
/// A failed mount releases the mounts this call made before returning
/// the error, since a failed task is never rolled back.
fn mount_specials_with<M, U>(ctx: &mut BuildContext, mut mount: M, mut unmount: U) -> Result<()>
where
    M: FnMut(&[String]) -> Result<()>,
    U: FnMut(&Path) -> Result<()>,
{
    let held = ctx.mounts.len();
    for (source, fs_type, target) in SPECIAL_MOUNTS {
        let target = ctx.root_path(target);
        let mounted = fs::create_dir_all(&target)
            .map_err(crate::Error::from)
            .and_then(|_| mount(&mount_args(source, *fs_type, &target)));
        if let Err(e) = mounted {
            vlog_warn!(
                "Mounting {} failed, releasing {} special mounts",
                target.display(),
                ctx.mounts.len() - held
            );
            while ctx.mounts.len() > held {
                let Some(done) = ctx.mounts.pop() else { break };
                if let Err(cleanup) = unmount(&done) {
                    vlog_error!("Could not unmount {}: {}", done.display(), cleanup);
                    ctx.mounts.push(done);
                    break;
                }
            }
            return Err(e);
        }
        ctx.mounts.push(target);
    }
    vlog_debug!("Mounted {} special filesystems", ctx.mounts.len());
    Ok(())
}

fn unmount_specials_with<U>(ctx: &mut BuildContext, mut unmount: U) -> Result<()>
where
    U: FnMut(&Path) -> Result<()>,
{
    while let Some(target) = ctx.mounts.last().cloned() {
        unmount(&target)?;
        ctx.mounts.pop();
    }
    Ok(())
}

fn policy_path(ctx: &BuildContext) -> PathBuf {
    ctx.root_path(POLICY_RC_D)
}

fn disable_daemon_autostart(ctx: &mut BuildContext) -> Result<()> {
    let path = policy_path(ctx);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, "#!/bin/sh\nexit 101\n")?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

fn enable_daemon_autostart(ctx: &mut BuildContext) -> Result<()> {
    let path = policy_path(ctx);
    if path.exists() {
        fs::remove_file(&path)?;
    } else {
        vlog_warn!("{} was already removed", POLICY_RC_D);
    }
    Ok(())
}
