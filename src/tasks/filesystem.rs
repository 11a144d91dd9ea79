use std::fs;

use super::{arg, bootstrap, host, loopback, not_attached, partitioning};
use crate::context::{BuildContext, BuildTask};
use crate::core::{Phase, Task};
use crate::manifest::{Filesystem, Manifest};
use crate::util::log_check_call;
use crate::{vlog, vlog_debug, Error, Result};

pub const ADD_REQUIRED_COMMANDS: &str = "filesystem.add_required_commands";
pub const FORMAT: &str = "filesystem.format";
pub const MOUNT_ROOT: &str = "filesystem.mount_root";
pub const ADD_FSTAB: &str = "filesystem.add_fstab";
pub const UNMOUNT_ROOT: &str = "filesystem.unmount_root";

pub fn tasks(manifest: &Manifest) -> Vec<BuildTask> {
    let filesystem = manifest.volume.partitions.root.filesystem;
    vec![
        host::require(
            ADD_REQUIRED_COMMANDS,
            "Adding filesystem commands",
            vec![filesystem.mkfs_command(), "blkid".into(), "mount".into(), "umount".into()],
        ),
        Task::new(FORMAT, Phase::VolumePreparation, "Formatting the root partition", format)
            .after([loopback::ATTACH, partitioning::PARTITION]),
        Task::new(MOUNT_ROOT, Phase::VolumeMounting, "Mounting the root partition", mount_root)
            .with_rollback(unmount_root),
        Task::new(ADD_FSTAB, Phase::SystemModification, "Writing /etc/fstab", add_fstab),
        Task::new(
            UNMOUNT_ROOT,
            Phase::VolumeUnmounting,
            "Unmounting the root partition",
            unmount_root,
        )
        .after([bootstrap::UNMOUNT_SPECIALS]),
    ]
}

fn mkfs_args(filesystem: Filesystem, device: &str) -> Vec<String> {
    let force = match filesystem {
        Filesystem::Xfs => "-f",
        _ => "-F",
    };
    vec![
        filesystem.mkfs_command(),
        force.to_string(),
        "-q".to_string(),
        device.to_string(),
    ]
}

fn format(ctx: &mut BuildContext) -> Result<()> {
    let device = arg(&ctx.volume.root_device().ok_or_else(not_attached)?);
    log_check_call(&mkfs_args(ctx.volume.root.filesystem, &device))?;

    let uuid = log_check_call(&["blkid", "-s", "UUID", "-o", "value", device.as_str()])?
        .into_iter()
        .next()
        .map(|line| line.trim().to_string())
        .filter(|uuid| !uuid.is_empty())
        .ok_or_else(|| Error::Validation(format!("No filesystem UUID found on {}", device)))?;
    vlog_debug!("Formatted {} as {} (UUID {})", device, ctx.volume.root.filesystem.as_str(), uuid);
    ctx.volume.root.uuid = Some(uuid);
    Ok(())
}

pub(crate) fn mount_root(ctx: &mut BuildContext) -> Result<()> {
    let device = arg(&ctx.volume.root_device().ok_or_else(not_attached)?);
    fs::create_dir_all(&ctx.root)?;
    log_check_call(&["mount", device.as_str(), arg(&ctx.root).as_str()])?;
    ctx.volume.root.mounted = true;
    vlog!("Root filesystem mounted at {}", ctx.root.display());
    Ok(())
}

pub(crate) fn unmount_root(ctx: &mut BuildContext) -> Result<()> {
    if !ctx.volume.root.mounted {
        return Ok(());
    }
    log_check_call(&["umount", arg(&ctx.root).as_str()])?;
    ctx.volume.root.mounted = false;
    Ok(())
}

fn fstab_line(uuid: &str, filesystem: Filesystem) -> String {
    let options = match filesystem {
        Filesystem::Xfs => "defaults",
        _ => "defaults,errors=remount-ro",
    };
    format!("UUID={} / {} {} 0 1\n", uuid, filesystem.as_str(), options)
}

fn add_fstab(ctx: &mut BuildContext) -> Result<()> {
    let uuid = ctx
        .volume
        .root
        .uuid
        .as_deref()
        .ok_or_else(|| Error::Validation("Root filesystem has not been formatted".to_string()))?;
    let path = ctx.root_path("etc/fstab");
    fs::write(&path, fstab_line(uuid, ctx.volume.root.filesystem))?;
    vlog_debug!("Wrote {}", path.display());
    Ok(())
}
