//! Adjustments for specific Debian releases.
//!
//! Grub 1.99 cannot install onto a loop device from inside a chroot. For
//! those releases the volume is presented as a device-mapper disk while
//! grub is installed, with a device map naming the disk and every
//! partition on it.

use std::fs;
use std::path::{Path, PathBuf};

use crate::context::{BuildContext, BuildTask, DmNode};
use crate::contributor::Contributor;
use crate::core::TaskSet;
use crate::manifest::{Manifest, PartitionMapKind};
use crate::tasks::{arg, boot, bootstrap, filesystem, host, loopback, partitioning};
use crate::util::{chroot, log_check_call, log_check_call_with_input};
use crate::{vlog, vlog_debug, vlog_error, Error, Result};

pub const ADD_REQUIRED_COMMANDS: &str = "release.add_required_commands";

/// Releases whose grub cannot find a loop device without a device map.
const LEGACY_GRUB_RELEASES: &[&str] = &["squeeze"];

const DM_DIR: &str = "/dev/mapper";

pub struct Release;

impl Contributor for Release {
    fn name(&self) -> &str {
        "release"
    }

    fn resolve_tasks(&self, tasks: &mut TaskSet<BuildContext>, manifest: &Manifest) -> Result<()> {
        if LEGACY_GRUB_RELEASES.contains(&manifest.system.release.as_str()) {
            vlog_debug!("Using the device map grub installer for {}", manifest.system.release);
            tasks.add(host::require(
                ADD_REQUIRED_COMMANDS,
                "Adding device-mapper commands",
                legacy_commands(manifest.volume.partitions.kind),
            ));
            tasks.replace(legacy_grub_install());
        }
        Ok(())
    }
}

fn legacy_commands(kind: PartitionMapKind) -> Vec<&'static str> {
    match kind {
        PartitionMapKind::None => vec!["dmsetup"],
        _ => vec!["dmsetup", "kpartx"],
    }
}

fn legacy_grub_install() -> BuildTask {
    boot::install_task_with("Installing grub through a device map", install_with_device_map)
}

/// Grub's partition label prefix for a partition map.
fn partition_prefix(kind: PartitionMapKind) -> &'static str {
    match kind {
        PartitionMapKind::Gpt => "gpt",
        _ => "msdos",
    }
}

/// Device map for `disk`, listing every partition of `partition_disk`.
fn device_map(disk: &str, kind: PartitionMapKind, partition_disk: &str) -> String {
    let mut map = format!("(hd0) {}\n", disk);
    for number in partitioning::partition_numbers(kind) {
        map.push_str(&format!(
            "(hd0,{}{}) {}\n",
            partition_prefix(kind),
            number,
            partitioning::partition_device(partition_disk, number).display()
        ));
    }
    map
}

/// Linear table mapping the whole loop device.
fn dm_table(size_mib: u64, loop_device: &Path) -> String {
    format!("0 {} linear {} 0\n", size_mib * 2048, loop_device.display())
}

/// First `vdX` name without a node under `dm_dir`.
fn free_dm_name(dm_dir: &Path) -> Result<String> {
    ('a'..='i')
        .map(|letter| format!("vd{}", letter))
        .find(|name| !dm_dir.join(name).exists())
        .ok_or_else(|| {
            Error::Validation(format!("No free device-mapper name in {}", dm_dir.display()))
        })
}

/// Point the volume and its root partition at `disk`.
fn point_at(ctx: &mut BuildContext, disk: PathBuf) {
    let name = arg(&disk);
    ctx.volume.root.device_path = ctx
        .volume
        .root
        .number
        .map(|number| partitioning::partition_device(&name, number));
    ctx.volume.device_path = Some(disk);
}

/// The error of `result`, else the error of the cleanup that followed it.
fn first_error(result: Result<()>, cleanup: Result<()>, what: &str) -> Result<()> {
    match (result, cleanup) {
        (Err(e), Err(cleanup)) => {
            vlog_error!("{} failed: {}", what, cleanup);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), cleanup) => cleanup,
    }
}

/// Run `f` with the root filesystem and its special mounts released.
///
/// Whatever was mounted is mounted again afterwards, from the devices the
/// volume points at by then.
fn with_root_unmounted<F>(ctx: &mut BuildContext, f: F) -> Result<()>
where
    F: FnOnce(&mut BuildContext) -> Result<()>,
{
    let root_mounted = ctx.volume.root.mounted;
    let specials_mounted = !ctx.mounts.is_empty();
    bootstrap::unmount_specials(ctx)?;
    filesystem::unmount_root(ctx)?;

    let result = f(ctx);

    let remounted = if root_mounted {
        filesystem::mount_root(ctx).and_then(|()| {
            if specials_mounted {
                bootstrap::mount_specials(ctx)
            } else {
                Ok(())
            }
        })
    } else {
        Ok(())
    };
    first_error(result, remounted, "Remounting the root filesystem")
}

fn link_dm_node(ctx: &mut BuildContext) -> Result<()> {
    let loop_device = loopback::device(ctx)?;
    let name = free_dm_name(Path::new(DM_DIR))?;
    let path = Path::new(DM_DIR).join(&name);

    let table = dm_table(ctx.volume.image_size_mib(), &loop_device);
    log_check_call_with_input(&["dmsetup", "create", name.as_str()], &table)?;
    if ctx.volume.partition_map != PartitionMapKind::None {
        let mapped = log_check_call(&["kpartx", "-as", arg(&path).as_str()]);
        if let Err(e) = mapped {
            let removed = log_check_call(&["dmsetup", "remove", name.as_str()]).map(|_| ());
            return first_error(Err(e), removed, "Removing the device-mapper node");
        }
    }

    vlog!("Linked {} to {}", path.display(), loop_device.display());
    point_at(ctx, path.clone());
    ctx.volume.dm_node = Some(DmNode {
        name,
        path,
        loop_device,
    });
    Ok(())
}

fn unlink_dm_node(ctx: &mut BuildContext) -> Result<()> {
    let Some(node) = ctx.volume.dm_node.clone() else {
        return Ok(());
    };
    if ctx.volume.partition_map != PartitionMapKind::None {
        log_check_call(&["kpartx", "-ds", arg(&node.path).as_str()])?;
    }
    log_check_call(&["dmsetup", "remove", node.name.as_str()])?;

    vlog_debug!("Unlinked {}", node.path.display());
    point_at(ctx, node.loop_device);
    ctx.volume.dm_node = None;
    Ok(())
}

fn install_grub(ctx: &mut BuildContext) -> Result<()> {
    let node = ctx.volume.dm_node.clone().ok_or_else(|| {
        Error::Validation("Volume is not linked to a device-mapper node".to_string())
    })?;
    let disk = arg(&fs::canonicalize(&node.path)?);
    let map_path = ctx.root_path("boot/grub/device.map");
    if let Some(parent) = map_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(
        &map_path,
        device_map(&disk, ctx.volume.partition_map, &arg(&node.path)),
    )?;

    let result = chroot(&ctx.root, &["grub-install", "--no-floppy", disk.as_str()])
        .and_then(|_| chroot(&ctx.root, &["update-grub"]))
        .map(|_| ());
    // The map names devices that will not exist on the booted system.
    let removed = fs::remove_file(&map_path).map_err(Error::from);
    first_error(result, removed, "Removing the device map")
}

fn install_with_device_map(ctx: &mut BuildContext) -> Result<()> {
    let result = with_root_unmounted(ctx, link_dm_node).and_then(|()| install_grub(ctx));
    let released = if ctx.volume.dm_node.is_some() {
        with_root_unmounted(ctx, unlink_dm_node)
    } else {
        Ok(())
    };
    first_error(result, released, "Removing the device-mapper node")
}
