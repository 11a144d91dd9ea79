use std::fs::{self, File};
use std::path::PathBuf;

use super::{arg, filesystem, host, not_attached, workspace};
use crate::context::{BuildContext, BuildTask};
use crate::core::{Phase, Task};
use crate::util::log_check_call;
use crate::{vlog, vlog_debug, Error, Result};

pub const ADD_REQUIRED_COMMANDS: &str = "loopback.add_required_commands";
pub const CREATE: &str = "loopback.create";
pub const ATTACH: &str = "loopback.attach";
pub const DETACH: &str = "loopback.detach";

pub fn tasks() -> Vec<BuildTask> {
    vec![
        host::require(ADD_REQUIRED_COMMANDS, "Adding loopback commands", vec!["losetup"]),
        Task::new(CREATE, Phase::VolumeCreation, "Creating volume image", create)
            .after([workspace::CREATE])
            .with_rollback(remove),
        Task::new(ATTACH, Phase::VolumeCreation, "Attaching volume to a loop device", attach)
            .after([CREATE])
            .with_rollback(detach),
        Task::new(DETACH, Phase::VolumeUnmounting, "Detaching loop device", detach)
            .after([filesystem::UNMOUNT_ROOT]),
    ]
}

fn create(ctx: &mut BuildContext) -> Result<()> {
    let size = ctx
        .volume
        .image_size_mib()
        .checked_mul(1024 * 1024)
        .ok_or_else(|| {
            Error::Manifest(format!("Volume of {} MiB is too large", ctx.volume.size_mib))
        })?;
    let file = File::create(&ctx.volume.image_path)?;
    file.set_len(size)?;
    vlog_debug!(
        "Created sparse image {} ({} MiB)",
        ctx.volume.image_path.display(),
        ctx.volume.image_size_mib()
    );
    Ok(())
}

fn remove(ctx: &mut BuildContext) -> Result<()> {
    if ctx.volume.image_path.exists() {
        fs::remove_file(&ctx.volume.image_path)?;
    }
    Ok(())
}

fn attach(ctx: &mut BuildContext) -> Result<()> {
    let image = arg(&ctx.volume.image_path);
    let output = log_check_call(&["losetup", "--find", "--show", "--partscan", image.as_str()])?;
    let device = output
        .first()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .ok_or_else(|| Error::Validation("losetup did not report a device".to_string()))?;
    vlog!("Volume attached to {}", device);
    ctx.volume.device_path = Some(PathBuf::from(device));
    Ok(())
}

fn detach(ctx: &mut BuildContext) -> Result<()> {
    let Some(device) = ctx.volume.device_path.clone() else {
        vlog_debug!("Volume already detached");
        return Ok(());
    };
    if ctx.volume.root.mounted {
        return Err(Error::Validation(format!(
            "Cannot detach {} while the root filesystem is mounted",
            device.display()
        )));
    }
    if let Some(node) = &ctx.volume.dm_node {
        return Err(Error::Validation(format!(
            "Cannot detach {} while it is mapped through {}",
            node.loop_device.display(),
            node.path.display()
        )));
    }
    log_check_call(&["losetup", "--detach", arg(&device).as_str()])?;
    ctx.volume.device_path = None;
    ctx.volume.root.device_path = None;
    Ok(())
}

/// Loop device of an attached volume.
pub(crate) fn device(ctx: &BuildContext) -> Result<PathBuf> {
    ctx.volume.device_path.clone().ok_or_else(not_attached)
}
