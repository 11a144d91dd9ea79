use std::path::PathBuf;

use super::{arg, host, loopback};
use crate::context::{BuildContext, BuildTask};
use crate::core::{Phase, Task};
use crate::manifest::{Manifest, PartitionMapKind};
use crate::util::log_check_call;
use crate::{vlog_debug, Result};

pub const ADD_REQUIRED_COMMANDS: &str = "partitioning.add_required_commands";
pub const PARTITION: &str = "partitioning.partition";

pub fn tasks(manifest: &Manifest) -> Vec<BuildTask> {
    if manifest.volume.partitions.kind == PartitionMapKind::None {
        return Vec::new();
    }
    vec![
        host::require(
            ADD_REQUIRED_COMMANDS,
            "Adding partitioning commands",
            vec!["parted", "partprobe"],
        ),
        Task::new(PARTITION, Phase::VolumePreparation, "Partitioning the volume", partition)
            .after([loopback::ATTACH]),
    ]
}

/// `parted` script and the number of the root partition.
fn layout(kind: PartitionMapKind, fs_type: &str) -> Option<(Vec<String>, u32)> {
    let script = match kind {
        PartitionMapKind::None => return None,
        PartitionMapKind::Msdos => (
            vec![
                "mklabel msdos".to_string(),
                format!("mkpart primary {} 1MiB 100%", fs_type),
                "set 1 boot on".to_string(),
            ],
            1,
        ),
        PartitionMapKind::Gpt => (
            vec![
                "mklabel gpt".to_string(),
                "mkpart bios 1MiB 2MiB".to_string(),
                "set 1 bios_grub on".to_string(),
                format!("mkpart root {} 2MiB 100%", fs_type),
            ],
            2,
        ),
    };
    Some(script)
}

/// Numbers of every partition the layout creates, in table order.
pub(crate) fn partition_numbers(kind: PartitionMapKind) -> Vec<u32> {
    match kind {
        PartitionMapKind::None => Vec::new(),
        PartitionMapKind::Msdos => vec![1],
        PartitionMapKind::Gpt => vec![1, 2],
    }
}

/// Partition device of a disk: `/dev/loop0p1`, `/dev/mapper/vda1`.
///
/// Disks whose name ends in a digit get a `p` separator.
pub(crate) fn partition_device(device: &str, number: u32) -> PathBuf {
    let separator = if device.ends_with(|c: char| c.is_ascii_digit()) {
        "p"
    } else {
        ""
    };
    PathBuf::from(format!("{}{}{}", device, separator, number))
}

fn partition(ctx: &mut BuildContext) -> Result<()> {
    let device = arg(&loopback::device(ctx)?);
    let Some((script, number)) = layout(
        ctx.volume.partition_map,
        ctx.volume.root.filesystem.as_str(),
    ) else {
        return Ok(());
    };

    for command in &script {
        let mut args = vec!["parted".to_string(), "--script".to_string(), device.clone()];
        args.extend(command.split_whitespace().map(str::to_string));
        log_check_call(&args)?;
    }
    log_check_call(&["partprobe", device.as_str()])?;

    let root = partition_device(&device, number);
    vlog_debug!("Root partition is {}", root.display());
    ctx.volume.root.number = Some(number);
    ctx.volume.root.device_path = Some(root);
    Ok(())
}
