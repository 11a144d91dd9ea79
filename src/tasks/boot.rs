//! Kernel and bootloader.

use std::fs::{self, OpenOptions};
use std::io::Write;

use super::{arg, filesystem, loopback};
use crate::context::{BuildContext, BuildTask};
use crate::core::{Phase, Task};
use crate::manifest::Manifest;
use crate::util::{chroot, sed_i};
use crate::{vlog_debug, Result};

pub const GRUB_ADD_PACKAGE: &str = "grub.add_package";
pub const ADD_INITRAMFS_MODULES: &str = "kernel.add_initramfs_modules";
pub const UPDATE_INITRAMFS: &str = "kernel.update_initramfs";
pub const GRUB_CONFIGURE: &str = "grub.configure";
pub const GRUB_INSTALL: &str = "grub.install";

pub fn tasks(manifest: &Manifest) -> Vec<BuildTask> {
    let grub_package = grub_package(&manifest.system.architecture);
    vec![
        Task::new(
            GRUB_ADD_PACKAGE,
            Phase::Preparation,
            "Adding the bootloader package",
            move |ctx: &mut BuildContext| {
                ctx.packages.add(grub_package);
                Ok(())
            },
        ),
        Task::new(
            ADD_INITRAMFS_MODULES,
            Phase::SystemModification,
            "Adding kernel modules to the initramfs",
            add_initramfs_modules,
        )
        .after([filesystem::ADD_FSTAB]),
        Task::new(
            UPDATE_INITRAMFS,
            Phase::SystemModification,
            "Rebuilding the initramfs",
            update_initramfs,
        )
        .after([ADD_INITRAMFS_MODULES]),
        Task::new(GRUB_CONFIGURE, Phase::SystemModification, "Configuring grub", configure_grub)
            .after([filesystem::ADD_FSTAB]),
        install_task(),
    ]
}

/// `grub.install` with its ordering, running `action`.
///
/// The initramfs is rebuilt after the bootloader is installed.
///
/// Other contributors replacing the installer reuse this so the
/// replacement keeps the same place in the pipeline.
pub fn install_task_with<F>(description: &str, action: F) -> BuildTask
where
    F: Fn(&mut BuildContext) -> Result<()> + Send + Sync + 'static,
{
    Task::new(GRUB_INSTALL, Phase::SystemModification, description, action)
        .after([GRUB_CONFIGURE])
        .before([UPDATE_INITRAMFS])
}

fn install_task() -> BuildTask {
    install_task_with("Installing grub", install_grub)
}

fn grub_package(architecture: &str) -> &'static str {
    match architecture {
        "arm64" => "grub-efi-arm64",
        _ => "grub-pc",
    }
}

fn add_initramfs_modules(ctx: &mut BuildContext) -> Result<()> {
    if ctx.initramfs_modules.is_empty() {
        return Ok(());
    }
    let path = ctx.root_path("etc/initramfs-tools/modules");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    for module in &ctx.initramfs_modules {
        writeln!(file, "{}", module)?;
    }
    vlog_debug!("Added initramfs modules: {}", ctx.initramfs_modules.join(" "));
    Ok(())
}

fn update_initramfs(ctx: &mut BuildContext) -> Result<()> {
    chroot(&ctx.root, &["update-initramfs", "-u", "-k", "all"])?;
    Ok(())
}

fn configure_grub(ctx: &mut BuildContext) -> Result<()> {
    let path = ctx.root_path("etc/default/grub");
    sed_i(&path, r"^#?GRUB_TERMINAL=.*", "GRUB_TERMINAL=console")?;
    sed_i(&path, r"^GRUB_TIMEOUT=.*", "GRUB_TIMEOUT=1")?;
    Ok(())
}

fn install_args(architecture: &str, device: &str) -> Vec<String> {
    let mut args = vec!["grub-install".to_string()];
    if architecture == "arm64" {
        args.extend(
            ["--target=arm64-efi", "--efi-directory=/boot", "--removable", "--no-nvram"]
                .map(str::to_string),
        );
    } else {
        args.push("--target=i386-pc".to_string());
    }
    args.push(device.to_string());
    args
}

fn install_grub(ctx: &mut BuildContext) -> Result<()> {
    let device = arg(&loopback::device(ctx)?);
    chroot(&ctx.root, &install_args(&ctx.manifest.system.architecture, &device))?;
    chroot(&ctx.root, &["update-grub"])?;
    Ok(())
}
