use std::fs;

use super::bootstrap;
use crate::context::{BuildContext, BuildTask};
use crate::core::{Phase, Task};
use crate::util::chroot;
use crate::{vlog, vlog_debug, Result};

pub const ADD_MANIFEST_PACKAGES: &str = "packages.add_manifest_packages";
pub const ADD_KERNEL: &str = "packages.add_kernel";
pub const WRITE_SOURCES: &str = "packages.write_sources";
pub const INSTALL: &str = "packages.install";
pub const APT_CLEAN: &str = "apt.clean";

pub fn tasks() -> Vec<BuildTask> {
    vec![
        Task::new(
            ADD_MANIFEST_PACKAGES,
            Phase::Preparation,
            "Adding packages from the manifest",
            |ctx: &mut BuildContext| {
                let install = ctx.manifest.packages.install.clone();
                ctx.packages.extend(install);
                Ok(())
            },
        ),
        Task::new(
            ADD_KERNEL,
            Phase::Preparation,
            "Adding the kernel package",
            |ctx: &mut BuildContext| {
                let kernel = kernel_package(&ctx.manifest.system.architecture);
                ctx.packages.add(&kernel);
                Ok(())
            },
        ),
        Task::new(
            WRITE_SOURCES,
            Phase::PackageInstallation,
            "Writing apt sources",
            write_sources,
        ),
        Task::new(INSTALL, Phase::PackageInstallation, "Installing packages", install)
            .after([WRITE_SOURCES, bootstrap::MOUNT_SPECIALS]),
        Task::new(APT_CLEAN, Phase::SystemCleaning, "Cleaning the apt cache", apt_clean),
    ]
}

fn kernel_package(architecture: &str) -> String {
    format!("linux-image-{}", architecture)
}

fn sources_list(mirror: &str, release: &str) -> String {
    format!("deb {mirror} {release} main\ndeb-src {mirror} {release} main\n")
}

fn write_sources(ctx: &mut BuildContext) -> Result<()> {
    let manifest = &ctx.manifest;
    let mirror = manifest
        .packages
        .mirror
        .as_deref()
        .unwrap_or_else(|| manifest.mirror());
    let path = ctx.root_path("etc/apt/sources.list");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, sources_list(mirror, &manifest.system.release))?;
    vlog_debug!("apt sources point to {}", mirror);
    Ok(())
}

fn install(ctx: &mut BuildContext) -> Result<()> {
    if ctx.packages.is_empty() {
        vlog_debug!("No packages to install");
        return Ok(());
    }
    chroot(&ctx.root, &["apt-get", "update"])?;

    let mut args = vec![
        "apt-get".to_string(),
        "install".to_string(),
        "--yes".to_string(),
        "--no-install-recommends".to_string(),
    ];
    args.extend(ctx.packages.iter().map(str::to_string));
    vlog!("Installing {} packages", args.len() - 4);
    chroot(&ctx.root, &args)?;
    Ok(())
}

fn apt_clean(ctx: &mut BuildContext) -> Result<()> {
    chroot(&ctx.root, &["apt-get", "clean"])?;
    Ok(())
}
