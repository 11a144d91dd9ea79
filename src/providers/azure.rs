use crate::context::BuildContext;
use crate::contributor::Contributor;
use crate::core::{Phase, Task, TaskSet};
use crate::manifest::{Backing, Manifest, PartitionMapKind};
use crate::tasks::{boot, image, initd, ssh};
use crate::util::{chroot, sed_i};
use crate::{vlog_warn, Error, Result};

pub const ADD_PACKAGES: &str = "azure.add_packages";
pub const CONFIGURE_GRUB: &str = "azure.configure_grub";
pub const ENABLE_WAAGENT: &str = "azure.enable_waagent";

const PACKAGES: &[&str] = &["waagent", "parted", "cloud-utils"];

const KERNEL_CMDLINE: &str = "console=ttyS0 earlyprintk=ttyS0 rootdelay=300";

pub struct Azure;

impl Contributor for Azure {
    fn name(&self) -> &str {
        "azure"
    }

    fn validate_manifest(&self, manifest: &Manifest) -> Result<()> {
        if manifest.volume.backing != Backing::Vhd {
            return Err(Error::Validation(
                "The azure provider requires a vhd volume".to_string(),
            ));
        }
        if manifest.volume.partitions.kind == PartitionMapKind::Gpt {
            return Err(Error::Validation(
                "The azure provider supports msdos or no partition map".to_string(),
            ));
        }
        Ok(())
    }

    fn resolve_tasks(&self, tasks: &mut TaskSet<BuildContext>, _manifest: &Manifest) -> Result<()> {
        tasks.add(Task::new(
            ADD_PACKAGES,
            Phase::Preparation,
            "Adding Azure agent packages",
            |ctx: &mut BuildContext| {
                ctx.packages.extend(PACKAGES);
                Ok(())
            },
        ));
        tasks.add(
            Task::new(
                CONFIGURE_GRUB,
                Phase::SystemModification,
                "Sending the console to the serial port",
                configure_grub,
            )
            .after([boot::GRUB_CONFIGURE])
            .before([boot::GRUB_INSTALL]),
        );
        tasks.add(Task::new(
            ENABLE_WAAGENT,
            Phase::SystemModification,
            "Enabling the Azure agent",
            |ctx: &mut BuildContext| {
                chroot(&ctx.root, &["systemctl", "enable", "walinuxagent.service"])?;
                Ok(())
            },
        ));
        tasks.extend(initd::tasks());
        tasks.extend(ssh::tasks());
        tasks.extend(image::conversion_tasks(Backing::Vhd));
        Ok(())
    }
}

fn configure_grub(ctx: &mut BuildContext) -> Result<()> {
    let path = ctx.root_path("etc/default/grub");
    let replacement = format!("GRUB_CMDLINE_LINUX=\"{}\"", KERNEL_CMDLINE);
    if sed_i(&path, r"^GRUB_CMDLINE_LINUX=.*$", &replacement)? == 0 {
        vlog_warn!("GRUB_CMDLINE_LINUX not found in {}", path.display());
    }
    Ok(())
}
