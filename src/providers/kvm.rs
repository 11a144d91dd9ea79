use crate::context::BuildContext;
use crate::contributor::Contributor;
use crate::core::{Phase, Task, TaskSet};
use crate::manifest::{Backing, Manifest};
use crate::tasks::{boot, image};
use crate::{Error, Result};

pub const ADD_VIRTIO_MODULES: &str = "kvm.add_virtio_modules";

const VIRTIO_MODULES: &[&str] = &["virtio_pci", "virtio_blk", "virtio_net", "virtio_balloon"];

pub struct Kvm;

impl Contributor for Kvm {
    fn name(&self) -> &str {
        "kvm"
    }

    fn validate_manifest(&self, manifest: &Manifest) -> Result<()> {
        match manifest.volume.backing {
            Backing::Raw | Backing::Qcow2 => Ok(()),
            other => Err(Error::Validation(format!(
                "The kvm provider does not support {} volumes",
                other.extension()
            ))),
        }
    }

    fn resolve_tasks(&self, tasks: &mut TaskSet<BuildContext>, manifest: &Manifest) -> Result<()> {
        tasks.add(
            Task::new(
                ADD_VIRTIO_MODULES,
                Phase::Preparation,
                "Adding virtio modules to the initramfs",
                |ctx: &mut BuildContext| {
                    for module in VIRTIO_MODULES {
                        if !ctx.initramfs_modules.iter().any(|m| m == module) {
                            ctx.initramfs_modules.push(module.to_string());
                        }
                    }
                    Ok(())
                },
            )
            .before([boot::ADD_INITRAMFS_MODULES]),
        );
        if manifest.volume.backing == Backing::Qcow2 {
            tasks.extend(image::conversion_tasks(Backing::Qcow2));
        }
        Ok(())
    }
}
