//! State shared by the tasks of one image build.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::core::Task;
use crate::manifest::{Backing, Filesystem, Manifest, PartitionMapKind};
use crate::Result;

/// A task operating on a [`BuildContext`].
pub type BuildTask = Task<BuildContext>;

/// Packages to install, in the order they were requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageList {
    packages: Vec<String>,
}

impl PackageList {
    /// Add a package unless it is already listed.
    pub fn add(&mut self, name: &str) {
        if !self.contains(name) {
            self.packages.push(name.to_string());
        }
    }

    pub fn extend<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            self.add(name.as_ref());
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.packages.retain(|p| p != name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.iter().any(|p| p == name)
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(String::as_str)
    }
}

/// The root partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Partition number on the volume, `None` when the volume is unpartitioned.
    pub number: Option<u32>,
    pub filesystem: Filesystem,
    /// Block device of the partition once the volume is attached.
    pub device_path: Option<PathBuf>,
    /// Filesystem UUID once formatted.
    pub uuid: Option<String>,
    pub mounted: bool,
}

/// Device-mapper node standing in for the loop device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmNode {
    pub name: String,
    pub path: PathBuf,
    /// Loop device behind the node, restored once the node is removed.
    pub loop_device: PathBuf,
}

/// The disk image and its attachment state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub backing: Backing,
    pub size_mib: u64,
    pub partition_map: PartitionMapKind,
    /// Current image file. Changes when the image is converted.
    pub image_path: PathBuf,
    /// Loop device while attached, or its device-mapper node while linked.
    pub device_path: Option<PathBuf>,
    pub dm_node: Option<DmNode>,
    pub root: Partition,
}

impl Volume {
    pub fn is_attached(&self) -> bool {
        self.device_path.is_some()
    }

    /// Size of the image file: the root partition plus room for the partition table.
    pub fn image_size_mib(&self) -> u64 {
        let overhead = match self.partition_map {
            PartitionMapKind::None => 0,
            // Partition starts at 1MiB.
            PartitionMapKind::Msdos => 1,
            // bios_grub partition plus the backup GPT header.
            PartitionMapKind::Gpt => 3,
        };
        self.size_mib.saturating_add(overhead)
    }

    /// Device holding the root filesystem.
    pub fn root_device(&self) -> Option<PathBuf> {
        match self.partition_map {
            PartitionMapKind::None => self.device_path.clone(),
            _ => self.root.device_path.clone(),
        }
    }
}

/// Mutable state threaded through every task of a build.
#[derive(Debug)]
pub struct BuildContext {
    pub manifest: Manifest,
    pub run_id: Uuid,
    /// Per-run scratch directory.
    pub workspace: PathBuf,
    /// Mount point of the root filesystem.
    pub root: PathBuf,
    pub output_dir: PathBuf,
    /// Final image file name, without extension.
    pub image_name: String,
    pub packages: PackageList,
    /// Host commands the build needs, checked during preparation.
    pub host_dependencies: BTreeSet<String>,
    /// Kernel modules to add to the initramfs.
    pub initramfs_modules: Vec<String>,
    /// SysV init scripts to install, by name.
    pub init_scripts: BTreeMap<String, String>,
    pub volume: Volume,
    /// Special filesystems mounted inside the root, in mount order.
    pub mounts: Vec<PathBuf>,
    /// Registered image, once moved to the output directory.
    pub image_path: Option<PathBuf>,
}

impl BuildContext {
    /// Prepare the context of a new run under `workspace_dir`.
    pub fn new(manifest: Manifest, workspace_dir: &Path, output_dir: &Path) -> Result<Self> {
        let run_id = Uuid::new_v4();
        let workspace = workspace_dir.join(run_id.to_string());
        let image_name = manifest.image_name(&chrono::Local::now())?;
        let root_spec = &manifest.volume.partitions.root;
        let volume = Volume {
            backing: manifest.volume.backing,
            size_mib: manifest.root_size_mib()?,
            partition_map: manifest.volume.partitions.kind,
            image_path: workspace.join("volume.raw"),
            device_path: None,
            dm_node: None,
            root: Partition {
                number: None,
                filesystem: root_spec.filesystem,
                device_path: None,
                uuid: None,
                mounted: false,
            },
        };

        Ok(Self {
            root: workspace.join("root"),
            workspace,
            output_dir: output_dir.to_path_buf(),
            image_name,
            run_id,
            manifest,
            packages: PackageList::default(),
            host_dependencies: BTreeSet::new(),
            initramfs_modules: Vec::new(),
            init_scripts: BTreeMap::new(),
            volume,
            mounts: Vec::new(),
            image_path: None,
        })
    }

    /// Record host commands required by the build.
    pub fn require_commands<I, S>(&mut self, commands: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.host_dependencies
            .extend(commands.into_iter().map(Into::into));
    }

    /// Path of `relative` inside the image root.
    pub fn root_path(&self, relative: &str) -> PathBuf {
        self.root.join(relative.trim_start_matches('/'))
    }
}
