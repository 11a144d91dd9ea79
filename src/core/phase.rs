//! Pipeline phases.
//!
//! Phases are the coarse ordering key of the execution order. Every task
//! belongs to exactly one phase and the phase order never changes during
//! a run.

use serde::{Deserialize, Serialize};

/// Phases of an image build, in execution order.
///
/// The derived `Ord` follows declaration order and is the comparison key
/// used by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Check host, create workspace, decide package lists
    Preparation,
    /// Create the backing volume
    VolumeCreation,
    /// Partition and format the volume
    VolumePreparation,
    /// Mount the root filesystem
    VolumeMounting,
    /// Install the base operating system
    OsInstallation,
    /// Install additional packages
    PackageInstallation,
    /// Configure the installed system
    SystemModification,
    /// Configure users and credentials
    UserModification,
    /// Remove build leftovers from the image
    SystemCleaning,
    /// Unmount and detach the volume
    VolumeUnmounting,
    /// Convert and move the image to its destination
    ImageRegistration,
    /// Remove the workspace
    Cleaning,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 12] = [
        Phase::Preparation,
        Phase::VolumeCreation,
        Phase::VolumePreparation,
        Phase::VolumeMounting,
        Phase::OsInstallation,
        Phase::PackageInstallation,
        Phase::SystemModification,
        Phase::UserModification,
        Phase::SystemCleaning,
        Phase::VolumeUnmounting,
        Phase::ImageRegistration,
        Phase::Cleaning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Preparation => "preparation",
            Phase::VolumeCreation => "volume_creation",
            Phase::VolumePreparation => "volume_preparation",
            Phase::VolumeMounting => "volume_mounting",
            Phase::OsInstallation => "os_installation",
            Phase::PackageInstallation => "package_installation",
            Phase::SystemModification => "system_modification",
            Phase::UserModification => "user_modification",
            Phase::SystemCleaning => "system_cleaning",
            Phase::VolumeUnmounting => "volume_unmounting",
            Phase::ImageRegistration => "image_registration",
            Phase::Cleaning => "cleaning",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Phase::Preparation => "Initializing connections, fetching data etc.",
            Phase::VolumeCreation => "Creating the volume to bootstrap onto",
            Phase::VolumePreparation => "Formatting the bootstrap volume",
            Phase::VolumeMounting => "Mounting bootstrap volume",
            Phase::OsInstallation => "Installing the operating system",
            Phase::PackageInstallation => "Installing software",
            Phase::SystemModification => "Modifying configuration files, adding resources, etc.",
            Phase::UserModification => "Running user specified modifications",
            Phase::SystemCleaning => "Removing sensitive data, temporary files and other leftovers",
            Phase::VolumeUnmounting => "Unmounting the bootstrap volume",
            Phase::ImageRegistration => "Uploading/Registering with the provider",
            Phase::Cleaning => "Removing temporary files",
        }
    }

    /// Zero-based position in the phase order.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Phase::ALL
            .iter()
            .copied()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| crate::Error::Validation(format!("Unknown phase: {}", s)))
    }
}
