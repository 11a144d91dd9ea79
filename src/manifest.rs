//! Build manifests.
//!
//! A manifest describes one image: the target provider, the system to
//! bootstrap, the volume layout, extra packages and plugin settings. It
//! is loaded from JSON or TOML and validated before any task is
//! assembled.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, TimeZone};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use crate::{vlog_debug, Error, Result};

/// Debian releases the bootstrapper knows how to build.
pub const KNOWN_RELEASES: &[&str] = &[
    "squeeze", "wheezy", "jessie", "stretch", "buster", "bullseye", "bookworm", "trixie",
];

pub const SUPPORTED_ARCHITECTURES: &[&str] = &["amd64", "arm64"];

pub const DEFAULT_MIRROR: &str = "http://deb.debian.org/debian";

/// Largest root partition accepted, 64TiB.
pub const MAX_SIZE_MIB: u64 = 64 * 1024 * 1024;

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*(MiB|GiB|M|G)\s*$").expect("size pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Image name. May contain `{section.key}` variables and strftime sequences.
    pub name: String,
    pub provider: ProviderSection,
    #[serde(default)]
    pub bootstrapper: BootstrapperSection,
    pub system: SystemSection,
    pub volume: VolumeSection,
    #[serde(default)]
    pub packages: PackagesSection,
    /// Plugin settings keyed by plugin name.
    #[serde(default)]
    pub plugins: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSection {
    pub name: String,
    /// Provider-specific settings.
    #[serde(flatten)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BootstrapperSection {
    pub mirror: Option<String>,
    #[serde(default)]
    pub include_packages: Vec<String>,
    #[serde(default)]
    pub exclude_packages: Vec<String>,
    /// debootstrap variant, e.g. `minbase`.
    pub variant: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSection {
    pub release: String,
    pub architecture: String,
    pub hostname: Option<String>,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_locale() -> String {
    "en_US.UTF-8".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backing {
    Raw,
    Qcow2,
    Vhd,
}

impl Backing {
    pub fn extension(&self) -> &'static str {
        match self {
            Backing::Raw => "raw",
            Backing::Qcow2 => "qcow2",
            Backing::Vhd => "vhd",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionMapKind {
    None,
    Msdos,
    Gpt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filesystem {
    Ext2,
    Ext3,
    Ext4,
    Xfs,
}

impl Filesystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Filesystem::Ext2 => "ext2",
            Filesystem::Ext3 => "ext3",
            Filesystem::Ext4 => "ext4",
            Filesystem::Xfs => "xfs",
        }
    }

    pub fn mkfs_command(&self) -> String {
        format!("mkfs.{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSection {
    pub backing: Backing,
    pub partitions: PartitionsSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionsSection {
    #[serde(rename = "type")]
    pub kind: PartitionMapKind,
    pub root: PartitionSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionSpec {
    /// Size such as `4GiB` or `512MiB`.
    pub size: String,
    pub filesystem: Filesystem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PackagesSection {
    pub mirror: Option<String>,
    #[serde(default)]
    pub install: Vec<String>,
}

/// Parse a size such as `4GiB` into MiB.
pub fn parse_size_mib(size: &str) -> Result<u64> {
    let caps = SIZE_RE
        .captures(size)
        .ok_or_else(|| Error::Manifest(format!("Invalid size '{}'", size)))?;
    let value: u64 = caps[1]
        .parse()
        .map_err(|_| Error::Manifest(format!("Invalid size '{}'", size)))?;
    let mib = match &caps[2] {
        "GiB" | "G" => value.checked_mul(1024),
        _ => Some(value),
    }
    .ok_or_else(|| Error::Manifest(format!("Size '{}' is too large", size)))?;
    if mib == 0 {
        return Err(Error::Manifest(format!("Size '{}' must be at least 1MiB", size)));
    }
    if mib > MAX_SIZE_MIB {
        return Err(Error::Manifest(format!(
            "Size '{}' exceeds the {}GiB limit",
            size,
            MAX_SIZE_MIB / 1024
        )));
    }
    Ok(mib)
}

impl Manifest {
    /// Load a manifest, picking the format from the file extension.
    pub fn load(path: &Path) -> Result<Self> {
        vlog_debug!("Manifest::load path={}", path.display());
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some("toml") => Ok(toml::from_str(&content)?),
            _ => Err(Error::Manifest(format!(
                "Unsupported manifest format: {} (expected .json or .toml)",
                path.display()
            ))),
        }
    }

    /// Base validation shared by every provider.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Manifest("name must not be empty".to_string()));
        }
        if self.provider.name.trim().is_empty() {
            return Err(Error::Manifest("provider.name must not be empty".to_string()));
        }
        if !KNOWN_RELEASES.contains(&self.system.release.as_str()) {
            return Err(Error::Manifest(format!(
                "Unknown release '{}'",
                self.system.release
            )));
        }
        if !SUPPORTED_ARCHITECTURES.contains(&self.system.architecture.as_str()) {
            return Err(Error::Manifest(format!(
                "Unsupported architecture '{}'",
                self.system.architecture
            )));
        }
        if let Some(hostname) = &self.system.hostname {
            if hostname.is_empty() || hostname.contains(char::is_whitespace) {
                return Err(Error::Manifest(format!("Invalid hostname '{}'", hostname)));
            }
        }
        self.root_size_mib()?;
        self.image_name(&chrono::Utc::now())?;
        Ok(())
    }

    pub fn root_size_mib(&self) -> Result<u64> {
        parse_size_mib(&self.volume.partitions.root.size)
    }

    pub fn mirror(&self) -> &str {
        self.bootstrapper.mirror.as_deref().unwrap_or(DEFAULT_MIRROR)
    }

    /// Settings of a plugin, if the manifest enables it.
    pub fn plugin(&self, name: &str) -> Option<&serde_json::Value> {
        self.plugins.get(name)
    }

    /// Expand variables and strftime sequences in the image name.
    pub fn image_name<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Result<String>
    where
        Tz::Offset: std::fmt::Display,
    {
        let name = self
            .name
            .replace("{system.release}", &self.system.release)
            .replace("{system.architecture}", &self.system.architecture)
            .replace("{provider.name}", &self.provider.name);

        if name.contains('{') {
            return Err(Error::Manifest(format!("Unknown variable in name '{}'", self.name)));
        }
        if StrftimeItems::new(&name).any(|item| matches!(item, Item::Error)) {
            return Err(Error::Manifest(format!(
                "Invalid date format in name '{}'",
                self.name
            )));
        }
        Ok(now.format_with_items(StrftimeItems::new(&name)).to_string())
    }
}
