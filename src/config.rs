use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{vlog_debug, Error, Result};

/// Host-side settings, independent of any manifest.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Directory under which per-run workspaces are created.
    pub workspace_dir: Option<String>,
    /// Directory receiving one log file per build.
    pub log_dir: Option<String>,
    /// Directory receiving finished images.
    pub output_dir: Option<String>,
    /// Wait for confirmation before rolling back a failed build.
    #[serde(default)]
    pub pause_on_error: bool,
}

impl Config {
    pub fn vmstrap_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".vmstrap"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::vmstrap_dir()?.join("vmstrap.toml"))
    }

    pub fn workspace_dir(&self) -> Result<PathBuf> {
        match &self.workspace_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::vmstrap_dir()?.join("workspace")),
        }
    }

    pub fn log_dir(&self) -> Result<PathBuf> {
        match &self.log_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::vmstrap_dir()?.join("logs")),
        }
    }

    pub fn output_dir(&self) -> Result<PathBuf> {
        match &self.output_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(std::env::current_dir()?),
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        vlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            vlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        vlog_debug!(
            "Config loaded: workspace_dir={:?}, log_dir={:?}, output_dir={:?}, pause_on_error={}",
            config.workspace_dir,
            config.log_dir,
            config.output_dir,
            config.pause_on_error
        );
        Ok(config)
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
