//! Optional features enabled from the manifest's `plugins` section.
//!
//! Each plugin parses its own settings; a malformed section is reported
//! as a validation error naming the plugin.

mod commands;
mod minimize_size;
mod root_password;

pub use commands::Commands;
pub use minimize_size::MinimizeSize;
pub use root_password::RootPassword;

use serde::de::DeserializeOwned;

use crate::contributor::Contributor;
use crate::{Error, Result};

pub const PLUGINS: &[&str] = &["commands", "minimize_size", "root_password"];

pub fn get_plugin(name: &str, settings: &serde_json::Value) -> Result<Box<dyn Contributor>> {
    Ok(match name {
        "commands" => Box::new(Commands::new(parse_settings(name, settings)?)),
        "minimize_size" => Box::new(MinimizeSize::new(parse_settings(name, settings)?)),
        "root_password" => Box::new(RootPassword::new(parse_settings(name, settings)?)),
        _ => return Err(Error::UnknownPlugin(name.to_string())),
    })
}

fn parse_settings<T: DeserializeOwned>(name: &str, settings: &serde_json::Value) -> Result<T> {
    // An empty TOML table or a JSON `null` both mean "enabled with defaults".
    let settings = match settings {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(settings)
        .map_err(|e| Error::Validation(format!("Invalid settings for plugin '{}': {}", name, e)))
}
