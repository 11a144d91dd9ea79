pub mod config;
pub mod context;
pub mod contributor;
pub mod core;
pub mod error;
pub mod log;
pub mod manifest;
pub mod pipeline;
pub mod plugins;
pub mod providers;
pub mod release;
pub mod tasks;
pub mod util;

pub use context::{BuildContext, BuildTask};
pub use contributor::Contributor;
pub use error::{Error, Result};
pub use manifest::Manifest;
