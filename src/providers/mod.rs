//! Cloud and hypervisor targets.
//!
//! A provider validates the parts of the manifest its platform
//! constrains and adds the tasks that make the image boot there.

mod azure;
mod kvm;

pub use azure::Azure;
pub use kvm::Kvm;

use crate::contributor::Contributor;
use crate::{Error, Result};

pub const PROVIDERS: &[&str] = &["kvm", "azure"];

pub fn get_provider(name: &str) -> Result<Box<dyn Contributor>> {
    Ok(match name {
        "kvm" => Box::new(Kvm),
        "azure" => Box::new(Azure),
        _ => return Err(Error::UnknownProvider(name.to_string())),
    })
}
