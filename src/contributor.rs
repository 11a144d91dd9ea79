use crate::context::BuildContext;
use crate::core::TaskSet;
use crate::manifest::Manifest;
use crate::Result;

/// A source of tasks: the base pipeline, release logic, a provider or a plugin.
///
/// Contributors are applied to one shared [`TaskSet`] in a fixed order,
/// so a later contributor may add, replace or remove tasks registered by
/// an earlier one.
pub trait Contributor {
    /// Name recorded as the owner of the tasks this contributor registers.
    fn name(&self) -> &str;

    /// Reject manifests this contributor cannot build.
    fn validate_manifest(&self, _manifest: &Manifest) -> Result<()> {
        Ok(())
    }

    /// Register this contributor's tasks.
    fn resolve_tasks(&self, tasks: &mut TaskSet<BuildContext>, manifest: &Manifest) -> Result<()>;
}
