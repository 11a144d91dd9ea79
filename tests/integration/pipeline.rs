//! Manifest-to-plan integration tests.

use serde_json::json;

use vmstrap::core::{Phase, TaskId};
use vmstrap::pipeline::{self, RunStatus};
use vmstrap::{BuildContext, Error, Manifest};

use crate::fixtures::{TestDir, AZURE_JSON, KVM_TOML};

fn position(order: &[TaskId], id: &str) -> usize {
    order
        .iter()
        .position(|t| t.as_str() == id)
        .unwrap_or_else(|| panic!("{} not in plan", id))
}

fn load(dir: &TestDir, name: &str, content: &str) -> Manifest {
    Manifest::load(&dir.write(name, content)).unwrap()
}

/// Test: KVM qcow2 plan
/// Given the KVM manifest with a qcow2 backing
/// When it is planned
/// Then the image is converted after the volume is detached and before it is moved
#[test]
fn test_kvm_plan() {
    let dir = TestDir::new();
    let manifest = load(&dir, "kvm.toml", KVM_TOML);
    let order = pipeline::plan(&manifest).unwrap();
    let ids = order.ids();

    assert!(position(&ids, "loopback.detach") < position(&ids, "image.convert"));
    assert!(position(&ids, "image.convert") < position(&ids, "image.move"));
    assert!(
        position(&ids, "kvm.add_virtio_modules") < position(&ids, "kernel.add_initramfs_modules")
    );
    assert!(
        position(&ids, "kernel.add_initramfs_modules") < position(&ids, "kernel.update_initramfs")
    );
    assert!(position(&ids, "grub.install") < position(&ids, "kernel.update_initramfs"));
    assert!(
        position(&ids, "bootstrap.unmount_specials") < position(&ids, "filesystem.unmount_root")
    );
    assert!(position(&ids, "filesystem.unmount_root") < position(&ids, "loopback.detach"));

    // Every command registration happens before the check.
    let check = position(&ids, "host.check_dependencies");
    for (i, id) in ids.iter().enumerate() {
        if id.as_str().ends_with("_commands") {
            assert!(i < check, "{} registered after the check", id);
        }
    }

    let entries = pipeline::describe(&order);
    let convert = entries.iter().find(|e| e.task.as_str() == "image.convert").unwrap();
    assert_eq!(convert.contributor, "kvm");
    assert_eq!(convert.phase, Phase::ImageRegistration);
    assert!(entries.windows(2).all(|w| w[0].phase <= w[1].phase));
}

/// Test: Azure plan with plugins
/// Given the Azure manifest enabling root_password and minimize_size
/// When it is planned
/// Then provider and plugin tasks are woven into the base pipeline
#[test]
fn test_azure_plan_with_plugins() {
    let dir = TestDir::new();
    let manifest = load(&dir, "azure.json", AZURE_JSON);
    let order = pipeline::plan(&manifest).unwrap();
    let ids = order.ids();

    assert!(!ids.iter().any(|id| id.as_str() == "apt.clean"));
    assert!(position(&ids, "grub.configure") < position(&ids, "azure.configure_grub"));
    assert!(position(&ids, "azure.configure_grub") < position(&ids, "grub.install"));
    assert!(position(&ids, "root_password.set") < position(&ids, "ssh.shred_hostkeys"));
    assert!(position(&ids, "ssh.add_key_generation") < position(&ids, "initd.install_scripts"));
    assert!(
        position(&ids, "minimize_size.clean_apt") < position(&ids, "bootstrap.unmount_specials")
    );

    let tasks = order.tasks();
    assert_eq!(tasks.contributor_of(&"ssh.add_package".into()), Some("azure"));
    assert_eq!(tasks.contributor_of(&"root_password.set".into()), Some("root_password"));
    assert_eq!(
        tasks.get(&"root_password.set".into()).unwrap().phase,
        Phase::UserModification
    );
}

/// Test: Old releases swap the grub installer
#[test]
fn test_squeeze_uses_legacy_grub_installer() {
    let dir = TestDir::new();
    let manifest = load(
        &dir,
        "squeeze.toml",
        &KVM_TOML.replace("bookworm", "squeeze"),
    );
    let order = pipeline::plan(&manifest).unwrap();
    let ids = order.ids();
    assert_eq!(order.tasks().contributor_of(&"grub.install".into()), Some("release"));
    assert!(position(&ids, "grub.configure") < position(&ids, "grub.install"));
}

/// Test: Unpartitioned volumes skip partitioning
#[test]
fn test_unpartitioned_volume() {
    let dir = TestDir::new();
    let manifest = load(
        &dir,
        "flat.toml",
        &KVM_TOML.replace("type = \"msdos\"", "type = \"none\""),
    );
    let ids = pipeline::plan(&manifest).unwrap().ids();
    assert!(!ids.iter().any(|id| id.as_str().starts_with("partitioning.")));
    assert!(position(&ids, "loopback.attach") < position(&ids, "filesystem.format"));
}

/// Test: The commands plugin runs in its configured phase
#[test]
fn test_commands_plugin_phase() {
    let dir = TestDir::new();
    let mut manifest = load(&dir, "kvm.toml", KVM_TOML);
    manifest.plugins.insert(
        "commands".to_string(),
        json!({ "commands": [["chroot", "{root}", "true"]], "phase": "system_cleaning" }),
    );
    let order = pipeline::plan(&manifest).unwrap();
    let task = order.tasks().get(&"commands.run".into()).unwrap();
    assert_eq!(task.phase, Phase::SystemCleaning);
}

/// Test: Manifests the contributors cannot build are rejected
#[test]
fn test_invalid_manifests() {
    let dir = TestDir::new();

    let raw_azure = load(&dir, "a.json", &AZURE_JSON.replace("\"vhd\"", "\"raw\""));
    assert!(matches!(pipeline::plan(&raw_azure), Err(Error::Validation(_))));

    let mut unknown_plugin = load(&dir, "b.toml", KVM_TOML);
    unknown_plugin.plugins.insert("puppet".to_string(), json!({}));
    assert!(matches!(pipeline::plan(&unknown_plugin), Err(Error::UnknownPlugin(_))));

    let tiny = load(&dir, "c.toml", &KVM_TOML.replace("2GiB", "0MiB"));
    assert!(matches!(pipeline::plan(&tiny), Err(Error::Manifest(_))));

    let bad_password = load(
        &dir,
        "d.json",
        &AZURE_JSON.replace("\"correct horse\"", "\"\""),
    );
    assert!(matches!(pipeline::plan(&bad_password), Err(Error::Validation(_))));

    let path = dir.write("e.toml", "name = ");
    assert!(matches!(Manifest::load(&path), Err(Error::TomlParse(_))));
}

/// Test: Dry run of a full build
/// Given the KVM manifest
/// When it runs dry
/// Then the report lists every task as skipped and nothing is created
#[test]
fn test_dry_run_full_build() {
    let dir = TestDir::new();
    let manifest = load(&dir, "kvm.toml", KVM_TOML);
    let order = pipeline::plan(&manifest).unwrap();
    let mut ctx = BuildContext::new(manifest, &dir.workspace_dir(), &dir.output_dir()).unwrap();
    assert_eq!(ctx.image_name, "debian-bookworm-amd64-kvm");

    let report = pipeline::run(&order, &mut ctx, true, |_| {});
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.skipped, order.ids());
    assert!(report.image_path.is_none());
    assert!(!dir.workspace_dir().exists());
    assert!(!dir.output_dir().exists());

    let json = serde_json::to_string(&report).unwrap();
    let parsed: pipeline::RunReport = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, report);
}
