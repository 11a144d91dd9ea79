use std::fs;
use std::os::unix::fs::symlink;

use crate::context::{BuildContext, BuildTask};
use crate::core::{Phase, Task};
use crate::manifest::Manifest;
use crate::util::{chroot, sed_i};
use crate::{vlog_debug, vlog_warn, Result};

pub const ADD_LOCALES_PACKAGE: &str = "system.add_locales_package";
pub const SET_HOSTNAME: &str = "system.set_hostname";
pub const SET_LOCALE: &str = "system.set_locale";
pub const SET_TIMEZONE: &str = "system.set_timezone";

pub fn tasks(manifest: &Manifest) -> Vec<BuildTask> {
    let mut tasks = vec![
        Task::new(
            ADD_LOCALES_PACKAGE,
            Phase::Preparation,
            "Adding the locales package",
            |ctx: &mut BuildContext| {
                ctx.packages.add("locales");
                Ok(())
            },
        ),
        Task::new(SET_LOCALE, Phase::SystemModification, "Configuring the locale", set_locale),
        Task::new(SET_TIMEZONE, Phase::SystemModification, "Setting the timezone", set_timezone),
    ];
    if manifest.system.hostname.is_some() {
        tasks.push(Task::new(
            SET_HOSTNAME,
            Phase::SystemModification,
            "Setting the hostname",
            set_hostname,
        ));
    }
    tasks
}

fn set_hostname(ctx: &mut BuildContext) -> Result<()> {
    let Some(hostname) = ctx.manifest.system.hostname.clone() else {
        return Ok(());
    };
    fs::write(ctx.root_path("etc/hostname"), format!("{}\n", hostname))?;

    let hosts = ctx.root_path("etc/hosts");
    let entry = format!("127.0.1.1\t{}", hostname);
    if !hosts.exists() || sed_i(&hosts, r"^127\.0\.1\.1\s.*$", &entry)? == 0 {
        let mut content = fs::read_to_string(&hosts).unwrap_or_default();
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&entry);
        content.push('\n');
        fs::write(&hosts, content)?;
    }
    vlog_debug!("Hostname set to {}", hostname);
    Ok(())
}

fn set_locale(ctx: &mut BuildContext) -> Result<()> {
    let locale = ctx.manifest.system.locale.clone();
    let locale_gen = ctx.root_path("etc/locale.gen");
    let pattern = format!(r"^#\s*({}\s.*)$", regex::escape(&locale));
    if locale_gen.exists() && sed_i(&locale_gen, &pattern, "${1}")? == 0 {
        vlog_warn!("Locale {} not found in /etc/locale.gen", locale);
    }
    chroot(&ctx.root, &["locale-gen"])?;
    chroot(&ctx.root, &["update-locale", format!("LANG={}", locale).as_str()])?;
    Ok(())
}

fn set_timezone(ctx: &mut BuildContext) -> Result<()> {
    let timezone = ctx.manifest.system.timezone.clone();
    fs::write(ctx.root_path("etc/timezone"), format!("{}\n", timezone))?;

    let localtime = ctx.root_path("etc/localtime");
    if localtime.symlink_metadata().is_ok() {
        fs::remove_file(&localtime)?;
    }
    symlink(format!("/usr/share/zoneinfo/{}", timezone), &localtime)?;
    Ok(())
}
