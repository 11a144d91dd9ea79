use std::fs;
use std::path::{Path, PathBuf};

use super::{arg, host, loopback};
use crate::context::{BuildContext, BuildTask};
use crate::core::{Phase, Task};
use crate::manifest::Backing;
use crate::util::log_check_call;
use crate::{vlog, vlog_debug, vlog_warn, Result};

pub const ADD_CONVERSION_COMMANDS: &str = "image.add_conversion_commands";
pub const CONVERT: &str = "image.convert";
pub const MOVE: &str = "image.move";

pub fn tasks() -> Vec<BuildTask> {
    vec![Task::new(
        MOVE,
        Phase::ImageRegistration,
        "Moving the image to the output directory",
        move_image,
    )
    .after([CONVERT])]
}

/// Tasks converting the raw volume into `backing`.
pub fn conversion_tasks(backing: Backing) -> Vec<BuildTask> {
    vec![
        host::require(
            ADD_CONVERSION_COMMANDS,
            "Adding image conversion commands",
            vec!["qemu-img"],
        ),
        Task::new(
            CONVERT,
            Phase::ImageRegistration,
            "Converting the volume image",
            move |ctx: &mut BuildContext| convert(ctx, backing),
        )
        .after([loopback::DETACH])
        .with_rollback(discard_conversion),
    ]
}

fn convert_args(backing: Backing, source: &str, target: &str) -> Vec<String> {
    let format = match backing {
        Backing::Raw => "raw",
        Backing::Qcow2 => "qcow2",
        Backing::Vhd => "vpc",
    };
    let mut args = vec![
        "qemu-img".to_string(),
        "convert".to_string(),
        "-O".to_string(),
        format.to_string(),
    ];
    if backing == Backing::Vhd {
        args.extend(["-o".to_string(), "subformat=fixed,force_size".to_string()]);
    }
    args.push(source.to_string());
    args.push(target.to_string());
    args
}

fn convert(ctx: &mut BuildContext, backing: Backing) -> Result<()> {
    let source = ctx.volume.image_path.clone();
    let target = source.with_extension(backing.extension());
    if source == target {
        return Ok(());
    }
    log_check_call(&convert_args(backing, &arg(&source), &arg(&target)))?;
    fs::remove_file(&source)?;
    vlog!("Converted volume to {}", backing.extension());
    ctx.volume.image_path = target;
    Ok(())
}

fn discard_conversion(ctx: &mut BuildContext) -> Result<()> {
    if ctx.volume.image_path.exists() {
        fs::remove_file(&ctx.volume.image_path)?;
    }
    Ok(())
}

fn destination(output_dir: &Path, image_name: &str, source: &Path) -> PathBuf {
    let extension = source.extension().and_then(|e| e.to_str()).unwrap_or("raw");
    output_dir.join(format!("{}.{}", image_name, extension))
}

fn move_image(ctx: &mut BuildContext) -> Result<()> {
    let source = ctx.volume.image_path.clone();
    let target = destination(&ctx.output_dir, &ctx.image_name, &source);
    fs::create_dir_all(&ctx.output_dir)?;

    if let Err(e) = fs::rename(&source, &target) {
        vlog_debug!("rename failed ({}), copying instead", e);
        fs::copy(&source, &target)?;
        if let Err(e) = fs::remove_file(&source) {
            vlog_warn!("Could not remove {}: {}", source.display(), e);
        }
    }
    vlog!("Image registered at {}", target.display());
    ctx.volume.image_path = target.clone();
    ctx.image_path = Some(target);
    Ok(())
}
