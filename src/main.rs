use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use vmstrap::config::Config;
use vmstrap::core::{ExecutionEvent, Phase, RollbackStatus};
use vmstrap::pipeline::{self, RunReport};
use vmstrap::{vlog, BuildContext, Manifest, Result};

/// vmstrap - build bootable Debian VM images from a manifest
#[derive(Parser, Debug)]
#[command(name = "vmstrap")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    VMSTRAP_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Build an image
    Build {
        /// Manifest file (.json or .toml)
        manifest: PathBuf,

        /// Resolve and walk the task order without running anything
        #[arg(long)]
        dry_run: bool,

        /// Wait for Enter before rolling back a failed build
        #[arg(long)]
        pause_on_error: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,

        /// Directory for per-run workspaces
        #[arg(long)]
        workspace: Option<PathBuf>,

        /// Directory receiving the finished image
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the resolved task order
    Plan {
        manifest: PathBuf,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a manifest
    Validate { manifest: PathBuf },

    /// List pipeline phases
    Phases,
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            eprintln!("error: {}", e);
            1
        }
    };
    std::process::exit(code);
}

/// Returns whether the command succeeded.
fn run(cli: Cli) -> Result<bool> {
    match cli.command {
        Command::Build {
            manifest,
            dry_run,
            pause_on_error,
            json,
            workspace,
            output,
        } => run_build(BuildArgs {
            manifest,
            dry_run,
            pause_on_error,
            json,
            workspace,
            output,
            debug: cli.debug,
        }),
        Command::Plan { manifest, json } => {
            init_console_logging(cli.debug);
            run_plan(&manifest, json)
        }
        Command::Validate { manifest } => {
            init_console_logging(cli.debug);
            run_validate(&manifest)
        }
        Command::Phases => {
            run_phases();
            Ok(true)
        }
    }
}

fn init_console_logging(debug: bool) {
    if debug {
        vmstrap::log::set_level(vmstrap::log::LogLevel::Debug);
        vmstrap::log::set_console(true);
    }
}

struct BuildArgs {
    manifest: PathBuf,
    dry_run: bool,
    pause_on_error: bool,
    json: bool,
    workspace: Option<PathBuf>,
    output: Option<PathBuf>,
    debug: bool,
}

fn run_build(args: BuildArgs) -> Result<bool> {
    let config = Config::load()?;
    let manifest = Manifest::load(&args.manifest)?;

    let workspace_dir = match args.workspace {
        Some(dir) => dir,
        None => config.workspace_dir()?,
    };
    let output_dir = match args.output {
        Some(dir) => dir,
        None => config.output_dir()?,
    };
    let pause_on_error = args.pause_on_error || config.pause_on_error;

    let mut ctx = BuildContext::new(manifest, &workspace_dir, &output_dir)?;
    vmstrap::log::init(
        &config.log_dir()?,
        &format!("{}-{}", ctx.image_name, ctx.run_id),
        args.debug,
    );
    vmstrap::log::set_console(!args.json);
    vlog!("Manifest: {}", args.manifest.display());
    if let Some(path) = vmstrap::log::log_path() {
        vlog!("Log file: {}", path.display());
    }
    let order = pipeline::plan(&ctx.manifest)?;

    let json = args.json;
    let report = pipeline::run(&order, &mut ctx, args.dry_run, |event| {
        if !json {
            print_event(event);
        }
        if pause_on_error && !args.dry_run {
            if let ExecutionEvent::TaskFailed { task, .. } = event {
                pause(task.as_str());
            }
        }
    });

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(report.succeeded())
}

fn print_event(event: &ExecutionEvent<'_>) {
    match event {
        ExecutionEvent::TaskStarted {
            description,
            index,
            total,
            ..
        } => {
            print!("[{:>3}/{}] {} ... ", index, total, description);
            let _ = io::stdout().flush();
        }
        ExecutionEvent::TaskCompleted { duration_ms, .. } => {
            println!("done ({}ms)", duration_ms);
        }
        ExecutionEvent::TaskSkipped { task, description } => {
            println!("  skip  {:<40} {}", task.as_str(), description);
        }
        ExecutionEvent::TaskFailed { error, .. } => {
            println!("FAILED");
            println!("        {}", error);
        }
        ExecutionEvent::RollbackStarted { failed, completed } => {
            println!();
            println!("Rolling back {} completed tasks after '{}' failed", completed, failed);
        }
        ExecutionEvent::TaskRolledBack(outcome) => {
            if outcome.status != RollbackStatus::Skipped {
                println!("  {:<40} {}", outcome.task.as_str(), outcome.status);
            }
        }
        ExecutionEvent::RollbackFinished(report) => {
            if report.is_clean() {
                println!("Rollback finished cleanly");
            } else {
                println!(
                    "Rollback finished with {} failures; check for leftover mounts and loop devices",
                    report.failures().len()
                );
            }
        }
    }
}

fn pause(task: &str) {
    println!();
    print!("Task '{}' failed. Press Enter to roll back... ", task);
    let _ = io::stdout().flush();
    let mut line = String::new();
    let _ = io::stdin().lock().read_line(&mut line);
}

fn print_summary(report: &RunReport) {
    println!();
    if report.succeeded() {
        if report.dry_run {
            println!("Dry run walked {} tasks", report.skipped.len());
        } else {
            let total: u64 = report.completed.iter().map(|m| m.duration_ms).sum();
            println!(
                "Built '{}' in {:.1}s ({} tasks)",
                report.image_name,
                total as f64 / 1000.0,
                report.completed.len()
            );
        }
        if let Some(path) = &report.image_path {
            println!("Image: {}", path.display());
        }
    } else {
        println!(
            "Build of '{}' failed at '{}'",
            report.image_name,
            report
                .failed_task
                .as_ref()
                .map(|t| t.as_str())
                .unwrap_or("?")
        );
        if let Some(error) = &report.error {
            println!("  {}", error);
        }
    }
}

fn run_plan(path: &Path, json: bool) -> Result<bool> {
    let manifest = Manifest::load(path)?;
    let order = pipeline::plan(&manifest)?;
    let entries = pipeline::describe(&order);
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(true);
    }

    let mut phase: Option<Phase> = None;
    for entry in &entries {
        if phase != Some(entry.phase) {
            println!("{}:", entry.phase);
            phase = Some(entry.phase);
        }
        println!(
            "  {:>3}. {:<40} [{}] {}",
            entry.index,
            entry.task.as_str(),
            entry.contributor,
            entry.description
        );
    }
    Ok(true)
}

fn run_validate(path: &Path) -> Result<bool> {
    let manifest = Manifest::load(path)?;
    let contributors = pipeline::validate(&manifest)?;
    println!(
        "{}: valid ({})",
        path.display(),
        contributors
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(true)
}

fn run_phases() {
    for phase in Phase::ALL {
        println!("{:<22} {}", phase.as_str(), phase.description());
    }
}
