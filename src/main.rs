//! imgspin - build a bootable LiveOS ISO from a `.spin` file.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use imgspin::mount::MountManager;
use imgspin::{preflight, ImageSpec, Spinner};

#[derive(Parser)]
#[command(name = "imgspin", version)]
#[command(about = "Build bootable LiveOS images from .spin files")]
#[command(after_help = "Must be run as root.\n\n  imgspin --check live.spin   Check the host is ready\n  imgspin live.spin           Build the image")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Run preflight checks only, then exit
    #[arg(long)]
    check: bool,

    /// Image specification (.spin)
    file: PathBuf,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    // Load .env if present
    dotenvy::dotenv().ok();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "imgspin=debug" } else { "imgspin=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    // --check reports privileges itself
    if !cli.check {
        preflight::require_root()?;
    }

    tracing::info!(filename = %cli.file.display(), "Loading .spin file");
    let spec = ImageSpec::load(&cli.file)?;

    if cli.check {
        spec.config.print();
        return preflight::run_preflight_or_fail(&spec);
    }

    let mounts = Arc::new(MountManager::new());
    let mut spinner = Spinner::for_spec(&spec, mounts);
    spinner
        .build(&spec)
        .with_context(|| format!("Failed to build {}", cli.file.display()))
}
