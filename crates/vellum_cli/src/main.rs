//! Vellum CLI: maintenance commands for a Vellum image cache.
//!
//! Provides `vellum import` to add originals, `vellum render` to build an
//! artifact, `vellum inspect` to decode an artifact header, and `vellum purge`
//! to clear the cache directories.

#![warn(missing_docs)]

mod import;
mod inspect;
mod purge;
mod render;
mod session;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Vellum: a disk-backed, memory-mapped image cache.
#[derive(Parser, Debug)]
#[command(name = "vellum", version, about = "Vellum image cache")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a custom `vellum.toml` configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Copy an image file into the original store.
    Import(ImportArgs),
    /// Render an original at a logical size and scale.
    Render(RenderArgs),
    /// Decode and validate a rendered artifact's header.
    Inspect(InspectArgs),
    /// Delete cached data.
    Purge(PurgeArgs),
}

/// Arguments for the `vellum import` subcommand.
#[derive(Parser, Debug)]
pub struct ImportArgs {
    /// Image file to import.
    pub file: PathBuf,

    /// Key to store the image under.
    #[arg(short, long)]
    pub key: String,
}

/// Arguments for the `vellum render` subcommand.
#[derive(Parser, Debug)]
pub struct RenderArgs {
    /// Key of the original to render.
    #[arg(short, long)]
    pub key: String,

    /// Logical width.
    #[arg(long)]
    pub width: f64,

    /// Logical height.
    #[arg(long)]
    pub height: f64,

    /// Device scale factor.
    #[arg(short, long, default_value_t = 1.0)]
    pub scale: f64,

    /// Output format for the artifact report.
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// Arguments for the `vellum inspect` subcommand.
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Artifact file to inspect.
    pub artifact: PathBuf,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `vellum purge` subcommand.
#[derive(Parser, Debug)]
pub struct PurgeArgs {
    /// Keep originals; delete rendered artifacts only.
    #[arg(long)]
    pub renders_only: bool,
}

/// Report output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable terminal output.
    Text,
    /// Machine-readable JSON output.
    Json,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Optional path to a custom config file.
    pub config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };

    let result = match cli.command {
        Command::Import(ref args) => import::run(args, &global),
        Command::Render(ref args) => render::run(args, &global),
        Command::Inspect(ref args) => inspect::run(args, &global),
        Command::Purge(ref args) => purge::run(args, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

/// The log filter for the given flags: `-q` and `-v` win over `RUST_LOG`.
fn log_filter(quiet: bool, verbose: bool) -> EnvFilter {
    if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn init_logging(quiet: bool, verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(quiet, verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
