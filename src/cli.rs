//! CLI argument parsing for the curation tool.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "gcurate",
    version,
    about = "Human-in-the-loop grounding curation",
    after_help = "Commands:\n  ground --input <file>   Curate groundings for a request in the browser\n  download [--update]     Fetch published disambiguation models\n\nExamples:\n  gcurate ground --input ER.json --out ER.curated.json\n  gcurate ground --input ER.json --surface 'python -m my_form' --no-browser\n  gcurate download --update",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Config file to use instead of the default location
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Ground(GroundArgs),
    Download(DownloadArgs),
}

/// Inputs for one interactive curation session.
#[derive(Parser, Debug)]
#[command(about = "Open a curation form and wait for the submitted groundings")]
pub struct GroundArgs {
    /// Request JSON: longforms, scores, and optional seed maps
    #[arg(long, value_name = "PATH")]
    pub input: PathBuf,

    /// Write the curated state here instead of stdout
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,

    /// Port the surface listens on
    #[arg(long)]
    pub port: Option<u16>,

    /// Show surface output and info-level logs
    #[arg(long)]
    pub verbose: bool,

    /// Command line that starts the surface
    #[arg(long, value_name = "CMD")]
    pub surface: Option<String>,

    /// Print the form address instead of opening a browser
    #[arg(long)]
    pub no_browser: bool,

    /// Give up if nothing is submitted within this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Fail as soon as the surface exits without submitting
    #[arg(long)]
    pub abort_on_worker_exit: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Download published disambiguation models")]
pub struct DownloadArgs {
    /// Fetch models again even if they are already cached
    #[arg(long)]
    pub update: bool,

    /// Cache directory for models (defaults to the configured one)
    #[arg(long, value_name = "DIR")]
    pub models_dir: Option<PathBuf>,

    /// Show per-model progress
    #[arg(long)]
    pub verbose: bool,
}
