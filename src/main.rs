use anyhow::{Context, Result};
use clap::Parser;
use grounding_curator::browser::{Browser, NoBrowser, SystemBrowser};
use grounding_curator::config::{
    load_effective_config, resolve_models_dir, resolve_models_url, resolve_poll_interval,
    resolve_port, resolve_surface_command,
};
use grounding_curator::download::{download_models, HttpFetcher};
use grounding_curator::model::CurationRequest;
use grounding_curator::session::{Orchestrator, SessionError, SessionOptions};
use grounding_curator::surface::CommandSurface;
use grounding_curator::util::{read_json, write_json};
use grounding_curator::ValidationError;
use std::process::ExitCode;
use std::time::Duration;

mod cli;

use cli::{Command, DownloadArgs, GroundArgs, RootArgs};

const EXIT_FAILURE: u8 = 1;
const EXIT_VALIDATION: u8 = 2;

fn main() -> ExitCode {
    let args = RootArgs::parse();
    let verbose = match &args.command {
        Command::Ground(ground) => ground.verbose,
        Command::Download(download) => download.verbose,
    };
    init_tracing(verbose);

    let config_path = args.config.as_deref();
    let result = match args.command {
        Command::Ground(ground) => cmd_ground(ground, config_path),
        Command::Download(download) => cmd_download(download, config_path),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(validation) = validation_error(&err) {
                eprintln!("validation error: {validation}");
                ExitCode::from(EXIT_VALIDATION)
            } else {
                eprintln!("error: {err:#}");
                ExitCode::from(EXIT_FAILURE)
            }
        }
    }
}

/// Logs go to stderr so stdout stays free for the curated JSON.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn validation_error(err: &anyhow::Error) -> Option<&ValidationError> {
    err.chain().find_map(|cause| {
        cause.downcast_ref::<ValidationError>().or_else(|| {
            match cause.downcast_ref::<SessionError>() {
                Some(SessionError::Validation(inner)) => Some(inner),
                _ => None,
            }
        })
    })
}

fn cmd_ground(args: GroundArgs, config_path: Option<&std::path::Path>) -> Result<()> {
    let config = load_effective_config(config_path)?;
    let request: CurationRequest = read_json(&args.input)?;

    let surface = CommandSurface::new(resolve_surface_command(args.surface.as_deref(), &config));
    let port = resolve_port(args.port, &config);
    let browser: Box<dyn Browser> = if args.no_browser {
        eprintln!("open http://localhost:{port}/ to curate groundings");
        Box::new(NoBrowser)
    } else {
        Box::new(SystemBrowser)
    };
    let options = SessionOptions {
        poll_interval: resolve_poll_interval(&config),
        timeout: args.timeout_secs.map(Duration::from_secs),
        cancel: None,
        abort_on_worker_exit: args.abort_on_worker_exit,
    };
    tracing::debug!(surface = surface.command(), port, "starting curation session");

    let curated = Orchestrator::new(&surface, browser.as_ref())
        .with_options(options)
        .ground(&request, args.verbose, port)?;

    match &args.out {
        Some(out) => {
            write_json(out, &curated)?;
            tracing::info!(path = %out.display(), "wrote curated groundings");
        }
        None => {
            let text =
                serde_json::to_string_pretty(&curated).context("serialize curated groundings")?;
            println!("{text}");
        }
    }
    Ok(())
}

fn cmd_download(args: DownloadArgs, config_path: Option<&std::path::Path>) -> Result<()> {
    let config = load_effective_config(config_path)?;
    let models_dir = match args.models_dir {
        Some(dir) => dir,
        None => resolve_models_dir(&config)?,
    };
    let base_url = resolve_models_url(&config);

    let report = download_models(&HttpFetcher::new(), &models_dir, &base_url, args.update)?;
    println!(
        "{} downloaded, {} already present in {}",
        report.downloaded.len(),
        report.skipped.len(),
        models_dir.display()
    );
    Ok(())
}
