//! Opening the curation form for the human.
//!
//! Opening a browser is a convenience: the orchestrator reports a failure
//! and keeps waiting, since the human can always navigate to the URL.
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::process::{Command, Stdio};

#[cfg(target_os = "macos")]
const PLATFORM_LAUNCHERS: &[(&str, &[&str])] = &[("open", &[])];

#[cfg(windows)]
const PLATFORM_LAUNCHERS: &[(&str, &[&str])] = &[("cmd", &["/C", "start", ""])];

#[cfg(not(any(target_os = "macos", windows)))]
const PLATFORM_LAUNCHERS: &[(&str, &[&str])] = &[
    ("xdg-open", &[]),
    ("gio", &["open"]),
    ("sensible-browser", &[]),
];

/// Opens a URL for the human.
pub trait Browser {
    fn open(&self, url: &str) -> Result<()>;
}

/// The user's default browser, via `$BROWSER` or the platform launcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl Browser for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        let (program, args) = launcher_command()?;
        let mut child = Command::new(&program)
            .args(&args)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn browser launcher {}", program.display()))?;
        tracing::info!(launcher = %program.display(), url, "opened browser");
        // Some launchers stay in the foreground until the browser closes.
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }
}

/// Never opens anything; the human navigates manually.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBrowser;

impl Browser for NoBrowser {
    fn open(&self, url: &str) -> Result<()> {
        tracing::debug!(url, "browser launch disabled");
        Ok(())
    }
}

fn launcher_command() -> Result<(PathBuf, Vec<String>)> {
    if let Some(words) = std::env::var("BROWSER")
        .ok()
        .and_then(|value| parse_browser_var(&value))
    {
        if let Some((program, args)) = words.split_first() {
            let path = which::which(program)
                .with_context(|| format!("locate $BROWSER program {program}"))?;
            return Ok((path, args.to_vec()));
        }
    }
    for (name, args) in PLATFORM_LAUNCHERS {
        if let Ok(path) = which::which(name) {
            return Ok((path, args.iter().map(|arg| arg.to_string()).collect()));
        }
    }
    Err(anyhow!(
        "no browser launcher found (tried {})",
        PLATFORM_LAUNCHERS
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ")
    ))
}

/// First usable entry of a `$BROWSER`-style list (`cmd1:cmd2`), split into words.
fn parse_browser_var(value: &str) -> Option<Vec<String>> {
    value
        .split(':')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .find_map(|entry| shell_words::split(entry).ok())
        .filter(|words| !words.is_empty())
}
