//! Interactive surface workers.
//!
//! The surface is the form a human uses to curate groundings. It runs as an
//! independent worker bound to one result location; the orchestrator only
//! ever starts it, hands out its address, and terminates it.
//!
//! # Surface protocol
//!
//! `CommandSurface` runs a user-configured program. The program receives:
//!
//! - the `SurfaceSpec` as one JSON document on stdin (stdin is then closed),
//! - `GCURATE_RESULT_DIR`, `GCURATE_PORT` and `GCURATE_VERBOSE` in its
//!   environment.
//!
//! It must serve the form at `http://localhost:<port>/` and, when the human
//! submits, atomically create `<result dir>/output.json` holding the
//! curated `grounding_map`, `names` and `pos_labels`. It keeps serving until
//! it is terminated.
use crate::model::CurationState;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

/// Environment variable carrying the result location.
pub const RESULT_DIR_ENV: &str = "GCURATE_RESULT_DIR";
/// Environment variable carrying the port the surface must listen on.
pub const PORT_ENV: &str = "GCURATE_PORT";
/// Environment variable set to `1` when surface diagnostics are wanted.
pub const VERBOSE_ENV: &str = "GCURATE_VERBOSE";

/// Immutable construction parameters for one surface instance.
#[derive(Debug, Clone, Serialize)]
pub struct SurfaceSpec {
    pub longforms: Vec<String>,
    pub scores: Vec<f64>,
    #[serde(flatten)]
    pub initial: CurationState,
    pub outpath: PathBuf,
    pub verbose: bool,
    pub port: u16,
}

impl SurfaceSpec {
    /// Local address the human should open.
    pub fn url(&self) -> String {
        format!("http://localhost:{}/", self.port)
    }
}

/// Something that can start an interactive surface.
pub trait Surface {
    fn launch(&self, spec: &SurfaceSpec) -> Result<Box<dyn Worker>>;
}

/// A running surface, exclusively owned by the orchestrator.
pub trait Worker {
    /// Address the surface serves its form on.
    fn url(&self) -> &str;

    /// Whether the worker has already stopped on its own.
    fn has_exited(&mut self) -> Result<bool>;

    /// Stop the worker. Calling this on a stopped worker is a no-op.
    fn terminate(&mut self) -> Result<()>;
}

/// Surface backed by an external program (parsed with shell-words).
#[derive(Debug, Clone)]
pub struct CommandSurface {
    command: String,
}

impl CommandSurface {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Surface for CommandSurface {
    fn launch(&self, spec: &SurfaceSpec) -> Result<Box<dyn Worker>> {
        let args = shell_words::split(&self.command)
            .with_context(|| format!("parse surface command: {}", self.command))?;
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| anyhow!("surface command is empty"))?;
        let payload = serde_json::to_vec(spec).context("serialize surface spec")?;

        let (stdout, stderr) = if spec.verbose {
            (Stdio::inherit(), Stdio::inherit())
        } else {
            (Stdio::null(), Stdio::null())
        };
        let mut child = Command::new(program)
            .args(rest)
            .env(RESULT_DIR_ENV, &spec.outpath)
            .env(PORT_ENV, spec.port.to_string())
            .env(VERBOSE_ENV, if spec.verbose { "1" } else { "0" })
            .stdin(Stdio::piped())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .with_context(|| format!("spawn surface command: {program}"))?;

        // The surface may never read stdin; a blocked write must not stall the session.
        if let Some(mut stdin) = child.stdin.take() {
            std::thread::spawn(move || {
                if let Err(err) = stdin.write_all(&payload) {
                    tracing::debug!(error = %err, "surface did not accept its spec on stdin");
                }
            });
        }

        tracing::info!(pid = child.id(), program = %program, "surface started");
        Ok(Box::new(ProcessWorker {
            child,
            url: spec.url(),
            stopped: false,
        }))
    }
}

/// Child process running a surface.
///
/// Dropping a worker that was never terminated kills the child, so a worker
/// cannot outlive the session that started it.
#[derive(Debug)]
pub struct ProcessWorker {
    child: Child,
    url: String,
    stopped: bool,
}

impl Worker for ProcessWorker {
    fn url(&self) -> &str {
        &self.url
    }

    fn has_exited(&mut self) -> Result<bool> {
        let status = self.child.try_wait().context("check surface status")?;
        Ok(status.is_some())
    }

    fn terminate(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        if self.has_exited()? {
            self.stopped = true;
            return Ok(());
        }

        self.child.kill().context("kill surface")?;
        let status = self.child.wait().context("reap surface")?;
        tracing::debug!(status = %status, "surface stopped");
        self.stopped = true;
        Ok(())
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        if !self.stopped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
