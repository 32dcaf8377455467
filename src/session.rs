//! Session orchestration.
//!
//! A session allocates a private result location, starts the surface bound
//! to it, opens the form, and waits for the completion artifact. The
//! artifact is the only signal flowing back from the surface: once it
//! appears the worker is terminated, the artifact is parsed, and the
//! location is removed.
//!
//! By default the wait is unbounded, exactly like a human who takes as long
//! as they need. `SessionOptions` can opt into a timeout, a cancellation
//! token, or failing fast when the worker dies.
use crate::browser::Browser;
use crate::model::{CurationRequest, CurationState};
use crate::normalize::{check_names_subset, normalize, ValidationError};
use crate::surface::{Surface, SurfaceSpec, Worker};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// File name of the completion artifact inside the result location.
pub const ARTIFACT_FILE_NAME: &str = "output.json";
/// Port the surface listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 5000;
/// Interval between checks for the completion artifact.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const LOCATION_PREFIX: &str = "gcurate-";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a session did not produce a curation result.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("create result location")]
    ResultLocation(#[source] std::io::Error),
    #[error("launch interactive surface")]
    Launch(#[source] BoxError),
    #[error("check interactive surface status")]
    WorkerStatus(#[source] BoxError),
    #[error("interactive surface exited before writing a completion artifact")]
    WorkerExited,
    #[error("no completion artifact after {waited_ms} ms")]
    TimedOut { waited_ms: u128 },
    #[error("session cancelled")]
    Cancelled,
    #[error("read completion artifact {}", .path.display())]
    ArtifactRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse completion artifact {}", .path.display())]
    ArtifactParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Lifecycle of one session, traced at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Created,
    SessionActive,
    Polling,
    Complete,
}

fn advance(state: &mut SessionState, next: SessionState) {
    tracing::debug!(from = ?*state, to = ?next, "session state");
    *state = next;
}

/// Shared flag that stops a waiting session from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Wait behavior for a session. The defaults wait forever.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
    pub abort_on_worker_exit: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
            cancel: None,
            abort_on_worker_exit: false,
        }
    }
}

/// Private directory the surface writes its completion artifact into.
#[derive(Debug)]
pub struct ResultLocation {
    dir: TempDir,
}

impl ResultLocation {
    /// Create a fresh, uniquely named directory under the system temp dir.
    pub fn create() -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(LOCATION_PREFIX).tempdir()?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.dir.path().join(ARTIFACT_FILE_NAME)
    }

    /// Remove the location recursively. Failure only leaks temp storage, so
    /// it is reported and otherwise ignored.
    pub fn release(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => tracing::debug!(path = %path.display(), "removed result location"),
            Err(err) => tracing::warn!(
                path = %path.display(),
                error = %err,
                "could not clean up result location"
            ),
        }
    }
}

/// Runs curation sessions against one surface and browser.
pub struct Orchestrator<'a> {
    surface: &'a dyn Surface,
    browser: &'a dyn Browser,
    options: SessionOptions,
}

impl<'a> Orchestrator<'a> {
    pub fn new(surface: &'a dyn Surface, browser: &'a dyn Browser) -> Self {
        Self {
            surface,
            browser,
            options: SessionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Normalize `request` and run a session on it.
    ///
    /// Invalid seeds fail with `SessionError::Validation` before any
    /// directory, worker, or browser is touched.
    pub fn ground(
        &self,
        request: &CurationRequest,
        verbose: bool,
        port: u16,
    ) -> Result<CurationState, SessionError> {
        let initial = normalize(
            &request.longforms,
            request.grounding_map.as_ref(),
            request.names.as_ref(),
            request.pos_labels.as_deref(),
        )?;
        self.run_session(&request.longforms, &request.scores, initial, verbose, port)
    }

    /// Run one session with an already normalized initial state.
    ///
    /// Returns the submitted state as-is; it replaces `initial` rather than
    /// being merged into it.
    pub fn run_session(
        &self,
        longforms: &[String],
        scores: &[f64],
        initial: CurationState,
        verbose: bool,
        port: u16,
    ) -> Result<CurationState, SessionError> {
        let span = tracing::info_span!("session", port);
        let _entered = span.enter();

        if longforms.len() != scores.len() {
            tracing::warn!(
                longforms = longforms.len(),
                scores = scores.len(),
                "longform and score counts differ"
            );
        }

        let mut state = SessionState::Created;
        let location = ResultLocation::create().map_err(SessionError::ResultLocation)?;
        tracing::debug!(path = %location.path().display(), "created result location");

        let spec = SurfaceSpec {
            longforms: longforms.to_vec(),
            scores: scores.to_vec(),
            initial,
            outpath: location.path().to_path_buf(),
            verbose,
            port,
        };
        let mut worker = match self.surface.launch(&spec) {
            Ok(worker) => worker,
            Err(err) => {
                location.release();
                return Err(SessionError::Launch(err.into()));
            }
        };
        advance(&mut state, SessionState::SessionActive);

        if let Err(err) = self.browser.open(worker.url()) {
            let detail = format!("{err:#}");
            tracing::warn!(
                url = worker.url(),
                error = %detail,
                "could not open browser; navigate to the url manually"
            );
        }
        tracing::info!(url = worker.url(), "waiting for curation to be submitted");

        advance(&mut state, SessionState::Polling);
        let artifact = location.artifact_path();
        let waited = self.wait_for_artifact(&artifact, worker.as_mut());

        if let Err(err) = worker.terminate() {
            let detail = format!("{err:#}");
            tracing::warn!(error = %detail, "could not terminate surface cleanly");
        }
        drop(worker);

        let outcome = waited.and_then(|()| read_artifact(&artifact));
        location.release();
        if outcome.is_ok() {
            advance(&mut state, SessionState::Complete);
        }
        outcome
    }

    fn wait_for_artifact(
        &self,
        artifact: &Path,
        worker: &mut dyn Worker,
    ) -> Result<(), SessionError> {
        let start = Instant::now();
        loop {
            if artifact.exists() {
                tracing::info!(
                    elapsed_ms = start.elapsed().as_millis(),
                    "completion artifact found"
                );
                return Ok(());
            }
            if self
                .options
                .cancel
                .as_ref()
                .is_some_and(CancelToken::is_cancelled)
            {
                return Err(SessionError::Cancelled);
            }
            let elapsed = start.elapsed();
            if let Some(timeout) = self.options.timeout {
                if elapsed >= timeout {
                    return Err(SessionError::TimedOut {
                        waited_ms: elapsed.as_millis(),
                    });
                }
            }
            if self.options.abort_on_worker_exit
                && worker
                    .has_exited()
                    .map_err(|err| SessionError::WorkerStatus(err.into()))?
            {
                // The artifact may have landed between the two checks.
                if artifact.exists() {
                    return Ok(());
                }
                return Err(SessionError::WorkerExited);
            }

            let nap = match self.options.timeout {
                Some(timeout) => self
                    .options
                    .poll_interval
                    .min(timeout.saturating_sub(elapsed)),
                None => self.options.poll_interval,
            };
            std::thread::sleep(nap);
        }
    }
}

fn read_artifact(path: &Path) -> Result<CurationState, SessionError> {
    let bytes = std::fs::read(path).map_err(|source| SessionError::ArtifactRead {
        path: path.to_path_buf(),
        source,
    })?;
    let state: CurationState =
        serde_json::from_slice(&bytes).map_err(|source| SessionError::ArtifactParse {
            path: path.to_path_buf(),
            source,
        })?;
    if let Err(err) = check_names_subset(&state.grounding_map, &state.names) {
        tracing::warn!(error = %err, "submitted names do not match submitted groundings");
    }
    tracing::info!(
        longforms = state.grounding_map.len(),
        names = state.names.len(),
        pos_labels = state.pos_labels.len(),
        "curation submitted"
    );
    Ok(state)
}
