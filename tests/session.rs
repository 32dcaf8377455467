use anyhow::{anyhow, Result};
use grounding_curator::browser::Browser;
use grounding_curator::model::{CurationRequest, Grounding};
use grounding_curator::session::{
    CancelToken, Orchestrator, SessionError, SessionOptions, ARTIFACT_FILE_NAME,
};
use grounding_curator::surface::{Surface, SurfaceSpec, Worker};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PINNED_DIR: &str = "pinned";

const SUBMITTED: &str = r#"{
    "grounding_map": {
        "estrogen receptor": "HGNC:3467",
        "endoplasmic reticulum": "GO:0005783",
        "emergency room": ""
    },
    "names": {"HGNC:3467": "ESR1", "GO:0005783": "endoplasmic reticulum", "": ""},
    "pos_labels": ["HGNC:3467"]
}"#;

/// What the fake surface should do once launched.
#[derive(Clone)]
enum Behavior {
    SubmitAfter(Duration, String),
    /// Submits, then leaves a read-only directory inside the result location.
    SubmitAndPin(String),
    NeverSubmit,
    ExitWithoutSubmitting,
    FailToLaunch,
}

#[derive(Default)]
struct Record {
    specs: Vec<SurfaceSpec>,
    terminated: usize,
}

struct FakeSurface {
    behavior: Behavior,
    record: Rc<RefCell<Record>>,
}

impl FakeSurface {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            record: Rc::default(),
        }
    }

    fn launches(&self) -> usize {
        self.record.borrow().specs.len()
    }

    fn terminated(&self) -> usize {
        self.record.borrow().terminated
    }

    fn outpath(&self) -> PathBuf {
        self.record.borrow().specs[0].outpath.clone()
    }
}

impl Surface for FakeSurface {
    fn launch(&self, spec: &SurfaceSpec) -> Result<Box<dyn Worker>> {
        self.record.borrow_mut().specs.push(spec.clone());
        match &self.behavior {
            Behavior::FailToLaunch => return Err(anyhow!("port already in use")),
            Behavior::SubmitAfter(delay, body) => {
                let outpath = spec.outpath.clone();
                let delay = *delay;
                let body = body.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    submit(&outpath, &body);
                });
            }
            Behavior::SubmitAndPin(body) => {
                submit(&spec.outpath, body);
                let pinned = spec.outpath.join(PINNED_DIR);
                std::fs::create_dir(&pinned)?;
                std::fs::write(pinned.join("held"), "")?;
                set_read_only(&pinned, true)?;
            }
            Behavior::NeverSubmit | Behavior::ExitWithoutSubmitting => {}
        }
        Ok(Box::new(FakeWorker {
            url: spec.url(),
            exited: matches!(self.behavior, Behavior::ExitWithoutSubmitting),
            record: Rc::clone(&self.record),
        }))
    }
}

struct FakeWorker {
    url: String,
    exited: bool,
    record: Rc<RefCell<Record>>,
}

impl Worker for FakeWorker {
    fn url(&self) -> &str {
        &self.url
    }

    fn has_exited(&mut self) -> Result<bool> {
        Ok(self.exited)
    }

    fn terminate(&mut self) -> Result<()> {
        self.record.borrow_mut().terminated += 1;
        Ok(())
    }
}

/// Writes the artifact the way a well-behaved surface does: staged, then renamed.
fn submit(outpath: &Path, body: &str) {
    let staged = outpath.join(".output.json.partial");
    std::fs::write(&staged, body).expect("stage artifact");
    std::fs::rename(&staged, outpath.join(ARTIFACT_FILE_NAME)).expect("publish artifact");
}

#[cfg(unix)]
fn set_read_only(dir: &Path, read_only: bool) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if read_only { 0o555 } else { 0o755 };
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_read_only(dir: &Path, read_only: bool) -> std::io::Result<()> {
    let mut permissions = std::fs::metadata(dir)?.permissions();
    permissions.set_readonly(read_only);
    std::fs::set_permissions(dir, permissions)
}

/// Whether a read-only directory actually stops us from adding entries.
fn read_only_dirs_are_enforced() -> bool {
    let scratch = tempfile::tempdir().expect("create temp dir");
    set_read_only(scratch.path(), true).expect("make scratch read-only");
    let enforced = std::fs::write(scratch.path().join("entry"), "").is_err();
    set_read_only(scratch.path(), false).expect("restore scratch");
    enforced
}

/// Log sink shared with a scoped tracing subscriber.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("log lock")).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("log lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingBrowser {
    opened: RefCell<Vec<String>>,
    fail: bool,
}

impl Browser for RecordingBrowser {
    fn open(&self, url: &str) -> Result<()> {
        self.opened.borrow_mut().push(url.to_string());
        if self.fail {
            return Err(anyhow!("no display"));
        }
        Ok(())
    }
}

fn fast_options() -> SessionOptions {
    SessionOptions {
        poll_interval: Duration::from_millis(10),
        ..SessionOptions::default()
    }
}

fn seeded_request() -> CurationRequest {
    let grounding_map = BTreeMap::from([
        ("estrogen receptor".to_string(), "HGNC:3467".to_string()),
        ("emergency room".to_string(), String::new()),
    ]);
    let names = BTreeMap::from([("HGNC:3467".to_string(), "ESR1".to_string())]);
    CurationRequest {
        longforms: vec![
            "estrogen receptor".to_string(),
            "endoplasmic reticulum".to_string(),
            "emergency room".to_string(),
        ],
        scores: vec![21.0, 9.5, 3.0],
        grounding_map: Some(grounding_map),
        names: Some(names),
        pos_labels: Some(vec!["HGNC:3467".to_string()]),
    }
}

#[test]
fn submitted_state_is_returned_and_session_resources_released() {
    let surface = FakeSurface::new(Behavior::SubmitAfter(
        Duration::from_millis(40),
        SUBMITTED.to_string(),
    ));
    let browser = RecordingBrowser::default();

    let curated = Orchestrator::new(&surface, &browser)
        .with_options(fast_options())
        .ground(&seeded_request(), false, 5123)
        .expect("session completes");

    let expected: grounding_curator::CurationState =
        serde_json::from_str(SUBMITTED).expect("parse expected");
    assert_eq!(curated, expected);
    assert_eq!(
        curated.grounding_of("endoplasmic reticulum"),
        Some(&Grounding::from("GO:0005783"))
    );
    assert_eq!(browser.opened.borrow().as_slice(), ["http://localhost:5123/"]);
    assert_eq!(surface.launches(), 1);
    assert_eq!(surface.terminated(), 1);
    assert!(!surface.outpath().exists());
}

#[test]
fn surface_receives_normalized_seed() {
    let surface = FakeSurface::new(Behavior::SubmitAfter(
        Duration::ZERO,
        SUBMITTED.to_string(),
    ));
    let request = seeded_request();

    Orchestrator::new(&surface, &RecordingBrowser::default())
        .with_options(fast_options())
        .ground(&request, true, 5001)
        .expect("session completes");

    let record = surface.record.borrow();
    let spec = &record.specs[0];
    assert_eq!(spec.longforms, request.longforms);
    assert_eq!(spec.scores, request.scores);
    assert!(spec.verbose);
    assert_eq!(spec.port, 5001);
    assert_eq!(spec.initial.grounding_map.len(), 3);
    assert_eq!(
        spec.initial.grounding_of("endoplasmic reticulum"),
        Some(&Grounding::Ungrounded)
    );
    assert_eq!(spec.initial.name_of("estrogen receptor"), "ESR1");
    assert!(spec.initial.pos_labels.contains("HGNC:3467"));
}

#[test]
fn invalid_seed_fails_before_any_resource_is_touched() {
    let surface = FakeSurface::new(Behavior::NeverSubmit);
    let browser = RecordingBrowser::default();
    let mut request = seeded_request();
    request
        .names
        .get_or_insert_with(BTreeMap::new)
        .insert("MESH:D000001".to_string(), "orphan".to_string());

    let err = Orchestrator::new(&surface, &browser)
        .ground(&request, false, 5000)
        .expect_err("unknown name key");

    assert!(matches!(err, SessionError::Validation(_)));
    assert!(err.to_string().contains("MESH:D000001"));
    assert_eq!(surface.launches(), 0);
    assert!(browser.opened.borrow().is_empty());
}

#[test]
fn browser_failure_does_not_abort_the_session() {
    let surface = FakeSurface::new(Behavior::SubmitAfter(
        Duration::from_millis(20),
        SUBMITTED.to_string(),
    ));
    let browser = RecordingBrowser {
        fail: true,
        ..RecordingBrowser::default()
    };

    let curated = Orchestrator::new(&surface, &browser)
        .with_options(fast_options())
        .ground(&seeded_request(), false, 5000)
        .expect("session completes without a browser");

    assert_eq!(curated.pos_labels.len(), 1);
    assert_eq!(browser.opened.borrow().len(), 1);
}

#[test]
fn timeout_stops_the_worker_and_cleans_up() {
    let surface = FakeSurface::new(Behavior::NeverSubmit);
    let options = SessionOptions {
        timeout: Some(Duration::from_millis(60)),
        ..fast_options()
    };

    let err = Orchestrator::new(&surface, &RecordingBrowser::default())
        .with_options(options)
        .ground(&seeded_request(), false, 5000)
        .expect_err("nothing submitted");

    assert!(matches!(err, SessionError::TimedOut { .. }));
    assert_eq!(surface.terminated(), 1);
    assert!(!surface.outpath().exists());
}

#[test]
fn cancellation_ends_the_wait() {
    let surface = FakeSurface::new(Behavior::NeverSubmit);
    let cancel = CancelToken::new();
    let remote = cancel.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        remote.cancel();
    });
    let options = SessionOptions {
        cancel: Some(cancel),
        ..fast_options()
    };

    let err = Orchestrator::new(&surface, &RecordingBrowser::default())
        .with_options(options)
        .ground(&seeded_request(), false, 5000)
        .expect_err("cancelled");
    canceller.join().expect("join canceller");

    assert!(matches!(err, SessionError::Cancelled));
    assert_eq!(surface.terminated(), 1);
    assert!(!surface.outpath().exists());
}

#[test]
fn worker_exit_is_fatal_only_when_requested() {
    let surface = FakeSurface::new(Behavior::ExitWithoutSubmitting);
    let options = SessionOptions {
        abort_on_worker_exit: true,
        ..fast_options()
    };
    let err = Orchestrator::new(&surface, &RecordingBrowser::default())
        .with_options(options)
        .ground(&seeded_request(), false, 5000)
        .expect_err("worker exited");
    assert!(matches!(err, SessionError::WorkerExited));

    // Without the option the session keeps waiting; a timeout bounds this test.
    let surface = FakeSurface::new(Behavior::ExitWithoutSubmitting);
    let options = SessionOptions {
        timeout: Some(Duration::from_millis(40)),
        ..fast_options()
    };
    let err = Orchestrator::new(&surface, &RecordingBrowser::default())
        .with_options(options)
        .ground(&seeded_request(), false, 5000)
        .expect_err("timed out");
    assert!(matches!(err, SessionError::TimedOut { .. }));
}

#[test]
fn malformed_artifact_is_reported_and_location_removed() {
    let surface = FakeSurface::new(Behavior::SubmitAfter(
        Duration::ZERO,
        r#"{"grounding_map": {"estrogen receptor": 3}}"#.to_string(),
    ));

    let err = Orchestrator::new(&surface, &RecordingBrowser::default())
        .with_options(fast_options())
        .ground(&seeded_request(), false, 5000)
        .expect_err("malformed artifact");

    assert!(matches!(err, SessionError::ArtifactParse { .. }));
    assert_eq!(surface.terminated(), 1);
    assert!(!surface.outpath().exists());
}

#[test]
fn launch_failure_releases_the_location() {
    let surface = FakeSurface::new(Behavior::FailToLaunch);
    let browser = RecordingBrowser::default();

    let err = Orchestrator::new(&surface, &browser)
        .ground(&seeded_request(), false, 5000)
        .expect_err("launch fails");

    assert!(matches!(err, SessionError::Launch(_)));
    assert!(browser.opened.borrow().is_empty());
    assert!(!surface.outpath().exists());
}

#[test]
fn result_survives_a_location_that_cannot_be_removed() {
    if !read_only_dirs_are_enforced() {
        eprintln!("Skipping: read-only directories are not enforced for this user");
        return;
    }
    let surface = FakeSurface::new(Behavior::SubmitAndPin(SUBMITTED.to_string()));
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer({
            let logs = logs.clone();
            move || logs.clone()
        })
        .with_ansi(false)
        .finish();

    let outcome = tracing::subscriber::with_default(subscriber, || {
        Orchestrator::new(&surface, &RecordingBrowser::default())
            .with_options(fast_options())
            .ground(&seeded_request(), false, 5000)
    });

    let outpath = surface.outpath();
    let leaked = outpath.exists();
    set_read_only(&outpath.join(PINNED_DIR), false).expect("unpin result location");
    std::fs::remove_dir_all(&outpath).expect("remove leaked result location");

    let curated = outcome.expect("cleanup failure is not fatal");
    let expected: grounding_curator::CurationState =
        serde_json::from_str(SUBMITTED).expect("parse expected");
    assert_eq!(curated, expected);
    assert!(leaked);
    assert_eq!(surface.terminated(), 1);
    assert!(logs.text().contains("could not clean up result location"));
}
