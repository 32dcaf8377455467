//! Shared test infrastructure for integration tests.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

/// Scratch directory holding a config, a request, and a scripted surface.
pub struct TestFixture {
    pub dir: TempDir,
}

impl TestFixture {
    pub fn new() -> anyhow::Result<Self> {
        let fixture = Self {
            dir: TempDir::new()?,
        };
        // Pin the config so a developer's own config file cannot leak in.
        fixture.write(
            "config.json",
            r#"{"schema_version": 1, "poll_interval_ms": 25}"#,
        )?;
        Ok(fixture)
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, contents: &str) -> anyhow::Result<PathBuf> {
        let path = self.path(name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Skip if `sh` is unavailable to run scripted surfaces.
    pub fn skip_if_shell_missing(&self) -> bool {
        let missing = Command::new("sh")
            .args(["-c", "exit 0"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_err();
        if missing {
            eprintln!("Skipping: sh not available");
        }
        missing
    }

    /// Run `gcurate ground` against `request` with `surface` as the surface command.
    pub fn ground(&self, request: &Path, surface: &str, extra: &[&str]) -> anyhow::Result<Output> {
        let output = Command::new(env!("CARGO_BIN_EXE_gcurate"))
            .arg("--config")
            .arg(self.path("config.json"))
            .arg("ground")
            .arg("--input")
            .arg(request)
            .args(["--surface", surface, "--no-browser", "--port", "5987"])
            .args(extra)
            .env_remove("RUST_LOG")
            .stdin(Stdio::null())
            .output()?;
        Ok(output)
    }
}
