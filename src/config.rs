//! Configuration helpers.
//!
//! Settings come from an optional user config file. Every setting resolves
//! in the same order: explicit CLI flag, config file, environment, built-in
//! default.
use crate::download::DEFAULT_MODELS_URL;
use crate::session::{DEFAULT_POLL_INTERVAL, DEFAULT_PORT};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Environment fallback for the surface command line.
pub const SURFACE_COMMAND_ENV: &str = "GCURATE_SURFACE_COMMAND";
/// Environment fallback for the model download base URL.
pub const MODELS_URL_ENV: &str = "GCURATE_MODELS_URL";
/// Surface program used when nothing else is configured.
pub const DEFAULT_SURFACE_COMMAND: &str = "gcurate-surface";

const APP_DIR: &str = "gcurate";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CuratorConfig {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surface_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models_url: Option<String>,
}

/// Config used when no config file exists.
pub fn default_config() -> CuratorConfig {
    CuratorConfig {
        schema_version: CONFIG_SCHEMA_VERSION,
        surface_command: None,
        port: None,
        poll_interval_ms: None,
        models_dir: None,
        models_url: None,
    }
}

/// `<config dir>/gcurate/config.json`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.json"))
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<CuratorConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: CuratorConfig =
        serde_json::from_slice(&bytes).context("parse gcurate config JSON")?;
    validate_config(&config)?;
    Ok(config)
}

/// Load the config at `explicit`, or the default location when it exists.
///
/// An explicit path must exist; a missing default file yields defaults.
pub fn load_effective_config(explicit: Option<&Path>) -> Result<CuratorConfig> {
    if let Some(path) = explicit {
        return load_config(path);
    }
    match default_config_path() {
        Some(path) if path.is_file() => load_config(&path),
        _ => Ok(default_config()),
    }
}

pub fn validate_config(config: &CuratorConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported gcurate config schema_version {}",
            config.schema_version
        ));
    }
    if config.poll_interval_ms == Some(0) {
        return Err(anyhow!("poll_interval_ms must be greater than zero"));
    }
    for (label, value) in [
        ("surface_command", config.surface_command.as_deref()),
        ("models_url", config.models_url.as_deref()),
    ] {
        if value.is_some_and(|value| value.trim().is_empty()) {
            return Err(anyhow!("{label} must be non-empty when set"));
        }
    }
    if config
        .models_dir
        .as_deref()
        .is_some_and(|dir| dir.as_os_str().is_empty())
    {
        return Err(anyhow!("models_dir must be non-empty when set"));
    }
    Ok(())
}

/// Surface command: flag > config > `GCURATE_SURFACE_COMMAND` > default.
pub fn resolve_surface_command(explicit: Option<&str>, config: &CuratorConfig) -> String {
    first_non_blank([
        explicit.map(str::to_string),
        config.surface_command.clone(),
        std::env::var(SURFACE_COMMAND_ENV).ok(),
    ])
    .unwrap_or_else(|| DEFAULT_SURFACE_COMMAND.to_string())
}

/// Model base URL: config > `GCURATE_MODELS_URL` > default.
pub fn resolve_models_url(config: &CuratorConfig) -> String {
    first_non_blank([
        config.models_url.clone(),
        std::env::var(MODELS_URL_ENV).ok(),
    ])
    .unwrap_or_else(|| DEFAULT_MODELS_URL.to_string())
}

pub fn resolve_port(explicit: Option<u16>, config: &CuratorConfig) -> u16 {
    explicit.or(config.port).unwrap_or(DEFAULT_PORT)
}

pub fn resolve_poll_interval(config: &CuratorConfig) -> Duration {
    config
        .poll_interval_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_POLL_INTERVAL)
}

/// Models directory: config > `<data dir>/gcurate/models`.
pub fn resolve_models_dir(config: &CuratorConfig) -> Result<PathBuf> {
    if let Some(dir) = &config.models_dir {
        return Ok(dir.clone());
    }
    let data_dir = dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(data_dir.join(APP_DIR).join("models"))
}

fn first_non_blank<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
