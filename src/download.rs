//! Model download utility.
//!
//! Fetches the published disambiguation models into a local cache
//! directory. The manifest at `<base>/s3_models.json` maps shortforms to
//! model names; each model is a directory of three files under
//! `<base>/Models/<name>/`.
use crate::util::tmp_sibling;
use anyhow::{anyhow, Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

/// Public bucket the models are published to.
pub const DEFAULT_MODELS_URL: &str = "https://adeft.s3.amazonaws.com";

const MANIFEST_FILE: &str = "s3_models.json";
const MODEL_FILE_SUFFIXES: [&str; 3] = ["_model.gz", "_grounding_dict.json", "_names.json"];
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Streams the body at a URL into a writer.
pub trait Fetcher {
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> Result<u64>;
}

/// Blocking HTTP fetcher.
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(HTTP_TIMEOUT))
            .build()
            .into();
        Self { agent }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> Result<u64> {
        let response = self
            .agent
            .get(url)
            .call()
            .with_context(|| format!("GET {url}"))?;
        let mut reader = response.into_body().into_reader();
        std::io::copy(&mut reader, dest).with_context(|| format!("download {url}"))
    }
}

/// What a download run did, per model name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub downloaded: Vec<String>,
    pub skipped: Vec<String>,
}

/// Download every published model into `models_dir`.
///
/// The directory is created if needed. Models already present are kept
/// unless `update` is set, in which case they are fetched again.
pub fn download_models(
    fetcher: &dyn Fetcher,
    models_dir: &Path,
    base_url: &str,
    update: bool,
) -> Result<DownloadReport> {
    fs::create_dir_all(models_dir)
        .with_context(|| format!("create models dir {}", models_dir.display()))?;
    let base_url = base_url.trim_end_matches('/');

    let model_names = fetch_manifest(fetcher, base_url)?;
    let mut report = DownloadReport::default();
    for name in model_names {
        validate_model_name(&name)?;
        let model_dir = models_dir.join(&name);
        if model_dir.is_dir() && !update {
            tracing::debug!(model = %name, "model already cached");
            report.skipped.push(name);
            continue;
        }
        fs::create_dir_all(&model_dir)
            .with_context(|| format!("create {}", model_dir.display()))?;

        let start = Instant::now();
        let mut bytes = 0;
        for suffix in MODEL_FILE_SUFFIXES {
            let file_name = format!("{name}{suffix}");
            let url = format!("{base_url}/Models/{name}/{file_name}");
            bytes += download_file(fetcher, &url, &model_dir.join(&file_name))?;
        }
        tracing::info!(
            model = %name,
            bytes,
            elapsed_ms = start.elapsed().as_millis(),
            "model downloaded"
        );
        report.downloaded.push(name);
    }
    Ok(report)
}

fn fetch_manifest(fetcher: &dyn Fetcher, base_url: &str) -> Result<BTreeSet<String>> {
    let url = format!("{base_url}/{MANIFEST_FILE}");
    let mut body = Vec::new();
    fetcher.fetch(&url, &mut body)?;
    let manifest: BTreeMap<String, String> =
        serde_json::from_slice(&body).with_context(|| format!("parse model manifest {url}"))?;
    Ok(manifest.into_values().collect())
}

fn download_file(fetcher: &dyn Fetcher, url: &str, dest: &Path) -> Result<u64> {
    let tmp_path = tmp_sibling(dest);
    let result = (|| -> Result<u64> {
        let file =
            fs::File::create(&tmp_path).with_context(|| format!("create {}", tmp_path.display()))?;
        let mut writer = BufWriter::new(file);
        let bytes = fetcher.fetch(url, &mut writer)?;
        writer
            .flush()
            .with_context(|| format!("flush {}", tmp_path.display()))?;
        fs::rename(&tmp_path, dest).with_context(|| format!("publish {}", dest.display()))?;
        Ok(bytes)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn validate_model_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed != name
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(anyhow!("model manifest entry {name:?} is not a valid model name"));
    }
    Ok(())
}
