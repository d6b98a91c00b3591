//! TOML configuration for wdlci.
//!
//! A layered configuration model: compiled-in defaults that mirror the CI
//! layout of the workflow repository, an optional TOML file that overrides
//! any subset of them, and the server address resolution chain
//! (CLI argument, config file, cromshell config, default).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cromwell::RetryPolicy;

/// Environment variable naming a config file to load.
pub const CONFIG_ENV: &str = "WDLCI_CONFIG";

/// Config file picked up from the working directory when nothing else is set.
pub const LOCAL_CONFIG_FILE: &str = "wdlci.toml";

/// Server address used when nothing else resolves.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for a CI run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CiConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub compare: CompareConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CiConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded wdlci configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path in the `WDLCI_CONFIG` environment variable.
    /// 2. `./wdlci.toml`.
    /// 3. Compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "WDLCI_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local_path = Path::new(LOCAL_CONFIG_FILE);
        if local_path.exists() {
            match Self::load(local_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local_path.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Resolve the execution server address.
    ///
    /// `cli_override` (the positional argument) wins, then `server.url`, then
    /// the first line of the cromshell config file, then the default.
    pub fn resolve_server_url(&self, cli_override: Option<&str>) -> String {
        if let Some(url) = cli_override {
            return normalize_url(url);
        }
        if let Some(url) = &self.server.url {
            return normalize_url(url);
        }
        if let Some(path) = self.server.cromshell_config_path() {
            match read_first_line(&path) {
                Ok(Some(url)) => return normalize_url(&url),
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not read cromshell config");
                }
            }
        }
        DEFAULT_SERVER_URL.to_string()
    }
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Returns the first line of `path`, or `None` if the file does not exist or is empty.
fn read_first_line(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .next()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string))
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Execution server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Explicit server address. Overrides the cromshell config file.
    pub url: Option<String>,
    /// Cromshell config file whose first line is the server address.
    /// A leading `~/` expands to `$HOME`.
    pub cromshell_config: String,
    /// Submission attempts before the server is declared unreachable.
    pub submit_attempts: u32,
    /// Pause between submission attempts (seconds).
    pub submit_backoff_sec: u64,
    /// Per-request timeout (seconds).
    pub request_timeout_sec: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: None,
            cromshell_config: "~/.cromshell/cromwell_server.config".to_string(),
            submit_attempts: 3,
            submit_backoff_sec: 5,
            request_timeout_sec: 300,
        }
    }
}

impl ServerConfig {
    pub fn cromshell_config_path(&self) -> Option<PathBuf> {
        expand_home(&self.cromshell_config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.submit_attempts.max(1),
            backoff: Duration::from_secs(self.submit_backoff_sec),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }
}

fn expand_home(path: &str) -> Option<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => std::env::var_os("HOME").map(|home| PathBuf::from(home).join(rest)),
        None => Some(PathBuf::from(path)),
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Local repository layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding one `*.json` input descriptor per test.
    pub test_inputs_dir: PathBuf,
    /// Flat list of disabled test identifiers.
    pub disabled_tests: PathBuf,
    /// Root of the workflow definition tree.
    pub workflows_dir: PathBuf,
    /// Dependency archive submitted alongside every workflow.
    pub dependencies_archive: PathBuf,
    /// Rebuild the dependency archive before dispatching.
    pub bundle_dependencies: bool,
    /// Execution options with call caching enabled.
    pub caching_options: PathBuf,
    /// Execution options with call caching disabled (download tests).
    pub fresh_options: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            test_inputs_dir: PathBuf::from("test/test_json"),
            disabled_tests: PathBuf::from("test/test_json/all_disabled_tests.txt"),
            workflows_dir: PathBuf::from("wdl"),
            dependencies_archive: PathBuf::from("wdl/lr_wdls.zip"),
            bundle_dependencies: true,
            caching_options: PathBuf::from("resources/workflow_options/ci.json"),
            fresh_options: PathBuf::from("resources/workflow_options/ci.fresh.run.json"),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Object storage layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Bucket the workflows write their final outputs to.
    pub results_bucket: String,
    /// Bucket holding reference outputs and uploaded metadata.
    pub resources_bucket: String,
    /// Reference output prefix; `{test}` is replaced by the test identifier.
    pub reference_prefix: String,
    /// Prefix for uploaded execution metadata.
    pub metadata_prefix: String,
    /// Object storage API endpoint.
    pub endpoint: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            results_bucket: "broad-dsp-lrma-ci".to_string(),
            resources_bucket: "broad-dsp-lrma-ci-resources".to_string(),
            reference_prefix: "test_data/{test}/output_data".to_string(),
            metadata_prefix: "metadata".to_string(),
            endpoint: "https://storage.googleapis.com".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn reference_prefix_for(&self, test_id: &str) -> String {
        self.reference_prefix.replace("{test}", test_id)
    }
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Fixed pause before each status pass (seconds).
    pub interval_sec: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_sec: 60 }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_sec)
    }
}

// ---------------------------------------------------------------------------
// Compare
// ---------------------------------------------------------------------------

/// Output comparison settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareConfig {
    /// File name suffixes that never count as mismatches.
    pub exempt_suffixes: Vec<String>,
    /// Sequence files pass when the mash distance is below this value.
    pub mash_max_distance: f64,
    /// Lines containing this marker are dropped before diffing gzip text.
    pub volatile_header: String,
    /// Count files with no registered comparator as mismatches.
    pub unverifiable_is_mismatch: bool,
    pub mash_path: String,
    pub samtools_path: String,
    pub pdftotext_path: String,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            exempt_suffixes: vec![
                ".png".to_string(),
                ".tbi".to_string(),
                "sequencing_summary.txt".to_string(),
            ],
            mash_max_distance: 1.0,
            volatile_header: "fileDate".to_string(),
            unverifiable_is_mismatch: false,
            mash_path: "mash".to_string(),
            samtools_path: "samtools".to_string(),
            pdftotext_path: "pdftotext".to_string(),
        }
    }
}

impl CompareConfig {
    pub fn is_exempt(&self, basename: &str) -> bool {
        self.exempt_suffixes.iter().any(|s| basename.ends_with(s.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// `"pretty"` or `"json"`.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
