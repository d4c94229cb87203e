//! TOML configuration with environment overrides.
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! runnable configuration rooted at `./data`. Selected values can be
//! overridden through `SRWATCH_*` environment variables, which win over the
//! file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::extract::{ExtractOptions, UnknownConceptPolicy};
use crate::identity::IdentifierSource;
use crate::reader::RetryPolicy;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub inbox: InboxConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Upper bound on pooled connections; workers beyond it wait for one.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a writer waits on SQLite's lock before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/measurements.sqlite")
}
fn default_max_connections() -> u32 {
    5
}
fn default_busy_timeout_ms() -> u64 {
    5000
}

/// Encoding of the documents dropped into the inbox.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentFormat {
    /// DICOM Part 10 files, as written by a storage receiver.
    #[default]
    Dicom,
    /// The DICOM JSON model (PS3.18 Annex F).
    DicomJson,
}

impl DocumentFormat {
    /// Conventional file extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            DocumentFormat::Dicom => "dcm",
            DocumentFormat::DicomJson => "json",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InboxConfig {
    #[serde(default = "default_inbox_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub format: DocumentFormat,
    /// File extension (without the dot) of documents to pick up. Defaults
    /// to the format's conventional extension.
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            path: default_inbox_path(),
            format: DocumentFormat::default(),
            extension: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_inbox_path() -> PathBuf {
    PathBuf::from("./data/inbox")
}
fn default_poll_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    #[serde(default = "default_archive_path")]
    pub path: PathBuf,
    #[serde(default = "default_rejected_path")]
    pub rejected_path: PathBuf,
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

impl InboxConfig {
    /// The configured extension without its dot, or the format's default.
    pub fn extension(&self) -> &str {
        match &self.extension {
            Some(ext) => ext.trim_start_matches('.'),
            None => self.format.extension(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            path: default_archive_path(),
            rejected_path: default_rejected_path(),
            retention_days: default_retention_days(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

fn default_archive_path() -> PathBuf {
    PathBuf::from("./data/archive")
}
fn default_rejected_path() -> PathBuf {
    PathBuf::from("./data/rejected")
}
fn default_retention_days() -> u64 {
    10
}
fn default_purge_interval_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReaderConfig {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_retry_attempts() -> u32 {
    5
}
fn default_retry_delay_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Data-provider label written to every stored row.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub unknown_concepts: UnknownConceptPolicy,
    #[serde(default = "default_identifier_fallbacks")]
    pub identifier_fallbacks: Vec<IdentifierSource>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            workers: default_workers(),
            max_depth: default_max_depth(),
            unknown_concepts: UnknownConceptPolicy::default(),
            identifier_fallbacks: default_identifier_fallbacks(),
        }
    }
}

fn default_provider() -> String {
    "DataproviderHeartEcho".to_string()
}
fn default_workers() -> usize {
    4
}
fn default_max_depth() -> usize {
    64
}
fn default_identifier_fallbacks() -> Vec<IdentifierSource> {
    IdentifierSource::DEFAULT_ORDER.to_vec()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Compatibility uid reported to clients; defaults to the provider label.
    #[serde(default)]
    pub compatibility_uid: Option<String>,
    #[serde(default = "default_compatibility_version")]
    pub compatibility_version: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            compatibility_uid: None,
            compatibility_version: default_compatibility_version(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_compatibility_version() -> i32 {
    1
}

impl Config {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.reader.retry_attempts,
            delay: Duration::from_millis(self.reader.retry_delay_ms),
        }
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            max_depth: self.pipeline.max_depth,
            unknown_concepts: self.pipeline.unknown_concepts,
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.archive.retention_days.saturating_mul(SECS_PER_DAY))
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.archive.purge_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.inbox.poll_interval_ms)
    }

    /// Applies `SRWATCH_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SRWATCH_DB_PATH") {
            self.db.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SRWATCH_INBOX") {
            self.inbox.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SRWATCH_ARCHIVE") {
            self.archive.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SRWATCH_REJECTED") {
            self.archive.rejected_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SRWATCH_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = lookup("SRWATCH_PROVIDER") {
            self.pipeline.provider = v;
        }
        if let Some(v) = lookup("SRWATCH_RETENTION_DAYS") {
            self.archive.retention_days = v
                .parse()
                .with_context(|| format!("SRWATCH_RETENTION_DAYS is not a number: '{}'", v))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.db.max_connections == 0 {
            bail!("db.max_connections must be >= 1");
        }
        if self.reader.retry_attempts == 0 {
            bail!("reader.retry_attempts must be >= 1");
        }
        if self.pipeline.workers == 0 {
            bail!("pipeline.workers must be >= 1");
        }
        if self.pipeline.max_depth == 0 {
            bail!("pipeline.max_depth must be >= 1");
        }
        if self.pipeline.provider.trim().is_empty() {
            bail!("pipeline.provider must not be empty");
        }
        if self.pipeline.identifier_fallbacks.is_empty() {
            bail!("pipeline.identifier_fallbacks must name at least one source");
        }
        if self.inbox.extension().is_empty() {
            bail!("inbox.extension must not be empty");
        }
        if self.inbox.poll_interval_ms == 0 {
            bail!("inbox.poll_interval_ms must be > 0");
        }
        if self.archive.retention_days.checked_mul(SECS_PER_DAY).is_none() {
            bail!(
                "archive.retention_days must be at most {}",
                u64::MAX / SECS_PER_DAY
            );
        }
        if self.archive.purge_interval_secs == 0 {
            bail!("archive.purge_interval_secs must be > 0");
        }
        Ok(())
    }
}

/// Loads configuration from `path` (or defaults when `None`), applies
/// environment overrides, and validates the result.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content).with_context(|| "Failed to parse config file")?
        }
        None => Config::default(),
    };

    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}
