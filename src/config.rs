use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::matching::{MatchEngine, DEFAULT_LOOKUP_BATCH};
use crate::persistance::database::DEFAULT_STORE_BATCH;
use crate::streaming::AUTO_ANALYSIS_BYTES;

pub const ENV_DATABASE_URL: &str = "AUDIOMARK_DATABASE_URL";
pub const ENV_BIND: &str = "AUDIOMARK_BIND";

/// Service configuration, loadable from a TOML file.
///
/// Missing keys fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_url: String,
    pub bind: String,
    /// Buffered bytes that trigger an automatic streaming analysis.
    pub auto_analysis_bytes: usize,
    /// Unique hashes per catalog lookup.
    pub lookup_batch_size: usize,
    /// Fingerprints per insert transaction.
    pub store_batch_size: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:audiomark.db".into(),
            bind: "127.0.0.1:8000".into(),
            auto_analysis_bytes: AUTO_ANALYSIS_BYTES,
            lookup_batch_size: DEFAULT_LOOKUP_BATCH,
            store_batch_size: DEFAULT_STORE_BATCH,
            log_level: "info".into(),
        }
    }
}

impl Config {
    /// Load from `path` if given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Override values from a key lookup (the process environment in
    /// production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.database_url = url;
        }
        if let Some(bind) = lookup(ENV_BIND) {
            self.bind = bind;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(Error::Config("database_url must not be empty".into()));
        }
        if self.auto_analysis_bytes == 0 {
            return Err(Error::Config("auto_analysis_bytes must be positive".into()));
        }
        if self.lookup_batch_size == 0 || self.store_batch_size == 0 {
            return Err(Error::Config("batch sizes must be positive".into()));
        }
        Ok(())
    }

    pub fn match_engine(&self) -> MatchEngine {
        MatchEngine::new().with_lookup_batch_size(self.lookup_batch_size)
    }
}
