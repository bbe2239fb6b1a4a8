//! Configuration file for journaltail
//!
//! Read from TOML. Every key is optional:
//!
//! ```toml
//! journal_dir = "/var/log/journal"
//!
//! [tail]
//! default_namespace = "openfaas-fn"
//! lookback_secs = 300
//! poll_interval_ms = 100
//! channel_capacity = 100
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use journaltail_logs::TailConfig;

/// Export directory used when neither the config nor `--dir` name one
const DEFAULT_JOURNAL_DIR: &str = "/var/log/journal";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory of `*.json` journal exports used when `--dir` is not given.
    /// A directory holding only binary journal files is refused at open.
    pub journal_dir: PathBuf,

    /// Query tuning
    pub tail: TailConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            journal_dir: PathBuf::from(DEFAULT_JOURNAL_DIR),
            tail: TailConfig::default(),
        }
    }
}

impl Config {
    /// Load the config file, or the defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
