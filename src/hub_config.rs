//! Hub configuration
//!
//! Loaded from a YAML file. Every field except `data_dir` has a default, so a
//! minimal config is a single line:
//!
//! ```yaml
//! data_dir: /var/lib/stacks/mainnet
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::LevelFilter;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hub_address_map::DEFAULT_ADDRESS_SCAN_LIMIT;
use crate::hub_commit_store::DEFAULT_WINDOW_SPAN;
use crate::hub_interface::BurnHeight;
use crate::hub_miner_power::DEFAULT_MINER_WINDOW;

/// Sortition database, relative to the node's data dir
pub const SORTITION_DB: &str = "burnchain/sortition/marf.sqlite";
/// Chainstate index database, relative to the node's data dir
pub const CHAINSTATE_DB: &str = "chainstate/vm/index.sqlite";

#[derive(Debug, Error)]
pub enum HubConfigError {
    #[error("unable to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("data directory does not exist: {0}")]
    MissingDataDir(PathBuf),

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Data dir of the stacks node whose databases are read
    pub data_dir: PathBuf,

    /// Burn heights below the newest commit covered by the fork graph
    #[serde(default = "default_commit_window")]
    pub commit_window: BurnHeight,

    /// Adopted-chain blocks covered by miner power
    #[serde(default = "default_miner_window")]
    pub miner_window: usize,

    /// Recent blocks scanned when refreshing the address table
    #[serde(default = "default_address_scan_limit")]
    pub address_scan_limit: usize,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Where to write the DOT graph; stdout if unset
    #[serde(default)]
    pub dot_output: Option<PathBuf>,

    /// Where to write the miner power JSON; stdout if unset
    #[serde(default)]
    pub miner_power_output: Option<PathBuf>,
}

fn default_commit_window() -> BurnHeight {
    DEFAULT_WINDOW_SPAN
}

fn default_miner_window() -> usize {
    DEFAULT_MINER_WINDOW
}

fn default_address_scan_limit() -> usize {
    DEFAULT_ADDRESS_SCAN_LIMIT
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            commit_window: default_commit_window(),
            miner_window: default_miner_window(),
            address_scan_limit: default_address_scan_limit(),
            log_level: default_log_level(),
            dot_output: None,
            miner_power_output: None,
        }
    }
}

impl HubConfig {
    pub fn load(path: &Path) -> Result<Self, HubConfigError> {
        let content = fs::read_to_string(path).map_err(|source| HubConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, HubConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Check the data dir exists and the log level parses
    pub fn validate(&self) -> Result<(), HubConfigError> {
        if !self.data_dir.is_dir() {
            return Err(HubConfigError::MissingDataDir(self.data_dir.clone()));
        }
        self.log_level_filter()?;
        Ok(())
    }

    pub fn log_level_filter(&self) -> Result<LevelFilter, HubConfigError> {
        LevelFilter::from_str(&self.log_level)
            .map_err(|_| HubConfigError::InvalidLogLevel(self.log_level.clone()))
    }

    pub fn sortition_db_path(&self) -> PathBuf {
        self.data_dir.join(SORTITION_DB)
    }

    pub fn chainstate_db_path(&self) -> PathBuf {
        self.data_dir.join(CHAINSTATE_DB)
    }
}
