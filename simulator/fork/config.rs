//! Configuration for the fork simulator

use serde::Deserialize;

/// Configuration for a fork simulation
///
/// Every field has a default, so a YAML file only needs the overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForkSimConfig {
    /// Number of bitcoin blocks to simulate
    pub heights: u64,

    /// Burn height of the first simulated block
    pub start_height: u64,

    /// Random seed (None = generate random)
    pub seed: Option<u64>,

    /// Miner behaviour
    pub miners: MinerConfig,

    /// Sortition outcomes
    pub sortition: SortitionConfig,

    /// Windows the pipeline runs with
    pub commit_window: u64,
    pub miner_window: usize,

    /// Write the rendered graph here if set
    pub dot_output: Option<String>,
}

impl Default for ForkSimConfig {
    fn default() -> Self {
        Self {
            heights: 200,
            start_height: 850_000,
            seed: None,
            miners: MinerConfig::default(),
            sortition: SortitionConfig::default(),
            commit_window: 20,
            miner_window: 144,
            dot_output: None,
        }
    }
}

impl ForkSimConfig {
    /// Get or generate seed
    pub fn resolve_seed(&self) -> u64 {
        self.seed.unwrap_or_else(rand::random)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Number of competing miners
    pub count: usize,

    /// Chance that a miner sends a commit at a given height
    pub commit_probability: f64,

    /// Chance that a commit builds on the tip's parent instead of the tip
    pub stale_parent_probability: f64,

    /// Burn fee per commit in sats (min, max)
    pub spend_range: (u64, u64),

    /// Coinbase per block in micro-STX
    pub coinbase: u64,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            count: 8,
            commit_probability: 0.8,
            stale_parent_probability: 0.05,
            spend_range: (10_000, 200_000),
            coinbase: 1_000_000_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SortitionConfig {
    /// Chance that the winner never produces its block
    pub orphan_probability: f64,

    /// Chance that no snapshot is recorded for a height
    pub missing_snapshot_probability: f64,
}

impl Default for SortitionConfig {
    fn default() -> Self {
        Self {
            orphan_probability: 0.03,
            missing_snapshot_probability: 0.01,
        }
    }
}
