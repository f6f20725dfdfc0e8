//! Fork simulator module
//!
//! Generates a burn chain of competing block commits into the in-memory
//! backend and runs the commit graph and miner power pipelines over it:
//! - miners bidding with random spends, winners drawn by spend
//! - commits built on a stale parent, producing forks and reorgs
//! - winners that never produce a block, and heights without a snapshot

pub mod config;
pub mod runner;
pub mod stats;

pub use config::{ForkSimConfig, MinerConfig, SortitionConfig};
pub use runner::ForkSimRunner;
pub use stats::{ChainStats, GenerationStats, SimResult};
