//! # hubRust - Stacks sortition hub
//!
//! Reconstructs the block commit competition of a Stacks node from its local
//! databases: which miners bid at each bitcoin height, which bids built on
//! which, who won each sortition and which branch the chain actually adopted.
//! Separately, it computes per-miner statistics over the last day of blocks.
//!
//! ## Core Components
//!
//! - **CommitStore**: loads a window of block commits and resolves parents by position
//! - **ForkResolver**: marks winners, fork heads and the canonical chain
//! - **FeeAggregator**: sortition spend totals with an integrity check
//! - **MinerPowerAggregator**: wins, spend, rewards and win rate per miner
//! - **AddressMap**: stacks recipient to bitcoin address table, swapped on refresh
//!
//! ## Usage
//!
//! All computations read through the source traits in `hub_interface`, so the
//! same code runs against a node's data dir or the in-memory backend:
//!
//! ```no_run
//! use hub_rust::hub_commit_store::CommitStore;
//! use hub_rust::hub_interface::NoOpSink;
//! use hub_rust::hub_memory_backend::MemoryBackend;
//! use hub_rust::hub_tasks::commit_graph_task;
//!
//! let backend = MemoryBackend::new();
//! if let Some(report) = commit_graph_task(&backend, &CommitStore::default(), &mut NoOpSink) {
//!     println!("{}", report.dot);
//! }
//! ```
//!
//! ## Simulation
//!
//! `simulator/fork_sim.rs` generates competing commits with reorgs into the
//! in-memory backend and runs the whole pipeline over them.

// Core modules
pub mod hub_interface;
pub mod hub_commit_store;
pub mod hub_fork_resolver;
pub mod hub_fee_aggregator;
pub mod hub_miner_power;
pub mod hub_address_map;

// Output and orchestration
pub mod hub_dot;
pub mod hub_config;
pub mod hub_tasks;

// Storage backends
pub mod hub_memory_backend;

#[cfg(feature = "sqlite-backend")]
pub mod hub_sqlite_backend;

// Re-export commonly used types
pub use hub_address_map::AddressMap;
pub use hub_commit_store::{Bid, BidGraph, CommitStore};
pub use hub_config::{HubConfig, HubConfigError};
pub use hub_fee_aggregator::{FeeAggregator, FeeSummary};
pub use hub_fork_resolver::{AnnotatedGraph, BidStatus, CanonicalChain, ForkResolver};
pub use hub_interface::{Event, EventSink, NoOpSink, QueryError};
pub use hub_miner_power::{MinerPowerAggregator, PerformanceRecord};
