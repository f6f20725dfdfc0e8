//! Single-invocation pipelines
//!
//! Each task runs one computation to completion against a backend and either
//! returns a complete result or nothing. Query failures are logged here and
//! never reach the caller as partial output; the `build_*` variants return the
//! error instead, for callers that want to handle it themselves.

use log::{debug, error, info};

use crate::hub_address_map::AddressMap;
use crate::hub_commit_store::CommitStore;
use crate::hub_dot;
use crate::hub_fee_aggregator::{FeeAggregator, FeeSummary};
use crate::hub_fork_resolver::{AnnotatedGraph, CanonicalChain, ForkResolver};
use crate::hub_interface::{
    AddressPairSource, AncestorChainSource, BurnHeight, ChainHeadOracle, CommitRowSource,
    EventSink, QueryError, RewardLookup, WinnerOracle,
};
use crate::hub_miner_power::{MinerPowerAggregator, PerformanceRecord};

/// Everything one commit graph run produces
#[derive(Debug, Clone)]
pub struct CommitGraphReport {
    pub window: (BurnHeight, BurnHeight),
    pub annotated: AnnotatedGraph,
    pub chain: CanonicalChain,
    pub fees: FeeSummary,
    pub dot: String,
}

/// Window, load, resolve, aggregate fees and render.
///
/// Returns `Ok(None)` when the source has no commits at all.
pub fn build_commit_graph<B>(
    backend: &B,
    store: &CommitStore,
    events: &mut dyn EventSink,
) -> Result<Option<CommitGraphReport>, QueryError>
where
    B: CommitRowSource + WinnerOracle + RewardLookup,
{
    let Some((low, high)) = store.window(backend)? else {
        info!("No block commits recorded yet");
        return Ok(None);
    };
    debug!("Building commit graph for heights {}..={}", low, high);

    let graph = store.load(backend, low, high, events)?;
    let fees = FeeAggregator::new().aggregate(&graph, events);
    let (annotated, chain) = ForkResolver::new().resolve(graph, backend, backend, events)?;
    let dot = hub_dot::render(&annotated, &fees);

    info!(
        "Commit graph {}..={}: {} commits, canonical chain of {}",
        low,
        high,
        annotated.graph().len(),
        chain.len()
    );

    Ok(Some(CommitGraphReport {
        window: (low, high),
        annotated,
        chain,
        fees,
        dot,
    }))
}

pub fn commit_graph_task<B>(
    backend: &B,
    store: &CommitStore,
    events: &mut dyn EventSink,
) -> Option<CommitGraphReport>
where
    B: CommitRowSource + WinnerOracle + RewardLookup,
{
    match build_commit_graph(backend, store, events) {
        Ok(report) => report,
        Err(e) => {
            error!("Commit graph task failed: {}", e);
            None
        }
    }
}

/// Miner power over the last `window_size` adopted blocks.
///
/// Ancestors mined at or below `newest commit height - window_size` are left
/// out, so a stalled chain does not count blocks from long ago.
pub fn build_miner_power<B>(
    backend: &B,
    window_size: usize,
    addresses: &AddressMap,
) -> Result<Vec<PerformanceRecord>, QueryError>
where
    B: CommitRowSource + ChainHeadOracle + AncestorChainSource,
{
    let mut aggregator = MinerPowerAggregator::new(window_size);
    if let Some(newest) = backend.max_height()? {
        aggregator = aggregator.with_min_burn_height(newest.saturating_sub(window_size as BurnHeight));
    }
    aggregator.compute(backend, backend, addresses)
}

pub fn miner_power_task<B>(
    backend: &B,
    window_size: usize,
    addresses: &AddressMap,
) -> Option<Vec<PerformanceRecord>>
where
    B: CommitRowSource + ChainHeadOracle + AncestorChainSource,
{
    match build_miner_power(backend, window_size, addresses) {
        Ok(records) => Some(records),
        Err(e) => {
            error!("Miner power task failed: {}", e);
            None
        }
    }
}

/// Refresh the address table; on failure the previous table stays in place
pub fn address_map_task(source: &dyn AddressPairSource, addresses: &AddressMap, limit: usize) -> bool {
    match addresses.refresh(source, limit) {
        Ok(_) => true,
        Err(e) => {
            error!("Miner address map refresh failed: {}", e);
            false
        }
    }
}
