//! Commit Store Module
//!
//! Loads the block commits of a burn height window and builds the bid graph:
//! every commit indexed by txid, grouped by height, with its declared parent
//! resolved from a positional reference to a txid.

use std::collections::BTreeMap;

use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use log::{debug, warn};

use crate::hub_interface::{
    BurnHeight, CommitRow, CommitRowSource, Event, EventSink, PositionalKey, QueryError, Sats,
    Txid, VtxIndex,
};

pub type BidIndex = usize;

/// Default number of burn heights below the newest commit to load
pub const DEFAULT_WINDOW_SPAN: BurnHeight = 20;

/// A block commit as it sits in the graph
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bid {
    pub txid: Txid,
    pub burn_header_hash: String,
    pub sender: String,
    pub sortition_id: String,
    pub block_height: BurnHeight,
    pub vtxindex: VtxIndex,
    pub spend: Sats,
    pub memo: String,
    pub key: PositionalKey,
    pub parent_key: PositionalKey,
    /// txid of the resolved parent commit (None => window-boundary root)
    pub parent: Option<Txid>,
}

impl Bid {
    fn from_row(row: CommitRow) -> Self {
        let key = row.key();
        let parent_key = row.parent_key();
        Self {
            txid: row.txid,
            burn_header_hash: row.burn_header_hash,
            // apparent_sender is stored JSON-quoted
            sender: row.sender.trim_matches('"').to_string(),
            sortition_id: row.sortition_id,
            block_height: row.block_height,
            vtxindex: row.vtxindex,
            spend: row.spend,
            memo: row.memo,
            key,
            parent_key,
            parent: None,
        }
    }
}

/// All commits of one window. Never mutated after `build`.
#[derive(Clone, Debug)]
pub struct BidGraph {
    low: BurnHeight,
    high: BurnHeight,
    // scan order
    bids: Vec<Bid>,
    parents: Vec<Option<BidIndex>>,
    by_txid: HashMap<Txid, BidIndex>,
    by_height: BTreeMap<BurnHeight, Vec<BidIndex>>,
}

impl BidGraph {
    pub fn empty(low: BurnHeight, high: BurnHeight) -> Self {
        Self {
            low,
            high,
            bids: Vec::new(),
            parents: Vec::new(),
            by_txid: HashMap::new(),
            by_height: BTreeMap::new(),
        }
    }

    /// Build the graph from rows of `[low, high]`.
    ///
    /// Parent resolution runs in two passes so that it only depends on the
    /// order of `rows`:
    /// 1. register every commit's position, first claimant wins
    /// 2. look each declared parent position up in the finished index; the
    ///    parent must come earlier in scan order than the child
    pub fn build(
        low: BurnHeight,
        high: BurnHeight,
        mut rows: Vec<CommitRow>,
        events: &mut dyn EventSink,
    ) -> Self {
        let mut graph = Self::empty(low, high);

        // sources deliver ascending heights; a stable sort keeps their
        // intra-height order and guarantees parents sort first
        rows.sort_by_key(|r| r.block_height);

        for row in rows {
            match graph.by_txid.entry(row.txid.clone()) {
                Entry::Occupied(_) => {
                    warn!("Dropping duplicate block commit {}", row.txid);
                    events.log(Event::DuplicateBid { txid: row.txid });
                }
                Entry::Vacant(v) => {
                    v.insert(graph.bids.len());
                    graph.bids.push(Bid::from_row(row));
                }
            }
        }

        // pass 1: position -> scan index
        let mut positions: HashMap<PositionalKey, BidIndex> = HashMap::new();
        for (idx, bid) in graph.bids.iter().enumerate() {
            match positions.entry(bid.key) {
                Entry::Occupied(o) => {
                    let kept = &graph.bids[*o.get()].txid;
                    warn!(
                        "Commits {} and {} both claim position ({}, {}); keeping {}",
                        kept, bid.txid, bid.key.height, bid.key.vtxindex, kept
                    );
                    events.log(Event::PositionalKeyCollision {
                        key: bid.key,
                        kept: kept.clone(),
                        ignored: bid.txid.clone(),
                    });
                }
                Entry::Vacant(v) => {
                    v.insert(idx);
                }
            }
        }

        // pass 2: resolve declared parents
        graph.parents = graph
            .bids
            .iter()
            .enumerate()
            .map(|(idx, bid)| {
                positions
                    .get(&bid.parent_key)
                    .copied()
                    .filter(|parent| *parent < idx)
            })
            .collect();

        for (idx, parent) in graph.parents.iter().enumerate() {
            if let Some(parent) = parent {
                graph.bids[idx].parent = Some(graph.bids[*parent].txid.clone());
            }
            graph
                .by_height
                .entry(graph.bids[idx].block_height)
                .or_default()
                .push(idx);
        }

        debug!(
            "Built bid graph for [{}, {}]: {} commits over {} heights",
            low,
            high,
            graph.bids.len(),
            graph.by_height.len()
        );

        graph
    }

    /// Inclusive height range this graph was loaded for
    pub fn window(&self) -> (BurnHeight, BurnHeight) {
        (self.low, self.high)
    }

    pub fn len(&self) -> usize {
        self.bids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty()
    }

    pub fn bids(&self) -> &[Bid] {
        &self.bids
    }

    pub fn bid(&self, idx: BidIndex) -> &Bid {
        &self.bids[idx]
    }

    pub fn index_of(&self, txid: &str) -> Option<BidIndex> {
        self.by_txid.get(txid).copied()
    }

    pub fn get(&self, txid: &str) -> Option<&Bid> {
        self.index_of(txid).map(|idx| &self.bids[idx])
    }

    pub fn parent_of(&self, idx: BidIndex) -> Option<BidIndex> {
        self.parents[idx]
    }

    /// Commits at `height`, in scan order
    pub fn at_height(&self, height: BurnHeight) -> &[BidIndex] {
        self.by_height
            .get(&height)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Heights that have at least one commit, ascending
    pub fn heights(&self) -> impl Iterator<Item = BurnHeight> + '_ {
        self.by_height.keys().copied()
    }
}

/// Loads bid graphs from a commit row source
#[derive(Debug, Clone)]
pub struct CommitStore {
    window_span: BurnHeight,
}

impl Default for CommitStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SPAN)
    }
}

impl CommitStore {
    pub fn new(window_span: BurnHeight) -> Self {
        Self { window_span }
    }

    /// `(newest - span, newest)`, or None if no commits are recorded
    pub fn window(
        &self,
        source: &dyn CommitRowSource,
    ) -> Result<Option<(BurnHeight, BurnHeight)>, QueryError> {
        Ok(source
            .max_height()?
            .map(|high| (high.saturating_sub(self.window_span), high)))
    }

    /// Load every commit in `[low, high]`.
    ///
    /// A read failure is returned as is; no partial graph is produced.
    pub fn load(
        &self,
        source: &dyn CommitRowSource,
        low: BurnHeight,
        high: BurnHeight,
        events: &mut dyn EventSink,
    ) -> Result<BidGraph, QueryError> {
        let rows = source.commit_rows(low, high)?;
        Ok(BidGraph::build(low, high, rows, events))
    }
}
