//! Fork Resolver Module
//!
//! Annotates a bid graph with the outcome of each sortition and with the
//! canonical chain. Runs in three stages over an immutable `BidGraph`:
//!
//! 1. per-height pass: mark the declared winner of every height (`won`) and
//!    track which winners have not been built upon yet (`potential_tip`)
//! 2. enrichment: best-effort reward and fee lookups for won commits
//! 3. canonical pass: walk parent links back from the winner at the top of the
//!    window, marking `canonical`, `tip` and `next_tip`
//!
//! The canonical pass is authoritative. After a reorg a commit can be
//! canonical without having `won`, while its sibling keeps `won`; both flags
//! are kept so the renderer can show the difference.

use log::{debug, info, warn};

use crate::hub_commit_store::{Bid, BidGraph, BidIndex};
use crate::hub_interface::{
    BurnHeight, Event, EventSink, MicroStx, QueryError, RewardLookup, SortitionWinner,
    StacksHeight, Txid, WinnerOracle,
};

/// Derived state of one commit
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BidStatus {
    pub won: bool,
    pub canonical: bool,
    pub tip: bool,
    pub potential_tip: bool,
    pub next_tip: bool,

    pub stacks_height: StacksHeight,
    pub block_hash: String,
    pub coinbase_earned: MicroStx,
    pub fees_earned: MicroStx,

    // consensus hash of the sortition this commit won
    consensus_hash: Option<String>,
}

/// A bid graph plus the status of each of its commits
#[derive(Clone, Debug)]
pub struct AnnotatedGraph {
    graph: BidGraph,
    status: Vec<BidStatus>,
}

impl AnnotatedGraph {
    pub fn new(graph: BidGraph) -> Self {
        let status = vec![BidStatus::default(); graph.len()];
        Self { graph, status }
    }

    pub fn graph(&self) -> &BidGraph {
        &self.graph
    }

    pub fn status(&self, idx: BidIndex) -> &BidStatus {
        &self.status[idx]
    }

    pub fn status_of(&self, txid: &str) -> Option<&BidStatus> {
        self.graph.index_of(txid).map(|idx| &self.status[idx])
    }

    /// Commits in scan order with their status
    pub fn iter(&self) -> impl Iterator<Item = (&Bid, &BidStatus)> {
        self.graph.bids().iter().zip(self.status.iter())
    }
}

/// Commits on the adopted chain, newest first
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CanonicalChain {
    pub txids: Vec<Txid>,
}

impl CanonicalChain {
    pub fn tip(&self) -> Option<&Txid> {
        self.txids.first()
    }

    pub fn len(&self) -> usize {
        self.txids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txids.is_empty()
    }
}

#[derive(Debug, Default, Clone)]
pub struct ForkResolver;

impl ForkResolver {
    pub fn new() -> Self {
        Self
    }

    /// Run all three stages. Only a winner oracle failure aborts.
    pub fn resolve(
        &self,
        graph: BidGraph,
        winners: &dyn WinnerOracle,
        rewards: &dyn RewardLookup,
        events: &mut dyn EventSink,
    ) -> Result<(AnnotatedGraph, CanonicalChain), QueryError> {
        let mut annotated = AnnotatedGraph::new(graph);
        self.process_winning_commits(&mut annotated, winners, events)?;
        self.enrich(&mut annotated, rewards, events);
        let chain = self.process_canonical_tip(&mut annotated, winners)?;
        Ok((annotated, chain))
    }

    /// Per-height pass over the whole window, ascending
    pub fn process_winning_commits(
        &self,
        annotated: &mut AnnotatedGraph,
        winners: &dyn WinnerOracle,
        events: &mut dyn EventSink,
    ) -> Result<(), QueryError> {
        let (low, high) = annotated.graph.window();
        for height in low..=high {
            let winner = winners.winner_at(height)?;
            self.process_height(annotated, height, winner.as_ref(), events);
        }
        Ok(())
    }

    /// Apply the sortition outcome of a single height
    pub fn process_height(
        &self,
        annotated: &mut AnnotatedGraph,
        height: BurnHeight,
        winner: Option<&SortitionWinner>,
        events: &mut dyn EventSink,
    ) {
        let AnnotatedGraph { graph, status } = annotated;

        let bids = graph.at_height(height);
        if bids.is_empty() {
            info!("No block commits for block height {}", height);
            events.log(Event::HeightWithoutBids { height });
            return;
        }

        let Some(winner) = winner else {
            warn!("No sortition snapshot for block height {}", height);
            events.log(Event::WinnerMissing { height });
            return;
        };

        let mut matched = false;
        for &idx in bids {
            status[idx].stacks_height = winner.stacks_height;
            if graph.bid(idx).txid != winner.winning_txid {
                continue;
            }
            matched = true;

            let s = &mut status[idx];
            s.won = true;
            s.potential_tip = true;
            s.consensus_hash = Some(winner.consensus_hash.clone());

            // the winner builds on its parent, so the parent is no longer a fork head
            if let Some(parent) = graph.parent_of(idx) {
                status[parent].potential_tip = false;
            }
        }

        if !matched {
            debug!(
                "Winner {} of height {} is not among its commits",
                winner.winning_txid, height
            );
        }
    }

    /// Fill in block hash, coinbase and tenure fees of won commits.
    ///
    /// Lookups are best effort: a miss or a failure leaves the field at zero.
    pub fn enrich(
        &self,
        annotated: &mut AnnotatedGraph,
        rewards: &dyn RewardLookup,
        events: &mut dyn EventSink,
    ) {
        let AnnotatedGraph { graph, status } = annotated;

        for (bid, s) in graph.bids().iter().zip(status.iter_mut()) {
            if !s.won || s.stacks_height == 0 {
                continue;
            }

            if let Some(consensus_hash) = &s.consensus_hash {
                match rewards.block_reward(consensus_hash) {
                    Ok(Some(reward)) => {
                        s.block_hash = reward.block_hash;
                        s.coinbase_earned = reward.coinbase;
                    }
                    Ok(None) => {
                        debug!("No coinbase for consensus hash {}", consensus_hash);
                        events.log(enrichment_miss(bid, "coinbase"));
                    }
                    Err(e) => {
                        warn!("Error fetching coinbase for {}: {}", consensus_hash, e);
                        events.log(enrichment_miss(bid, "coinbase"));
                    }
                }
            }

            match rewards.tenure_fees(bid.block_height) {
                Ok(Some(fees)) => s.fees_earned = fees,
                Ok(None) => {
                    debug!("No tenure_tx_fees for block {}", bid.block_height);
                    events.log(enrichment_miss(bid, "fees"));
                }
                Err(e) => {
                    warn!("Error fetching tenure fees for {}: {}", bid.block_height, e);
                    events.log(enrichment_miss(bid, "fees"));
                }
            }
        }
    }

    /// Canonical pass: walk back from the winner at the top of the window.
    ///
    /// Clears earlier canonical/tip/next_tip marks first, so running it again
    /// over the same graph gives the same result.
    pub fn process_canonical_tip(
        &self,
        annotated: &mut AnnotatedGraph,
        winners: &dyn WinnerOracle,
    ) -> Result<CanonicalChain, QueryError> {
        let (_, high) = annotated.graph.window();
        let head = winners.winner_at(high)?;

        let AnnotatedGraph { graph, status } = annotated;
        for s in status.iter_mut() {
            s.canonical = false;
            s.tip = false;
            s.next_tip = false;
        }

        let mut chain = CanonicalChain::default();
        let Some(head) = head else {
            warn!("No sortition snapshot at top of window {}", high);
            return Ok(chain);
        };

        // parents always precede children in scan order, so this terminates
        let mut cursor = graph.index_of(&head.winning_txid);
        let mut child: Option<BidIndex> = None;
        while let Some(idx) = cursor {
            let s = &mut status[idx];
            s.canonical = true;
            if child.is_none() {
                s.tip = true;
            }
            if let Some(child) = child {
                if graph.bid(child).block_height == graph.bid(idx).block_height + 1 {
                    s.next_tip = true;
                }
            }
            chain.txids.push(graph.bid(idx).txid.clone());

            child = Some(idx);
            cursor = graph.parent_of(idx);
        }

        if chain.is_empty() {
            warn!(
                "Canonical tip {} at height {} is not in the window",
                head.winning_txid, high
            );
        } else {
            debug!("Canonical chain has {} commits", chain.len());
        }

        Ok(chain)
    }
}

fn enrichment_miss(bid: &Bid, field: &'static str) -> Event {
    Event::EnrichmentMiss {
        txid: bid.txid.clone(),
        height: bid.block_height,
        field,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub_commit_store::BidGraph;
    use crate::hub_interface::{
        BlockReward, CollectingSink, CommitRow, CommitRowSource, NoOpSink, PositionalKey,
        VtxIndex,
    };
    use crate::hub_memory_backend::MemoryBackend;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::cell::Cell;

    fn commit(txid: &str, height: BurnHeight, vtx: VtxIndex, parent: (BurnHeight, VtxIndex)) -> CommitRow {
        CommitRow::new(
            txid,
            PositionalKey::new(height, vtx),
            PositionalKey::new(parent.0, parent.1),
        )
    }

    fn build(backend: &MemoryBackend, low: BurnHeight, high: BurnHeight) -> BidGraph {
        let rows = backend.commit_rows(low, high).unwrap();
        BidGraph::build(low, high, rows, &mut NoOpSink)
    }

    /// One commit per height, each building on the previous one
    fn linear_backend() -> MemoryBackend {
        let mut backend = MemoryBackend::new();
        for h in 1..=5u64 {
            let txid = format!("c{}", h);
            backend.add_commit(commit(&txid, h, 1, (h - 1, 1)));
            backend.set_winner(h, &txid, 100 + h, &format!("ch{}", h));
        }
        backend
    }

    /// P at 10, siblings A and B at 11, C on top of B at 12
    fn fork_backend() -> MemoryBackend {
        let mut backend = MemoryBackend::new();
        backend.add_commit(commit("P", 10, 1, (9, 1)));
        backend.add_commit(commit("A", 11, 1, (10, 1)));
        backend.add_commit(commit("B", 11, 2, (10, 1)));
        backend.add_commit(commit("C", 12, 1, (11, 2)));
        backend.set_winner(10, "P", 50, "ch10");
        backend.set_winner(11, "A", 51, "ch11");
        backend
    }

    struct FailingOracle;

    impl WinnerOracle for FailingOracle {
        fn winner_at(&self, _height: BurnHeight) -> Result<Option<SortitionWinner>, QueryError> {
            Err(QueryError::Storage {
                reason: "no such table: snapshots".into(),
            })
        }
    }

    struct CountingRewards {
        calls: Cell<usize>,
    }

    impl RewardLookup for CountingRewards {
        fn block_reward(&self, _consensus_hash: &str) -> Result<Option<BlockReward>, QueryError> {
            self.calls.set(self.calls.get() + 1);
            Err(QueryError::Storage {
                reason: "database is locked".into(),
            })
        }

        fn tenure_fees(&self, _height: BurnHeight) -> Result<Option<MicroStx>, QueryError> {
            self.calls.set(self.calls.get() + 1);
            Ok(None)
        }
    }

    #[test]
    fn test_linear_chain() {
        let backend = linear_backend();
        let (annotated, chain) = ForkResolver::new()
            .resolve(build(&backend, 1, 5), &backend, &backend, &mut NoOpSink)
            .unwrap();

        assert_eq!(chain.txids, vec!["c5", "c4", "c3", "c2", "c1"]);
        for h in 1..=5u64 {
            let s = annotated.status_of(&format!("c{}", h)).unwrap();
            assert!(s.won);
            assert!(s.canonical);
            assert_eq!(s.tip, h == 5);
            assert_eq!(s.potential_tip, h == 5);
            assert_eq!(s.next_tip, h < 5);
            assert_eq!(s.stacks_height, 100 + h);
        }
    }

    #[test]
    fn test_fork_winner_marks() {
        let backend = fork_backend();
        let mut annotated = AnnotatedGraph::new(build(&backend, 10, 11));
        let resolver = ForkResolver::new();
        resolver
            .process_winning_commits(&mut annotated, &backend, &mut NoOpSink)
            .unwrap();
        let chain = resolver
            .process_canonical_tip(&mut annotated, &backend)
            .unwrap();

        let a = annotated.status_of("A").unwrap();
        let b = annotated.status_of("B").unwrap();
        let p = annotated.status_of("P").unwrap();
        assert!(a.won && a.potential_tip && a.canonical && a.tip);
        assert!(!b.won && !b.potential_tip && !b.canonical);
        assert!(p.won && !p.potential_tip && p.canonical && p.next_tip);
        assert_eq!(chain.txids, vec!["A", "P"]);
    }

    #[test]
    fn test_reorg_through_sibling() {
        let mut backend = fork_backend();
        backend.set_winner(12, "C", 52, "ch12");

        let (annotated, chain) = ForkResolver::new()
            .resolve(build(&backend, 10, 12), &backend, &backend, &mut NoOpSink)
            .unwrap();

        assert_eq!(chain.txids, vec!["C", "B", "P"]);
        let a = annotated.status_of("A").unwrap();
        let b = annotated.status_of("B").unwrap();
        // A keeps its sortition win but is off the adopted chain
        assert!(a.won && !a.canonical && a.potential_tip);
        assert!(!b.won && b.canonical && b.next_tip);
        assert!(annotated.status_of("C").unwrap().tip);
    }

    #[test]
    fn test_one_potential_tip_per_processed_height() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut backend = MemoryBackend::new();
        let mut previous: Vec<(BurnHeight, VtxIndex)> = vec![(0, 0)];
        for h in 1..=30u64 {
            let count = rng.gen_range(1..4u32);
            let mut current = Vec::new();
            for vtx in 0..count {
                let parent = previous[rng.gen_range(0..previous.len())];
                backend.add_commit(commit(&format!("{}-{}", h, vtx), h, vtx, parent));
                current.push((h, vtx));
            }
            let winner = rng.gen_range(0..count);
            backend.set_winner(h, &format!("{}-{}", h, winner), h, "ch");
            previous = current;
        }

        let mut annotated = AnnotatedGraph::new(build(&backend, 1, 30));
        let resolver = ForkResolver::new();
        for h in 1..=30u64 {
            let winner = backend.winner_at(h).unwrap();
            resolver.process_height(&mut annotated, h, winner.as_ref(), &mut NoOpSink);

            let tips = annotated
                .graph()
                .at_height(h)
                .iter()
                .filter(|idx| annotated.status(**idx).potential_tip)
                .count();
            assert_eq!(tips, 1, "height {}", h);
        }
    }

    #[test]
    fn test_canonical_pass_is_idempotent() {
        let mut backend = fork_backend();
        backend.set_winner(12, "C", 52, "ch12");
        let resolver = ForkResolver::new();
        let (mut annotated, first) = resolver
            .resolve(build(&backend, 10, 12), &backend, &backend, &mut NoOpSink)
            .unwrap();
        let before: Vec<BidStatus> = annotated.iter().map(|(_, s)| s.clone()).collect();

        let second = resolver
            .process_canonical_tip(&mut annotated, &backend)
            .unwrap();
        let after: Vec<BidStatus> = annotated.iter().map(|(_, s)| s.clone()).collect();

        assert_eq!(first, second);
        assert_eq!(before, after);
    }

    #[test]
    fn test_canonical_chain_is_connected() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut backend = MemoryBackend::new();
        let mut all: Vec<(BurnHeight, VtxIndex)> = vec![(0, 0)];
        for h in 1..=40u64 {
            let count = rng.gen_range(1..3u32);
            for vtx in 0..count {
                // sometimes skip back more than one height
                let parent = all[all.len() - 1 - rng.gen_range(0..all.len().min(4))];
                backend.add_commit(commit(&format!("{}-{}", h, vtx), h, vtx, parent));
            }
            for vtx in 0..count {
                all.push((h, vtx));
            }
            backend.set_winner(h, &format!("{}-{}", h, rng.gen_range(0..count)), h, "ch");
        }

        let (annotated, chain) = ForkResolver::new()
            .resolve(build(&backend, 1, 40), &backend, &backend, &mut NoOpSink)
            .unwrap();

        assert!(!chain.is_empty());
        let tips = annotated.iter().filter(|(_, s)| s.tip).count();
        assert_eq!(tips, 1);
        let canonical = annotated.iter().filter(|(_, s)| s.canonical).count();
        assert_eq!(canonical, chain.len());

        let graph = annotated.graph();
        for pair in chain.txids.windows(2) {
            let child = graph.get(&pair[0]).unwrap();
            assert_eq!(child.parent.as_ref(), Some(&pair[1]));
            assert!(graph.get(&pair[1]).unwrap().block_height < child.block_height);
        }
    }

    #[test]
    fn test_next_tip_requires_adjacent_height() {
        let mut backend = MemoryBackend::new();
        backend.add_commit(commit("X", 20, 1, (19, 1)));
        backend.add_commit(commit("Y", 22, 1, (20, 1)));
        backend.set_winner(20, "X", 1, "ch20");
        backend.set_winner(22, "Y", 2, "ch22");

        let (annotated, chain) = ForkResolver::new()
            .resolve(build(&backend, 20, 22), &backend, &backend, &mut NoOpSink)
            .unwrap();
        assert_eq!(chain.txids, vec!["Y", "X"]);
        assert!(annotated.status_of("X").unwrap().canonical);
        assert!(!annotated.status_of("X").unwrap().next_tip);
    }

    #[test]
    fn test_structural_absence_and_missing_winner() {
        let mut backend = MemoryBackend::new();
        backend.add_commit(commit("X", 20, 1, (19, 1)));
        backend.add_commit(commit("Z", 22, 1, (20, 1)));
        backend.set_winner(20, "X", 1, "ch20");

        let mut sink = CollectingSink::default();
        let (annotated, chain) = ForkResolver::new()
            .resolve(build(&backend, 20, 22), &backend, &backend, &mut sink)
            .unwrap();

        assert!(sink.events.contains(&Event::HeightWithoutBids { height: 21 }));
        assert!(sink.events.contains(&Event::WinnerMissing { height: 22 }));
        assert!(!annotated.status_of("Z").unwrap().won);
        assert!(chain.is_empty());
    }

    #[test]
    fn test_enrichment() {
        let mut backend = linear_backend();
        backend.set_reward("ch5", "beef", 1_000_000_000);
        backend.set_tenure_fees(5, 42_000);
        backend.set_winner(1, "c1", 0, "ch1");

        let mut sink = CollectingSink::default();
        let (annotated, _) = ForkResolver::new()
            .resolve(build(&backend, 1, 5), &backend, &backend, &mut sink)
            .unwrap();

        let top = annotated.status_of("c5").unwrap();
        assert_eq!(top.block_hash, "beef");
        assert_eq!(top.coinbase_earned, 1_000_000_000);
        assert_eq!(top.fees_earned, 42_000);

        let c4 = annotated.status_of("c4").unwrap();
        assert_eq!(c4.block_hash, "");
        assert_eq!(c4.coinbase_earned, 0);
        assert!(sink.events.contains(&Event::EnrichmentMiss {
            txid: "c4".into(),
            height: 4,
            field: "coinbase",
        }));

        // no stacks block yet at height 1, so nothing is looked up
        assert!(!sink
            .events
            .iter()
            .any(|e| matches!(e, Event::EnrichmentMiss { height: 1, .. })));
    }

    #[test]
    fn test_enrichment_failure_is_not_fatal() {
        let backend = linear_backend();
        let rewards = CountingRewards { calls: Cell::new(0) };
        let (annotated, chain) = ForkResolver::new()
            .resolve(build(&backend, 1, 5), &backend, &rewards, &mut NoOpSink)
            .unwrap();

        assert_eq!(rewards.calls.get(), 10);
        assert_eq!(chain.len(), 5);
        assert!(annotated.iter().all(|(_, s)| s.coinbase_earned == 0));
    }

    #[test]
    fn test_winner_oracle_failure_aborts() {
        let backend = linear_backend();
        let result = ForkResolver::new().resolve(
            build(&backend, 1, 5),
            &FailingOracle,
            &backend,
            &mut NoOpSink,
        );
        assert!(result.is_err());
    }
}
