// In-memory backend for commits, sortitions, rewards and the stacks block chain
//
// This module implements every read-only source trait over plain collections.
// Ideal for testing, simulation, and development.
//
// For reading a node's data dir, see hub_sqlite_backend.rs

use std::collections::HashMap;

use crate::hub_interface::{
    AddressPairSource, AncestorChainSource, AncestorIter, AncestorRow, BlockReward, BurnHeight,
    ChainHeadOracle, CommitRow, CommitRowSource, MicroStx, QueryError, RewardLookup,
    SortitionWinner, WinnerOracle,
};

/// In-memory stand-in for the sortition and chainstate databases
///
/// # Example
/// ```rust
/// use hub_rust::hub_interface::{CommitRow, PositionalKey, WinnerOracle};
/// use hub_rust::hub_memory_backend::MemoryBackend;
///
/// let mut backend = MemoryBackend::new();
/// backend.add_commit(CommitRow::new(
///     "aa01",
///     PositionalKey::new(850_000, 12),
///     PositionalKey::new(849_999, 40),
/// ));
/// backend.set_winner(850_000, "aa01", 170_000, "ch01");
///
/// assert_eq!(backend.winner_at(850_000).unwrap().unwrap().winning_txid, "aa01");
/// ```
#[derive(Default, Clone)]
pub struct MemoryBackend {
    commits: Vec<CommitRow>,
    winners: HashMap<BurnHeight, SortitionWinner>,
    rewards: HashMap<String, BlockReward>,
    tenure_fees: HashMap<BurnHeight, MicroStx>,
    blocks: HashMap<String, AncestorRow>,
    head: Option<String>,
    address_pairs: Vec<(String, String)>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_commit(&mut self, row: CommitRow) {
        self.commits.push(row);
    }

    pub fn set_winner(
        &mut self,
        height: BurnHeight,
        txid: &str,
        stacks_height: u64,
        consensus_hash: &str,
    ) {
        self.winners.insert(
            height,
            SortitionWinner {
                winning_txid: txid.to_string(),
                stacks_height,
                consensus_hash: consensus_hash.to_string(),
            },
        );
    }

    pub fn set_reward(&mut self, consensus_hash: &str, block_hash: &str, coinbase: MicroStx) {
        self.rewards.insert(
            consensus_hash.to_string(),
            BlockReward {
                block_hash: block_hash.to_string(),
                coinbase,
            },
        );
    }

    pub fn set_tenure_fees(&mut self, height: BurnHeight, fees: MicroStx) {
        self.tenure_fees.insert(height, fees);
    }

    /// Append a stacks block on top of `row.parent_block_id` and make it the head
    pub fn push_block(&mut self, index_block_hash: &str, row: AncestorRow) {
        self.blocks.insert(index_block_hash.to_string(), row);
        self.head = Some(index_block_hash.to_string());
    }

    pub fn set_head(&mut self, index_block_hash: Option<&str>) {
        self.head = index_block_hash.map(|h| h.to_string());
    }

    pub fn add_address_pair(&mut self, recipient: &str, sender: &str) {
        self.address_pairs
            .push((recipient.to_string(), sender.to_string()));
    }

    pub fn commits(&self) -> &[CommitRow] {
        &self.commits
    }
}

impl CommitRowSource for MemoryBackend {
    fn max_height(&self) -> Result<Option<BurnHeight>, QueryError> {
        Ok(self.commits.iter().map(|c| c.block_height).max())
    }

    fn commit_rows(&self, low: BurnHeight, high: BurnHeight) -> Result<Vec<CommitRow>, QueryError> {
        let mut rows: Vec<CommitRow> = self
            .commits
            .iter()
            .filter(|c| c.block_height >= low && c.block_height <= high)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.block_height);
        Ok(rows)
    }
}

impl WinnerOracle for MemoryBackend {
    fn winner_at(&self, height: BurnHeight) -> Result<Option<SortitionWinner>, QueryError> {
        Ok(self.winners.get(&height).cloned())
    }
}

impl RewardLookup for MemoryBackend {
    fn block_reward(&self, consensus_hash: &str) -> Result<Option<BlockReward>, QueryError> {
        Ok(self.rewards.get(consensus_hash).cloned())
    }

    fn tenure_fees(&self, height: BurnHeight) -> Result<Option<MicroStx>, QueryError> {
        Ok(self.tenure_fees.get(&height).copied())
    }
}

impl ChainHeadOracle for MemoryBackend {
    fn current_head(&self) -> Result<Option<String>, QueryError> {
        Ok(self.head.clone())
    }
}

impl AncestorChainSource for MemoryBackend {
    fn ancestors(&self, start: &str, limit: usize) -> Result<AncestorIter<'_>, QueryError> {
        let mut next = Some(start.to_string());
        let walk = std::iter::from_fn(move || {
            let id = next.take()?;
            let row = self.blocks.get(&id)?;
            next = Some(row.parent_block_id.clone());
            Some(Ok(row.clone()))
        });
        Ok(Box::new(walk.take(limit)))
    }
}

impl AddressPairSource for MemoryBackend {
    fn address_pairs(&self, limit: usize) -> Result<Vec<(String, String)>, QueryError> {
        Ok(self.address_pairs.iter().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub_interface::PositionalKey;

    fn block(height: BurnHeight, parent: &str, address: &str) -> AncestorRow {
        AncestorRow {
            burn_height: height,
            parent_block_id: parent.to_string(),
            address: address.to_string(),
            spend: 1_000,
            reward: 500_000_000,
        }
    }

    #[test]
    fn test_commit_rows_filters_window() {
        let mut backend = MemoryBackend::new();
        for h in [12u64, 10, 11, 14] {
            backend.add_commit(CommitRow::new(
                &format!("c{}", h),
                PositionalKey::new(h, 0),
                PositionalKey::new(h - 1, 0),
            ));
        }

        let rows = backend.commit_rows(11, 13).unwrap();
        let heights: Vec<BurnHeight> = rows.iter().map(|r| r.block_height).collect();
        assert_eq!(heights, vec![11, 12]);
        assert_eq!(backend.max_height().unwrap(), Some(14));
    }

    #[test]
    fn test_ancestor_walk_follows_parents() {
        let mut backend = MemoryBackend::new();
        backend.push_block("b1", block(1, "genesis", "SP1"));
        backend.push_block("b2", block(2, "b1", "SP2"));
        backend.push_block("b3", block(3, "b2", "SP1"));

        let head = backend.current_head().unwrap().unwrap();
        assert_eq!(head, "b3");

        let walked: Vec<BurnHeight> = backend
            .ancestors(&head, 10)
            .unwrap()
            .map(|r| r.unwrap().burn_height)
            .collect();
        assert_eq!(walked, vec![3, 2, 1]);

        let limited = backend.ancestors(&head, 2).unwrap().count();
        assert_eq!(limited, 2);
    }

    #[test]
    fn test_ancestor_walk_unknown_start() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.ancestors("nope", 5).unwrap().count(), 0);
    }
}
