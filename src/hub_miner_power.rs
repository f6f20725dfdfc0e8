//! Miner Power Module
//!
//! Per-miner statistics over the last `window_size` blocks of the adopted
//! stacks chain: blocks won, BTC spent, STX earned and win rate. Heights in the
//! window without an adopted block are counted in a synthetic bucket so that
//! the win counts always add up to the window size.

use indexmap::IndexMap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::hub_address_map::AddressMap;
use crate::hub_interface::{
    AncestorChainSource, BurnHeight, ChainHeadOracle, MicroStx, QueryError, Sats,
    MICRO_STX_PER_STX,
};

/// Label of the bucket for heights without an adopted block
pub const NO_WINNER: &str = "No Canonical Sortition";

/// One day of bitcoin blocks
pub const DEFAULT_MINER_WINDOW: usize = 144;

/// Statistics of one miner over the window
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PerformanceRecord {
    pub bitcoin_address: String,
    pub stacks_recipient: String,
    pub blocks_won: u64,
    pub btc_spent: Sats,
    #[serde(rename = "StxEarnt")]
    pub stx_earned: f64,
    pub win_rate: f64,
}

#[derive(Default)]
struct Tally {
    won: u64,
    spent: Sats,
    earned: MicroStx,
}

#[derive(Debug, Clone)]
pub struct MinerPowerAggregator {
    window_size: usize,
    min_burn_height: Option<BurnHeight>,
}

impl Default for MinerPowerAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_MINER_WINDOW)
    }
}

impl MinerPowerAggregator {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            min_burn_height: None,
        }
    }

    /// Ignore ancestors mined at or below `height`
    pub fn with_min_burn_height(mut self, height: BurnHeight) -> Self {
        self.min_burn_height = Some(height);
        self
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Look up the current head, then aggregate from it
    pub fn compute(
        &self,
        heads: &dyn ChainHeadOracle,
        chain: &dyn AncestorChainSource,
        addresses: &AddressMap,
    ) -> Result<Vec<PerformanceRecord>, QueryError> {
        let head = heads.current_head()?;
        self.compute_from(head.as_deref(), chain, addresses)
    }

    /// Walk up to `window_size` ancestors of `head` and aggregate per miner.
    ///
    /// Records are sorted by blocks won, descending; the sort is stable so
    /// ties keep the order in which miners were first met along the walk.
    pub fn compute_from(
        &self,
        head: Option<&str>,
        chain: &dyn AncestorChainSource,
        addresses: &AddressMap,
    ) -> Result<Vec<PerformanceRecord>, QueryError> {
        let mut tallies: IndexMap<String, Tally> = IndexMap::new();
        let mut visited: usize = 0;

        match head {
            Some(head) => {
                for row in chain.ancestors(head, self.window_size)?.take(self.window_size) {
                    let row = row?;
                    if let Some(floor) = self.min_burn_height {
                        if row.burn_height <= floor {
                            debug!("Skipping ancestor at burn height {}", row.burn_height);
                            continue;
                        }
                    }
                    let tally = tallies.entry(row.address).or_default();
                    tally.won += 1;
                    tally.spent += row.spend;
                    tally.earned += row.reward;
                    visited += 1;
                }
            }
            None => warn!("No chain head; every height in the window counts as a miss"),
        }

        let misses = (self.window_size - visited) as u64;
        let table = addresses.snapshot();

        let mut records: Vec<PerformanceRecord> = tallies
            .into_iter()
            .map(|(address, tally)| PerformanceRecord {
                bitcoin_address: table.get(&address).cloned().unwrap_or_default(),
                stacks_recipient: address,
                blocks_won: tally.won,
                btc_spent: tally.spent,
                stx_earned: tally.earned as f64 / MICRO_STX_PER_STX,
                win_rate: self.win_rate(tally.won),
            })
            .collect();
        records.push(PerformanceRecord {
            bitcoin_address: String::new(),
            stacks_recipient: NO_WINNER.to_string(),
            blocks_won: misses,
            btc_spent: 0,
            stx_earned: 0.0,
            win_rate: self.win_rate(misses),
        });

        records.sort_by(|a, b| b.blocks_won.cmp(&a.blocks_won));

        debug!(
            "Miner power over {} blocks: {} miners, {} misses",
            self.window_size,
            records.len() - 1,
            misses
        );
        Ok(records)
    }

    fn win_rate(&self, won: u64) -> f64 {
        if self.window_size == 0 {
            return 0.0;
        }
        (won as f64 / self.window_size as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub_interface::{AncestorIter, AncestorRow};
    use crate::hub_memory_backend::MemoryBackend;

    /// Chain of `winners.len()` blocks, oldest first, one block per burn height
    fn chain(winners: &[&str]) -> MemoryBackend {
        let mut backend = MemoryBackend::new();
        let mut parent = "genesis".to_string();
        for (i, address) in winners.iter().enumerate() {
            let id = format!("block{}", i);
            backend.push_block(
                &id,
                AncestorRow {
                    burn_height: 1_000 + i as u64,
                    parent_block_id: parent.clone(),
                    address: address.to_string(),
                    spend: 10_000,
                    reward: 1_500_000,
                },
            );
            parent = id;
        }
        backend
    }

    struct BrokenChain;

    impl AncestorChainSource for BrokenChain {
        fn ancestors(&self, _start: &str, _limit: usize) -> Result<AncestorIter<'_>, QueryError> {
            let rows = vec![
                Ok(AncestorRow::default()),
                Err(QueryError::Malformed {
                    query: "block_ancestors",
                    reason: "NULL address".into(),
                }),
            ];
            Ok(Box::new(rows.into_iter()))
        }
    }

    fn total_wins(records: &[PerformanceRecord]) -> u64 {
        records.iter().map(|r| r.blocks_won).sum()
    }

    #[test]
    fn test_window_of_144() {
        let mut winners = Vec::new();
        winners.extend(std::iter::repeat("SP_A").take(50));
        winners.extend(std::iter::repeat("SP_B").take(40));
        winners.extend(std::iter::repeat("SP_C").take(44));
        let backend = chain(&winners);

        let records = MinerPowerAggregator::new(144)
            .compute(&backend, &backend, &AddressMap::new())
            .unwrap();

        assert_eq!(total_wins(&records), 144);
        let order: Vec<(&str, u64)> = records
            .iter()
            .map(|r| (r.stacks_recipient.as_str(), r.blocks_won))
            .collect();
        assert_eq!(
            order,
            vec![("SP_A", 50), ("SP_C", 44), ("SP_B", 40), (NO_WINNER, 10)]
        );
    }

    #[test]
    fn test_win_rate_and_order() {
        let backend = chain(&["SP_A", "SP_B", "SP_A", "SP_C", "SP_A", "SP_B"]);
        let records = MinerPowerAggregator::new(10)
            .compute(&backend, &backend, &AddressMap::new())
            .unwrap();

        for r in &records {
            assert_eq!(r.win_rate, (r.blocks_won as f64 / 10.0) * 100.0);
        }
        for pair in records.windows(2) {
            assert!(pair[0].blocks_won >= pair[1].blocks_won);
            assert!(pair[0].win_rate >= pair[1].win_rate);
        }
        assert_eq!(records[0].stacks_recipient, NO_WINNER);
        assert_eq!(records[0].blocks_won, 4);
    }

    #[test]
    fn test_ties_keep_walk_order() {
        // walk visits newest first: SP_Y, then SP_X
        let backend = chain(&["SP_X", "SP_Y"]);
        let records = MinerPowerAggregator::new(2)
            .compute(&backend, &backend, &AddressMap::new())
            .unwrap();

        let names: Vec<&str> = records.iter().map(|r| r.stacks_recipient.as_str()).collect();
        assert_eq!(names, vec!["SP_Y", "SP_X", NO_WINNER]);
    }

    #[test]
    fn test_spend_reward_and_addresses() {
        let mut backend = chain(&["SP_A", "SP_A", "SP_B"]);
        backend.add_address_pair("SP_A", "\"bc1qminer_a\"");
        let addresses = AddressMap::new();
        addresses.refresh(&backend, 10).unwrap();

        let records = MinerPowerAggregator::new(3)
            .compute(&backend, &backend, &addresses)
            .unwrap();

        let a = &records[0];
        assert_eq!(a.stacks_recipient, "SP_A");
        assert_eq!(a.bitcoin_address, "bc1qminer_a");
        assert_eq!(a.btc_spent, 20_000);
        assert_eq!(a.stx_earned, 3.0);

        let b = &records[1];
        assert_eq!(b.bitcoin_address, "");
        assert_eq!(b.stx_earned, 1.5);

        assert_eq!(records[2].blocks_won, 0);
    }

    #[test]
    fn test_window_shorter_than_chain() {
        let backend = chain(&["SP_A", "SP_B", "SP_C", "SP_D"]);
        let records = MinerPowerAggregator::new(2)
            .compute(&backend, &backend, &AddressMap::new())
            .unwrap();

        let names: Vec<&str> = records.iter().map(|r| r.stacks_recipient.as_str()).collect();
        assert_eq!(names, vec!["SP_D", "SP_C", NO_WINNER]);
        assert_eq!(total_wins(&records), 2);
    }

    #[test]
    fn test_min_burn_height_skips_old_blocks() {
        let backend = chain(&["SP_OLD", "SP_OLD", "SP_NEW", "SP_NEW"]);
        let records = MinerPowerAggregator::new(4)
            .with_min_burn_height(1_001)
            .compute(&backend, &backend, &AddressMap::new())
            .unwrap();

        assert_eq!(records[0].stacks_recipient, "SP_NEW");
        assert_eq!(records[0].blocks_won, 2);
        assert_eq!(records[1].stacks_recipient, NO_WINNER);
        assert_eq!(records[1].blocks_won, 2);
        assert_eq!(total_wins(&records), 4);
    }

    #[test]
    fn test_no_head() {
        let backend = MemoryBackend::new();
        let records = MinerPowerAggregator::new(144)
            .compute(&backend, &backend, &AddressMap::new())
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].blocks_won, 144);
        assert_eq!(records[0].win_rate, 100.0);
    }

    #[test]
    fn test_walk_failure_aborts() {
        let result = MinerPowerAggregator::new(5).compute_from(
            Some("head"),
            &BrokenChain,
            &AddressMap::new(),
        );
        assert!(matches!(result, Err(QueryError::Malformed { .. })));
    }

    #[test]
    fn test_serialized_field_names() {
        let record = PerformanceRecord {
            bitcoin_address: "bc1q".into(),
            stacks_recipient: "SP1".into(),
            blocks_won: 3,
            btc_spent: 30_000,
            stx_earned: 1.5,
            win_rate: 2.0833333,
        };
        let json = serde_json::to_value(&record).unwrap();
        for key in ["BitcoinAddress", "StacksRecipient", "BlocksWon", "BtcSpent", "StxEarnt", "WinRate"] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
    }
}
