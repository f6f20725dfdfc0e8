//! Fork simulation runner

use std::collections::BTreeMap;
use std::fs;

use hub_rust::hub_commit_store::CommitStore;
use hub_rust::hub_interface::{
    AncestorRow, BurnHeight, CollectingSink, CommitRow, Event, PositionalKey, StacksHeight,
};
use hub_rust::hub_memory_backend::MemoryBackend;
use hub_rust::hub_miner_power::NO_WINNER;
use hub_rust::hub_tasks;
use hub_rust::AddressMap;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::config::ForkSimConfig;
use super::stats::{ChainStats, GenerationStats, SimResult};

struct Miner {
    recipient: String,
    btc_address: String,
}

/// The commit the next bids build on, and the stacks block it produced
#[derive(Clone)]
struct Tip {
    key: PositionalKey,
    block_id: String,
    stacks_height: StacksHeight,
}

struct Bidder {
    miner: usize,
    txid: String,
    parent: Tip,
    spend: u64,
}

/// Fork simulation runner
pub struct ForkSimRunner {
    config: ForkSimConfig,
    rng: StdRng,
    seed: u64,
    miners: Vec<Miner>,
    backend: MemoryBackend,

    tip: Tip,
    previous_tip: Tip,
    stats: GenerationStats,
}

impl ForkSimRunner {
    pub fn new(config: ForkSimConfig) -> Self {
        let seed = config.resolve_seed();
        let rng = StdRng::seed_from_u64(seed);

        let miners = (0..config.miners.count)
            .map(|i| Miner {
                recipient: format!("SP{:04}MINER", i),
                btc_address: format!("bc1qminer{:04}", i),
            })
            .collect();

        let genesis = Tip {
            key: PositionalKey::new(config.start_height.saturating_sub(1), 0),
            block_id: "genesis".to_string(),
            stacks_height: 0,
        };

        Self {
            config,
            rng,
            seed,
            miners,
            backend: MemoryBackend::new(),
            tip: genesis.clone(),
            previous_tip: genesis,
            stats: GenerationStats::default(),
        }
    }

    /// Generate the chain, then run the pipelines over it
    pub fn run(mut self) -> SimResult {
        println!("Starting fork simulation...");
        println!("  Miners: {}", self.config.miners.count);
        println!("  Heights: {}", self.config.heights);
        println!("  Seed: {}", self.seed);
        println!();

        let start = self.config.start_height;
        for height in start..start + self.config.heights {
            if (height - start) % 50 == 0 && height > start {
                println!("Height {}/{}", height - start, self.config.heights);
            }
            self.simulate_height(height);
        }

        self.analyze()
    }

    fn simulate_height(&mut self, height: BurnHeight) {
        let bidders = self.collect_bids(height);
        if bidders.is_empty() {
            debug!("No commits at {}", height);
            self.stats.empty_heights += 1;
            return;
        }

        if self
            .rng
            .gen_bool(self.config.sortition.missing_snapshot_probability)
        {
            debug!("No snapshot at {}", height);
            self.stats.missing_snapshots += 1;
            return;
        }

        let winner = self.draw_winner(&bidders);
        let bidder = &bidders[winner];
        let consensus_hash = format!("ch{}", height);

        if self.rng.gen_bool(self.config.sortition.orphan_probability) {
            // sortition won, but the block never shows up
            self.backend.set_winner(
                height,
                &bidder.txid,
                self.tip.stacks_height,
                &consensus_hash,
            );
            self.stats.orphaned_winners += 1;
            return;
        }

        let stacks_height = bidder.parent.stacks_height + 1;
        if bidder.parent.key != self.tip.key {
            debug!(
                "Reorg at {}: {} builds on {:?} instead of {:?}",
                height, bidder.txid, bidder.parent.key, self.tip.key
            );
            self.stats.reorgs += 1;
        }

        let miner = &self.miners[bidder.miner];
        let block_id = format!("ib{}", height);
        let block_hash = format!("{:064x}", height);
        let fees = self.rng.gen_range(0..50_000_000u64);

        self.backend
            .set_winner(height, &bidder.txid, stacks_height, &consensus_hash);
        self.backend
            .set_reward(&consensus_hash, &block_hash, self.config.miners.coinbase);
        self.backend.set_tenure_fees(height, fees);
        self.backend.push_block(
            &block_id,
            AncestorRow {
                burn_height: height,
                parent_block_id: bidder.parent.block_id.clone(),
                address: miner.recipient.clone(),
                spend: bidder.spend,
                reward: self.config.miners.coinbase + fees,
            },
        );
        self.backend
            .add_address_pair(&miner.recipient, &format!("\"{}\"", miner.btc_address));

        let new_tip = Tip {
            key: PositionalKey::new(height, (winner + 1) as u32),
            block_id,
            stacks_height,
        };
        self.previous_tip = std::mem::replace(&mut self.tip, new_tip);
        *self.stats.wins.entry(miner.recipient.clone()).or_default() += 1;
    }

    fn collect_bids(&mut self, height: BurnHeight) -> Vec<Bidder> {
        let mut bidders = Vec::new();
        let (min_spend, max_spend) = self.config.miners.spend_range;

        for miner in 0..self.miners.len() {
            if !self.rng.gen_bool(self.config.miners.commit_probability) {
                continue;
            }

            let stale = self
                .rng
                .gen_bool(self.config.miners.stale_parent_probability);
            let parent = if stale {
                self.stats.stale_commits += 1;
                self.previous_tip.clone()
            } else {
                self.tip.clone()
            };

            // vtxindex 0 is never a commit
            let vtxindex = (bidders.len() + 1) as u32;
            let txid = format!("{:08x}{:04x}", height, vtxindex);
            let spend = self.rng.gen_range(min_spend..=max_spend);

            self.backend.add_commit(
                CommitRow::new(
                    &txid,
                    PositionalKey::new(height, vtxindex),
                    parent.key,
                )
                .with_sender(&format!("\"{}\"", self.miners[miner].btc_address))
                .with_spend(spend, &format!("sortition{}", height)),
            );
            self.stats.commits += 1;

            bidders.push(Bidder {
                miner,
                txid,
                parent,
                spend,
            });
        }

        bidders
    }

    /// Index into `bidders`, drawn with probability proportional to spend
    fn draw_winner(&mut self, bidders: &[Bidder]) -> usize {
        let total: u64 = bidders.iter().map(|b| b.spend).sum();
        let mut ticket = self.rng.gen_range(0..total.max(1));
        for (i, bidder) in bidders.iter().enumerate() {
            if ticket < bidder.spend {
                return i;
            }
            ticket -= bidder.spend;
        }
        bidders.len() - 1
    }

    fn analyze(self) -> SimResult {
        info!("Running pipelines over {} commits", self.stats.commits);

        let addresses = AddressMap::new();
        hub_tasks::address_map_task(&self.backend, &addresses, self.miners.len() * 4);

        let mut events = CollectingSink::default();
        let store = CommitStore::new(self.config.commit_window);
        let report = hub_tasks::commit_graph_task(&self.backend, &store, &mut events);

        let mut event_counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for event in &events.events {
            *event_counts.entry(event_name(event)).or_default() += 1;
        }

        let chain = report.as_ref().map(|report| {
            let annotated = &report.annotated;
            let graph = annotated.graph();

            let mut stats = ChainStats {
                window: report.window,
                commits_in_window: graph.len(),
                canonical_len: report.chain.len(),
                ..Default::default()
            };
            for (idx, (bid, status)) in annotated.iter().enumerate() {
                if status.won {
                    stats.won += 1;
                }
                if status.won && !status.canonical {
                    stats.won_off_chain += 1;
                }
                if status.canonical && !status.won {
                    stats.canonical_not_won += 1;
                }
                if status.tip {
                    stats.tips += 1;
                }
                if let Some(parent) = graph.parent_of(idx) {
                    stats.resolved_parents += 1;
                    if graph.bid(parent).block_height >= bid.block_height {
                        stats.parent_order_violations += 1;
                    }
                }
            }
            stats
        });

        if let (Some(report), Some(path)) = (&report, &self.config.dot_output) {
            match fs::write(path, &report.dot) {
                Ok(()) => info!("Wrote graph to {}", path),
                Err(e) => warn!("Unable to write graph to {}: {}", path, e),
            }
        }

        let miner_power =
            hub_tasks::miner_power_task(&self.backend, self.config.miner_window, &addresses)
                .unwrap_or_default();
        let no_winner = miner_power
            .iter()
            .find(|r| r.stacks_recipient == NO_WINNER)
            .map(|r| r.blocks_won)
            .unwrap_or(0);

        SimResult {
            seed_used: self.seed,
            heights: self.config.heights,
            generation: self.stats,
            chain,
            event_counts,
            miner_power,
            miner_window: self.config.miner_window,
            no_winner,
        }
    }
}

fn event_name(event: &Event) -> &'static str {
    match event {
        Event::DuplicateBid { .. } => "DuplicateBid",
        Event::PositionalKeyCollision { .. } => "PositionalKeyCollision",
        Event::HeightWithoutBids { .. } => "HeightWithoutBids",
        Event::WinnerMissing { .. } => "WinnerMissing",
        Event::EnrichmentMiss { .. } => "EnrichmentMiss",
        Event::SortitionSpendMismatch { .. } => "SortitionSpendMismatch",
    }
}
