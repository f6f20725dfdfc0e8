//! Statistics and results for the fork simulator

use std::collections::BTreeMap;

use hub_rust::hub_interface::BurnHeight;
use hub_rust::PerformanceRecord;

/// What the generator put into the backend
#[derive(Debug, Default)]
pub struct GenerationStats {
    pub commits: usize,
    pub stale_commits: usize,
    pub reorgs: usize,
    pub orphaned_winners: usize,
    pub missing_snapshots: usize,
    pub empty_heights: usize,

    /// Blocks produced per miner
    pub wins: BTreeMap<String, u64>,
}

/// What the commit graph pipeline saw in its window
#[derive(Debug, Default)]
pub struct ChainStats {
    pub window: (BurnHeight, BurnHeight),
    pub commits_in_window: usize,
    pub resolved_parents: usize,
    pub canonical_len: usize,
    pub won: usize,
    pub won_off_chain: usize,
    pub canonical_not_won: usize,
    pub tips: usize,

    /// Resolved parents not strictly below their child; always 0
    pub parent_order_violations: usize,
}

/// Simulation result
#[derive(Debug)]
pub struct SimResult {
    pub seed_used: u64,
    pub heights: u64,
    pub generation: GenerationStats,

    /// None if the commit graph task published nothing
    pub chain: Option<ChainStats>,
    pub event_counts: BTreeMap<&'static str, usize>,

    pub miner_power: Vec<PerformanceRecord>,
    pub miner_window: usize,
    pub no_winner: u64,
}

impl SimResult {
    /// Print a summary of the simulation results
    pub fn print_summary(&self) {
        println!("\n╔════════════════════════════════════════════════════════╗");
        println!("║        Fork Simulation Results                        ║");
        println!("╚════════════════════════════════════════════════════════╝\n");

        println!("Configuration:");
        println!("  Seed: {}", self.seed_used);
        println!("  Heights: {}\n", self.heights);

        let generation = &self.generation;
        println!("Generated:");
        println!("  Commits: {}", generation.commits);
        println!("  Stale-parent commits: {}", generation.stale_commits);
        println!("  Reorgs: {}", generation.reorgs);
        println!("  Orphaned winners: {}", generation.orphaned_winners);
        println!("  Missing snapshots: {}", generation.missing_snapshots);
        println!("  Heights without commits: {}", generation.empty_heights);
        println!("  Miners with blocks: {}", generation.wins.len());
        println!();

        match &self.chain {
            Some(chain) => {
                println!("Commit graph {}..={}:", chain.window.0, chain.window.1);
                println!("  Commits: {}", chain.commits_in_window);
                println!("  Resolved parents: {}", chain.resolved_parents);
                println!("  Canonical chain length: {}", chain.canonical_len);
                println!("  Won: {} ({} off the canonical chain)", chain.won, chain.won_off_chain);
                println!("  Canonical without winning: {}", chain.canonical_not_won);
                println!("  Tips: {}", chain.tips);
                if chain.parent_order_violations > 0 {
                    println!("  ✗ Parent order violations: {}", chain.parent_order_violations);
                }
            }
            None => println!("Commit graph: nothing published"),
        }
        println!();

        if !self.event_counts.is_empty() {
            println!("Events:");
            for (name, count) in &self.event_counts {
                println!("  {}: {}", name, count);
            }
            println!();
        }

        println!("Miner power over {} blocks:", self.miner_window);
        println!(
            "  {:<24} {:<20} {:>6} {:>12} {:>14} {:>7}",
            "Recipient", "BTC address", "Won", "Spent", "Earned STX", "Rate"
        );
        for record in &self.miner_power {
            println!(
                "  {:<24} {:<20} {:>6} {:>12} {:>14.2} {:>6.1}%",
                record.stacks_recipient,
                record.bitcoin_address,
                record.blocks_won,
                record.btc_spent,
                record.stx_earned,
                record.win_rate
            );
        }
        let total: u64 = self.miner_power.iter().map(|r| r.blocks_won).sum();
        if self.miner_power.is_empty() {
            println!("  nothing published");
        } else if total as usize != self.miner_window {
            println!("  ✗ Wins add up to {}, expected {}", total, self.miner_window);
        } else {
            println!("  ✓ Wins add up to the window ({} without an adopted block)", self.no_winner);
        }
        println!();
    }
}
