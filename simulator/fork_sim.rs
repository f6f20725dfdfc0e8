//! Fork Simulation Example
//!
//! Run with: cargo run --example fork_sim [config.yaml]

mod fork;

use std::env;
use std::fs;

use fork::{ForkSimConfig, ForkSimRunner};
use log::info;
use simple_logger::SimpleLogger;

fn main() {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    println!("╔════════════════════════════════════════════════════════╗");
    println!("║        Fork Simulator                                  ║");
    println!("╚════════════════════════════════════════════════════════╝\n");

    let config = match env::args().nth(1) {
        Some(path) => {
            let yaml = fs::read_to_string(&path).unwrap_or_else(|e| {
                eprintln!("Failed to read {}: {}", path, e);
                std::process::exit(1);
            });
            serde_yaml::from_str(&yaml).unwrap_or_else(|e| {
                eprintln!("Failed to parse {}: {}", path, e);
                std::process::exit(1);
            })
        }
        None => ForkSimConfig::default(),
    };

    info!("Configuration:");
    info!("  Miners: {}", config.miners.count);
    info!("  Commit probability: {}", config.miners.commit_probability);
    info!("  Stale parent probability: {}", config.miners.stale_parent_probability);
    info!("  Orphan probability: {}", config.sortition.orphan_probability);
    info!("  Commit window: {}", config.commit_window);
    info!("");

    let runner = ForkSimRunner::new(config);
    let result = runner.run();

    result.print_summary();

    info!("✓ Simulation complete!");
}
