use std::env;
use std::error::Error;
use std::fs;
use std::path::Path;

use log::{info, warn};
use simple_logger::SimpleLogger;

use hub_rust::hub_interface::{CollectingSink, Event};
use hub_rust::hub_sqlite_backend::SqliteBackend;
use hub_rust::hub_tasks;
use hub_rust::{AddressMap, CommitStore, HubConfig};

fn write_output(path: Option<&Path>, content: &str) -> Result<(), Box<dyn Error>> {
    match path {
        Some(path) => {
            fs::write(path, content)?;
            info!("Wrote {} bytes to {}", content.len(), path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <hub.yaml>", args[0]);
        std::process::exit(1);
    }

    let config = HubConfig::load(Path::new(&args[1]))?;
    SimpleLogger::new()
        .with_level(config.log_level_filter()?)
        .init()?;
    config.validate()?;

    info!("starting with data dir {}", config.data_dir.display());
    let backend = SqliteBackend::open(&config.data_dir)?;

    let addresses = AddressMap::new();
    hub_tasks::address_map_task(&backend, &addresses, config.address_scan_limit);

    let mut events = CollectingSink::default();
    let store = CommitStore::new(config.commit_window);
    if let Some(report) = hub_tasks::commit_graph_task(&backend, &store, &mut events) {
        write_output(config.dot_output.as_deref(), &report.dot)?;
    }

    let mismatches = events
        .events
        .iter()
        .filter(|e| matches!(e, Event::SortitionSpendMismatch { .. }))
        .count();
    if mismatches > 0 {
        warn!("{} sortition spend mismatches in this window", mismatches);
    }
    info!("{} commit graph events", events.events.len());

    if let Some(records) = hub_tasks::miner_power_task(&backend, config.miner_window, &addresses) {
        let json = serde_json::to_string_pretty(&records)?;
        write_output(config.miner_power_output.as_deref(), &json)?;
    }

    Ok(())
}
