//! Miner address table
//!
//! Maps a miner's stacks reward recipient to the bitcoin address it commits
//! from. The table is refreshed wholesale: a new map is built off to the side
//! and published with one pointer swap, so a reader sees either the old or the
//! new table, never a half-filled one.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use log::{debug, info};

use crate::hub_interface::{AddressPairSource, QueryError};

/// Default number of recent blocks scanned per refresh
pub const DEFAULT_ADDRESS_SCAN_LIMIT: usize = 10;

pub type AddressTable = HashMap<String, String>;

pub struct AddressMap {
    table: ArcSwap<AddressTable>,
}

impl Default for AddressMap {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressMap {
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(AddressTable::new()),
        }
    }

    /// Bitcoin address for `recipient`, or "" if unknown
    pub fn lookup(&self, recipient: &str) -> String {
        self.table
            .load()
            .get(recipient)
            .cloned()
            .unwrap_or_default()
    }

    /// The currently published table; unaffected by later refreshes
    pub fn snapshot(&self) -> Arc<AddressTable> {
        self.table.load_full()
    }

    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.load().is_empty()
    }

    /// Rebuild the table from the newest `limit` pairs and publish it.
    ///
    /// The first mapping seen for a recipient wins. On a query failure the
    /// previous table stays published.
    pub fn refresh(&self, source: &dyn AddressPairSource, limit: usize) -> Result<usize, QueryError> {
        let pairs = source.address_pairs(limit)?;

        let mut table = AddressTable::with_capacity(pairs.len());
        for (stx_addr, btc_addr) in pairs {
            let btc_addr = btc_addr.trim_matches('"').to_string();
            debug!("Trying to add mapping stx={} btc={}", stx_addr, btc_addr);
            if let Some(old) = table.get(&stx_addr) {
                debug!("Skipping mapping stx={} old={}", stx_addr, old);
                continue;
            }
            table.insert(stx_addr, btc_addr);
        }

        let count = table.len();
        self.table.store(Arc::new(table));
        info!("Miner address map refreshed with {} entries", count);
        Ok(count)
    }
}
