//! Sortition spend totals
//!
//! Sums the burn fee of every commit per sortition id and checks that the
//! commits of one burn height agree on their sortition's total.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use log::warn;

use crate::hub_commit_store::BidGraph;
use crate::hub_interface::{BurnHeight, Event, EventSink, Sats};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeeSummary {
    /// Total spend per sortition id
    pub by_sortition: HashMap<String, Sats>,
    /// Sortition spend of each height that has commits
    pub by_height: BTreeMap<BurnHeight, Sats>,
}

impl FeeSummary {
    pub fn sortition_spend(&self, sortition_id: &str) -> Sats {
        self.by_sortition.get(sortition_id).copied().unwrap_or(0)
    }

    pub fn height_spend(&self, height: BurnHeight) -> Sats {
        self.by_height.get(&height).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default, Clone)]
pub struct FeeAggregator;

impl FeeAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn aggregate(&self, graph: &BidGraph, events: &mut dyn EventSink) -> FeeSummary {
        let mut summary = FeeSummary::default();

        for bid in graph.bids() {
            *summary
                .by_sortition
                .entry(bid.sortition_id.clone())
                .or_insert(0) += bid.spend;
        }

        for height in graph.heights() {
            let mut expected: Option<Sats> = None;
            for &idx in graph.at_height(height) {
                let bid = graph.bid(idx);
                let spend = summary.sortition_spend(&bid.sortition_id);
                match expected {
                    None => expected = Some(spend),
                    Some(expected) if expected != spend => {
                        warn!(
                            "Previous sortition spend {} does not match spend {} in commit {}",
                            expected, spend, bid.burn_header_hash
                        );
                        events.log(Event::SortitionSpendMismatch {
                            height,
                            expected,
                            found: spend,
                            burn_header_hash: bid.burn_header_hash.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
            if let Some(spend) = expected {
                summary.by_height.insert(height, spend);
            }
        }

        summary
    }
}
