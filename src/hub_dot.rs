//! Graphviz rendering of an annotated bid graph
//!
//! One cluster per burn height, one node per commit, one edge from each
//! commit's resolved parent. Styling:
//! - won: blue, thick border
//! - next tip: green border
//! - tip: thickest border
//! - canonical: solid instead of dashed
//! - edges skipping the previous rendered height: red
//! - canonical edges: blue, thick

use std::fmt::Write;

use indexmap::IndexMap;

use crate::hub_commit_store::Bid;
use crate::hub_fee_aggregator::FeeSummary;
use crate::hub_fork_resolver::{AnnotatedGraph, BidStatus};
use crate::hub_interface::BurnHeight;

const BTC_BLOCK_URL: &str = "https://mempool.space/block/";
const BTC_TX_URL: &str = "https://mempool.space/tx/";
const STACKS_BLOCK_URL: &str = "https://explorer.hiro.so/block/0x";

const PASTEL_COLORS: [&str; 20] = [
    "#E0BBE4", "#957DAD", "#D291BC", "#FEC8D8", "#FFDFD3", // purples, pinks
    "#D9EEF5", "#B6E3F4", "#B5EAD7", "#C7F4F4", "#E8F3F8", // light blues, grays
    "#F4F1BB", "#D4E09B", "#99C4C8", "#F2D0A9", "#E9D5DA", // yellows, peaches
    "#D8E2DC", "#FFE5D9", "#FFCAD4", "#F4ACB7", "#9D8189", // greens, reds
];

/// Ordered attribute list of a node or edge
struct Attributes(IndexMap<&'static str, String>);

impl Attributes {
    fn new() -> Self {
        let mut attrs = IndexMap::new();
        attrs.insert("color", "black".to_string());
        attrs.insert("penwidth", "1".to_string());
        Self(attrs)
    }

    fn set(&mut self, key: &'static str, value: impl Into<String>) {
        self.0.insert(key, value.into());
    }

    fn fmt(&self) -> String {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!("[{}]", parts.join(", "))
    }
}

/// Stable pastel fill color for a miner
pub fn sender_color(sender: &str) -> &'static str {
    let hash = blake3::hash(sender.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    let index = u64::from_be_bytes(prefix) % PASTEL_COLORS.len() as u64;
    PASTEL_COLORS[index as usize]
}

fn node_attributes(bid: &Bid, status: &BidStatus) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.set("URL", format!("\"{}{}\"", BTC_TX_URL, bid.txid));

    let short_sender: String = bid.sender.chars().take(8).collect();
    let label = format!(
        "⛏️ {}, \\n🔗 {}\\n💸 {}K sats",
        short_sender,
        status.stacks_height,
        bid.spend / 1000
    );

    if status.won {
        attrs.set("color", "blue");
        attrs.set("penwidth", "4");
    }
    if status.next_tip {
        attrs.set("color", "green");
    }
    if status.tip {
        attrs.set("penwidth", "8");
    }
    if status.canonical {
        attrs.set("style", "\"filled,solid\"");
    }
    if !status.block_hash.is_empty() {
        attrs.set("URL", format!("\"{}{}\"", STACKS_BLOCK_URL, status.block_hash));
    }
    attrs.set("label", format!("\"{}\"", label));
    attrs.set("fillcolor", format!("\"{}\"", sender_color(&bid.sender)));
    attrs
}

fn edge_attributes(status: &BidStatus, parent: &Bid, last_height: Option<BurnHeight>) -> Attributes {
    let mut attrs = Attributes::new();
    if let Some(last_height) = last_height {
        if parent.block_height != last_height {
            attrs.set("color", "red");
            attrs.set("penwidth", "4");
        }
    }
    if status.canonical {
        attrs.set("color", "blue");
        attrs.set("penwidth", "8");
    }
    attrs
}

/// Render the window as a DOT digraph
pub fn render(annotated: &AnnotatedGraph, fees: &FeeSummary) -> String {
    let graph = annotated.graph();
    let (low, high) = graph.window();

    let mut g = String::new();
    g.push_str("digraph block_commits {\n");
    g.push_str("\tgraph [ratio=compress size=\"18,36\" fontsize=28 fontname=monospace]\n");
    g.push_str("\tnode [color=black fontsize=24 fontname=monospace fillcolor=white penwidth=1 style=\"filled,dashed\"]\n");
    g.push_str("\tedge [color=black penwidth=1]\n");

    let mut last_height: Option<BurnHeight> = None;
    for height in low..=high {
        let bids = graph.at_height(height);
        if bids.is_empty() {
            continue;
        }

        // writing to a String can't fail
        let _ = writeln!(g, "\tsubgraph cluster_block_{} {{", height);
        let _ = writeln!(g, "\t\tURL=\"{}{}\"", BTC_BLOCK_URL, height);

        for &idx in bids {
            let bid = graph.bid(idx);
            let status = annotated.status(idx);
            let _ = writeln!(
                g,
                "\t\tcommit_{} {}",
                bid.txid,
                node_attributes(bid, status).fmt()
            );

            if let Some(parent_idx) = graph.parent_of(idx) {
                let parent = graph.bid(parent_idx);
                let _ = writeln!(
                    g,
                    "\t\tcommit_{} -> commit_{} {}",
                    parent.txid,
                    bid.txid,
                    edge_attributes(status, parent, last_height).fmt()
                );
            }
        }

        let _ = writeln!(
            g,
            "\t\tlabel = \"₿ {}\\n💰 {}K sats\"",
            height,
            fees.height_spend(height) / 1000
        );
        g.push_str("\t}\n");
        last_height = Some(height);
    }
    g.push_str("}\n");

    g
}
