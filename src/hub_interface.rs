use thiserror::Error;

// all the same numeric type of some size to allow casting/interop
pub type BurnHeight = u64;
pub type StacksHeight = u64;
pub type VtxIndex = u32;
pub type Sats = u64;
pub type MicroStx = u64;

/// Bitcoin transaction id of a block commit
pub type Txid = String;

/// Micro-STX per STX
pub const MICRO_STX_PER_STX: f64 = 1_000_000.0;

/// Position of a commit on the burn chain: (burn height, vtxindex)
///
/// A commit names its parent this way because the parent's txid is not known
/// to the miner at the time the commit is built.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PositionalKey {
    pub height: BurnHeight,
    pub vtxindex: VtxIndex,
}

impl PositionalKey {
    pub fn new(height: BurnHeight, vtxindex: VtxIndex) -> Self {
        Self { height, vtxindex }
    }
}

/// One row of the sortition db's `block_commits` table
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct CommitRow {
    pub burn_header_hash: String,
    pub txid: Txid,
    pub sender: String,
    pub sortition_id: String,
    pub vtxindex: VtxIndex,
    pub block_height: BurnHeight,
    pub spend: Sats,
    pub parent_block_ptr: BurnHeight,
    pub parent_vtxindex: VtxIndex,
    pub memo: String,
}

impl CommitRow {
    pub fn new(txid: &str, key: PositionalKey, parent_key: PositionalKey) -> Self {
        Self {
            txid: txid.to_string(),
            vtxindex: key.vtxindex,
            block_height: key.height,
            parent_block_ptr: parent_key.height,
            parent_vtxindex: parent_key.vtxindex,
            ..Default::default()
        }
    }

    pub fn with_sender(mut self, sender: &str) -> Self {
        self.sender = sender.to_string();
        self
    }

    pub fn with_spend(mut self, spend: Sats, sortition_id: &str) -> Self {
        self.spend = spend;
        self.sortition_id = sortition_id.to_string();
        self
    }

    pub fn key(&self) -> PositionalKey {
        PositionalKey::new(self.block_height, self.vtxindex)
    }

    pub fn parent_key(&self) -> PositionalKey {
        PositionalKey::new(self.parent_block_ptr, self.parent_vtxindex)
    }
}

/// Sortition outcome recorded for a burn height
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct SortitionWinner {
    pub winning_txid: Txid,
    /// canonical stacks tip height as of this sortition (0 => none yet)
    pub stacks_height: StacksHeight,
    pub consensus_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BlockReward {
    pub block_hash: String,
    pub coinbase: MicroStx,
}

/// One step of the recursive ancestor walk over stacks block headers
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct AncestorRow {
    pub burn_height: BurnHeight,
    pub parent_block_id: String,
    pub address: String,
    pub spend: Sats,
    /// coinbase + anchored fees + streamed fees
    pub reward: MicroStx,
}

///
/// Errors
///

#[derive(Debug, Error)]
pub enum QueryError {
    /// Underlying store could not be read
    #[error("storage query failed: {reason}")]
    Storage { reason: String },

    /// A row came back in a shape we can't use
    #[error("malformed row from {query}: {reason}")]
    Malformed { query: &'static str, reason: String },
}

#[cfg(feature = "sqlite-backend")]
impl From<sqlx::Error> for QueryError {
    fn from(e: sqlx::Error) -> Self {
        QueryError::Storage {
            reason: e.to_string(),
        }
    }
}

///
/// Read-only sources (implemented by the sqlite and memory backends)
///

pub trait CommitRowSource {
    /// Highest burn height with a recorded block commit
    fn max_height(&self) -> Result<Option<BurnHeight>, QueryError>;

    /// All commits with `low <= block_height <= high`, ascending by height
    fn commit_rows(&self, low: BurnHeight, high: BurnHeight) -> Result<Vec<CommitRow>, QueryError>;
}

pub trait WinnerOracle {
    /// `Ok(None)` when there is no snapshot for `height`
    fn winner_at(&self, height: BurnHeight) -> Result<Option<SortitionWinner>, QueryError>;
}

pub trait RewardLookup {
    fn block_reward(&self, consensus_hash: &str) -> Result<Option<BlockReward>, QueryError>;

    /// Fees of the latest block in the tenure started at `height`
    fn tenure_fees(&self, height: BurnHeight) -> Result<Option<MicroStx>, QueryError>;
}

pub trait ChainHeadOracle {
    /// Index block hash of the newest block with a payment record
    fn current_head(&self) -> Result<Option<String>, QueryError>;
}

/// Lazy walk of the ancestor chain; each item may still fail mid-stream
pub type AncestorIter<'a> = Box<dyn Iterator<Item = Result<AncestorRow, QueryError>> + 'a>;

pub trait AncestorChainSource {
    /// Walks parent links starting at `start` (inclusive), yielding at most `limit` rows
    fn ancestors(&self, start: &str, limit: usize) -> Result<AncestorIter<'_>, QueryError>;
}

pub trait AddressPairSource {
    /// (stacks recipient, bitcoin sender) pairs, newest first
    fn address_pairs(&self, limit: usize) -> Result<Vec<(String, String)>, QueryError>;
}

// ============================================================================
// Event Logging System
// ============================================================================

/// Integrity and enrichment events emitted while building the commit graph
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Same txid seen twice in one window; the later row was dropped
    DuplicateBid { txid: Txid },
    /// Two commits claim the same position; `kept` stays addressable
    PositionalKeyCollision {
        key: PositionalKey,
        kept: Txid,
        ignored: Txid,
    },
    /// No commits at a height inside the window
    HeightWithoutBids { height: BurnHeight },
    /// No snapshot row for a height that has commits
    WinnerMissing { height: BurnHeight },
    /// Reward or fee lookup came back empty
    EnrichmentMiss {
        txid: Txid,
        height: BurnHeight,
        field: &'static str,
    },
    /// Commits at one height disagree on the sortition spend
    SortitionSpendMismatch {
        height: BurnHeight,
        expected: Sats,
        found: Sats,
        burn_header_hash: String,
    },
}

/// Trait for consuming events from the graph builder
pub trait EventSink {
    fn log(&mut self, event: Event);
}

/// No-op event sink (zero overhead)
pub struct NoOpSink;

impl EventSink for NoOpSink {
    #[inline(always)]
    fn log(&mut self, _event: Event) {}
}

/// Keeps every event, for tests and the simulator
#[derive(Default)]
pub struct CollectingSink {
    pub events: Vec<Event>,
}

impl EventSink for CollectingSink {
    fn log(&mut self, event: Event) {
        self.events.push(event);
    }
}
