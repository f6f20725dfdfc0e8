// SQLite-backed sources reading a stacks node's data dir
//
// Opens two databases read-only:
// - burnchain/sortition/marf.sqlite: block_commits and snapshots
// - chainstate/vm/index.sqlite: payments and nakamoto_block_headers, with the
//   sortition db attached as `marf` for the address pair join
//
// sqlx is async; every call is driven to completion on a private
// current-thread tokio runtime, so the source traits stay synchronous.
// Several numeric columns are stored as TEXT by the node and are CAST in SQL.

use std::path::Path;

use log::{debug, info};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::runtime::{Builder, Runtime};

use crate::hub_config::{CHAINSTATE_DB, SORTITION_DB};
use crate::hub_interface::{
    AddressPairSource, AncestorChainSource, AncestorIter, AncestorRow, BlockReward, BurnHeight,
    ChainHeadOracle, CommitRow, CommitRowSource, MicroStx, PositionalKey, QueryError,
    RewardLookup, SortitionWinner, WinnerOracle,
};

const MAX_COMMIT_HEIGHT: &str = "SELECT MAX(block_height) FROM block_commits";

const COMMIT_ROWS: &str = "SELECT
        burn_header_hash,
        txid,
        apparent_sender,
        sortition_id,
        CAST(vtxindex AS INTEGER),
        CAST(block_height AS INTEGER),
        CAST(burn_fee AS INTEGER),
        CAST(parent_block_ptr AS INTEGER),
        CAST(parent_vtxindex AS INTEGER),
        memo
    FROM block_commits
    WHERE block_height BETWEEN ? AND ?
    ORDER BY block_height ASC";

const WINNER_AT: &str = "SELECT winning_block_txid, CAST(canonical_stacks_tip_height AS INTEGER), consensus_hash
    FROM snapshots WHERE block_height = ?";

const BLOCK_REWARD: &str =
    "SELECT block_hash, CAST(coinbase AS INTEGER) FROM payments WHERE consensus_hash = ?";

const TENURE_FEES: &str = "SELECT CAST(tenure_tx_fees AS INTEGER) FROM nakamoto_block_headers
    WHERE burn_header_height = ? ORDER BY height_in_tenure DESC LIMIT 1";

const CURRENT_HEAD: &str =
    "SELECT index_block_hash FROM payments ORDER BY stacks_block_height DESC LIMIT 1";

const BLOCK_ANCESTORS: &str = "WITH RECURSIVE block_ancestors(burn_header_height, parent_block_id, address, burnchain_commit_burn, stx_reward) AS (
        SELECT nakamoto_block_headers.burn_header_height, nakamoto_block_headers.parent_block_id, payments.address, payments.burnchain_commit_burn,
            (CAST(payments.coinbase AS INTEGER) + CAST(payments.tx_fees_anchored AS INTEGER) + CAST(payments.tx_fees_streamed AS INTEGER))
        FROM nakamoto_block_headers JOIN payments ON nakamoto_block_headers.index_block_hash = payments.index_block_hash
        WHERE payments.index_block_hash = ?
        UNION ALL
        SELECT nakamoto_block_headers.burn_header_height, nakamoto_block_headers.parent_block_id, payments.address, payments.burnchain_commit_burn,
            (CAST(payments.coinbase AS INTEGER) + CAST(payments.tx_fees_anchored AS INTEGER) + CAST(payments.tx_fees_streamed AS INTEGER))
        FROM (nakamoto_block_headers JOIN payments ON nakamoto_block_headers.index_block_hash = payments.index_block_hash)
            JOIN block_ancestors ON nakamoto_block_headers.index_block_hash = block_ancestors.parent_block_id
    )
    SELECT CAST(burn_header_height AS INTEGER), parent_block_id, address, CAST(burnchain_commit_burn AS INTEGER), stx_reward
    FROM block_ancestors LIMIT ?";

const ADDRESS_PAIRS: &str = "SELECT DISTINCT ifnull(payments.recipient, payments.address), marf.block_commits.apparent_sender
    FROM nakamoto_block_headers
        LEFT JOIN payments ON nakamoto_block_headers.index_block_hash = payments.index_block_hash
        LEFT JOIN marf.snapshots ON nakamoto_block_headers.consensus_hash = marf.snapshots.consensus_hash
        LEFT JOIN marf.block_commits ON marf.block_commits.sortition_id = marf.snapshots.sortition_id
            AND marf.block_commits.block_header_hash = marf.snapshots.winning_stacks_block_hash
    ORDER BY nakamoto_block_headers.block_height DESC
    LIMIT ?";

type CommitTuple = (
    String,
    String,
    String,
    String,
    i64,
    i64,
    i64,
    i64,
    i64,
    Option<String>,
);

/// Read-only view of a stacks node's sortition and chainstate databases
pub struct SqliteBackend {
    sortition: SqlitePool,
    chainstate: SqlitePool,
    // declared last so the pools are dropped while it is still running
    runtime: Runtime,
}

impl SqliteBackend {
    /// Open both databases under a node's data dir
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, QueryError> {
        let data_dir = data_dir.as_ref();
        Self::open_paths(
            &data_dir.join(SORTITION_DB),
            &data_dir.join(CHAINSTATE_DB),
        )
    }

    pub fn open_paths(sortition_path: &Path, chainstate_path: &Path) -> Result<Self, QueryError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| QueryError::Storage {
                reason: format!("unable to start query runtime: {}", e),
            })?;

        let sortition_options = SqliteConnectOptions::new()
            .filename(sortition_path)
            .read_only(true);
        let chainstate_options = SqliteConnectOptions::new()
            .filename(chainstate_path)
            .read_only(true);
        let attach_path = sortition_path.to_string_lossy().into_owned();

        let (sortition, chainstate) = runtime.block_on(async {
            let sortition = SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(sortition_options)
                .await?;

            // ATTACH is per connection, so keep to one
            let chainstate = SqlitePoolOptions::new()
                .max_connections(1)
                .after_connect(move |conn, _meta| {
                    let attach_path = attach_path.clone();
                    Box::pin(async move {
                        sqlx::query("ATTACH DATABASE ? AS marf")
                            .bind(attach_path)
                            .execute(conn)
                            .await?;
                        Ok(())
                    })
                })
                .connect_with(chainstate_options)
                .await?;

            Ok::<_, sqlx::Error>((sortition, chainstate))
        })?;

        info!(
            "Opened sortition db {} and chainstate db {}",
            sortition_path.display(),
            chainstate_path.display()
        );

        Ok(Self {
            sortition,
            chainstate,
            runtime,
        })
    }
}

fn sql_int(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn unsigned(query: &'static str, field: &str, v: i64) -> Result<u64, QueryError> {
    u64::try_from(v).map_err(|_| QueryError::Malformed {
        query,
        reason: format!("negative {}: {}", field, v),
    })
}

impl CommitRowSource for SqliteBackend {
    fn max_height(&self) -> Result<Option<BurnHeight>, QueryError> {
        let (max,): (Option<i64>,) = self
            .runtime
            .block_on(sqlx::query_as(MAX_COMMIT_HEIGHT).fetch_one(&self.sortition))?;
        max.map(|h| unsigned("max_height", "block_height", h))
            .transpose()
    }

    fn commit_rows(&self, low: BurnHeight, high: BurnHeight) -> Result<Vec<CommitRow>, QueryError> {
        let rows: Vec<CommitTuple> = self.runtime.block_on(
            sqlx::query_as(COMMIT_ROWS)
                .bind(sql_int(low))
                .bind(sql_int(high))
                .fetch_all(&self.sortition),
        )?;
        debug!("Fetched {} block commits for {}..={}", rows.len(), low, high);

        rows.into_iter()
            .map(
                |(hash, txid, sender, sortition_id, vtx, height, fee, parent_ptr, parent_vtx, memo)| {
                    let vtxindex = u32::try_from(vtx).map_err(|_| QueryError::Malformed {
                        query: "commit_rows",
                        reason: format!("vtxindex out of range: {}", vtx),
                    })?;
                    let parent_vtxindex =
                        u32::try_from(parent_vtx).map_err(|_| QueryError::Malformed {
                            query: "commit_rows",
                            reason: format!("parent_vtxindex out of range: {}", parent_vtx),
                        })?;
                    let key = PositionalKey::new(unsigned("commit_rows", "block_height", height)?, vtxindex);
                    let parent_key = PositionalKey::new(
                        unsigned("commit_rows", "parent_block_ptr", parent_ptr)?,
                        parent_vtxindex,
                    );

                    let mut row = CommitRow::new(&txid, key, parent_key)
                        .with_sender(&sender)
                        .with_spend(unsigned("commit_rows", "burn_fee", fee)?, &sortition_id);
                    row.burn_header_hash = hash;
                    row.memo = memo.unwrap_or_default();
                    Ok(row)
                },
            )
            .collect()
    }
}

impl WinnerOracle for SqliteBackend {
    fn winner_at(&self, height: BurnHeight) -> Result<Option<SortitionWinner>, QueryError> {
        let row: Option<(String, i64, String)> = self.runtime.block_on(
            sqlx::query_as(WINNER_AT)
                .bind(sql_int(height))
                .fetch_optional(&self.sortition),
        )?;
        row.map(|(winning_txid, stacks_height, consensus_hash)| {
            Ok(SortitionWinner {
                winning_txid,
                stacks_height: unsigned("winner_at", "canonical_stacks_tip_height", stacks_height)?,
                consensus_hash,
            })
        })
        .transpose()
    }
}

impl RewardLookup for SqliteBackend {
    fn block_reward(&self, consensus_hash: &str) -> Result<Option<BlockReward>, QueryError> {
        let row: Option<(String, i64)> = self.runtime.block_on(
            sqlx::query_as(BLOCK_REWARD)
                .bind(consensus_hash)
                .fetch_optional(&self.chainstate),
        )?;
        row.map(|(block_hash, coinbase)| {
            Ok(BlockReward {
                block_hash,
                coinbase: unsigned("block_reward", "coinbase", coinbase)?,
            })
        })
        .transpose()
    }

    fn tenure_fees(&self, height: BurnHeight) -> Result<Option<MicroStx>, QueryError> {
        let row: Option<(i64,)> = self.runtime.block_on(
            sqlx::query_as(TENURE_FEES)
                .bind(sql_int(height))
                .fetch_optional(&self.chainstate),
        )?;
        row.map(|(fees,)| unsigned("tenure_fees", "tenure_tx_fees", fees))
            .transpose()
    }
}

impl ChainHeadOracle for SqliteBackend {
    fn current_head(&self) -> Result<Option<String>, QueryError> {
        let row: Option<(String,)> = self
            .runtime
            .block_on(sqlx::query_as(CURRENT_HEAD).fetch_optional(&self.chainstate))?;
        Ok(row.map(|(head,)| head))
    }
}

impl AncestorChainSource for SqliteBackend {
    /// The recursive query is bounded by `limit`, so rows are fetched in one go
    fn ancestors(&self, start: &str, limit: usize) -> Result<AncestorIter<'_>, QueryError> {
        let rows: Vec<(i64, String, String, i64, i64)> = self.runtime.block_on(
            sqlx::query_as(BLOCK_ANCESTORS)
                .bind(start)
                .bind(sql_int(limit as u64))
                .fetch_all(&self.chainstate),
        )?;
        debug!("Fetched {} ancestors of {}", rows.len(), start);

        let walk = rows
            .into_iter()
            .map(|(burn_height, parent_block_id, address, spend, reward)| {
                Ok(AncestorRow {
                    burn_height: unsigned("block_ancestors", "burn_header_height", burn_height)?,
                    parent_block_id,
                    address,
                    spend: unsigned("block_ancestors", "burnchain_commit_burn", spend)?,
                    reward: unsigned("block_ancestors", "stx_reward", reward)?,
                })
            });
        Ok(Box::new(walk))
    }
}

impl AddressPairSource for SqliteBackend {
    fn address_pairs(&self, limit: usize) -> Result<Vec<(String, String)>, QueryError> {
        let rows: Vec<(Option<String>, Option<String>)> = self.runtime.block_on(
            sqlx::query_as(ADDRESS_PAIRS)
                .bind(sql_int(limit as u64))
                .fetch_all(&self.chainstate),
        )?;
        // blocks without a payment or a matching commit have nothing to map
        Ok(rows
            .into_iter()
            .filter_map(|(recipient, sender)| Some((recipient?, sender?)))
            .collect())
    }
}
