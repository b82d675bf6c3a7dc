//! BlockStore trait and the block commit path
//!
//! The block store holds the committed chain. Blocks must be appended in
//! order: `block_num == tip + 1` and `previous_hash == tip hash`. An empty
//! store reports the implicit genesis block as its tip.

use crate::error::Result;
use crate::state::{apply_block_state, StateStore};
use async_trait::async_trait;
use quorumchain_metrics::storage::{STORAGE_COMMIT_FAILURES, STORAGE_COMMIT_LATENCY};
use quorumchain_types::{BlockData, BlockIndexEntry, Hash};
use std::time::Instant;
use tracing::{debug, error};

/// Committed-chain collaborator
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Append a block to the chain
    ///
    /// # Returns
    /// * `Err(StorageError::NonSequential)` if it does not extend the tip
    /// * `Err(StorageError::ParentMismatch)` if its parent is not the tip
    async fn put_block(&self, block: BlockData) -> Result<()>;

    /// Get a block by number (0 yields genesis)
    async fn get_block_by_number(&self, block_num: u64) -> Result<Option<BlockData>>;

    /// Get a block by hash
    async fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<BlockData>>;

    /// Block number for a hash, if stored (the zero hash maps to 0)
    async fn number_for_hash(&self, hash: &Hash) -> Result<Option<u64>>;

    /// Current tip, genesis when empty
    async fn latest_block(&self) -> Result<BlockData>;

    /// Index entries for blocks above `after`, ascending, at most `limit`
    async fn index_entries_after(&self, after: u64, limit: usize) -> Result<Vec<BlockIndexEntry>>;
}

/// Where a commit came from, for metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPath {
    /// Block agreed through notification quorum
    Consensus,
    /// Block fetched during catchup
    Catchup,
}

impl CommitPath {
    fn label(self) -> &'static str {
        match self {
            CommitPath::Consensus => "consensus",
            CommitPath::Catchup => "catchup",
        }
    }
}

/// Persist a block and its state delta.
///
/// State writes are buffered first, then the block is appended, then state
/// is committed. On any failure buffered state is rolled back and the error
/// returned; callers treat it as fatal.
pub async fn commit_block(
    blocks: &dyn BlockStore,
    state: &dyn StateStore,
    block: BlockData,
    path: CommitPath,
) -> Result<()> {
    let started = Instant::now();
    let block_num = block.block_num;

    let result = async {
        let writes = apply_block_state(state, &block)?;
        blocks.put_block(block).await?;
        state.commit()?;
        Ok::<_, crate::StorageError>(writes)
    }
    .await;

    match result {
        Ok(writes) => {
            STORAGE_COMMIT_LATENCY
                .with_label_values(&[path.label()])
                .observe(started.elapsed().as_secs_f64());
            debug!(block_num, writes, path = path.label(), "Block committed");
            Ok(())
        }
        Err(e) => {
            state.rollback();
            STORAGE_COMMIT_FAILURES.inc();
            error!(block_num, error = %e, path = path.label(), "Block commit failed");
            Err(e)
        }
    }
}
