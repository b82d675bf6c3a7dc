//! StateStore trait: the key-value state written by committed transactions
//!
//! Writes are buffered until [`StateStore::commit`]; reads see buffered
//! writes. Only the commit path (consensus or catchup) writes.

use crate::error::Result;
use quorumchain_metrics::storage::STORAGE_STATE_WRITES;
use quorumchain_types::BlockData;

/// Key-value state collaborator
pub trait StateStore: Send + Sync {
    /// Read a key, including uncommitted writes
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Buffer a write
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Buffer a delete
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Make all buffered writes durable
    fn commit(&self) -> Result<()>;

    /// Drop all buffered writes
    fn rollback(&self);

    /// All committed entries whose key starts with `prefix`, ascending
    fn iter_range(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// Buffer the state delta of every successful transaction in `block`.
///
/// Failed transactions carry no effect. Does not commit; returns the number
/// of writes buffered.
pub fn apply_block_state(state: &dyn StateStore, block: &BlockData) -> Result<usize> {
    let mut applied = 0;
    for tx in block.transactions().filter(|tx| tx.is_success()) {
        for write in &tx.state_writes {
            match &write.value {
                Some(value) => state.set(&write.key, value)?,
                None => state.delete(&write.key)?,
            }
            applied += 1;
        }
    }
    STORAGE_STATE_WRITES.inc_by(applied as f64);
    Ok(applied)
}
