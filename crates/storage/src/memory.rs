//! In-memory implementation of BlockStore and StateStore
//!
//! This implementation is for tests and local runs. It stores everything
//! in memory behind `parking_lot::RwLock`s.
//!
//! # Lock Ordering
//!
//! If both locks must be held they are acquired `chain` then `state`. No
//! operation currently needs both.

use crate::blocks::BlockStore;
use crate::error::{Result, StorageError};
use crate::state::StateStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use quorumchain_types::{BlockData, BlockIndexEntry, Hash};
use std::collections::{BTreeMap, HashMap};

/// Committed blocks plus the hash index, under one lock
#[derive(Default)]
struct ChainState {
    blocks: BTreeMap<u64, BlockData>,
    by_hash: HashMap<Hash, u64>,
}

impl ChainState {
    fn tip(&self) -> BlockData {
        self.blocks
            .values()
            .next_back()
            .cloned()
            .unwrap_or_else(BlockData::genesis)
    }
}

/// Committed key-values plus buffered writes (`None` = pending delete)
#[derive(Default)]
struct KvState {
    committed: BTreeMap<Vec<u8>, Vec<u8>>,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

/// In-memory block and state store
#[derive(Default)]
pub struct InMemoryStore {
    chain: RwLock<ChainState>,
    state: RwLock<KvState>,
}

impl InMemoryStore {
    /// Create an empty store (tip = genesis)
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed blocks, excluding genesis
    pub fn block_count(&self) -> usize {
        self.chain.read().blocks.len()
    }

    /// Number of committed state keys
    pub fn state_len(&self) -> usize {
        self.state.read().committed.len()
    }
}

#[async_trait]
impl BlockStore for InMemoryStore {
    async fn put_block(&self, block: BlockData) -> Result<()> {
        let mut chain = self.chain.write();
        let tip = chain.tip();

        if block.block_num != tip.block_num + 1 {
            return Err(StorageError::NonSequential {
                expected: tip.block_num + 1,
                actual: block.block_num,
            });
        }
        if block.previous_hash != tip.block_hash {
            return Err(StorageError::ParentMismatch {
                block_num: block.block_num,
                tip: tip.block_hash,
                parent: block.previous_hash,
            });
        }

        chain.by_hash.insert(block.block_hash, block.block_num);
        chain.blocks.insert(block.block_num, block);
        Ok(())
    }

    async fn get_block_by_number(&self, block_num: u64) -> Result<Option<BlockData>> {
        if block_num == 0 {
            return Ok(Some(BlockData::genesis()));
        }
        Ok(self.chain.read().blocks.get(&block_num).cloned())
    }

    async fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<BlockData>> {
        if hash.is_zero() {
            return Ok(Some(BlockData::genesis()));
        }
        let chain = self.chain.read();
        Ok(chain
            .by_hash
            .get(hash)
            .and_then(|num| chain.blocks.get(num))
            .cloned())
    }

    async fn number_for_hash(&self, hash: &Hash) -> Result<Option<u64>> {
        if hash.is_zero() {
            return Ok(Some(0));
        }
        Ok(self.chain.read().by_hash.get(hash).copied())
    }

    async fn latest_block(&self) -> Result<BlockData> {
        Ok(self.chain.read().tip())
    }

    async fn index_entries_after(&self, after: u64, limit: usize) -> Result<Vec<BlockIndexEntry>> {
        let chain = self.chain.read();
        Ok(chain
            .blocks
            .range(after.saturating_add(1)..)
            .take(limit)
            .map(|(_, block)| block.index_entry())
            .collect())
    }
}

impl StateStore for InMemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let state = self.state.read();
        if let Some(pending) = state.pending.get(key) {
            return Ok(pending.clone());
        }
        Ok(state.committed.get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.state
            .write()
            .pending
            .insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.state.write().pending.insert(key.to_vec(), None);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut state = self.state.write();
        let pending = std::mem::take(&mut state.pending);
        for (key, value) in pending {
            match value {
                Some(value) => {
                    state.committed.insert(key, value);
                }
                None => {
                    state.committed.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn rollback(&self) {
        self.state.write().pending.clear();
    }

    fn iter_range(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let state = self.state.read();
        Ok(state
            .committed
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{commit_block, CommitPath};
    use quorumchain_types::{NodeId, StateWrite, SubBlock, TransactionData};

    fn block(num: u64, prev: Hash, writes: Vec<StateWrite>, status: u8) -> BlockData {
        let sub_block = SubBlock {
            slot_index: 0,
            input_hash: Hash::compute(&num.to_be_bytes()),
            merkle_root: Hash::compute(&[num as u8, status]),
            signer: NodeId::from_bytes([1; 32]),
            signature: vec![],
            transactions: vec![TransactionData::new(vec![], status, writes)],
        };
        BlockData::new(num, prev, vec![NodeId::from_bytes([9; 32])], vec![sub_block])
    }

    #[tokio::test]
    async fn test_empty_store_tip_is_genesis() {
        let store = InMemoryStore::new();
        let tip = store.latest_block().await.unwrap();
        assert_eq!(tip.block_num, 0);
        assert_eq!(store.number_for_hash(&Hash::ZERO).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_put_block_enforces_order() {
        let store = InMemoryStore::new();
        let b1 = block(1, Hash::ZERO, vec![], 0);
        store.put_block(b1.clone()).await.unwrap();

        let skip = block(3, b1.block_hash, vec![], 0);
        assert!(matches!(
            store.put_block(skip).await,
            Err(StorageError::NonSequential {
                expected: 2,
                actual: 3
            })
        ));

        let wrong_parent = block(2, Hash::compute(b"other"), vec![], 0);
        assert!(matches!(
            store.put_block(wrong_parent).await,
            Err(StorageError::ParentMismatch { block_num: 2, .. })
        ));

        let b2 = block(2, b1.block_hash, vec![], 0);
        store.put_block(b2.clone()).await.unwrap();
        assert_eq!(store.latest_block().await.unwrap(), b2);
        assert_eq!(store.get_block_by_hash(&b1.block_hash).await.unwrap(), Some(b1));
    }

    #[tokio::test]
    async fn test_index_entries_after() {
        let store = InMemoryStore::new();
        let mut prev = Hash::ZERO;
        for n in 1..=5 {
            let b = block(n, prev, vec![], 0);
            prev = b.block_hash;
            store.put_block(b).await.unwrap();
        }
        let entries = store.index_entries_after(2, 10).await.unwrap();
        let nums: Vec<u64> = entries.iter().map(|e| e.block_num).collect();
        assert_eq!(nums, vec![3, 4, 5]);
        assert_eq!(store.index_entries_after(0, 2).await.unwrap().len(), 2);
        assert!(store.index_entries_after(5, 10).await.unwrap().is_empty());
    }

    #[test]
    fn test_state_buffering_and_range() {
        let store = InMemoryStore::new();
        store.set(b"acct/a", b"1").unwrap();
        store.set(b"acct/b", b"2").unwrap();
        store.set(b"other", b"3").unwrap();
        assert_eq!(store.get(b"acct/a").unwrap(), Some(b"1".to_vec()));
        assert!(store.iter_range(b"acct/").unwrap().is_empty());

        store.commit().unwrap();
        let range = store.iter_range(b"acct/").unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].0, b"acct/a".to_vec());

        store.delete(b"acct/a").unwrap();
        assert_eq!(store.get(b"acct/a").unwrap(), None);
        store.rollback();
        assert_eq!(store.get(b"acct/a").unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_commit_block_applies_successful_writes_only() {
        let store = InMemoryStore::new();
        let ok = block(1, Hash::ZERO, vec![StateWrite::set(b"k".to_vec(), b"v".to_vec())], 0);
        commit_block(&store, &store, ok.clone(), CommitPath::Consensus)
            .await
            .unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));

        let failed_tx = block(2, ok.block_hash, vec![StateWrite::delete(b"k".to_vec())], 1);
        commit_block(&store, &store, failed_tx, CommitPath::Catchup)
            .await
            .unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.block_count(), 2);
    }

    #[tokio::test]
    async fn test_commit_block_rolls_back_on_failure() {
        let store = InMemoryStore::new();
        let out_of_order = block(
            2,
            Hash::ZERO,
            vec![StateWrite::set(b"k".to_vec(), b"v".to_vec())],
            0,
        );
        assert!(commit_block(&store, &store, out_of_order, CommitPath::Consensus)
            .await
            .is_err());
        assert_eq!(store.get(b"k").unwrap(), None);
        assert_eq!(store.block_count(), 0);
    }
}
