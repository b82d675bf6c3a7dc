//! Storage collaborators for quorumchain
//!
//! The consensus and catchup paths persist through two traits:
//! - [`BlockStore`]: the committed chain, appended strictly in order
//! - [`StateStore`]: the key-value state written by committed transactions
//!
//! [`commit_block`] is the single write path used by both. [`InMemoryStore`]
//! implements both traits for tests and local runs; a persistent backend
//! plugs in behind the same traits.

pub mod blocks;
pub mod error;
pub mod memory;
pub mod state;

pub use blocks::{commit_block, BlockStore, CommitPath};
pub use error::{Result, StorageError};
pub use memory::InMemoryStore;
pub use state::{apply_block_state, StateStore};
