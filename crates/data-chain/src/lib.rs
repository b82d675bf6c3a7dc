//! Sub-block layer for quorumchain
//!
//! Delegates execute transaction batches into signed sub-blocks; masternodes
//! collect one sub-block per worker slot and derive the block hash.
//!
//! # Key Types
//!
//! - [`SubBlockContender`]: a delegate's signed, executed batch for one slot
//! - [`SubBlockAssembler`]: per-round slot table that yields the block hash
//! - [`SubBlockBuilder`]: delegate-side batching and signing
//! - [`WorkerCommand`]: consensus-to-worker control channel

pub mod assembler;
pub mod delegate;
pub mod error;
pub mod messages;
pub mod sub_block;

// Re-exports
pub use assembler::{AddOutcome, SubBlockAssembler};
pub use delegate::{run_delegate, Executor, KeyValueExecutor, SubBlockBuilder};
pub use error::DclError;
pub use messages::WorkerCommand;
pub use sub_block::{verify_block_sub_blocks, SubBlockContender};
