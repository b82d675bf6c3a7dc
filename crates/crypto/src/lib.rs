//! Cryptographic primitives for quorumchain
//!
//! This crate provides:
//! - The Merkle engine that gives sub-blocks their content-addressed identity
//! - Ed25519 keys, with node ids derived from verification keys
//! - The `Signer` / `SignatureVerifier` contracts used by consensus

pub mod ed25519;
pub mod error;
pub mod merkle;
pub mod signing;

// Ed25519 exports
pub use ed25519::{Ed25519KeyPair, Ed25519PublicKey, Ed25519SecretKey, Ed25519Signature};

// Merkle exports
pub use merkle::{data_for_hash, verify_tree, verify_tree_from_hashes, MerkleTree};

// Signing contract exports
pub use signing::{Ed25519Signer, Ed25519Verifier, NodeSignature, SignatureVerifier, Signer};

// Error exports
pub use error::CryptoError;
