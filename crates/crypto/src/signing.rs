//! Signing and verification contracts.
//!
//! Components never touch key material directly: they sign through a
//! [`Signer`] and check peers through a [`SignatureVerifier`]. The Ed25519
//! implementations here are what the node wires in; tests may substitute
//! their own.

use crate::ed25519::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};
use crate::error::CryptoError;
use quorumchain_types::NodeId;
use serde::{Deserialize, Serialize};

/// A signature together with the id of the node that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSignature {
    /// Signing node
    pub signer: NodeId,
    /// Raw signature bytes
    pub bytes: Vec<u8>,
}

/// Produces signatures on behalf of the local node
pub trait Signer: Send + Sync {
    /// Id of the signing node
    fn node_id(&self) -> NodeId;

    /// Sign `msg`
    fn sign(&self, msg: &[u8]) -> NodeSignature;
}

/// Checks signatures produced by other nodes
pub trait SignatureVerifier: Send + Sync {
    /// Verify `sig` over `msg`.
    ///
    /// # Errors
    ///
    /// Returns an error if the signer id is not a valid key, the signature
    /// is malformed, or it does not verify.
    fn verify(&self, msg: &[u8], sig: &NodeSignature) -> Result<(), CryptoError>;
}

/// [`Signer`] backed by an Ed25519 key pair
#[derive(Debug, Clone)]
pub struct Ed25519Signer {
    keypair: Ed25519KeyPair,
}

impl Ed25519Signer {
    /// Wrap a key pair
    pub fn new(keypair: Ed25519KeyPair) -> Self {
        Self { keypair }
    }
}

impl Signer for Ed25519Signer {
    fn node_id(&self) -> NodeId {
        self.keypair.node_id()
    }

    fn sign(&self, msg: &[u8]) -> NodeSignature {
        NodeSignature {
            signer: self.keypair.node_id(),
            bytes: self.keypair.sign(msg).to_bytes().to_vec(),
        }
    }
}

/// [`SignatureVerifier`] that treats node ids as Ed25519 keys
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, msg: &[u8], sig: &NodeSignature) -> Result<(), CryptoError> {
        let key = Ed25519PublicKey::from_node_id(&sig.signer)?;
        let signature = Ed25519Signature::from_slice(&sig.bytes)?;
        if key.verify(msg, &signature) {
            Ok(())
        } else {
            Err(CryptoError::VerificationFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signer_verifier_roundtrip() {
        let signer = Ed25519Signer::new(Ed25519KeyPair::generate(&mut rand::thread_rng()));
        let sig = signer.sign(b"payload");
        assert_eq!(sig.signer, signer.node_id());
        assert!(Ed25519Verifier.verify(b"payload", &sig).is_ok());
    }

    #[test]
    fn test_tampered_message_rejected() {
        let signer = Ed25519Signer::new(Ed25519KeyPair::generate(&mut rand::thread_rng()));
        let sig = signer.sign(b"payload");
        assert_eq!(
            Ed25519Verifier.verify(b"other", &sig),
            Err(CryptoError::VerificationFailed)
        );
    }

    #[test]
    fn test_wrong_signer_rejected() {
        let a = Ed25519Signer::new(Ed25519KeyPair::generate(&mut rand::thread_rng()));
        let b = Ed25519Signer::new(Ed25519KeyPair::generate(&mut rand::thread_rng()));
        let mut sig = a.sign(b"payload");
        sig.signer = b.node_id();
        assert!(Ed25519Verifier.verify(b"payload", &sig).is_err());
    }

    #[test]
    fn test_truncated_signature_rejected() {
        let signer = Ed25519Signer::new(Ed25519KeyPair::generate(&mut rand::thread_rng()));
        let mut sig = signer.sign(b"payload");
        sig.bytes.truncate(32);
        assert!(matches!(
            Ed25519Verifier.verify(b"payload", &sig),
            Err(CryptoError::InvalidSignature { .. })
        ));
    }
}
