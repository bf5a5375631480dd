// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Signature seam for the hybrid post-quantum scheme.
//!
//! The concrete algorithm (classical + lattice hybrid) lives outside this
//! workspace and is consumed through [`SignatureAlgorithm`]. Signatures are
//! *combined*: the serialized public key is appended to the raw signature so
//! the signer can be recovered from the signature alone.

use crate::hash::{keccak256_concat, Address, Hash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mimetype passed to signers for consensus-packet signatures.
pub const MIMETYPE_PROOF_OF_STAKE: &str = "application/x-lattica-proofofstake";

/// Signature seam errors.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("signature verification failed")]
    VerificationFailed,

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("no signer configured")]
    NoSigner,
}

/// An account the node can sign with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
}

impl Account {
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

/// Capability trait over the hybrid signature scheme.
///
/// Implementations must produce combined signatures from which the public
/// key (and therefore the signer's address) can be recovered.
pub trait SignatureAlgorithm: Send + Sync {
    /// Human-readable algorithm name, used in logs.
    fn name(&self) -> &'static str;

    /// Verify `signature` over `digest` against a serialized public key.
    fn verify(&self, public_key: &[u8], digest: &[u8], signature: &[u8]) -> bool;

    /// Recover the serialized public key embedded in a combined signature.
    fn public_key_from_signature(
        &self,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<Vec<u8>, SignatureError>;

    /// Map a serialized public key to its account address.
    fn public_key_to_address(&self, public_key: &[u8]) -> Address;
}

/// Capability trait for account-bound signing of consensus data.
///
/// Separated from [`SignatureAlgorithm`] so key material can live in an
/// external keystore while verification stays local.
pub trait PacketSigner: Send + Sync {
    /// The account this signer signs with.
    fn account(&self) -> Account;

    /// Sign `data` for `account` under the given mimetype.
    fn sign(
        &self,
        account: &Account,
        mimetype: &str,
        data: &[u8],
    ) -> Result<Vec<u8>, SignatureError>;
}

/// Deterministic development stand-in for the hybrid scheme.
///
/// Combined signature layout: `mac(32) ‖ public_key(32)` where
/// `mac = keccak256(public_key ‖ digest)` and `public_key = keccak256(seed)`.
/// Provides recoverability and round-trip verification for tests and the dev
/// node; it offers no cryptographic security.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevSignature;

impl DevSignature {
    pub const SIGNATURE_LENGTH: usize = 64;

    pub fn public_key(seed: &[u8; 32]) -> Vec<u8> {
        keccak256_concat(&[seed]).as_bytes().to_vec()
    }

    pub fn address_for_seed(seed: &[u8; 32]) -> Address {
        let public_key = Self::public_key(seed);
        DevSignature.public_key_to_address(&public_key)
    }

    pub fn sign_with_seed(seed: &[u8; 32], digest: &[u8]) -> Vec<u8> {
        let public_key = Self::public_key(seed);
        let mac = keccak256_concat(&[&public_key, digest]);
        let mut signature = Vec::with_capacity(Self::SIGNATURE_LENGTH);
        signature.extend_from_slice(mac.as_bytes());
        signature.extend_from_slice(&public_key);
        signature
    }
}

impl SignatureAlgorithm for DevSignature {
    fn name(&self) -> &'static str {
        "dev-keccak"
    }

    fn verify(&self, public_key: &[u8], digest: &[u8], signature: &[u8]) -> bool {
        if signature.len() != Self::SIGNATURE_LENGTH {
            return false;
        }
        let mac = keccak256_concat(&[public_key, digest]);
        signature[..32] == mac.as_bytes()[..] && signature[32..] == public_key[..]
    }

    fn public_key_from_signature(
        &self,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<Vec<u8>, SignatureError> {
        if signature.len() != Self::SIGNATURE_LENGTH {
            return Err(SignatureError::MalformedSignature(format!(
                "expected {} bytes, got {}",
                Self::SIGNATURE_LENGTH,
                signature.len()
            )));
        }
        let public_key = &signature[32..];
        if !self.verify(public_key, digest, signature) {
            return Err(SignatureError::VerificationFailed);
        }
        Ok(public_key.to_vec())
    }

    fn public_key_to_address(&self, public_key: &[u8]) -> Address {
        let digest: Hash = keccak256_concat(&[public_key]);
        Address::from_slice(&digest.as_bytes()[12..])
    }
}

/// A [`PacketSigner`] over a [`DevSignature`] seed, for tests and the dev node.
#[derive(Debug, Clone)]
pub struct DevSigner {
    seed: [u8; 32],
    account: Account,
}

impl DevSigner {
    pub fn new(seed: [u8; 32]) -> Self {
        let account = Account::new(DevSignature::address_for_seed(&seed));
        Self { seed, account }
    }
}

impl PacketSigner for DevSigner {
    fn account(&self) -> Account {
        self.account
    }

    fn sign(
        &self,
        account: &Account,
        _mimetype: &str,
        data: &[u8],
    ) -> Result<Vec<u8>, SignatureError> {
        if *account != self.account {
            return Err(SignatureError::SigningFailed(format!(
                "unknown account {:?}",
                account.address
            )));
        }
        Ok(DevSignature::sign_with_seed(&self.seed, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let seed = [7u8; 32];
        let digest = b"some digest bytes";
        let signature = DevSignature::sign_with_seed(&seed, digest);
        let public_key = DevSignature::public_key(&seed);
        assert!(DevSignature.verify(&public_key, digest, &signature));
        assert!(!DevSignature.verify(&public_key, b"other digest", &signature));
    }

    #[test]
    fn test_recover_public_key() {
        let seed = [1u8; 32];
        let digest = b"payload";
        let signature = DevSignature::sign_with_seed(&seed, digest);
        let recovered = DevSignature
            .public_key_from_signature(digest, &signature)
            .unwrap();
        assert_eq!(recovered, DevSignature::public_key(&seed));
        assert_eq!(
            DevSignature.public_key_to_address(&recovered),
            DevSignature::address_for_seed(&seed)
        );
    }

    #[test]
    fn test_malformed_signature_rejected() {
        let err = DevSignature
            .public_key_from_signature(b"digest", &[0u8; 10])
            .unwrap_err();
        assert!(matches!(err, SignatureError::MalformedSignature(_)));
    }

    #[test]
    fn test_dev_signer_binds_account() {
        let signer = DevSigner::new([9u8; 32]);
        let other = Account::new(Address::repeat_byte(0xAA));
        assert!(signer
            .sign(&other, MIMETYPE_PROOF_OF_STAKE, b"data")
            .is_err());
        assert!(signer
            .sign(&signer.account(), MIMETYPE_PROOF_OF_STAKE, b"data")
            .is_ok());
    }
}
