// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Transactions: the legacy format and the default-fee format.
//!
//! Default-fee transactions do not carry an explicit gas price. Instead they
//! carry a [`GasTier`]; the effective price is the tier multiplier applied to
//! [`GAS_TIER_BASE_PRICE`].

use crate::hash::{keccak256, keccak256_concat, Address, Hash, U256};
use crate::signature::{SignatureAlgorithm, SignatureError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Chain identifier baked into default-fee signing payloads.
pub const DEFAULT_CHAIN_ID: u64 = 100_100;

/// Upper bound on the free-form remarks field.
pub const MAX_REMARKS_LENGTH: usize = 64;

/// Intrinsic gas of a plain transfer.
pub const TX_GAS: u64 = 21_000;

/// Base gas price in wei for the default tier (1000 units / 21000 gas).
pub const GAS_TIER_BASE_PRICE: u128 = 47_619_047_619_047_600;

/// Fee tier of a default-fee transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GasTier {
    Default,
    Double,
    Penta,
    Deca,
}

impl GasTier {
    /// Price multiplier over [`GAS_TIER_BASE_PRICE`].
    pub fn multiplier(self) -> u128 {
        match self {
            GasTier::Default => 1,
            GasTier::Double => 2,
            GasTier::Penta => 5,
            GasTier::Deca => 10,
        }
    }

    /// Effective gas price in wei.
    pub fn price(self) -> U256 {
        U256::from(GAS_TIER_BASE_PRICE) * U256::from(self.multiplier())
    }
}

/// Element of an access list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTuple {
    pub address: Address,
    pub storage_keys: Vec<Hash>,
}

pub type AccessList = Vec<AccessTuple>;

/// The unsigned body of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxPayload {
    Legacy {
        nonce: u64,
        gas_price: U256,
        gas: u64,
        to: Option<Address>,
        value: U256,
        data: Vec<u8>,
    },
    DefaultFee {
        chain_id: u64,
        nonce: u64,
        gas: u64,
        max_gas_tier: GasTier,
        to: Option<Address>,
        value: U256,
        data: Vec<u8>,
        remarks: Vec<u8>,
        access_list: AccessList,
    },
}

/// A signed transaction. The signature is a combined hybrid signature over
/// the payload's signing hash; the sender is recovered from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub payload: TxPayload,
    pub signature: Vec<u8>,
}

impl Transaction {
    pub fn new(payload: TxPayload, signature: Vec<u8>) -> Self {
        Self { payload, signature }
    }

    /// Transaction hash over the full signed encoding.
    pub fn hash(&self) -> Hash {
        let encoded = bincode::serialize(self).expect("transaction encoding cannot fail");
        keccak256(&encoded)
    }

    /// Numeric type tag: 0 for legacy, 1 for default-fee.
    pub fn tx_type(&self) -> u8 {
        match self.payload {
            TxPayload::Legacy { .. } => 0,
            TxPayload::DefaultFee { .. } => 1,
        }
    }

    pub fn nonce(&self) -> u64 {
        match self.payload {
            TxPayload::Legacy { nonce, .. } | TxPayload::DefaultFee { nonce, .. } => nonce,
        }
    }

    pub fn gas(&self) -> u64 {
        match self.payload {
            TxPayload::Legacy { gas, .. } | TxPayload::DefaultFee { gas, .. } => gas,
        }
    }

    pub fn gas_price(&self) -> U256 {
        match &self.payload {
            TxPayload::Legacy { gas_price, .. } => *gas_price,
            TxPayload::DefaultFee { max_gas_tier, .. } => max_gas_tier.price(),
        }
    }

    pub fn to(&self) -> Option<Address> {
        match &self.payload {
            TxPayload::Legacy { to, .. } | TxPayload::DefaultFee { to, .. } => *to,
        }
    }

    pub fn value(&self) -> U256 {
        match &self.payload {
            TxPayload::Legacy { value, .. } | TxPayload::DefaultFee { value, .. } => *value,
        }
    }

    pub fn data(&self) -> &[u8] {
        match &self.payload {
            TxPayload::Legacy { data, .. } | TxPayload::DefaultFee { data, .. } => data,
        }
    }

    pub fn remarks(&self) -> &[u8] {
        match &self.payload {
            TxPayload::Legacy { .. } => &[],
            TxPayload::DefaultFee { remarks, .. } => remarks,
        }
    }

    /// Structural validity independent of state: remarks bound.
    pub fn verify_fields(&self) -> bool {
        self.remarks().len() <= MAX_REMARKS_LENGTH
    }

    /// The digest the sender signed.
    pub fn signing_hash(&self, chain_id: u64) -> Hash {
        signing_hash(&self.payload, chain_id)
    }
}

/// Signing digest of an unsigned payload: keccak256(chain_id ‖ payload).
pub fn signing_hash(payload: &TxPayload, chain_id: u64) -> Hash {
    let encoded = bincode::serialize(payload).expect("payload encoding cannot fail");
    keccak256_concat(&[&chain_id.to_be_bytes(), &encoded])
}

/// Recovers transaction senders for a given chain id and signature scheme.
#[derive(Clone)]
pub struct Signer {
    chain_id: u64,
    algorithm: Arc<dyn SignatureAlgorithm>,
}

impl Signer {
    pub fn new(chain_id: u64, algorithm: Arc<dyn SignatureAlgorithm>) -> Self {
        Self {
            chain_id,
            algorithm,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Recover the sender address from a transaction's combined signature.
    pub fn sender(&self, tx: &Transaction) -> Result<Address, SignatureError> {
        let digest = tx.signing_hash(self.chain_id);
        let public_key = self
            .algorithm
            .public_key_from_signature(digest.as_bytes(), &tx.signature)?;
        Ok(self.algorithm.public_key_to_address(&public_key))
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("chain_id", &self.chain_id)
            .field("algorithm", &self.algorithm.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::DevSignature;

    fn signed_transfer(seed: [u8; 32], nonce: u64, tier: GasTier) -> Transaction {
        let payload = TxPayload::DefaultFee {
            chain_id: DEFAULT_CHAIN_ID,
            nonce,
            gas: TX_GAS,
            max_gas_tier: tier,
            to: Some(Address::repeat_byte(0x22)),
            value: U256::from(1_000u64),
            data: Vec::new(),
            remarks: b"rent".to_vec(),
            access_list: Vec::new(),
        };
        let digest = signing_hash(&payload, DEFAULT_CHAIN_ID);
        let signature = DevSignature::sign_with_seed(&seed, digest.as_bytes());
        Transaction::new(payload, signature)
    }

    #[test]
    fn test_gas_tier_prices() {
        assert_eq!(GasTier::Default.price(), U256::from(GAS_TIER_BASE_PRICE));
        assert_eq!(
            GasTier::Deca.price(),
            U256::from(GAS_TIER_BASE_PRICE) * U256::from(10u64)
        );
    }

    #[test]
    fn test_sender_recovery() {
        let seed = [3u8; 32];
        let tx = signed_transfer(seed, 0, GasTier::Default);
        let signer = Signer::new(DEFAULT_CHAIN_ID, Arc::new(DevSignature));
        assert_eq!(
            signer.sender(&tx).unwrap(),
            DevSignature::address_for_seed(&seed)
        );
    }

    #[test]
    fn test_sender_recovery_rejects_wrong_chain() {
        let tx = signed_transfer([3u8; 32], 0, GasTier::Default);
        let signer = Signer::new(DEFAULT_CHAIN_ID + 1, Arc::new(DevSignature));
        assert!(signer.sender(&tx).is_err());
    }

    #[test]
    fn test_remarks_bound() {
        let mut tx = signed_transfer([1u8; 32], 0, GasTier::Double);
        assert!(tx.verify_fields());
        if let TxPayload::DefaultFee { remarks, .. } = &mut tx.payload {
            *remarks = vec![0u8; MAX_REMARKS_LENGTH + 1];
        }
        assert!(!tx.verify_fields());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let tx = signed_transfer([5u8; 32], 7, GasTier::Penta);
        let encoded = bincode::serialize(&tx).unwrap();
        let decoded: Transaction = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.hash(), tx.hash());
    }
}
