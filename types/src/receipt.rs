// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Execution receipts, logs, and the 2048-bit log bloom.

use crate::hash::{keccak256, Address, Hash};
use serde::{Deserialize, Serialize};

/// Outcome of an executed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    Failed,
    Successful,
}

/// A log record emitted during execution. Block-level fields are stamped
/// once the containing block is sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,

    pub block_hash: Option<Hash>,
    pub block_number: Option<u64>,
    pub tx_hash: Option<Hash>,
    pub tx_index: Option<u32>,
}

impl Log {
    pub fn new(address: Address, topics: Vec<Hash>, data: Vec<u8>) -> Self {
        Self {
            address,
            topics,
            data,
            block_hash: None,
            block_number: None,
            tx_hash: None,
            tx_index: None,
        }
    }
}

/// 2048-bit bloom filter over log addresses and topics.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Bloom(pub [u8; 256]);

impl Bloom {
    pub fn zero() -> Self {
        Bloom([0u8; 256])
    }

    /// Set the three bloom bits for one item.
    pub fn accrue(&mut self, item: &[u8]) {
        let digest = keccak256(item);
        let bytes = digest.as_bytes();
        for i in 0..3 {
            let bit = ((bytes[2 * i] as usize) << 8 | bytes[2 * i + 1] as usize) & 0x7FF;
            self.0[256 - 1 - bit / 8] |= 1 << (bit % 8);
        }
    }

    pub fn contains_item(&self, item: &[u8]) -> bool {
        let digest = keccak256(item);
        let bytes = digest.as_bytes();
        for i in 0..3 {
            let bit = ((bytes[2 * i] as usize) << 8 | bytes[2 * i + 1] as usize) & 0x7FF;
            if self.0[256 - 1 - bit / 8] & (1 << (bit % 8)) == 0 {
                return false;
            }
        }
        true
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Default for Bloom {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Debug for Bloom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bloom(0x{})", hex::encode(&self.0[..8]))
    }
}

impl Serialize for Bloom {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Bloom {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        if bytes.len() != 256 {
            return Err(serde::de::Error::invalid_length(bytes.len(), &"256 bytes"));
        }
        let mut bloom = [0u8; 256];
        bloom.copy_from_slice(&bytes);
        Ok(Bloom(bloom))
    }
}

/// Bloom over a set of logs: each log contributes its address and topics.
pub fn logs_bloom<'a>(logs: impl IntoIterator<Item = &'a Log>) -> Bloom {
    let mut bloom = Bloom::zero();
    for log in logs {
        bloom.accrue(log.address.as_bytes());
        for topic in &log.topics {
            bloom.accrue(topic.as_bytes());
        }
    }
    bloom
}

/// Receipt of a single transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_type: u8,
    pub status: ReceiptStatus,
    /// Intermediate state root, only populated before the Byzantium phase.
    pub post_state: Option<Hash>,
    pub cumulative_gas_used: u64,
    pub gas_used: u64,
    pub bloom: Bloom,
    pub logs: Vec<Log>,

    pub tx_hash: Hash,
    /// Populated when the transaction created a contract.
    pub contract_address: Option<Address>,

    pub block_hash: Option<Hash>,
    pub block_number: Option<u64>,
    pub transaction_index: u32,
}

impl Receipt {
    /// Hash used when committing receipts into a block's receipt root.
    pub fn hash(&self) -> Hash {
        let encoded = bincode::serialize(self).expect("receipt encoding cannot fail");
        keccak256(&encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bloom_membership() {
        let address = Address::repeat_byte(0x42);
        let topic = Hash::repeat_byte(0x13);
        let log = Log::new(address, vec![topic], vec![1, 2, 3]);

        let bloom = logs_bloom([&log]);
        assert!(bloom.contains_item(address.as_bytes()));
        assert!(bloom.contains_item(topic.as_bytes()));
        assert!(!bloom.contains_item(Address::repeat_byte(0x99).as_bytes()));
    }

    #[test]
    fn test_empty_logs_zero_bloom() {
        assert!(logs_bloom([]).is_zero());
    }

    #[test]
    fn test_bloom_serde_roundtrip() {
        let mut bloom = Bloom::zero();
        bloom.accrue(b"item");
        let encoded = bincode::serialize(&bloom).unwrap();
        let decoded: Bloom = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded, bloom);
    }
}
