// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Block headers and blocks.

use crate::hash::{keccak256, keccak256_concat, Address, Hash};
use crate::receipt::{Bloom, Receipt};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};

/// A block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub parent_hash: Hash,
    pub number: u64,
    pub coinbase: Address,
    pub state_root: Hash,
    pub tx_root: Hash,
    pub receipt_root: Hash,
    pub logs_bloom: Bloom,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub time: u64,
    pub extra: Vec<u8>,
    /// Engine-owned field, filled during sealing.
    pub nonce: u64,
}

impl Header {
    /// Header hash over the full encoding.
    pub fn hash(&self) -> Hash {
        let encoded = bincode::serialize(self).expect("header encoding cannot fail");
        keccak256(&encoded)
    }

    /// Hash over the sealing-relevant subset, used to deduplicate sealing
    /// tasks. Excludes fields the engine fills in during sealing.
    pub fn seal_content_hash(&self) -> Hash {
        keccak256_concat(&[
            self.parent_hash.as_bytes(),
            &self.number.to_be_bytes(),
            self.coinbase.as_bytes(),
            self.tx_root.as_bytes(),
            self.receipt_root.as_bytes(),
            &self.gas_limit.to_be_bytes(),
            &self.time.to_be_bytes(),
            &self.extra,
        ])
    }
}

impl Default for Header {
    fn default() -> Self {
        Self {
            parent_hash: Hash::zero(),
            number: 0,
            coinbase: Address::zero(),
            state_root: Hash::zero(),
            tx_root: Hash::zero(),
            receipt_root: Hash::zero(),
            logs_bloom: Bloom::zero(),
            gas_limit: 0,
            gas_used: 0,
            time: 0,
            extra: Vec::new(),
            nonce: 0,
        }
    }
}

/// A block: header plus transaction body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    header: Header,
    transactions: Vec<Transaction>,
}

impl Block {
    /// Assemble a block from a header and its body, committing the
    /// transaction and receipt roots into the header.
    pub fn assemble(mut header: Header, transactions: Vec<Transaction>, receipts: &[Receipt]) -> Self {
        header.tx_root = ordered_root(transactions.iter().map(|tx| tx.hash()));
        header.receipt_root = ordered_root(receipts.iter().map(|r| r.hash()));
        Self {
            header,
            transactions,
        }
    }

    /// Wrap an already-complete header and body without recomputing roots.
    pub fn from_parts(header: Header, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> Hash {
        self.header.parent_hash
    }

    pub fn state_root(&self) -> Hash {
        self.header.state_root
    }

    pub fn gas_limit(&self) -> u64 {
        self.header.gas_limit
    }

    pub fn gas_used(&self) -> u64 {
        self.header.gas_used
    }

    pub fn time(&self) -> u64 {
        self.header.time
    }
}

/// Order-committing root over a sequence of hashes.
pub fn ordered_root(hashes: impl Iterator<Item = Hash>) -> Hash {
    let mut buffer = Vec::new();
    for hash in hashes {
        buffer.extend_from_slice(hash.as_bytes());
    }
    keccak256(&buffer)
}
