// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! # Lattica Types
//!
//! Core data types shared by every Lattica crate:
//! - **hash**: Keccak-256 hashing and the `Hash`/`Address` primitives
//! - **signature**: the pluggable hybrid signature seam and accounts
//! - **transaction**: legacy and default-fee transactions, gas tiers
//! - **block**: headers and blocks
//! - **receipt**: receipts, logs and bloom filters
//! - **packet**: the consensus wire packet carried by the gossip overlay
//! - **node**: node records used by the dial scheduler

pub mod block;
pub mod hash;
pub mod node;
pub mod packet;
pub mod receipt;
pub mod signature;
pub mod transaction;
pub mod tx_ordering;

pub use block::{ordered_root, Block, Header};
pub use hash::{
    create_address, keccak256, keccak256_concat, Address, Hash, U256, ZERO_ADDRESS, ZERO_HASH,
};
pub use node::{NodeId, NodeRecord, DEFAULT_TCP_PORT};
pub use packet::ConsensusPacket;
pub use receipt::{logs_bloom, Bloom, Log, Receipt, ReceiptStatus};
pub use signature::{
    Account, DevSignature, DevSigner, PacketSigner, SignatureAlgorithm, SignatureError,
    MIMETYPE_PROOF_OF_STAKE,
};
pub use transaction::{
    signing_hash, AccessList, AccessTuple, GasTier, Signer, Transaction, TxPayload,
    DEFAULT_CHAIN_ID, GAS_TIER_BASE_PRICE, MAX_REMARKS_LENGTH, TX_GAS,
};
pub use tx_ordering::TransactionsByNonce;
