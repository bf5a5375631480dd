// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Keccak-256 hashing and primitive aliases.

use sha3::{Digest, Keccak256};

pub use primitive_types::{H160, H256, U256};

/// A 32-byte chain hash (blocks, transactions, packets, state roots).
pub type Hash = H256;

/// A 20-byte account address.
pub type Address = H160;

/// The all-zero hash, used as the parent hash of control packets.
pub const ZERO_HASH: Hash = H256::zero();

/// The all-zero address, used as the caller of system-contract calls.
pub const ZERO_ADDRESS: Address = H160::zero();

/// Keccak-256 of a single byte slice.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    Hash::from_slice(&hasher.finalize())
}

/// Keccak-256 over the concatenation of several byte slices.
pub fn keccak256_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    Hash::from_slice(&hasher.finalize())
}

/// Derive the address of a contract created by `sender` at `nonce`.
pub fn create_address(sender: Address, nonce: u64) -> Address {
    let digest = keccak256_concat(&[sender.as_bytes(), &nonce.to_be_bytes()]);
    Address::from_slice(&digest.as_bytes()[12..])
}
