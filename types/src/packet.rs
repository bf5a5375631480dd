// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! The consensus packet carried by the gossip overlay.
//!
//! The framing and signing rules live in `lattica-consensus`; this is only
//! the wire shape shared with the transport layer.

use crate::hash::{keccak256_concat, Hash};
use serde::{Deserialize, Serialize};

/// A consensus packet as it travels between peers.
///
/// `consensus_data` is the framed payload (`[version?, type, payload…]`);
/// `signature` covers `zero_hash ‖ consensus_data`. Control packets carry a
/// zero `parent_hash`; engine packets carry the parent of the round they
/// belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusPacket {
    pub parent_hash: Hash,
    pub consensus_data: Vec<u8>,
    pub signature: Vec<u8>,
}

impl ConsensusPacket {
    /// Identity of the packet for dedup ledgers and rebroadcast gating.
    pub fn hash(&self) -> Hash {
        keccak256_concat(&[
            self.parent_hash.as_bytes(),
            &self.consensus_data,
            &self.signature,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_covers_all_fields() {
        let packet = ConsensusPacket {
            parent_hash: Hash::repeat_byte(1),
            consensus_data: vec![5, 3, 9],
            signature: vec![7; 64],
        };
        let mut other = packet.clone();
        other.signature[0] ^= 1;
        assert_ne!(packet.hash(), other.hash());

        let mut reparented = packet.clone();
        reparented.parent_hash = Hash::repeat_byte(2);
        assert_ne!(packet.hash(), reparented.hash());
    }
}
