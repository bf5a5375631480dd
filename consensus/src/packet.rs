// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Consensus packet framing.
//!
//! `consensus_data` is framed as `[version?, type, payload…]`: the first
//! byte is the protocol version when it is at least
//! [`MIN_PROTOCOL_VERSION`]; packets from older peers omit it and start
//! with the type byte. The signature covers `zero_hash ‖ consensus_data`.

use lattica_types::{
    Account, ConsensusPacket, Hash, PacketSigner, SignatureAlgorithm, SignatureError, ZERO_HASH,
    MIMETYPE_PROOF_OF_STAKE,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Lowest framed protocol version; also the decode discriminator. All type
/// tags are below this value.
pub const MIN_PROTOCOL_VERSION: u8 = 5;

/// Version written into outgoing packets.
pub const PROTOCOL_VERSION: u8 = 5;

/// Packet type tags. `ProposeBlock..=CommitBlock` is the engine range,
/// opaque to the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Capability = 0,
    Sync = 1,
    ProposeBlock = 2,
    PrecommitBlock = 3,
    CommitBlock = 4,
}

impl PacketKind {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PacketKind::Capability),
            1 => Some(PacketKind::Sync),
            2 => Some(PacketKind::ProposeBlock),
            3 => Some(PacketKind::PrecommitBlock),
            4 => Some(PacketKind::CommitBlock),
            _ => None,
        }
    }

    /// Whether this tag falls in the engine range.
    pub fn is_engine(self) -> bool {
        matches!(
            self,
            PacketKind::ProposeBlock | PacketKind::PrecommitBlock | PacketKind::CommitBlock
        )
    }
}

/// Sent by a consensus relay to advertise itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityAnnouncement {
    /// Always true; announcements from non-relays are dropped.
    pub is_consensus_relay: bool,
    /// Peer id of the original sender.
    pub peer_id: String,
}

/// Sent to a relay to subscribe to consensus gossip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Whether the requester is itself a relay.
    pub is_consensus_relay: bool,
    /// Peer id of the requester.
    pub peer_id: String,
}

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("malformed packet")]
    Malformed,

    #[error("unknown packet type {0}")]
    UnknownType(u8),

    #[error("signature invalid")]
    SignatureInvalid,

    #[error("payload codec error: {0}")]
    Codec(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Signer(#[from] SignatureError),
}

/// A decoded packet: its type tag and a view of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedPacket<'a> {
    pub kind: PacketKind,
    pub payload: &'a [u8],
}

/// Frame a payload: version byte, type byte, payload.
pub fn frame(kind: PacketKind, payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + 2);
    framed.push(PROTOCOL_VERSION);
    framed.push(kind as u8);
    framed.extend_from_slice(payload);
    framed
}

/// Decode the framing of `packet`.
///
/// Fails with [`PacketError::Malformed`] when the signature, the consensus
/// data or the payload is empty, and with [`PacketError::UnknownType`] on an
/// unmatched type tag.
pub fn decode(packet: &ConsensusPacket) -> Result<DecodedPacket<'_>, PacketError> {
    if packet.signature.is_empty() || packet.consensus_data.is_empty() {
        return Err(PacketError::Malformed);
    }
    let data = &packet.consensus_data;
    let start = if data[0] >= MIN_PROTOCOL_VERSION { 2 } else { 1 };
    if data.len() <= start {
        return Err(PacketError::Malformed);
    }
    let tag = data[start - 1];
    let kind = PacketKind::from_u8(tag).ok_or(PacketError::UnknownType(tag))?;
    Ok(DecodedPacket {
        kind,
        payload: &data[start..],
    })
}

/// Decode a binary payload into a typed struct.
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, PacketError> {
    bincode::deserialize(payload).map_err(|err| PacketError::Codec(err.to_string()))
}

/// The byte string the packet signature covers.
pub fn signing_payload(consensus_data: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(Hash::len_bytes() + consensus_data.len());
    data.extend_from_slice(ZERO_HASH.as_bytes());
    data.extend_from_slice(consensus_data);
    data
}

/// Verify a packet signature and recover the signer's public key.
pub fn verify_signature(
    packet: &ConsensusPacket,
    algorithm: &dyn SignatureAlgorithm,
) -> Result<Vec<u8>, PacketError> {
    let data = signing_payload(&packet.consensus_data);
    algorithm
        .public_key_from_signature(&data, &packet.signature)
        .map_err(|_| PacketError::SignatureInvalid)
}

/// Builds signed consensus packets for this node's account.
pub struct PacketCodec {
    signer: Arc<dyn PacketSigner>,
    account: Account,
}

impl PacketCodec {
    pub fn new(signer: Arc<dyn PacketSigner>) -> Self {
        let account = signer.account();
        Self { signer, account }
    }

    /// Encode a control packet; control packets carry a zero parent hash.
    pub fn encode_control<T: Serialize>(
        &self,
        kind: PacketKind,
        payload: &T,
    ) -> Result<ConsensusPacket, PacketError> {
        let body = bincode::serialize(payload).map_err(|err| PacketError::Codec(err.to_string()))?;
        self.seal_packet(ZERO_HASH, frame(kind, &body))
    }

    /// Encode an engine packet for the round building on `parent_hash`.
    pub fn encode_engine(
        &self,
        kind: PacketKind,
        payload: &[u8],
        parent_hash: Hash,
    ) -> Result<ConsensusPacket, PacketError> {
        self.seal_packet(parent_hash, frame(kind, payload))
    }

    fn seal_packet(
        &self,
        parent_hash: Hash,
        consensus_data: Vec<u8>,
    ) -> Result<ConsensusPacket, PacketError> {
        let to_sign = signing_payload(&consensus_data);
        let signature = self
            .signer
            .sign(&self.account, MIMETYPE_PROOF_OF_STAKE, &to_sign)?;
        Ok(ConsensusPacket {
            parent_hash,
            consensus_data,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattica_types::{DevSignature, DevSigner};

    fn codec() -> PacketCodec {
        PacketCodec::new(Arc::new(DevSigner::new([4u8; 32])))
    }

    #[test]
    fn test_control_roundtrip() {
        let announcement = CapabilityAnnouncement {
            is_consensus_relay: true,
            peer_id: "peer-1".into(),
        };
        let packet = codec()
            .encode_control(PacketKind::Capability, &announcement)
            .unwrap();
        assert_eq!(packet.parent_hash, ZERO_HASH);

        let decoded = decode(&packet).unwrap();
        assert_eq!(decoded.kind, PacketKind::Capability);
        let parsed: CapabilityAnnouncement = decode_payload(decoded.payload).unwrap();
        assert_eq!(parsed, announcement);
    }

    #[test]
    fn test_engine_packet_carries_parent() {
        let parent = Hash::repeat_byte(0x77);
        let packet = codec()
            .encode_engine(PacketKind::ProposeBlock, b"vote-body", parent)
            .unwrap();
        assert_eq!(packet.parent_hash, parent);

        let decoded = decode(&packet).unwrap();
        assert_eq!(decoded.kind, PacketKind::ProposeBlock);
        assert!(decoded.kind.is_engine());
        assert_eq!(decoded.payload, b"vote-body");
    }

    #[test]
    fn test_versionless_framing_decodes() {
        // Older peers frame without the version byte; the type tag is first.
        let packet = ConsensusPacket {
            parent_hash: ZERO_HASH,
            consensus_data: vec![PacketKind::Sync as u8, 0xAA, 0xBB],
            signature: vec![1],
        };
        let decoded = decode(&packet).unwrap();
        assert_eq!(decoded.kind, PacketKind::Sync);
        assert_eq!(decoded.payload, &[0xAA, 0xBB]);
    }

    #[test]
    fn test_empty_fields_rejected() {
        let mut packet = codec()
            .encode_engine(PacketKind::CommitBlock, b"x", Hash::zero())
            .unwrap();
        packet.signature.clear();
        assert!(matches!(decode(&packet), Err(PacketError::Malformed)));

        let mut packet = codec()
            .encode_engine(PacketKind::CommitBlock, b"x", Hash::zero())
            .unwrap();
        packet.consensus_data.clear();
        assert!(matches!(decode(&packet), Err(PacketError::Malformed)));

        // Framing with no payload bytes at all.
        let packet = ConsensusPacket {
            parent_hash: ZERO_HASH,
            consensus_data: vec![PROTOCOL_VERSION, PacketKind::Sync as u8],
            signature: vec![1],
        };
        assert!(matches!(decode(&packet), Err(PacketError::Malformed)));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let packet = ConsensusPacket {
            parent_hash: ZERO_HASH,
            consensus_data: vec![PROTOCOL_VERSION, 0xEE, 0x01],
            signature: vec![1],
        };
        assert!(matches!(decode(&packet), Err(PacketError::UnknownType(0xEE))));
    }

    #[test]
    fn test_signature_verifies_and_rejects_tampering() {
        let packet = codec()
            .encode_engine(PacketKind::PrecommitBlock, b"payload", Hash::zero())
            .unwrap();
        assert!(verify_signature(&packet, &DevSignature).is_ok());

        let mut tampered = packet;
        tampered.consensus_data.push(0xFF);
        assert!(matches!(
            verify_signature(&tampered, &DevSignature),
            Err(PacketError::SignatureInvalid)
        ));
    }
}
