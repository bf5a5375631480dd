// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! # Lattica Consensus
//!
//! The consensus-side networking core:
//! - **packet**: consensus packet framing, signing and decoding
//! - **peer_handler**: the two-tier relay gossip overlay
//! - **context**: the on-chain consensus context accessor
//! - **abi**: minimal call encoding for the system contracts
//! - **engine**: an instant-seal engine for the dev node and tests
//!
//! The vote-aggregation engine proper is an external collaborator consumed
//! through `lattica_core::ConsensusEngine`.

pub mod abi;
pub mod context;
pub mod engine;
pub mod packet;
pub mod peer_handler;

pub use context::{
    consensus_context_contract_address, context_key, context_key_for_block, ConsensusContext,
    ContextError, ContractCallError, ContractCaller, CONSENSUS_CONTEXT_MAX_BLOCK_COUNT,
    CONSENSUS_CONTEXT_START_BLOCK, CONTEXT_BASED_BLOCK_THRESHOLD, CONTEXT_BASED_START_BLOCK,
};
pub use engine::InstantSealEngine;
pub use packet::{
    decode, decode_payload, frame, verify_signature, CapabilityAnnouncement, DecodedPacket,
    PacketCodec, PacketError, PacketKind, SyncRequest, MIN_PROTOCOL_VERSION, PROTOCOL_VERSION,
};
pub use peer_handler::{
    EpochStats, LatestBlockNumberFn, PeerHandler, RelayStats, PROTOCOL_START_BLOCK,
};
