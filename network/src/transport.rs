// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Peer transport seam.
//!
//! The TCP/handshake/framing stack is an external collaborator; the overlay
//! only needs to address connected peers by id and push consensus packets
//! at them.

use crate::error::{NetworkError, Result};
use async_trait::async_trait;
use lattica_types::ConsensusPacket;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Surface the consensus overlay uses to reach connected peers.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Write `packet` to every peer in `peer_ids`. Unknown ids are skipped.
    async fn send_consensus_packet(&self, peer_ids: &[String], packet: ConsensusPacket)
        -> Result<()>;

    /// Ids of all currently connected peers.
    fn peer_list(&self) -> Vec<String>;

    /// Whether `peer_id` is currently connected.
    fn is_connected(&self, peer_id: &str) -> bool;
}

/// In-memory [`PeerTransport`] that records every send, for tests and the
/// dev node.
#[derive(Default)]
pub struct MemoryTransport {
    inner: Mutex<MemoryTransportInner>,
}

#[derive(Default)]
struct MemoryTransportInner {
    peers: Vec<String>,
    sent: HashMap<String, Vec<ConsensusPacket>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_peer(&self, peer_id: &str) {
        let mut inner = self.inner.lock();
        if !inner.peers.iter().any(|p| p == peer_id) {
            inner.peers.push(peer_id.to_string());
        }
    }

    pub fn disconnect_peer(&self, peer_id: &str) {
        self.inner.lock().peers.retain(|p| p != peer_id);
    }

    /// Packets written to `peer_id`, in send order.
    pub fn sent_to(&self, peer_id: &str) -> Vec<ConsensusPacket> {
        self.inner
            .lock()
            .sent
            .get(peer_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of packet writes across all peers.
    pub fn total_sends(&self) -> usize {
        self.inner.lock().sent.values().map(|v| v.len()).sum()
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    async fn send_consensus_packet(
        &self,
        peer_ids: &[String],
        packet: ConsensusPacket,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        for peer_id in peer_ids {
            if !inner.peers.iter().any(|p| p == peer_id) {
                return Err(NetworkError::PeerNotFound(peer_id.clone()));
            }
            inner
                .sent
                .entry(peer_id.clone())
                .or_default()
                .push(packet.clone());
        }
        Ok(())
    }

    fn peer_list(&self) -> Vec<String> {
        self.inner.lock().peers.clone()
    }

    fn is_connected(&self, peer_id: &str) -> bool {
        self.inner.lock().peers.iter().any(|p| p == peer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattica_types::Hash;

    fn packet(tag: u8) -> ConsensusPacket {
        ConsensusPacket {
            parent_hash: Hash::zero(),
            consensus_data: vec![tag],
            signature: vec![1],
        }
    }

    #[tokio::test]
    async fn test_send_records_per_peer() {
        let transport = MemoryTransport::new();
        transport.connect_peer("a");
        transport.connect_peer("b");

        transport
            .send_consensus_packet(&["a".into(), "b".into()], packet(1))
            .await
            .unwrap();
        transport
            .send_consensus_packet(&["a".into()], packet(2))
            .await
            .unwrap();

        assert_eq!(transport.sent_to("a").len(), 2);
        assert_eq!(transport.sent_to("b").len(), 1);
        assert_eq!(transport.total_sends(), 3);
    }

    #[tokio::test]
    async fn test_unknown_peer_errors() {
        let transport = MemoryTransport::new();
        let result = transport
            .send_consensus_packet(&["ghost".into()], packet(1))
            .await;
        assert!(matches!(result, Err(NetworkError::PeerNotFound(_))));
    }
}
