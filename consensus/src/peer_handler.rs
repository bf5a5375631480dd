// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! The relay gossip overlay.
//!
//! Consensus relays keep a full mesh among themselves; other nodes
//! subscribe to a nearby relay with a [`SyncRequest`]. Engine packets are
//! routed with a per-packet seen-from/sent-to ledger so a packet is never
//! echoed to its source and never sent to the same peer twice.
//!
//! Locking: `parent_lock` is always taken before `peer_lock`, and neither is
//! held across a transport send. Send lists are computed under the lock and
//! dispatched after release.

use crate::packet::{
    decode, decode_payload, CapabilityAnnouncement, PacketCodec, PacketError, PacketKind,
    SyncRequest,
};
use lattica_network::PeerTransport;
use lattica_types::{ConsensusPacket, Hash, ZERO_HASH};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Block height at which the consensus packet protocol activates.
pub const PROTOCOL_START_BLOCK: u64 = 32;

/// Capability is re-announced to unsubscribed peers every this many blocks.
const CAPABILITY_RESEND_BLOCKS: u64 = 128;

/// Secondary bound on the packet ledger, independent of head advances.
const MAX_TRACKED_PACKETS: usize = 8192;

/// Reads the current canonical block number.
pub type LatestBlockNumberFn = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Per-epoch packet counters. An epoch is one parent-hash window.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EpochStats {
    pub packets_received: u64,
    pub packets_received_from_relays: u64,
    pub packets_sent_to_sync_peers: u64,
    pub packets_sent_to_relays: u64,
    pub local_packets_sent_to_relays: u64,
}

impl EpochStats {
    fn accumulate(&mut self, other: &EpochStats) {
        self.packets_received += other.packets_received;
        self.packets_received_from_relays += other.packets_received_from_relays;
        self.packets_sent_to_sync_peers += other.packets_sent_to_sync_peers;
        self.packets_sent_to_relays += other.packets_sent_to_relays;
        self.local_packets_sent_to_relays += other.local_packets_sent_to_relays;
    }
}

/// Epoch and lifetime counters, rolled at every head advance.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelayStats {
    pub epoch: EpochStats,
    pub lifetime: EpochStats,
    pub total_blocks: u64,
}

impl RelayStats {
    /// Fold the current epoch into the lifetime totals and start a new one.
    /// Returns the closed epoch for logging.
    fn roll_epoch(&mut self) -> EpochStats {
        let closed = self.epoch;
        self.lifetime.accumulate(&closed);
        self.total_blocks += 1;
        self.epoch = EpochStats::default();
        closed
    }
}

#[derive(Debug, Clone)]
struct PeerEntry {
    capability: Option<CapabilityAnnouncement>,
}

struct PacketSyncEntry {
    packet: ConsensusPacket,
    seen_from: HashSet<String>,
    sent_to: HashSet<String>,
    created_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteTarget {
    Relays,
    SyncSubscribers,
}

#[derive(Default)]
struct HandlerState {
    /// Superset of connected peers.
    peers: HashMap<String, PeerEntry>,
    /// Relays this node has subscribed to.
    relay_peers: HashSet<String>,
    /// Peers that requested consensus gossip from this node.
    sync_subscribers: HashSet<String>,
    /// Packet ledger, keyed by packet hash.
    packet_sync: HashMap<Hash, PacketSyncEntry>,
    stats: RelayStats,
}

impl HandlerState {
    /// Shared routing: record `from`, then collect targets not yet involved
    /// with this packet, marking them sent.
    fn route(&mut self, packet: &ConsensusPacket, from: &str, target: RouteTarget) -> Vec<String> {
        let candidates: Vec<String> = match target {
            RouteTarget::Relays => self.relay_peers.iter().cloned().collect(),
            RouteTarget::SyncSubscribers => self.sync_subscribers.iter().cloned().collect(),
        };

        let hash = packet.hash();
        if !self.packet_sync.contains_key(&hash) && self.packet_sync.len() >= MAX_TRACKED_PACKETS {
            self.evict_oldest_packet();
        }
        let entry = self
            .packet_sync
            .entry(hash)
            .or_insert_with(|| PacketSyncEntry {
                packet: packet.clone(),
                seen_from: HashSet::new(),
                sent_to: HashSet::new(),
                created_at: Instant::now(),
            });
        entry.seen_from.insert(from.to_string());

        let mut send_list = Vec::new();
        for peer in candidates {
            if peer == from || entry.sent_to.contains(&peer) || entry.seen_from.contains(&peer) {
                continue;
            }
            entry.sent_to.insert(peer.clone());
            send_list.push(peer);
        }
        send_list
    }

    fn evict_oldest_packet(&mut self) {
        if let Some(oldest) = self
            .packet_sync
            .iter()
            .min_by_key(|(_, entry)| entry.created_at)
            .map(|(hash, _)| *hash)
        {
            self.packet_sync.remove(&oldest);
        }
    }

    /// A relay this node could subscribe to, if any is known.
    fn any_known_relay(&self) -> Option<String> {
        self.peers
            .iter()
            .find(|(_, entry)| {
                entry
                    .capability
                    .as_ref()
                    .map(|c| c.is_consensus_relay)
                    .unwrap_or(false)
            })
            .map(|(peer_id, _)| peer_id.clone())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CurrentParent {
    hash: Hash,
    number: u64,
}

/// The gossip overlay handler. One instance per node, driven by the
/// transport's inbound tasks and the engine's outbound path.
pub struct PeerHandler {
    is_relay: bool,
    local_peer_id: String,
    transport: Arc<dyn PeerTransport>,
    codec: PacketCodec,
    latest_block: LatestBlockNumberFn,
    engine_sink: Option<mpsc::UnboundedSender<(String, ConsensusPacket)>>,

    // Lock order: `parent_lock` strictly before `peer_lock`.
    parent_lock: Mutex<CurrentParent>,
    peer_lock: Mutex<HandlerState>,
}

impl PeerHandler {
    pub fn new(
        is_relay: bool,
        local_peer_id: String,
        transport: Arc<dyn PeerTransport>,
        codec: PacketCodec,
        latest_block: LatestBlockNumberFn,
    ) -> Self {
        if is_relay {
            trace!(peer_id = %local_peer_id, "starting peer handler as consensus relay");
        }
        Self {
            is_relay,
            local_peer_id,
            transport,
            codec,
            latest_block,
            engine_sink: None,
            parent_lock: Mutex::new(CurrentParent::default()),
            peer_lock: Mutex::new(HandlerState::default()),
        }
    }

    /// Deliver accepted engine packets to the engine through this channel.
    pub fn with_engine_sink(
        mut self,
        sink: mpsc::UnboundedSender<(String, ConsensusPacket)>,
    ) -> Self {
        self.engine_sink = Some(sink);
        self
    }

    pub fn local_peer_id(&self) -> &str {
        &self.local_peer_id
    }

    pub fn is_relay(&self) -> bool {
        self.is_relay
    }

    pub fn current_parent_hash(&self) -> Hash {
        self.parent_lock.lock().hash
    }

    pub fn stats(&self) -> RelayStats {
        self.peer_lock.lock().stats
    }

    pub fn peer_count(&self) -> usize {
        self.peer_lock.lock().peers.len()
    }

    pub fn relay_peer_count(&self) -> usize {
        self.peer_lock.lock().relay_peers.len()
    }

    pub fn is_sync_subscriber(&self, peer_id: &str) -> bool {
        self.peer_lock.lock().sync_subscribers.contains(peer_id)
    }

    pub fn has_capability(&self, peer_id: &str) -> bool {
        self.peer_lock
            .lock()
            .peers
            .get(peer_id)
            .map(|entry| entry.capability.is_some())
            .unwrap_or(false)
    }

    pub fn tracked_packet_count(&self) -> usize {
        self.peer_lock.lock().packet_sync.len()
    }

    /// A peer connected. Relays announce their capability to it.
    pub async fn on_peer_connected(&self, peer_id: &str) {
        debug!(%peer_id, "peer connected");
        {
            let mut state = self.peer_lock.lock();
            state
                .peers
                .insert(peer_id.to_string(), PeerEntry { capability: None });
        }
        if self.is_relay {
            if let Err(err) = self.send_capability_packet(&[peer_id.to_string()]).await {
                debug!(%peer_id, %err, "capability send failed");
            }
        }
    }

    /// A peer dropped. When the last subscribed relay goes away, try to
    /// subscribe to any other known relay.
    pub async fn on_peer_disconnected(&self, peer_id: &str) {
        debug!(%peer_id, "peer disconnected");
        let fallback_relay = {
            let mut state = self.peer_lock.lock();
            state.peers.remove(peer_id);
            state.relay_peers.remove(peer_id);
            state.sync_subscribers.remove(peer_id);
            if state.relay_peers.is_empty() {
                state.any_known_relay()
            } else {
                None
            }
        };
        if let Some(relay) = fallback_relay {
            if let Err(err) = self.send_sync_request(&relay).await {
                debug!(%relay, %err, "fallback sync request failed");
            }
        }
    }

    /// Top-level packet dispatch.
    pub async fn handle_packet(
        &self,
        packet: &ConsensusPacket,
        from: &str,
    ) -> Result<(), PacketError> {
        let decoded = decode(packet)?;
        trace!(%from, kind = ?decoded.kind, "handling consensus packet");

        match decoded.kind {
            PacketKind::Capability => {
                let announcement: CapabilityAnnouncement = decode_payload(decoded.payload)?;
                self.handle_capability(announcement, from).await;
            }
            PacketKind::Sync => {
                let request: SyncRequest = decode_payload(decoded.payload)?;
                self.handle_sync_request(request, from);
            }
            kind if kind.is_engine() => {
                self.handle_engine_packet(packet, from).await;
            }
            kind => {
                debug!(%from, ?kind, "unhandled packet kind");
            }
        }
        Ok(())
    }

    async fn handle_capability(&self, announcement: CapabilityAnnouncement, from: &str) {
        if !announcement.is_consensus_relay || announcement.peer_id != from {
            debug!(
                %from,
                claimed = %announcement.peer_id,
                "dropping capability packet with mismatched sender"
            );
            return;
        }
        let should_subscribe = {
            let mut state = self.peer_lock.lock();
            state.peers.insert(
                announcement.peer_id.clone(),
                PeerEntry {
                    capability: Some(announcement.clone()),
                },
            );
            self.is_relay || state.relay_peers.is_empty()
        };
        if should_subscribe {
            if let Err(err) = self.send_sync_request(&announcement.peer_id).await {
                debug!(peer = %announcement.peer_id, %err, "sync request failed");
            }
        }
    }

    fn handle_sync_request(&self, request: SyncRequest, from: &str) {
        if request.peer_id != from {
            debug!(
                %from,
                claimed = %request.peer_id,
                "dropping sync request with mismatched sender"
            );
            return;
        }
        let mut state = self.peer_lock.lock();
        state.sync_subscribers.insert(request.peer_id);
    }

    async fn handle_engine_packet(&self, packet: &ConsensusPacket, from: &str) {
        let from_is_subscriber = {
            let mut state = self.peer_lock.lock();
            state.stats.epoch.packets_received += 1;
            if state.relay_peers.contains(from) {
                state.stats.epoch.packets_received_from_relays += 1;
            }
            state.sync_subscribers.contains(from)
        };

        if let Some(sink) = &self.engine_sink {
            let _ = sink.send((from.to_string(), packet.clone()));
        }

        if self.is_relay {
            self.broadcast_to_sync_peers(packet, from).await;
            // Packets originating from subscribers fan out across the mesh.
            if from_is_subscriber {
                self.broadcast_to_relays(packet, from).await;
            }
        }
    }

    /// Originating path for locally created engine packets. Returns the
    /// number of peers written to.
    pub async fn broadcast_local(&self, packet: &ConsensusPacket) -> usize {
        let local = self.local_peer_id.clone();
        if self.is_relay {
            let sync_count = self.broadcast_to_sync_peers(packet, &local).await;
            let relay_count = self.broadcast_to_relays(packet, &local).await;
            sync_count + relay_count
        } else {
            self.broadcast_to_relays(packet, &local).await
        }
    }

    /// Forward to sync subscribers. Gated on the packet belonging to the
    /// current parent-hash round.
    pub async fn broadcast_to_sync_peers(&self, packet: &ConsensusPacket, from: &str) -> usize {
        let current_parent = self.parent_lock.lock().hash;
        if packet.parent_hash != current_parent {
            trace!(%from, "sync broadcast skipped, parent hash not current");
            return 0;
        }

        let send_list = {
            let mut state = self.peer_lock.lock();
            let list = state.route(packet, from, RouteTarget::SyncSubscribers);
            state.stats.epoch.packets_sent_to_sync_peers += list.len() as u64;
            list
        };
        self.dispatch(send_list, packet).await
    }

    /// Forward to the relay mesh. Deliberately not parent-gated so lagging
    /// subscribers can still be served through other relays.
    pub async fn broadcast_to_relays(&self, packet: &ConsensusPacket, from: &str) -> usize {
        let send_list = {
            let mut state = self.peer_lock.lock();
            let list = state.route(packet, from, RouteTarget::Relays);
            state.stats.epoch.packets_sent_to_relays += list.len() as u64;
            if from == self.local_peer_id {
                state.stats.epoch.local_packets_sent_to_relays += list.len() as u64;
            }
            list
        };
        self.dispatch(send_list, packet).await
    }

    async fn dispatch(&self, send_list: Vec<String>, packet: &ConsensusPacket) -> usize {
        if send_list.is_empty() {
            return 0;
        }
        let count = send_list.len();
        if let Err(err) = self
            .transport
            .send_consensus_packet(&send_list, packet.clone())
            .await
        {
            warn!(%err, "consensus packet send failed");
        }
        count
    }

    /// Head advance: log and roll the epoch stats, purge stale ledger
    /// entries, and re-announce capability where due.
    pub async fn set_current_parent(&self, parent_hash: Hash, block_number: u64) {
        let resend_targets = {
            let mut parent = self.parent_lock.lock();
            let mut state = self.peer_lock.lock();

            let closed_epoch = state.stats.roll_epoch();
            if parent.hash != ZERO_HASH {
                if self.is_relay {
                    info!(
                        parent_hash = ?parent.hash,
                        block_number = parent.number,
                        peers = state.peers.len(),
                        sync_subscribers = state.sync_subscribers.len(),
                        relay_peers = state.relay_peers.len(),
                        received = closed_epoch.packets_received,
                        received_from_relays = closed_epoch.packets_received_from_relays,
                        sent_to_sync_peers = closed_epoch.packets_sent_to_sync_peers,
                        sent_to_relays = closed_epoch.packets_sent_to_relays,
                        local_sent_to_relays = closed_epoch.local_packets_sent_to_relays,
                        total_blocks = state.stats.total_blocks,
                        lifetime_received = state.stats.lifetime.packets_received,
                        lifetime_sent = state.stats.lifetime.packets_sent_to_sync_peers,
                        "consensus relay stats"
                    );
                } else {
                    info!(
                        parent_hash = ?parent.hash,
                        block_number = parent.number,
                        peers = state.peers.len(),
                        relay_peers = state.relay_peers.len(),
                        received = closed_epoch.packets_received,
                        received_from_relays = closed_epoch.packets_received_from_relays,
                        total_blocks = state.stats.total_blocks,
                        lifetime_received = state.stats.lifetime.packets_received,
                        "consensus peer stats"
                    );
                }
            }

            parent.hash = parent_hash;
            parent.number = block_number;

            state
                .packet_sync
                .retain(|_, entry| entry.packet.parent_hash == parent_hash);

            if self.is_relay && block_number == PROTOCOL_START_BLOCK {
                // Activation edge: announce to everyone already connected.
                Some(state.peers.keys().cloned().collect::<Vec<_>>())
            } else if self.is_relay
                && block_number > PROTOCOL_START_BLOCK
                && block_number % CAPABILITY_RESEND_BLOCKS == 0
                && state.peers.len() > state.sync_subscribers.len()
            {
                Some(
                    state
                        .peers
                        .keys()
                        .filter(|peer| !state.sync_subscribers.contains(*peer))
                        .cloned()
                        .collect::<Vec<_>>(),
                )
            } else {
                None
            }
        };

        if let Some(targets) = resend_targets {
            if !targets.is_empty() {
                info!(count = targets.len(), "re-announcing relay capability");
                if let Err(err) = self.send_capability_packet(&targets).await {
                    debug!(%err, "capability re-announce failed");
                }
            }
        }
    }

    /// Announce this relay's capability to `peer_ids`.
    async fn send_capability_packet(&self, peer_ids: &[String]) -> Result<(), PacketError> {
        if !self.is_relay || (self.latest_block)() < PROTOCOL_START_BLOCK {
            return Ok(());
        }
        let announcement = CapabilityAnnouncement {
            is_consensus_relay: true,
            peer_id: self.local_peer_id.clone(),
        };
        let packet = self
            .codec
            .encode_control(PacketKind::Capability, &announcement)?;
        if let Err(err) = self.transport.send_consensus_packet(peer_ids, packet).await {
            debug!(%err, "capability packet send failed");
        }
        Ok(())
    }

    /// Subscribe to consensus gossip from `peer_id`.
    async fn send_sync_request(&self, peer_id: &str) -> Result<(), PacketError> {
        if (self.latest_block)() < PROTOCOL_START_BLOCK {
            return Ok(());
        }
        let request = SyncRequest {
            is_consensus_relay: self.is_relay,
            peer_id: self.local_peer_id.clone(),
        };
        let packet = self.codec.encode_control(PacketKind::Sync, &request)?;
        self.transport
            .send_consensus_packet(&[peer_id.to_string()], packet)
            .await
            .map_err(|err| PacketError::Transport(err.to_string()))?;

        let mut state = self.peer_lock.lock();
        state.relay_peers.insert(peer_id.to_string());
        trace!(%peer_id, "subscribed to relay");
        Ok(())
    }
}
