// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-packet rebroadcast gating.
//!
//! Sits between peer I/O and the consensus overlay: once the overlay has
//! accepted a packet, [`Rebroadcaster`] may additionally flood it to a small
//! random subset of all connected peers, throttled per packet hash by
//! [`RebroadcastCache`].

use crate::transport::PeerTransport;
use lattica_types::{ConsensusPacket, Hash};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Minimum delay between two forwards of the same packet hash.
pub const MIN_REBROADCAST_DELAY: Duration = Duration::from_secs(30);

/// Entries older than this are dropped during cleanup.
pub const CLEANUP_AGE: Duration = Duration::from_secs(300);

/// Minimum delay between two cleanup sweeps.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(900);

struct CacheInner {
    last_forward: HashMap<Hash, Instant>,
    last_cleanup: Instant,
}

/// Time-gated table deciding whether a packet hash may be forwarded again.
pub struct RebroadcastCache {
    min_delay: Duration,
    cleanup_age: Duration,
    cleanup_interval: Duration,
    inner: Mutex<CacheInner>,
}

impl RebroadcastCache {
    pub fn new() -> Self {
        Self::with_timings(MIN_REBROADCAST_DELAY, CLEANUP_AGE, CLEANUP_INTERVAL)
    }

    pub fn with_timings(
        min_delay: Duration,
        cleanup_age: Duration,
        cleanup_interval: Duration,
    ) -> Self {
        Self {
            min_delay,
            cleanup_age,
            cleanup_interval,
            inner: Mutex::new(CacheInner {
                last_forward: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    /// Whether `hash` may be forwarded now. A `true` result records the
    /// forward time, so two `true` results for the same hash are always at
    /// least the minimum delay apart.
    pub fn should_forward(&self, hash: Hash) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if now.duration_since(inner.last_cleanup) >= self.cleanup_interval {
            let age = self.cleanup_age;
            inner
                .last_forward
                .retain(|_, last| now.duration_since(*last) < age);
            inner.last_cleanup = now;
            debug!(remaining = inner.last_forward.len(), "rebroadcast table cleaned up");
        }

        match inner.last_forward.get(&hash) {
            None => {
                inner.last_forward.insert(hash, now);
                trace!(?hash, "first forward of packet");
                true
            }
            Some(last) if now.duration_since(*last) < self.min_delay => false,
            Some(_) => {
                inner.last_forward.insert(hash, now);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().last_forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RebroadcastCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Random flood path: sends an accepted packet to a bounded random subset
/// of all connected peers, never back to the source.
pub struct Rebroadcaster {
    cache: RebroadcastCache,
    transport: Arc<dyn PeerTransport>,
    rebroadcast_count: usize,
}

impl Rebroadcaster {
    pub fn new(
        cache: RebroadcastCache,
        transport: Arc<dyn PeerTransport>,
        rebroadcast_count: usize,
    ) -> Self {
        Self {
            cache,
            transport,
            rebroadcast_count,
        }
    }

    /// Forward `packet` to up to `rebroadcast_count` random peers, excluding
    /// `from`. Returns the number of peers written to.
    pub async fn rebroadcast(&self, from: &str, packet: &ConsensusPacket) -> usize {
        if !self.cache.should_forward(packet.hash()) {
            return 0;
        }

        let mut peers = self.transport.peer_list();
        peers.shuffle(&mut rand::thread_rng());

        let targets: Vec<String> = peers
            .into_iter()
            .filter(|peer| peer != from)
            .take(self.rebroadcast_count)
            .collect();
        if targets.is_empty() {
            return 0;
        }

        match self
            .transport
            .send_consensus_packet(&targets, packet.clone())
            .await
        {
            Ok(()) => targets.len(),
            Err(err) => {
                debug!(%err, "rebroadcast send failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn packet(tag: u8) -> ConsensusPacket {
        ConsensusPacket {
            parent_hash: Hash::zero(),
            consensus_data: vec![tag],
            signature: vec![9],
        }
    }

    #[test]
    fn test_first_forward_allowed() {
        let cache = RebroadcastCache::new();
        assert!(cache.should_forward(Hash::repeat_byte(1)));
        assert!(cache.should_forward(Hash::repeat_byte(2)));
    }

    #[test]
    fn test_throttled_within_min_delay() {
        let cache = RebroadcastCache::new();
        let hash = Hash::repeat_byte(1);
        assert!(cache.should_forward(hash));
        assert!(!cache.should_forward(hash));
        assert!(!cache.should_forward(hash));
    }

    #[test]
    fn test_forward_allowed_after_delay() {
        let cache =
            RebroadcastCache::with_timings(Duration::from_millis(0), CLEANUP_AGE, CLEANUP_INTERVAL);
        let hash = Hash::repeat_byte(1);
        assert!(cache.should_forward(hash));
        assert!(cache.should_forward(hash));
    }

    #[test]
    fn test_cleanup_evicts_old_entries() {
        let cache = RebroadcastCache::with_timings(
            Duration::from_secs(30),
            Duration::from_millis(0),
            Duration::from_millis(0),
        );
        cache.should_forward(Hash::repeat_byte(1));
        assert_eq!(cache.len(), 1);
        // Zero interval and zero age: the next call sweeps everything older
        // than "now", then records the new hash.
        cache.should_forward(Hash::repeat_byte(2));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_rebroadcast_excludes_source_and_bounds_fanout() {
        let transport = Arc::new(MemoryTransport::new());
        for peer in ["a", "b", "c", "d"] {
            transport.connect_peer(peer);
        }
        let rebroadcaster = Rebroadcaster::new(RebroadcastCache::new(), transport.clone(), 2);

        let sent = rebroadcaster.rebroadcast("a", &packet(1)).await;
        assert_eq!(sent, 2);
        assert!(transport.sent_to("a").is_empty());
        assert_eq!(transport.total_sends(), 2);
    }

    #[tokio::test]
    async fn test_rebroadcast_throttles_repeat() {
        let transport = Arc::new(MemoryTransport::new());
        transport.connect_peer("a");
        transport.connect_peer("b");
        let rebroadcaster = Rebroadcaster::new(RebroadcastCache::new(), transport.clone(), 4);

        let first = rebroadcaster.rebroadcast("a", &packet(1)).await;
        let second = rebroadcaster.rebroadcast("a", &packet(1)).await;
        assert_eq!(first, 1);
        assert_eq!(second, 0);
    }
}
