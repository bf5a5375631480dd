// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Chain event bus.
//!
//! Broadcast channels connecting the chain store, the transaction pool, the
//! miner and the overlay. Posting never blocks; events published with no
//! subscribers are dropped.

use lattica_types::{Block, Transaction};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A new canonical head was written.
#[derive(Debug, Clone)]
pub struct ChainHeadEvent {
    pub block: Block,
}

/// A block was written outside the canonical chain.
#[derive(Debug, Clone)]
pub struct ChainSideEvent {
    pub block: Block,
}

/// New transactions entered the pool.
#[derive(Debug, Clone)]
pub struct NewTxsEvent {
    pub txs: Vec<Transaction>,
}

/// A locally sealed block was committed to the chain.
#[derive(Debug, Clone)]
pub struct NewMinedBlockEvent {
    pub block: Block,
}

/// Shared broadcast bus for chain events.
#[derive(Debug, Clone)]
pub struct EventBus {
    head: broadcast::Sender<ChainHeadEvent>,
    side: broadcast::Sender<ChainSideEvent>,
    new_txs: broadcast::Sender<NewTxsEvent>,
    mined: broadcast::Sender<NewMinedBlockEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (head, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (side, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (new_txs, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (mined, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            head,
            side,
            new_txs,
            mined,
        }
    }

    pub fn subscribe_head(&self) -> broadcast::Receiver<ChainHeadEvent> {
        self.head.subscribe()
    }

    pub fn subscribe_side(&self) -> broadcast::Receiver<ChainSideEvent> {
        self.side.subscribe()
    }

    pub fn subscribe_new_txs(&self) -> broadcast::Receiver<NewTxsEvent> {
        self.new_txs.subscribe()
    }

    pub fn subscribe_mined(&self) -> broadcast::Receiver<NewMinedBlockEvent> {
        self.mined.subscribe()
    }

    pub fn post_head(&self, event: ChainHeadEvent) {
        let _ = self.head.send(event);
    }

    pub fn post_side(&self, event: ChainSideEvent) {
        let _ = self.side.send(event);
    }

    pub fn post_new_txs(&self, event: NewTxsEvent) {
        let _ = self.new_txs.send(event);
    }

    pub fn post_mined(&self, event: NewMinedBlockEvent) {
        let _ = self.mined.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattica_types::Header;

    #[tokio::test]
    async fn test_head_event_delivery() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_head();

        let block = Block::assemble(Header::default(), Vec::new(), &[]);
        bus.post_head(ChainHeadEvent {
            block: block.clone(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.block.hash(), block.hash());
    }

    #[test]
    fn test_post_without_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.post_new_txs(NewTxsEvent { txs: Vec::new() });
    }
}
