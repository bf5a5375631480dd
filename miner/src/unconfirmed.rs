// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Window of locally sealed blocks awaiting canonical confirmation.

use lattica_core::ChainStore;
use lattica_types::Hash;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{info, warn};

struct UnconfirmedBlock {
    index: u64,
    hash: Hash,
}

/// Ring of locally sealed blocks. Once a block is `depth` blocks below the
/// head it is checked against the canonical chain and reported.
pub struct UnconfirmedBlocks {
    chain: Arc<dyn ChainStore>,
    depth: u64,
    blocks: Mutex<VecDeque<UnconfirmedBlock>>,
}

impl UnconfirmedBlocks {
    pub fn new(chain: Arc<dyn ChainStore>, depth: u64) -> Self {
        Self {
            chain,
            depth,
            blocks: Mutex::new(VecDeque::new()),
        }
    }

    /// Track a freshly sealed block.
    pub fn insert(&self, index: u64, hash: Hash) {
        self.shift(index.saturating_sub(1));
        info!(number = index, ?hash, "mined potential block");
        self.blocks.lock().push_back(UnconfirmedBlock { index, hash });
    }

    /// Drop all blocks deep enough below `height`, reporting their fate.
    pub fn shift(&self, height: u64) {
        let mut blocks = self.blocks.lock();
        while let Some(front) = blocks.front() {
            if front.index + self.depth > height {
                break;
            }
            match self.chain.canonical_hash(front.index) {
                Some(canonical) if canonical == front.hash => {
                    info!(number = front.index, hash = ?front.hash, "mined block reached canonical chain");
                }
                _ => {
                    warn!(number = front.index, hash = ?front.hash, "mined block lost");
                }
            }
            blocks.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattica_core::{ChainConfig, EventBus, MemoryChain, MemoryState};

    fn chain() -> Arc<MemoryChain> {
        Arc::new(MemoryChain::new(
            ChainConfig::default(),
            EventBus::new(),
            Box::new(MemoryState::new()),
            30_000_000,
        ))
    }

    #[test]
    fn test_shift_drops_deep_blocks() {
        let unconfirmed = UnconfirmedBlocks::new(chain(), 3);
        unconfirmed.insert(1, Hash::repeat_byte(1));
        unconfirmed.insert(2, Hash::repeat_byte(2));
        assert_eq!(unconfirmed.len(), 2);

        // Height 3: block 1 falls out (1 + 3 <= 4), block 2 stays.
        unconfirmed.shift(4);
        assert_eq!(unconfirmed.len(), 1);

        unconfirmed.shift(10);
        assert!(unconfirmed.is_empty());
    }

    #[test]
    fn test_insert_shifts_older_entries() {
        let unconfirmed = UnconfirmedBlocks::new(chain(), 2);
        unconfirmed.insert(1, Hash::repeat_byte(1));
        // Inserting block 10 flushes everything deeper than the window.
        unconfirmed.insert(10, Hash::repeat_byte(10));
        assert_eq!(unconfirmed.len(), 1);
    }
}
