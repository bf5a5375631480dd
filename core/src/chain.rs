// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Chain configuration and the canonical chain store seam.

use crate::error::ChainError;
use crate::events::{ChainHeadEvent, ChainSideEvent, EventBus};
use crate::fork::ForkConfig;
use crate::state::StateDatabase;
use lattica_types::{Block, Hash, Log, Receipt, DEFAULT_CHAIN_ID};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::info;

/// Gas-limit adjustment bound: the limit may move by parent/1024 per block.
pub const GAS_LIMIT_BOUND_DIVISOR: u64 = 1024;

/// Gas-limit bump applied to the parent at the fee-market transition block.
pub const ELASTICITY_MULTIPLIER: u64 = 2;

/// Chain-wide configuration.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain_id: u64,
    /// Receipts stop carrying intermediate roots from this block on.
    pub byzantium_block: Option<u64>,
    /// Gas limits follow the elastic fee-market rule from this block on.
    pub fee_market_block: Option<u64>,
    /// One-off state mutation applied during replay of the named block.
    pub fork: Option<ForkConfig>,
}

impl ChainConfig {
    pub fn is_byzantium(&self, number: u64) -> bool {
        self.byzantium_block.map(|b| number >= b).unwrap_or(false)
    }

    pub fn is_fee_market(&self, number: u64) -> bool {
        self.fee_market_block.map(|b| number >= b).unwrap_or(false)
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            byzantium_block: Some(0),
            fee_market_block: Some(0),
            fork: None,
        }
    }
}

/// Compute the next gas limit from the parent's, moving toward `ceil` by at
/// most a 1/1024 step per block.
pub fn calc_gas_limit(parent_limit: u64, ceil: u64) -> u64 {
    let delta = parent_limit / GAS_LIMIT_BOUND_DIVISOR;
    if parent_limit < ceil {
        (parent_limit + delta).min(ceil)
    } else {
        (parent_limit.saturating_sub(delta)).max(ceil)
    }
}

/// Result of writing a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatus {
    Canonical,
    Side,
}

/// Canonical chain store seam.
///
/// Reads are shared with the processor; writes come only from the worker's
/// commit path and block import.
pub trait ChainStore: Send + Sync {
    fn config(&self) -> ChainConfig;
    fn current_block(&self) -> Block;
    fn block(&self, hash: Hash) -> Option<Block>;
    fn has_block(&self, hash: Hash, number: u64) -> bool;
    fn canonical_hash(&self, number: u64) -> Option<Hash>;
    fn transaction_exists(&self, hash: Hash) -> bool;
    fn state_at(&self, root: Hash) -> Result<Box<dyn StateDatabase>, ChainError>;
    fn write_block_with_state(
        &self,
        block: Block,
        receipts: Vec<Receipt>,
        logs: Vec<Log>,
        state: Box<dyn StateDatabase>,
    ) -> Result<ImportStatus, ChainError>;
}

struct MemoryChainInner {
    blocks: HashMap<Hash, Block>,
    receipts: HashMap<Hash, Vec<Receipt>>,
    canonical: Vec<Hash>,
    states: HashMap<Hash, Box<dyn StateDatabase>>,
    tx_index: HashSet<Hash>,
}

/// In-memory [`ChainStore`] for the dev node and the tests.
pub struct MemoryChain {
    config: ChainConfig,
    bus: EventBus,
    inner: RwLock<MemoryChainInner>,
}

impl MemoryChain {
    /// Build a chain seeded with a genesis block over `genesis_state`.
    pub fn new(
        config: ChainConfig,
        bus: EventBus,
        mut genesis_state: Box<dyn StateDatabase>,
        genesis_gas_limit: u64,
    ) -> Self {
        let mut header = lattica_types::Header {
            gas_limit: genesis_gas_limit,
            ..Default::default()
        };
        header.state_root = genesis_state.intermediate_root();
        let genesis = Block::assemble(header, Vec::new(), &[]);
        let genesis_hash = genesis.hash();

        let mut blocks = HashMap::new();
        blocks.insert(genesis_hash, genesis);
        let mut states = HashMap::new();
        states.insert(genesis_state.intermediate_root(), genesis_state);

        Self {
            config,
            bus,
            inner: RwLock::new(MemoryChainInner {
                blocks,
                receipts: HashMap::new(),
                canonical: vec![genesis_hash],
                states,
                tx_index: HashSet::new(),
            }),
        }
    }

    pub fn receipts(&self, block_hash: Hash) -> Option<Vec<Receipt>> {
        self.inner.read().receipts.get(&block_hash).cloned()
    }
}

impl ChainStore for MemoryChain {
    fn config(&self) -> ChainConfig {
        self.config.clone()
    }

    fn current_block(&self) -> Block {
        let inner = self.inner.read();
        let head = inner.canonical.last().expect("chain always has a head");
        inner.blocks[head].clone()
    }

    fn block(&self, hash: Hash) -> Option<Block> {
        self.inner.read().blocks.get(&hash).cloned()
    }

    fn has_block(&self, hash: Hash, number: u64) -> bool {
        self.inner
            .read()
            .blocks
            .get(&hash)
            .map(|b| b.number() == number)
            .unwrap_or(false)
    }

    fn canonical_hash(&self, number: u64) -> Option<Hash> {
        self.inner.read().canonical.get(number as usize).copied()
    }

    fn transaction_exists(&self, hash: Hash) -> bool {
        self.inner.read().tx_index.contains(&hash)
    }

    fn state_at(&self, root: Hash) -> Result<Box<dyn StateDatabase>, ChainError> {
        self.inner
            .read()
            .states
            .get(&root)
            .map(|s| s.boxed_copy())
            .ok_or(ChainError::UnknownStateRoot(root))
    }

    fn write_block_with_state(
        &self,
        block: Block,
        receipts: Vec<Receipt>,
        _logs: Vec<Log>,
        state: Box<dyn StateDatabase>,
    ) -> Result<ImportStatus, ChainError> {
        let status;
        {
            let mut inner = self.inner.write();
            let head = *inner.canonical.last().expect("chain always has a head");

            let hash = block.hash();
            inner.blocks.insert(hash, block.clone());
            inner.receipts.insert(hash, receipts);
            inner.states.insert(block.state_root(), state);

            if block.parent_hash() == head {
                inner.canonical.push(hash);
                for tx in block.transactions() {
                    inner.tx_index.insert(tx.hash());
                }
                status = ImportStatus::Canonical;
            } else {
                status = ImportStatus::Side;
            }
        }

        match status {
            ImportStatus::Canonical => {
                info!(number = block.number(), hash = ?block.hash(), "chain head advanced");
                self.bus.post_head(ChainHeadEvent { block });
            }
            ImportStatus::Side => {
                self.bus.post_side(ChainSideEvent { block });
            }
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryState;

    fn test_chain() -> MemoryChain {
        MemoryChain::new(
            ChainConfig::default(),
            EventBus::new(),
            Box::new(MemoryState::new()),
            30_000_000,
        )
    }

    fn child_of(parent: &Block) -> Block {
        let header = lattica_types::Header {
            parent_hash: parent.hash(),
            number: parent.number() + 1,
            gas_limit: parent.gas_limit(),
            ..Default::default()
        };
        Block::assemble(header, Vec::new(), &[])
    }

    #[test]
    fn test_genesis_is_head() {
        let chain = test_chain();
        assert_eq!(chain.current_block().number(), 0);
    }

    #[test]
    fn test_canonical_extension() {
        let chain = test_chain();
        let genesis = chain.current_block();
        let block = child_of(&genesis);

        let status = chain
            .write_block_with_state(
                block.clone(),
                Vec::new(),
                Vec::new(),
                Box::new(MemoryState::new()),
            )
            .unwrap();
        assert_eq!(status, ImportStatus::Canonical);
        assert_eq!(chain.current_block().hash(), block.hash());
        assert_eq!(chain.canonical_hash(1), Some(block.hash()));
    }

    #[test]
    fn test_non_head_parent_is_side() {
        let chain = test_chain();
        let genesis = chain.current_block();
        let a = child_of(&genesis);
        chain
            .write_block_with_state(a.clone(), Vec::new(), Vec::new(), Box::new(MemoryState::new()))
            .unwrap();

        // Second child of genesis arrives after the head moved.
        let mut b = child_of(&genesis);
        b.header_mut().time = 99;
        let status = chain
            .write_block_with_state(b, Vec::new(), Vec::new(), Box::new(MemoryState::new()))
            .unwrap();
        assert_eq!(status, ImportStatus::Side);
        assert_eq!(chain.current_block().hash(), a.hash());
    }

    #[test]
    fn test_calc_gas_limit_moves_toward_ceil() {
        let parent = 10_000_000u64;
        let raised = calc_gas_limit(parent, 20_000_000);
        assert!(raised > parent && raised <= parent + parent / GAS_LIMIT_BOUND_DIVISOR);

        let lowered = calc_gas_limit(parent, 5_000_000);
        assert!(lowered < parent && lowered >= parent - parent / GAS_LIMIT_BOUND_DIVISOR);

        assert_eq!(calc_gas_limit(parent, parent), parent);
    }
}
