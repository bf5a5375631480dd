// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Consensus engine seam.
//!
//! The proof-of-stake vote-aggregation engine is an external collaborator;
//! this trait is the surface the miner, the processor and the node drive.

use crate::chain::ChainStore;
use crate::error::EngineError;
use crate::state::StateDatabase;
use async_trait::async_trait;
use lattica_types::{Address, Block, Hash, Header, Receipt, Transaction};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

#[async_trait]
pub trait ConsensusEngine: Send + Sync {
    /// Hash over the sealing-relevant header fields, used by the worker to
    /// deduplicate sealing tasks.
    fn seal_hash(&self, header: &Header) -> Hash;

    /// Initialize engine-owned header fields for a new proposal.
    fn prepare(&self, chain: &dyn ChainStore, header: &mut Header) -> Result<(), EngineError>;

    /// Engine hook run before a block is replayed.
    fn post_prepare(&self, chain: &dyn ChainStore, header: &Header) -> Result<(), EngineError>;

    /// Select the subset of pending transactions to include in the proposal.
    fn handle_transactions(
        &self,
        chain: &dyn ChainStore,
        header: &Header,
        state: &mut dyn StateDatabase,
        pending: HashMap<Address, Vec<Transaction>>,
    ) -> Result<HashMap<Address, Vec<Transaction>>, EngineError>;

    /// Whether the current round may proceed to sealing.
    fn is_block_ready_to_seal(
        &self,
        chain: &dyn ChainStore,
        header: &Header,
        state: &mut dyn StateDatabase,
    ) -> bool;

    /// Post-transaction state modifications during replay.
    fn finalize(
        &self,
        chain: &dyn ChainStore,
        header: &Header,
        state: &mut dyn StateDatabase,
        txs: &[Transaction],
    ) -> Result<(), EngineError>;

    /// Post-transaction state modifications plus block assembly, for the
    /// proposal path.
    fn finalize_and_assemble(
        &self,
        chain: &dyn ChainStore,
        header: Header,
        state: &mut dyn StateDatabase,
        txs: Vec<Transaction>,
        receipts: &[Receipt],
    ) -> Result<Block, EngineError>;

    /// Run the sealing protocol for `block`, delivering the sealed block on
    /// `results`. Sealing must abort promptly when `stop` fires.
    async fn seal(
        &self,
        block: Block,
        results: mpsc::UnboundedSender<Block>,
        stop: oneshot::Receiver<()>,
    ) -> Result<(), EngineError>;
}
