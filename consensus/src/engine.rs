// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Instant-seal engine for the dev node and tests.
//!
//! Implements the engine seam with no vote aggregation: every proposal is
//! ready, and sealing signs the header and returns immediately (after an
//! optional configured delay).

use async_trait::async_trait;
use lattica_core::{ChainStore, ConsensusEngine, EngineError, StateDatabase};
use lattica_types::{
    keccak256, Account, Address, Block, Hash, Header, PacketSigner, Receipt, Transaction,
    MIMETYPE_PROOF_OF_STAKE,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

pub struct InstantSealEngine {
    signer: Arc<dyn PacketSigner>,
    account: Account,
    seal_delay: Duration,
}

impl InstantSealEngine {
    pub fn new(signer: Arc<dyn PacketSigner>) -> Self {
        let account = signer.account();
        Self {
            signer,
            account,
            seal_delay: Duration::ZERO,
        }
    }

    /// Emulate sealing latency, for interrupt testing.
    pub fn with_seal_delay(mut self, delay: Duration) -> Self {
        self.seal_delay = delay;
        self
    }
}

#[async_trait]
impl ConsensusEngine for InstantSealEngine {
    fn seal_hash(&self, header: &Header) -> Hash {
        header.seal_content_hash()
    }

    fn prepare(&self, chain: &dyn ChainStore, header: &mut Header) -> Result<(), EngineError> {
        let parent = chain.current_block();
        header.time = header.time.max(parent.time() + 1);
        header.nonce = 0;
        Ok(())
    }

    fn post_prepare(&self, _chain: &dyn ChainStore, _header: &Header) -> Result<(), EngineError> {
        Ok(())
    }

    fn handle_transactions(
        &self,
        _chain: &dyn ChainStore,
        _header: &Header,
        _state: &mut dyn StateDatabase,
        pending: HashMap<Address, Vec<Transaction>>,
    ) -> Result<HashMap<Address, Vec<Transaction>>, EngineError> {
        Ok(pending)
    }

    fn is_block_ready_to_seal(
        &self,
        _chain: &dyn ChainStore,
        _header: &Header,
        _state: &mut dyn StateDatabase,
    ) -> bool {
        true
    }

    fn finalize(
        &self,
        _chain: &dyn ChainStore,
        _header: &Header,
        _state: &mut dyn StateDatabase,
        _txs: &[Transaction],
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn finalize_and_assemble(
        &self,
        _chain: &dyn ChainStore,
        mut header: Header,
        state: &mut dyn StateDatabase,
        txs: Vec<Transaction>,
        receipts: &[Receipt],
    ) -> Result<Block, EngineError> {
        header.state_root = state.intermediate_root();
        Ok(Block::assemble(header, txs, receipts))
    }

    async fn seal(
        &self,
        mut block: Block,
        results: mpsc::UnboundedSender<Block>,
        mut stop: oneshot::Receiver<()>,
    ) -> Result<(), EngineError> {
        if !self.seal_delay.is_zero() {
            tokio::select! {
                _ = &mut stop => {
                    debug!(number = block.number(), "sealing aborted");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.seal_delay) => {}
            }
        } else if stop.try_recv().is_ok() {
            debug!(number = block.number(), "sealing aborted");
            return Ok(());
        }

        let digest = block.header().seal_content_hash();
        let signature = self
            .signer
            .sign(&self.account, MIMETYPE_PROOF_OF_STAKE, digest.as_bytes())
            .map_err(|err| EngineError::Seal(err.to_string()))?;
        let seal = keccak256(&signature);
        let mut nonce_bytes = [0u8; 8];
        nonce_bytes.copy_from_slice(&seal.as_bytes()[..8]);
        block.header_mut().nonce = u64::from_be_bytes(nonce_bytes);

        trace!(number = block.number(), hash = ?block.hash(), "block sealed");
        let _ = results.send(block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattica_core::{ChainConfig, EventBus, MemoryChain, MemoryState};
    use lattica_types::DevSigner;

    fn engine() -> InstantSealEngine {
        InstantSealEngine::new(Arc::new(DevSigner::new([8u8; 32])))
    }

    fn chain() -> MemoryChain {
        MemoryChain::new(
            ChainConfig::default(),
            EventBus::new(),
            Box::new(MemoryState::new()),
            30_000_000,
        )
    }

    #[tokio::test]
    async fn test_seal_delivers_sealed_block() {
        let engine = engine();
        let block = Block::assemble(
            Header {
                number: 1,
                ..Default::default()
            },
            Vec::new(),
            &[],
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = oneshot::channel();

        engine.seal(block, tx, stop_rx).await.unwrap();
        let sealed = rx.recv().await.unwrap();
        assert_ne!(sealed.header().nonce, 0);
    }

    #[tokio::test]
    async fn test_seal_respects_stop() {
        let engine = engine().with_seal_delay(Duration::from_secs(30));
        let block = Block::assemble(Header::default(), Vec::new(), &[]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();

        let handle = tokio::spawn(async move { engine.seal(block, tx, stop_rx).await });
        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_prepare_advances_time() {
        let engine = engine();
        let chain = chain();
        let mut header = Header {
            number: 1,
            ..Default::default()
        };
        engine.prepare(&chain, &mut header).unwrap();
        assert!(header.time > chain.current_block().time());
    }
}
