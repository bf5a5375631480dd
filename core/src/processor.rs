// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Deterministic block replay.
//!
//! [`StateProcessor::process`] re-executes every transaction of a block
//! against a state database and produces the receipts, logs and total gas
//! the block's sealer must have produced.

use crate::backup::BackupManager;
use crate::chain::{ChainConfig, ChainStore};
use crate::engine::ConsensusEngine;
use crate::error::{ChainError, ExecutionError};
use crate::executor::{ExecutionBackend, Message, VmConfig};
use crate::fork::apply_state_fork;
use crate::gas_exempt::is_gas_exempt;
use crate::gas_pool::GasPool;
use crate::state::StateDatabase;
use lattica_types::{
    logs_bloom, Hash, Header, Log, Receipt, ReceiptStatus, Signer, Transaction, U256,
};
use std::sync::Arc;
use tracing::trace;

/// Replays blocks against a state database.
pub struct StateProcessor {
    config: ChainConfig,
    chain: Arc<dyn ChainStore>,
    engine: Arc<dyn ConsensusEngine>,
    backend: Arc<dyn ExecutionBackend>,
    signer: Signer,
    backup: Option<Arc<dyn BackupManager>>,
}

impl StateProcessor {
    pub fn new(
        config: ChainConfig,
        chain: Arc<dyn ChainStore>,
        engine: Arc<dyn ConsensusEngine>,
        backend: Arc<dyn ExecutionBackend>,
        signer: Signer,
    ) -> Self {
        Self {
            config,
            chain,
            engine,
            backend,
            signer,
            backup: None,
        }
    }

    pub fn with_backup(mut self, backup: Arc<dyn BackupManager>) -> Self {
        self.backup = Some(backup);
        self
    }

    /// Replay `block` on top of `state`.
    ///
    /// Returns the receipts, the flattened logs and the total gas used.
    /// Sender-recovery and application failures are fatal: the block is
    /// invalid.
    pub fn process(
        &self,
        block: &lattica_types::Block,
        state: &mut dyn StateDatabase,
        cfg: &VmConfig,
    ) -> Result<(Vec<Receipt>, Vec<Log>, u64), ChainError> {
        let header = block.header();
        let block_hash = block.hash();

        self.engine.post_prepare(self.chain.as_ref(), header)?;

        if let Some(fork) = &self.config.fork {
            if fork.block == header.number {
                apply_state_fork(state, fork);
            }
        }

        let mut gas_pool = GasPool::new(header.gas_limit);
        let mut used_gas = 0u64;
        let mut receipts = Vec::with_capacity(block.transactions().len());
        let mut all_logs = Vec::new();

        for (index, tx) in block.transactions().iter().enumerate() {
            let sender = self
                .signer
                .sender(tx)
                .map_err(|source| ChainError::SenderRecovery { index, source })?;

            state.prepare(tx.hash(), index);
            let receipt = apply_transaction(
                &self.config,
                self.backend.as_ref(),
                &mut gas_pool,
                state,
                header,
                tx,
                sender,
                &mut used_gas,
                cfg,
                block_hash,
                index as u32,
            )
            .map_err(|source| ChainError::Apply {
                index,
                hash: tx.hash(),
                source,
            })?;

            all_logs.extend(receipt.logs.iter().cloned());
            receipts.push(receipt);
        }

        self.engine
            .finalize(self.chain.as_ref(), header, state, block.transactions())?;

        if let Some(backup) = &self.backup {
            backup.backup_block(block)?;
        }

        Ok((receipts, all_logs, used_gas))
    }
}

/// Apply one transaction and build its receipt.
///
/// Shared between the processor's replay path and the worker's packing path.
#[allow(clippy::too_many_arguments)]
pub fn apply_transaction(
    config: &ChainConfig,
    backend: &dyn ExecutionBackend,
    gas_pool: &mut GasPool,
    state: &mut dyn StateDatabase,
    header: &Header,
    tx: &Transaction,
    sender: lattica_types::Address,
    used_gas: &mut u64,
    cfg: &VmConfig,
    block_hash: Hash,
    index: u32,
) -> Result<Receipt, ExecutionError> {
    if !tx.verify_fields() {
        return Err(ExecutionError::InvalidFields);
    }

    let mut vm_config = cfg.clone();
    let mut msg = Message::from_tx(tx, sender);
    if is_gas_exempt(tx) {
        vm_config.override_gas_failure = true;
        msg.override_gas_price(U256::zero());
        trace!(tx = ?tx.hash(), "gas-exempt transaction, price forced to zero");
    }

    gas_pool.sub_gas(msg.gas)?;
    let outcome = match backend.apply_message(&msg, state, header, &vm_config) {
        Ok(outcome) => outcome,
        Err(err) => {
            gas_pool.add_gas(msg.gas);
            return Err(err);
        }
    };
    gas_pool.add_gas(msg.gas - outcome.used_gas);

    let post_state = if config.is_byzantium(header.number) {
        state.finalise();
        None
    } else {
        Some(state.intermediate_root())
    };
    *used_gas += outcome.used_gas;

    let logs = state.logs_for(tx.hash(), block_hash);
    let bloom = logs_bloom(logs.iter());

    Ok(Receipt {
        tx_type: tx.tx_type(),
        status: if outcome.failed {
            ReceiptStatus::Failed
        } else {
            ReceiptStatus::Successful
        },
        post_state,
        cumulative_gas_used: *used_gas,
        gas_used: outcome.used_gas,
        bloom,
        logs,
        tx_hash: tx.hash(),
        contract_address: if msg.to.is_none() {
            outcome.contract_address
        } else {
            None
        },
        block_hash: Some(block_hash),
        block_number: Some(header.number),
        transaction_index: index,
    })
}
