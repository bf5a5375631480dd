// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Core error types.

use crate::backup::BackupError;
use lattica_types::{Hash, SignatureError};
use thiserror::Error;

/// Per-transaction execution failures.
///
/// The first four variants are transient: the miner skips the transaction
/// and keeps packing. Anything else discards the transaction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("gas limit reached")]
    GasLimitReached,

    #[error("nonce too low: expected {expected}, got {got}")]
    NonceTooLow { expected: u64, got: u64 },

    #[error("nonce too high: expected {expected}, got {got}")]
    NonceTooHigh { expected: u64, got: u64 },

    #[error("transaction type not supported")]
    TxTypeNotSupported,

    #[error("intrinsic gas too low: need {need}, have {have}")]
    IntrinsicGas { need: u64, have: u64 },

    #[error("insufficient funds for gas * price + value")]
    InsufficientFunds,

    #[error("invalid transaction fields")]
    InvalidFields,
}

impl ExecutionError {
    /// Whether the miner should skip this transaction and continue packing.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExecutionError::GasLimitReached
                | ExecutionError::NonceTooLow { .. }
                | ExecutionError::NonceTooHigh { .. }
                | ExecutionError::TxTypeNotSupported
        )
    }
}

/// Consensus engine seam errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("header preparation failed: {0}")]
    Prepare(String),

    #[error("transaction handling failed: {0}")]
    Transactions(String),

    #[error("finalization failed: {0}")]
    Finalize(String),

    #[error("sealing failed: {0}")]
    Seal(String),
}

/// Chain-level failures: these surface to the caller.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("unknown state root {0:?}")]
    UnknownStateRoot(Hash),

    #[error("unknown block {0:?}")]
    UnknownBlock(Hash),

    #[error("chain write failed: {0}")]
    Write(String),

    #[error("sender recovery failed for transaction {index}: {source}")]
    SenderRecovery {
        index: usize,
        #[source]
        source: SignatureError,
    },

    #[error("could not apply transaction {index} [{hash:?}]: {source}")]
    Apply {
        index: usize,
        hash: Hash,
        #[source]
        source: ExecutionError,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Backup(#[from] BackupError),
}
