// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! # Lattica Core
//!
//! Chain-side building blocks consumed by the miner, the consensus overlay
//! and the node:
//! - **chain**: the canonical chain store seam and an in-memory store
//! - **state**: the account state seam and an in-memory implementation
//! - **executor**: the message execution seam (the EVM stand-in)
//! - **engine**: the consensus engine seam
//! - **processor**: deterministic block replay
//! - **events**: the chain event bus
//! - **gas_pool**, **gas_exempt**, **fork**, **backup**: supporting pieces

pub mod backup;
pub mod chain;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod fork;
pub mod gas_exempt;
pub mod gas_pool;
pub mod processor;
pub mod state;
pub mod txpool;

pub use backup::{BackupError, BackupManager};
pub use chain::{
    calc_gas_limit, ChainConfig, ChainStore, ImportStatus, MemoryChain, ELASTICITY_MULTIPLIER,
    GAS_LIMIT_BOUND_DIVISOR,
};
pub use engine::ConsensusEngine;
pub use error::{ChainError, EngineError, ExecutionError};
pub use events::{ChainHeadEvent, ChainSideEvent, EventBus, NewMinedBlockEvent, NewTxsEvent};
pub use executor::{ExecutionBackend, ExecutionOutcome, Message, TransferBackend, VmConfig};
pub use fork::{apply_state_fork, ForkConfig};
pub use gas_exempt::{conversion_contract_address, is_gas_exempt};
pub use gas_pool::GasPool;
pub use processor::{apply_transaction, StateProcessor};
pub use state::{MemoryState, StateDatabase};
pub use txpool::{MemoryPool, TransactionPool};
