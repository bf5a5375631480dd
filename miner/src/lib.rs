// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! # Lattica Miner
//!
//! The block-production worker: an event-driven state machine that builds a
//! block environment on every new head or recommit tick, packs pool
//! transactions under gas and nonce constraints, hands the result to the
//! consensus engine for sealing, and commits sealed blocks to the chain.

pub mod unconfirmed;
pub mod worker;

use lattica_core::BackupManager;
use lattica_types::Address;
use std::sync::Arc;
use std::time::Duration;

pub use unconfirmed::UnconfirmedBlocks;
pub use worker::{ProposeError, Worker, MAX_RECOMMIT, MIN_RECOMMIT, STALE_THRESHOLD};

/// Miner configuration.
#[derive(Clone)]
pub struct MinerConfig {
    /// Block reward and coinbase address.
    pub author: Address,
    /// Free-form header extra data.
    pub extra: Vec<u8>,
    /// Gas limit used while the fee-market phase is not active.
    pub gas_floor: u64,
    /// Gas-limit target in the fee-market phase.
    pub gas_ceil: u64,
    /// Interval between proposal rounds; sanitized on spawn.
    pub recommit: Duration,
    /// Optional backup sink consulted after a task is dispatched.
    pub backup: Option<Arc<dyn BackupManager>>,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            author: Address::zero(),
            extra: Vec::new(),
            gas_floor: 8_000_000,
            gas_ceil: 30_000_000,
            recommit: Duration::from_secs(3),
            backup: None,
        }
    }
}
