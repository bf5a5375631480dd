// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! One-off hard-fork state mutation.

use crate::state::StateDatabase;
use lattica_types::Address;
use tracing::info;

/// A balance-recovery fork: at `block`, the balances of `drained` accounts
/// move to `refund`.
#[derive(Debug, Clone)]
pub struct ForkConfig {
    pub block: u64,
    pub drained: Vec<Address>,
    pub refund: Address,
}

/// Apply the fork mutation to `state`.
pub fn apply_state_fork(state: &mut dyn StateDatabase, fork: &ForkConfig) {
    info!(block = fork.block, accounts = fork.drained.len(), "applying hard-fork state mutation");
    for address in &fork.drained {
        let balance = state.balance(*address);
        state.sub_balance(*address, balance);
        state.add_balance(fork.refund, balance);
    }
}
