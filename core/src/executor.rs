// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Message execution seam.
//!
//! Full contract execution is an external collaborator; [`ExecutionBackend`]
//! is the surface the processor and the miner drive. [`TransferBackend`] is
//! the in-memory implementation covering value transfers and contract
//! creation accounting, used by the dev node and the tests.

use crate::error::ExecutionError;
use crate::state::StateDatabase;
use lattica_types::{create_address, Address, Header, Transaction, U256, TX_GAS};

/// Gas charged per byte of call data.
const DATA_GAS_PER_BYTE: u64 = 16;

/// Execution-time configuration.
#[derive(Debug, Clone, Default)]
pub struct VmConfig {
    /// When set, gas-related failures do not abort the message: the
    /// transaction is recorded as failed instead. Used by gas-exempt
    /// system-contract transactions.
    pub override_gas_failure: bool,
}

/// A transaction lowered to an executable message.
#[derive(Debug, Clone)]
pub struct Message {
    pub from: Address,
    pub to: Option<Address>,
    pub nonce: u64,
    pub gas: u64,
    pub gas_price: U256,
    pub value: U256,
    pub data: Vec<u8>,
}

impl Message {
    pub fn from_tx(tx: &Transaction, sender: Address) -> Self {
        Self {
            from: sender,
            to: tx.to(),
            nonce: tx.nonce(),
            gas: tx.gas(),
            gas_price: tx.gas_price(),
            value: tx.value(),
            data: tx.data().to_vec(),
        }
    }

    /// Force the effective gas price, used for gas-exempt transactions.
    pub fn override_gas_price(&mut self, price: U256) {
        self.gas_price = price;
    }
}

/// Result of applying one message.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub used_gas: u64,
    pub failed: bool,
    pub output: Vec<u8>,
    pub contract_address: Option<Address>,
}

/// Applies messages against a state database.
pub trait ExecutionBackend: Send + Sync {
    fn apply_message(
        &self,
        msg: &Message,
        state: &mut dyn StateDatabase,
        header: &Header,
        cfg: &VmConfig,
    ) -> Result<ExecutionOutcome, ExecutionError>;
}

/// Transfer-only [`ExecutionBackend`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferBackend;

impl TransferBackend {
    fn intrinsic_gas(data: &[u8]) -> u64 {
        TX_GAS + data.len() as u64 * DATA_GAS_PER_BYTE
    }
}

impl ExecutionBackend for TransferBackend {
    fn apply_message(
        &self,
        msg: &Message,
        state: &mut dyn StateDatabase,
        header: &Header,
        cfg: &VmConfig,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let expected_nonce = state.nonce(msg.from);
        if msg.nonce < expected_nonce {
            return Err(ExecutionError::NonceTooLow {
                expected: expected_nonce,
                got: msg.nonce,
            });
        }
        if msg.nonce > expected_nonce {
            return Err(ExecutionError::NonceTooHigh {
                expected: expected_nonce,
                got: msg.nonce,
            });
        }

        let intrinsic = Self::intrinsic_gas(&msg.data);
        if msg.gas < intrinsic {
            if !cfg.override_gas_failure {
                return Err(ExecutionError::IntrinsicGas {
                    need: intrinsic,
                    have: msg.gas,
                });
            }
            state.set_nonce(msg.from, expected_nonce + 1);
            return Ok(ExecutionOutcome {
                used_gas: msg.gas,
                failed: true,
                output: Vec::new(),
                contract_address: None,
            });
        }

        let fee = msg.gas_price * U256::from(intrinsic);
        let cost = fee + msg.value;
        if state.balance(msg.from) < cost {
            if !cfg.override_gas_failure {
                return Err(ExecutionError::InsufficientFunds);
            }
            // Gas failures are overridden: burn the nonce, mark the
            // transaction failed, leave balances untouched.
            state.set_nonce(msg.from, expected_nonce + 1);
            return Ok(ExecutionOutcome {
                used_gas: intrinsic,
                failed: true,
                output: Vec::new(),
                contract_address: None,
            });
        }

        state.set_nonce(msg.from, expected_nonce + 1);
        state.sub_balance(msg.from, cost);
        state.add_balance(header.coinbase, fee);

        let contract_address = match msg.to {
            Some(recipient) => {
                state.add_balance(recipient, msg.value);
                None
            }
            None => {
                let created = create_address(msg.from, msg.nonce);
                state.add_balance(created, msg.value);
                // Creation nonce, matching account-creation accounting.
                state.set_nonce(created, 1);
                Some(created)
            }
        };

        Ok(ExecutionOutcome {
            used_gas: intrinsic,
            failed: false,
            output: Vec::new(),
            contract_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryState;

    fn header_with_coinbase(coinbase: Address) -> Header {
        Header {
            coinbase,
            gas_limit: 30_000_000,
            ..Default::default()
        }
    }

    fn message(from: Address, to: Option<Address>, nonce: u64, value: u64) -> Message {
        Message {
            from,
            to,
            nonce,
            gas: TX_GAS,
            gas_price: U256::from(1u64),
            value: U256::from(value),
            data: Vec::new(),
        }
    }

    #[test]
    fn test_transfer_moves_value_and_fee() {
        let from = Address::repeat_byte(1);
        let to = Address::repeat_byte(2);
        let coinbase = Address::repeat_byte(3);
        let mut state = MemoryState::new();
        state.fund(from, U256::from(1_000_000u64));

        let outcome = TransferBackend
            .apply_message(
                &message(from, Some(to), 0, 500),
                &mut state,
                &header_with_coinbase(coinbase),
                &VmConfig::default(),
            )
            .unwrap();

        assert!(!outcome.failed);
        assert_eq!(outcome.used_gas, TX_GAS);
        assert_eq!(state.balance(to), U256::from(500u64));
        assert_eq!(state.balance(coinbase), U256::from(TX_GAS));
        assert_eq!(state.nonce(from), 1);
    }

    #[test]
    fn test_nonce_gaps_rejected() {
        let from = Address::repeat_byte(1);
        let mut state = MemoryState::new();
        state.fund(from, U256::from(1_000_000u64));
        let header = header_with_coinbase(Address::zero());

        let low = TransferBackend.apply_message(
            &message(from, Some(Address::repeat_byte(2)), 5, 0),
            &mut state,
            &header,
            &VmConfig::default(),
        );
        assert!(matches!(low, Err(ExecutionError::NonceTooHigh { .. })));

        state.set_nonce(from, 7);
        let high = TransferBackend.apply_message(
            &message(from, Some(Address::repeat_byte(2)), 5, 0),
            &mut state,
            &header,
            &VmConfig::default(),
        );
        assert!(matches!(high, Err(ExecutionError::NonceTooLow { .. })));
    }

    #[test]
    fn test_creation_assigns_contract_address() {
        let from = Address::repeat_byte(1);
        let mut state = MemoryState::new();
        state.fund(from, U256::from(1_000_000u64));

        let outcome = TransferBackend
            .apply_message(
                &message(from, None, 0, 100),
                &mut state,
                &header_with_coinbase(Address::zero()),
                &VmConfig::default(),
            )
            .unwrap();

        let created = outcome.contract_address.expect("contract address");
        assert_eq!(created, create_address(from, 0));
        assert_eq!(state.balance(created), U256::from(100u64));
    }

    #[test]
    fn test_override_turns_gas_failure_into_failed_receipt() {
        let from = Address::repeat_byte(1);
        let mut state = MemoryState::new();
        // No funds at all.
        let header = header_with_coinbase(Address::zero());

        let strict = TransferBackend.apply_message(
            &message(from, Some(Address::repeat_byte(2)), 0, 100),
            &mut state,
            &header,
            &VmConfig::default(),
        );
        assert!(matches!(strict, Err(ExecutionError::InsufficientFunds)));

        let overridden = TransferBackend
            .apply_message(
                &message(from, Some(Address::repeat_byte(2)), 0, 100),
                &mut state,
                &header,
                &VmConfig {
                    override_gas_failure: true,
                },
            )
            .unwrap();
        assert!(overridden.failed);
        assert_eq!(state.nonce(from), 1);
    }
}
