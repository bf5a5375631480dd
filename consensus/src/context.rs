// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Consensus context accessor.
//!
//! The engine stores one 32-byte context value per past block in a system
//! contract. Writes run against the current header in no-gas mode; reads
//! execute at a specific block hash. Keys derive deterministically from the
//! block number.

use crate::abi::{self, Token};
use lattica_core::StateDatabase;
use lattica_types::{Address, Hash, Header, ZERO_ADDRESS};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// Block from which context entries exist.
pub const CONSENSUS_CONTEXT_START_BLOCK: u64 = 64;

/// Block from which context-based validation starts referencing past keys.
pub const CONTEXT_BASED_START_BLOCK: u64 = 128;

/// Lookback distance while history is still shallow.
pub const CONTEXT_BASED_BLOCK_THRESHOLD: u64 = 8;

/// Retained context window once enough history exists.
pub const CONSENSUS_CONTEXT_MAX_BLOCK_COUNT: u64 = 32_768;

const SET_CONTEXT_METHOD: &str = "setContext(string,bytes32)";
const DELETE_CONTEXT_METHOD: &str = "deleteContext(string)";
const GET_CONTEXT_METHOD: &str = "getContext(string)";

/// Well-known address of the consensus context system contract.
pub fn consensus_context_contract_address() -> Address {
    Address::from_low_u64_be(0x9002)
}

/// Failure inside the contract-call collaborator.
#[derive(Debug, Error)]
#[error("contract call failed: {0}")]
pub struct ContractCallError(pub String);

#[derive(Debug, Error)]
pub enum ContextError {
    /// The context value for the key does not exist (empty call result).
    #[error("consensus context not found")]
    NotFound,

    /// The block number is below the activation height for the operation.
    #[error("consensus context not applicable at this block")]
    NotApplicable,

    #[error("context result malformed")]
    Malformed,

    #[error(transparent)]
    Call(#[from] ContractCallError),
}

/// Executes encoded calls against system contracts.
pub trait ContractCaller: Send + Sync {
    /// Execute a state-mutating call at `header` with unlimited gas.
    fn execute_no_gas(
        &self,
        from: Address,
        to: Address,
        data: Vec<u8>,
        state: &mut dyn StateDatabase,
        header: &Header,
    ) -> Result<Vec<u8>, ContractCallError>;

    /// Read-only call executed at the state of `block_hash`.
    fn call_at(
        &self,
        to: Address,
        data: Vec<u8>,
        block_hash: Hash,
    ) -> Result<Vec<u8>, ContractCallError>;
}

/// Reads and writes per-block consensus context values.
pub struct ConsensusContext {
    caller: Arc<dyn ContractCaller>,
}

impl ConsensusContext {
    pub fn new(caller: Arc<dyn ContractCaller>) -> Self {
        Self { caller }
    }

    /// Store `value` under `key` at the current header.
    pub fn set_context(
        &self,
        key: &str,
        value: [u8; 32],
        state: &mut dyn StateDatabase,
        header: &Header,
    ) -> Result<(), ContextError> {
        let data = abi::encode_call(
            SET_CONTEXT_METHOD,
            &[Token::String(key.to_string()), Token::FixedBytes32(value)],
        );
        self.caller
            .execute_no_gas(
                ZERO_ADDRESS,
                consensus_context_contract_address(),
                data,
                state,
                header,
            )
            .map_err(|err| {
                error!(%key, %err, "set consensus context failed");
                ContextError::Call(err)
            })?;
        Ok(())
    }

    /// Remove `key` at the current header.
    pub fn delete_context(
        &self,
        key: &str,
        state: &mut dyn StateDatabase,
        header: &Header,
    ) -> Result<(), ContextError> {
        let data = abi::encode_call(DELETE_CONTEXT_METHOD, &[Token::String(key.to_string())]);
        self.caller
            .execute_no_gas(
                ZERO_ADDRESS,
                consensus_context_contract_address(),
                data,
                state,
                header,
            )
            .map_err(|err| {
                error!(%key, %err, "delete consensus context failed");
                ContextError::Call(err)
            })?;
        Ok(())
    }

    /// Read the 32-byte value stored under `key`, at `block_hash`.
    pub fn get_context(&self, key: &str, block_hash: Hash) -> Result<[u8; 32], ContextError> {
        let data = abi::encode_call(GET_CONTEXT_METHOD, &[Token::String(key.to_string())]);
        let result = self
            .caller
            .call_at(consensus_context_contract_address(), data, block_hash)?;
        if result.is_empty() {
            debug!(%key, "consensus context empty");
            return Err(ContextError::NotFound);
        }
        abi::decode_bytes32(&result).ok_or(ContextError::Malformed)
    }
}

/// Context key of `block_number`: `"bc-" ‖ decimal(n)`.
pub fn context_key(block_number: u64) -> Result<String, ContextError> {
    if block_number <= CONSENSUS_CONTEXT_START_BLOCK {
        return Err(ContextError::NotApplicable);
    }
    Ok(format!("bc-{}", block_number))
}

/// The context key a block at `current_block_number` references: a shallow
/// lookback initially, the full retained window once enough history exists.
pub fn context_key_for_block(current_block_number: u64) -> Result<String, ContextError> {
    if current_block_number < CONTEXT_BASED_START_BLOCK {
        return Err(ContextError::NotApplicable);
    }
    if current_block_number > CONSENSUS_CONTEXT_START_BLOCK + CONSENSUS_CONTEXT_MAX_BLOCK_COUNT {
        context_key(current_block_number - CONSENSUS_CONTEXT_MAX_BLOCK_COUNT)
    } else {
        context_key(current_block_number - CONTEXT_BASED_BLOCK_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattica_core::MemoryState;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MockCaller {
        executed: Mutex<Vec<(Address, Vec<u8>)>>,
        call_result: Mutex<Vec<u8>>,
    }

    impl ContractCaller for MockCaller {
        fn execute_no_gas(
            &self,
            _from: Address,
            to: Address,
            data: Vec<u8>,
            _state: &mut dyn StateDatabase,
            _header: &Header,
        ) -> Result<Vec<u8>, ContractCallError> {
            self.executed.lock().push((to, data));
            Ok(Vec::new())
        }

        fn call_at(
            &self,
            _to: Address,
            _data: Vec<u8>,
            _block_hash: Hash,
        ) -> Result<Vec<u8>, ContractCallError> {
            Ok(self.call_result.lock().clone())
        }
    }

    #[test]
    fn test_key_derivation() {
        assert_eq!(context_key(100).unwrap(), "bc-100");
        assert!(matches!(
            context_key(CONSENSUS_CONTEXT_START_BLOCK),
            Err(ContextError::NotApplicable)
        ));
    }

    #[test]
    fn test_key_for_block_thresholds() {
        assert!(matches!(
            context_key_for_block(CONTEXT_BASED_START_BLOCK - 1),
            Err(ContextError::NotApplicable)
        ));

        // Shallow history: lookback by the block threshold.
        let shallow = context_key_for_block(CONTEXT_BASED_START_BLOCK).unwrap();
        assert_eq!(
            shallow,
            format!("bc-{}", CONTEXT_BASED_START_BLOCK - CONTEXT_BASED_BLOCK_THRESHOLD)
        );

        // Deep history: lookback by the full retained window.
        let deep_block = CONSENSUS_CONTEXT_START_BLOCK + CONSENSUS_CONTEXT_MAX_BLOCK_COUNT + 10;
        let deep = context_key_for_block(deep_block).unwrap();
        assert_eq!(
            deep,
            format!("bc-{}", deep_block - CONSENSUS_CONTEXT_MAX_BLOCK_COUNT)
        );
    }

    #[test]
    fn test_set_targets_context_contract() {
        let caller = Arc::new(MockCaller::default());
        let context = ConsensusContext::new(caller.clone());
        let mut state = MemoryState::new();

        context
            .set_context("bc-70", [7u8; 32], &mut state, &Header::default())
            .unwrap();

        let executed = caller.executed.lock();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].0, consensus_context_contract_address());
        assert_eq!(&executed[0].1[..4], &abi::selector(SET_CONTEXT_METHOD));
    }

    #[test]
    fn test_get_empty_result_is_not_found() {
        let caller = Arc::new(MockCaller::default());
        let context = ConsensusContext::new(caller);
        assert!(matches!(
            context.get_context("bc-70", Hash::zero()),
            Err(ContextError::NotFound)
        ));
    }

    #[test]
    fn test_get_returns_stored_word() {
        let caller = Arc::new(MockCaller::default());
        *caller.call_result.lock() = [9u8; 32].to_vec();
        let context = ConsensusContext::new(caller);
        assert_eq!(context.get_context("bc-70", Hash::zero()).unwrap(), [9u8; 32]);
    }
}
