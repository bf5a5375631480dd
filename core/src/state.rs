// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Account state seam.
//!
//! The production state database (trie-backed, with prefetching) lives
//! outside this workspace; [`StateDatabase`] is the surface the miner and
//! the processor program against. [`MemoryState`] is a deterministic
//! in-memory implementation used by the dev node and the tests.

use lattica_types::{keccak256, Address, Hash, Log, U256};
use std::collections::{BTreeMap, HashMap};

/// Mutable account state scoped to one block-building or replay attempt.
pub trait StateDatabase: Send + Sync {
    fn nonce(&self, address: Address) -> u64;
    fn set_nonce(&mut self, address: Address, nonce: u64);

    fn balance(&self, address: Address) -> U256;
    fn add_balance(&mut self, address: Address, amount: U256);
    fn sub_balance(&mut self, address: Address, amount: U256);

    fn storage(&self, address: Address, key: Hash) -> Hash;
    fn set_storage(&mut self, address: Address, key: Hash, value: Hash);

    /// Open a revert point. Returns an identifier for [`revert_to_snapshot`].
    fn snapshot(&mut self) -> usize;
    fn revert_to_snapshot(&mut self, id: usize);

    /// Bind subsequent logs to a transaction.
    fn prepare(&mut self, tx_hash: Hash, index: usize);
    fn add_log(&mut self, log: Log);
    /// Logs recorded for `tx_hash`, stamped with `block_hash`.
    fn logs_for(&self, tx_hash: Hash, block_hash: Hash) -> Vec<Log>;

    /// Deterministic digest of the current account set.
    fn intermediate_root(&mut self) -> Hash;
    /// Collapse pending revert points after a successful application.
    fn finalise(&mut self);

    fn start_prefetcher(&mut self, tag: &'static str);
    fn stop_prefetcher(&mut self);

    /// Copy-on-write clone handed to concurrent consumers.
    fn boxed_copy(&self) -> Box<dyn StateDatabase>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct AccountData {
    nonce: u64,
    balance: U256,
    storage: BTreeMap<Hash, Hash>,
}

/// In-memory [`StateDatabase`].
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    accounts: HashMap<Address, AccountData>,
    logs: Vec<Log>,
    snapshots: Vec<(HashMap<Address, AccountData>, usize)>,
    tx_context: Option<(Hash, usize)>,
    prefetcher: Option<&'static str>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account balance, for genesis allocation.
    pub fn fund(&mut self, address: Address, amount: U256) {
        self.accounts.entry(address).or_default().balance = amount;
    }
}

impl StateDatabase for MemoryState {
    fn nonce(&self, address: Address) -> u64 {
        self.accounts.get(&address).map(|a| a.nonce).unwrap_or(0)
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.accounts.entry(address).or_default().nonce = nonce;
    }

    fn balance(&self, address: Address) -> U256 {
        self.accounts
            .get(&address)
            .map(|a| a.balance)
            .unwrap_or_default()
    }

    fn add_balance(&mut self, address: Address, amount: U256) {
        let account = self.accounts.entry(address).or_default();
        account.balance = account.balance.saturating_add(amount);
    }

    fn sub_balance(&mut self, address: Address, amount: U256) {
        let account = self.accounts.entry(address).or_default();
        account.balance = account.balance.saturating_sub(amount);
    }

    fn storage(&self, address: Address, key: Hash) -> Hash {
        self.accounts
            .get(&address)
            .and_then(|a| a.storage.get(&key).copied())
            .unwrap_or_default()
    }

    fn set_storage(&mut self, address: Address, key: Hash, value: Hash) {
        self.accounts
            .entry(address)
            .or_default()
            .storage
            .insert(key, value);
    }

    fn snapshot(&mut self) -> usize {
        self.snapshots.push((self.accounts.clone(), self.logs.len()));
        self.snapshots.len() - 1
    }

    fn revert_to_snapshot(&mut self, id: usize) {
        if let Some((accounts, log_len)) = self.snapshots.get(id).cloned() {
            self.accounts = accounts;
            self.logs.truncate(log_len);
            self.snapshots.truncate(id);
        }
    }

    fn prepare(&mut self, tx_hash: Hash, index: usize) {
        self.tx_context = Some((tx_hash, index));
    }

    fn add_log(&mut self, mut log: Log) {
        if let Some((tx_hash, index)) = self.tx_context {
            log.tx_hash = Some(tx_hash);
            log.tx_index = Some(index as u32);
        }
        self.logs.push(log);
    }

    fn logs_for(&self, tx_hash: Hash, block_hash: Hash) -> Vec<Log> {
        self.logs
            .iter()
            .filter(|log| log.tx_hash == Some(tx_hash))
            .cloned()
            .map(|mut log| {
                log.block_hash = Some(block_hash);
                log
            })
            .collect()
    }

    fn intermediate_root(&mut self) -> Hash {
        let ordered: BTreeMap<_, _> = self.accounts.iter().collect();
        let mut buffer = Vec::new();
        for (address, account) in ordered {
            buffer.extend_from_slice(address.as_bytes());
            buffer.extend_from_slice(&account.nonce.to_be_bytes());
            let mut balance = [0u8; 32];
            account.balance.to_big_endian(&mut balance);
            buffer.extend_from_slice(&balance);
            for (key, value) in &account.storage {
                buffer.extend_from_slice(key.as_bytes());
                buffer.extend_from_slice(value.as_bytes());
            }
        }
        keccak256(&buffer)
    }

    fn finalise(&mut self) {
        self.snapshots.clear();
    }

    fn start_prefetcher(&mut self, tag: &'static str) {
        self.prefetcher = Some(tag);
    }

    fn stop_prefetcher(&mut self) {
        self.prefetcher = None;
    }

    fn boxed_copy(&self) -> Box<dyn StateDatabase> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_revert() {
        let mut state = MemoryState::new();
        let addr = Address::repeat_byte(1);
        state.fund(addr, U256::from(100u64));

        let snap = state.snapshot();
        state.sub_balance(addr, U256::from(40u64));
        state.set_nonce(addr, 3);
        assert_eq!(state.balance(addr), U256::from(60u64));

        state.revert_to_snapshot(snap);
        assert_eq!(state.balance(addr), U256::from(100u64));
        assert_eq!(state.nonce(addr), 0);
    }

    #[test]
    fn test_revert_drops_logs() {
        let mut state = MemoryState::new();
        let tx_hash = Hash::repeat_byte(9);
        state.prepare(tx_hash, 0);

        let snap = state.snapshot();
        state.add_log(Log::new(Address::repeat_byte(2), vec![], vec![]));
        assert_eq!(state.logs_for(tx_hash, Hash::zero()).len(), 1);

        state.revert_to_snapshot(snap);
        assert!(state.logs_for(tx_hash, Hash::zero()).is_empty());
    }

    #[test]
    fn test_root_is_deterministic() {
        let mut a = MemoryState::new();
        let mut b = MemoryState::new();
        for i in 0..4u8 {
            a.fund(Address::repeat_byte(i), U256::from(i));
            b.fund(Address::repeat_byte(3 - i), U256::from(3 - i));
        }
        assert_eq!(a.intermediate_root(), b.intermediate_root());
    }

    #[test]
    fn test_logs_stamped_with_context() {
        let mut state = MemoryState::new();
        let tx_hash = Hash::repeat_byte(5);
        state.prepare(tx_hash, 2);
        state.add_log(Log::new(Address::repeat_byte(1), vec![], vec![]));

        let block_hash = Hash::repeat_byte(7);
        let logs = state.logs_for(tx_hash, block_hash);
        assert_eq!(logs[0].tx_index, Some(2));
        assert_eq!(logs[0].block_hash, Some(block_hash));
    }
}
