// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Transaction pool seam.

use crate::events::{EventBus, NewTxsEvent};
use lattica_types::{Address, Signer, SignatureError, Transaction};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Read surface the miner uses: a snapshot of the pending set, grouped by
/// sender.
pub trait TransactionPool: Send + Sync {
    fn pending(&self) -> HashMap<Address, Vec<Transaction>>;
}

/// In-memory [`TransactionPool`].
pub struct MemoryPool {
    signer: Signer,
    bus: EventBus,
    pending: RwLock<HashMap<Address, Vec<Transaction>>>,
}

impl MemoryPool {
    pub fn new(signer: Signer, bus: EventBus) -> Self {
        Self {
            signer,
            bus,
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Admit a transaction, recovering its sender.
    pub fn add(&self, tx: Transaction) -> Result<(), SignatureError> {
        let sender = self.signer.sender(&tx)?;
        debug!(sender = ?sender, nonce = tx.nonce(), "transaction admitted to pool");
        self.pending.write().entry(sender).or_default().push(tx.clone());
        self.bus.post_new_txs(NewTxsEvent { txs: vec![tx] });
        Ok(())
    }

    /// Drop transactions that made it into a block.
    pub fn prune(&self, mined: &[Transaction]) {
        let hashes: Vec<_> = mined.iter().map(|tx| tx.hash()).collect();
        let mut pending = self.pending.write();
        for txs in pending.values_mut() {
            txs.retain(|tx| !hashes.contains(&tx.hash()));
        }
        pending.retain(|_, txs| !txs.is_empty());
    }

    pub fn len(&self) -> usize {
        self.pending.read().values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TransactionPool for MemoryPool {
    fn pending(&self) -> HashMap<Address, Vec<Transaction>> {
        self.pending.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattica_types::{
        signing_hash, DevSignature, GasTier, TxPayload, U256, DEFAULT_CHAIN_ID, TX_GAS,
    };
    use std::sync::Arc;

    fn signed_tx(seed: [u8; 32], nonce: u64) -> Transaction {
        let payload = TxPayload::DefaultFee {
            chain_id: DEFAULT_CHAIN_ID,
            nonce,
            gas: TX_GAS,
            max_gas_tier: GasTier::Default,
            to: Some(Address::repeat_byte(9)),
            value: U256::from(1u64),
            data: Vec::new(),
            remarks: Vec::new(),
            access_list: Vec::new(),
        };
        let digest = signing_hash(&payload, DEFAULT_CHAIN_ID);
        Transaction::new(payload, DevSignature::sign_with_seed(&seed, digest.as_bytes()))
    }

    fn test_pool() -> MemoryPool {
        MemoryPool::new(
            Signer::new(DEFAULT_CHAIN_ID, Arc::new(DevSignature)),
            EventBus::new(),
        )
    }

    #[test]
    fn test_add_groups_by_sender() {
        let pool = test_pool();
        pool.add(signed_tx([1; 32], 0)).unwrap();
        pool.add(signed_tx([1; 32], 1)).unwrap();
        pool.add(signed_tx([2; 32], 0)).unwrap();

        let pending = pool.pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_prune_removes_mined() {
        let pool = test_pool();
        let tx = signed_tx([1; 32], 0);
        pool.add(tx.clone()).unwrap();
        pool.add(signed_tx([1; 32], 1)).unwrap();

        pool.prune(&[tx]);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_bad_signature_rejected() {
        let pool = test_pool();
        let mut tx = signed_tx([1; 32], 0);
        tx.signature[0] ^= 0xFF;
        assert!(pool.add(tx).is_err());
    }
}
