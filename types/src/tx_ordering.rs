// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Nonce-ordered transaction cursor used by the block-production worker.

use crate::hash::Address;
use crate::transaction::Transaction;
use std::collections::HashMap;

/// Flattens a per-sender transaction map into a single cursor that yields
/// each sender's transactions in ascending nonce order.
///
/// Senders are visited in address order so iteration is deterministic for a
/// given input set. The cursor never re-yields a transaction: `advance`
/// moves strictly forward.
#[derive(Debug, Clone)]
pub struct TransactionsByNonce {
    ordered: Vec<(Address, Transaction)>,
    cursor: usize,
}

impl TransactionsByNonce {
    pub fn new(mut txs: HashMap<Address, Vec<Transaction>>) -> Self {
        let mut senders: Vec<Address> = txs.keys().copied().collect();
        senders.sort();

        let mut ordered = Vec::new();
        for sender in senders {
            let mut list = txs.remove(&sender).unwrap_or_default();
            list.sort_by_key(|tx| tx.nonce());
            for tx in list {
                ordered.push((sender, tx));
            }
        }
        Self { ordered, cursor: 0 }
    }

    /// The transaction under the cursor, with its sender.
    pub fn peek(&self) -> Option<(&Address, &Transaction)> {
        self.ordered.get(self.cursor).map(|(a, t)| (a, t))
    }

    /// Move the cursor past the current transaction. Returns whether a
    /// transaction remains.
    pub fn advance(&mut self) -> bool {
        if self.cursor < self.ordered.len() {
            self.cursor += 1;
        }
        self.cursor < self.ordered.len()
    }

    /// Total number of transactions in the cursor, consumed or not.
    pub fn total_count(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.ordered.len()
    }

    /// Rebuild the per-sender map of the *remaining* transactions.
    pub fn remaining_by_sender(&self) -> HashMap<Address, Vec<Transaction>> {
        let mut map: HashMap<Address, Vec<Transaction>> = HashMap::new();
        for (sender, tx) in &self.ordered[self.cursor..] {
            map.entry(*sender).or_default().push(tx.clone());
        }
        map
    }
}
