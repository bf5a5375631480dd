// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Gas-exempt transaction qualification.
//!
//! Transactions targeting the conversion system contract with a qualifying
//! shape execute with the gas price forced to zero and gas failures
//! overridden, both in the miner and during replay.

use lattica_types::{Address, Transaction, TxPayload};

/// Well-known address of the conversion system contract.
pub fn conversion_contract_address() -> Address {
    Address::from_low_u64_be(0x9001)
}

/// Whether `tx` qualifies for gas-exempt execution: it must target the
/// conversion contract, be a default-fee transaction, carry call data, and
/// move no value.
pub fn is_gas_exempt(tx: &Transaction) -> bool {
    if tx.to() != Some(conversion_contract_address()) {
        return false;
    }
    if !matches!(tx.payload, TxPayload::DefaultFee { .. }) {
        return false;
    }
    !tx.data().is_empty() && tx.value().is_zero()
}
