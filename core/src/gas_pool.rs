// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Block gas pool.

use crate::error::ExecutionError;

/// Tracks the gas still available while packing or replaying a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPool(u64);

impl GasPool {
    pub fn new(gas: u64) -> Self {
        GasPool(gas)
    }

    pub fn gas(&self) -> u64 {
        self.0
    }

    pub fn add_gas(&mut self, amount: u64) -> &mut Self {
        self.0 = self.0.saturating_add(amount);
        self
    }

    /// Reserve `amount` gas from the pool.
    pub fn sub_gas(&mut self, amount: u64) -> Result<(), ExecutionError> {
        if self.0 < amount {
            return Err(ExecutionError::GasLimitReached);
        }
        self.0 -= amount;
        Ok(())
    }
}

impl std::fmt::Display for GasPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_gas_enforces_limit() {
        let mut pool = GasPool::new(30_000);
        assert!(pool.sub_gas(21_000).is_ok());
        assert_eq!(pool.gas(), 9_000);
        assert_eq!(pool.sub_gas(21_000), Err(ExecutionError::GasLimitReached));
    }

    #[test]
    fn test_refund_restores_gas() {
        let mut pool = GasPool::new(100_000);
        pool.sub_gas(50_000).unwrap();
        pool.add_gas(29_000);
        assert_eq!(pool.gas(), 79_000);
    }
}
