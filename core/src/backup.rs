// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Optional block backup seam.

use lattica_types::Block;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("block backup failed: {0}")]
pub struct BackupError(pub String);

/// External backup sink consulted after sealing and after replay.
pub trait BackupManager: Send + Sync {
    fn backup_block(&self, block: &Block) -> Result<(), BackupError>;
}
