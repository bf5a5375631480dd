// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Network error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NetworkError>;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("peer not found: {0}")]
    PeerNotFound(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("scheduler stopped")]
    SchedulerStopped,
}
