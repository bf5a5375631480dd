// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! # Lattica Network
//!
//! The networking layer pieces the consensus overlay sits on:
//! - **transport**: the peer transport seam used to send consensus packets
//! - **dial**: the outbound connection scheduler
//! - **history**: the expiring dial-history queue
//! - **rebroadcast**: the per-packet-hash rebroadcast cache and the random
//!   rebroadcast path

pub mod dial;
pub mod error;
pub mod history;
pub mod rebroadcast;
pub mod transport;

pub use dial::{
    DialCheckError, DialConfig, DialFlag, DialSchedulerHandle, NodeDialer, NodeResolver,
    PeerDirection, DIAL_HISTORY_EXPIRATION,
};
pub use error::{NetworkError, Result};
pub use history::DialHistory;
pub use rebroadcast::{RebroadcastCache, Rebroadcaster};
pub use transport::{MemoryTransport, PeerTransport};
