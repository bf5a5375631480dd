// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Node records handed to the dial scheduler.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Default TCP port assumed for discovered nodes that advertise none.
pub const DEFAULT_TCP_PORT: u16 = 30303;

/// 32-byte node identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_low_u64(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        NodeId(bytes)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

/// A dialable node: identity plus (possibly unresolved) endpoint.
///
/// Static nodes may be added without an address; the dial task resolves the
/// endpoint through the configured resolver before connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub ip: Option<IpAddr>,
    pub tcp_port: u16,
}

impl NodeRecord {
    pub fn new(id: NodeId, ip: IpAddr, tcp_port: u16) -> Self {
        Self {
            id,
            ip: Some(ip),
            tcp_port,
        }
    }

    pub fn unresolved(id: NodeId) -> Self {
        Self {
            id,
            ip: None,
            tcp_port: 0,
        }
    }

    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.ip.map(|ip| SocketAddr::new(ip, self.tcp_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display_is_short_hex() {
        let id = NodeId::from_low_u64(0xABCD);
        assert_eq!(id.to_string(), "0000000000000000");
        let id = NodeId([0x12; 32]);
        assert_eq!(id.to_string(), "1212121212121212");
    }

    #[test]
    fn test_unresolved_has_no_addr() {
        let record = NodeRecord::unresolved(NodeId::from_low_u64(1));
        assert!(record.socket_addr().is_none());
    }
}
