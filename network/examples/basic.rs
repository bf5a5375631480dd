// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Example: driving the dial scheduler with a logging dialer.

use async_trait::async_trait;
use lattica_network::{DialConfig, DialSchedulerHandle, NodeDialer, Result};
use lattica_types::{NodeId, NodeRecord};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

struct LoggingDialer;

#[async_trait]
impl NodeDialer for LoggingDialer {
    async fn dial(&self, node: &NodeRecord) -> Result<()> {
        println!("dialing {} at {:?}", node.id, node.socket_addr());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = DialConfig {
        self_id: NodeId::from_low_u64(1),
        max_dial_peers: 8,
        ..Default::default()
    };
    let scheduler = DialSchedulerHandle::spawn(config, Arc::new(LoggingDialer), None);

    // A static node the scheduler keeps trying to reach.
    scheduler
        .add_static(NodeRecord::new(
            NodeId::from_low_u64(2),
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            30304,
        ))
        .await?;

    // A couple of discovered candidates.
    for n in 3..6 {
        scheduler
            .add_node(NodeRecord::new(
                NodeId::from_low_u64(n),
                IpAddr::V4(Ipv4Addr::new(127, 0, 0, n as u8)),
                30303,
            ))
            .await?;
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    println!("in flight: {}, peers: {}", scheduler.dialing_count(), scheduler.peer_count());

    scheduler.stop().await;
    Ok(())
}
