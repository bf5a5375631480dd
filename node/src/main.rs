//! Lattica dev node.
//!
//! Wires the in-memory chain, pool, instant-seal engine, worker and gossip
//! overlay into a single-process node that mines continuously. Intended for
//! local development; the production transport and engine are external.

use lattica_consensus::{InstantSealEngine, PacketCodec, PeerHandler};
use lattica_core::{
    ChainConfig, ChainStore, EventBus, MemoryChain, MemoryPool, MemoryState, TransferBackend,
};
use lattica_miner::{MinerConfig, Worker};
use lattica_network::MemoryTransport;
use lattica_types::{DevSignature, DevSigner, Signer, U256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

#[derive(Debug, Clone)]
struct NodeConfig {
    author_seed: [u8; 32],
    is_consensus_relay: bool,
    recommit: Duration,
}

impl NodeConfig {
    fn from_env() -> Self {
        let relay = std::env::var("LATTICA_RELAY")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(true);
        let recommit_ms: u64 = std::env::var("LATTICA_RECOMMIT_MS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(3_000);
        Self {
            author_seed: [0x11; 32],
            is_consensus_relay: relay,
            recommit: Duration::from_millis(recommit_ms),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .init();

    let config = NodeConfig::from_env();
    info!(relay = config.is_consensus_relay, recommit = ?config.recommit, "lattica dev node starting");

    let bus = EventBus::new();
    let chain_config = ChainConfig::default();
    let signer = Signer::new(chain_config.chain_id, Arc::new(DevSignature));
    let author = DevSignature::address_for_seed(&config.author_seed);

    let mut genesis_state = MemoryState::new();
    genesis_state.fund(author, U256::from(10u64).pow(U256::from(24u64)));
    let chain: Arc<MemoryChain> = Arc::new(MemoryChain::new(
        chain_config.clone(),
        bus.clone(),
        Box::new(genesis_state),
        30_000_000,
    ));

    let pool = Arc::new(MemoryPool::new(signer.clone(), bus.clone()));
    let packet_signer = Arc::new(DevSigner::new(config.author_seed));
    let engine = Arc::new(InstantSealEngine::new(packet_signer.clone()));

    let transport = Arc::new(MemoryTransport::new());
    let latest_chain = chain.clone();
    let peer_handler = Arc::new(PeerHandler::new(
        config.is_consensus_relay,
        format!("lattica-{}", author),
        transport,
        PacketCodec::new(packet_signer),
        Arc::new(move || latest_chain.current_block().number()),
    ));

    let worker = Worker::spawn(
        MinerConfig {
            author,
            extra: b"lattica-dev".to_vec(),
            recommit: config.recommit,
            ..Default::default()
        },
        chain_config,
        engine,
        chain.clone(),
        pool,
        Arc::new(TransferBackend),
        signer,
        bus.clone(),
    );
    worker.start();

    // Track mined heads into the overlay's parent-hash window.
    let mut mined = bus.subscribe_mined();
    let overlay = peer_handler.clone();
    tokio::spawn(async move {
        while let Ok(event) = mined.recv().await {
            info!(
                number = event.block.number(),
                hash = ?event.block.hash(),
                txs = event.block.transactions().len(),
                "mined block"
            );
            overlay
                .set_current_parent(event.block.parent_hash(), event.block.number())
                .await;
        }
    });

    info!(author = ?author, "node running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    worker.close().await;
    Ok(())
}
