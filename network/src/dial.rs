// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Outbound connection scheduler.
//!
//! Two kinds of dials are created:
//!
//! - *static* dials are pre-configured nodes the scheduler tries to keep
//!   connected at all times;
//! - *dynamic* dials come from discovery through the `nodes_in` channel.
//!
//! A single event loop owns all scheduler state. Dial workers are short
//! lived tasks that always terminate by sending their task back on the
//! `done` channel. The `dialing` and `peers` maps are shared behind mutexes
//! because dial workers and callers read them.

use crate::error::{NetworkError, Result};
use crate::history::DialHistory;
use async_trait::async_trait;
use lattica_types::{NodeId, NodeRecord, DEFAULT_TCP_PORT};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

/// How long a dialed node stays in the history and is not redialed.
pub const DIAL_HISTORY_EXPIRATION: Duration = Duration::from_secs(35);

/// Endpoint resolution backoff bounds for static nodes.
const INITIAL_RESOLVE_DELAY: Duration = Duration::from_secs(60);
const MAX_RESOLVE_DELAY: Duration = Duration::from_secs(3600);

const DIAL_STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Why a candidate was not dialed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DialCheckError {
    #[error("is self")]
    IsSelf,

    #[error("node does not provide a TCP port")]
    NoPort,

    #[error("already dialing")]
    AlreadyDialing,

    #[error("already connected")]
    AlreadyConnected,

    #[error("recently dialed")]
    RecentlyDialed,

    #[error("not contained in the IP allow-list")]
    NotAllowed,
}

/// Kind of dial a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialFlag {
    Static,
    Dynamic,
}

/// How a peer connection came to be, as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerDirection {
    DialedStatic,
    DialedDynamic,
    Inbound,
}

impl PeerDirection {
    pub fn is_dialed(self) -> bool {
        matches!(self, PeerDirection::DialedStatic | PeerDirection::DialedDynamic)
    }
}

/// Connects to a node. The implementation performs the TCP connect and the
/// protocol handshake, and registers the resulting peer with the server.
#[async_trait]
pub trait NodeDialer: Send + Sync {
    async fn dial(&self, node: &NodeRecord) -> Result<()>;
}

/// Resolves the current endpoint of a node through discovery.
pub trait NodeResolver: Send + Sync {
    fn resolve(&self, node: &NodeRecord) -> Option<NodeRecord>;
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct DialConfig {
    pub self_id: NodeId,
    /// Upper bound on concurrently connected dialed peers.
    pub max_dial_peers: usize,
    /// Upper bound on concurrently running dial tasks.
    pub max_active_dials: usize,
    pub history_expiration: Duration,
    /// When set, only these IPs may be dialed.
    pub allowed_ips: Option<Vec<IpAddr>>,
    pub stats_interval: Duration,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            self_id: NodeId::from_low_u64(0),
            max_dial_peers: 16,
            max_active_dials: 16,
            history_expiration: DIAL_HISTORY_EXPIRATION,
            allowed_ips: None,
            stats_interval: DIAL_STATS_INTERVAL,
        }
    }
}

#[derive(Debug)]
struct DialTask {
    dest: NodeRecord,
    flag: DialFlag,
    last_resolved: Option<Instant>,
    resolve_delay: Duration,
}

impl DialTask {
    fn new(dest: NodeRecord, flag: DialFlag) -> Self {
        Self {
            dest,
            flag,
            last_resolved: None,
            resolve_delay: Duration::ZERO,
        }
    }

    fn needs_resolve(&self) -> bool {
        self.flag == DialFlag::Static && self.dest.ip.is_none()
    }

    /// Resolve the destination endpoint, with bounded backoff. The delay
    /// resets whenever the node is found.
    fn resolve(&mut self, resolver: Option<&dyn NodeResolver>) -> bool {
        let Some(resolver) = resolver else {
            return false;
        };
        if self.resolve_delay.is_zero() {
            self.resolve_delay = INITIAL_RESOLVE_DELAY;
        }
        if let Some(last) = self.last_resolved {
            if last.elapsed() < self.resolve_delay {
                return false;
            }
        }
        let resolved = resolver.resolve(&self.dest);
        self.last_resolved = Some(Instant::now());
        match resolved {
            Some(node) => {
                self.resolve_delay = INITIAL_RESOLVE_DELAY;
                debug!(id = %node.id, addr = ?node.socket_addr(), "resolved static node");
                self.dest = node;
                true
            }
            None => {
                self.resolve_delay = (self.resolve_delay * 2).min(MAX_RESOLVE_DELAY);
                debug!(id = %self.dest.id, next_delay = ?self.resolve_delay, "resolving node failed");
                false
            }
        }
    }
}

async fn run_dial_task(
    task: &mut DialTask,
    dialer: &dyn NodeDialer,
    resolver: Option<&dyn NodeResolver>,
) {
    if task.needs_resolve() && !task.resolve(resolver) {
        return;
    }
    if let Err(err) = dialer.dial(&task.dest).await {
        trace!(id = %task.dest.id, %err, "dial failed");
        // Static nodes get one more attempt after re-resolving.
        if task.flag == DialFlag::Static && task.resolve(resolver) {
            let _ = dialer.dial(&task.dest).await;
        }
    }
}

#[derive(Debug, Default)]
struct StaticEntry {
    task: Option<DialTask>,
    pool_index: Option<usize>,
}

/// State owned by the scheduler loop.
struct SchedulerCore {
    config: DialConfig,
    dialer: Arc<dyn NodeDialer>,
    resolver: Option<Arc<dyn NodeResolver>>,
    done_tx: mpsc::UnboundedSender<DialTask>,

    /// Nodes with a dial task in flight. Shared for introspection.
    dialing: Arc<Mutex<HashMap<NodeId, DialFlag>>>,
    /// All connected peers. Shared for introspection.
    peers: Arc<Mutex<HashMap<NodeId, PeerDirection>>>,
    /// Current number of dialed (not inbound) peers.
    dial_peers: usize,

    static_entries: HashMap<NodeId, StaticEntry>,
    static_pool: Vec<NodeId>,

    history: DialHistory,
    rng: StdRng,
    done_since_last_log: usize,
}

impl SchedulerCore {
    fn new(
        config: DialConfig,
        dialer: Arc<dyn NodeDialer>,
        resolver: Option<Arc<dyn NodeResolver>>,
        done_tx: mpsc::UnboundedSender<DialTask>,
        dialing: Arc<Mutex<HashMap<NodeId, DialFlag>>>,
        peers: Arc<Mutex<HashMap<NodeId, PeerDirection>>>,
    ) -> Self {
        Self {
            config,
            dialer,
            resolver,
            done_tx,
            dialing,
            peers,
            dial_peers: 0,
            static_entries: HashMap::new(),
            static_pool: Vec::new(),
            history: DialHistory::new(),
            rng: StdRng::from_entropy(),
            done_since_last_log: 0,
        }
    }

    /// Free dial slots: twice the remaining peer budget, clamped to the
    /// active-dial bound, minus in-flight dials.
    fn free_dial_slots(&self) -> usize {
        let slots = self
            .config
            .max_dial_peers
            .saturating_sub(self.dial_peers)
            .saturating_mul(2)
            .min(self.config.max_active_dials);
        slots.saturating_sub(self.dialing.lock().len())
    }

    fn check_dial(&self, node: &NodeRecord) -> std::result::Result<(), DialCheckError> {
        if node.id == self.config.self_id {
            return Err(DialCheckError::IsSelf);
        }
        if node.ip.is_some() && node.tcp_port == 0 {
            return Err(DialCheckError::NoPort);
        }
        if self.dialing.lock().contains_key(&node.id) {
            return Err(DialCheckError::AlreadyDialing);
        }
        if self.peers.lock().contains_key(&node.id) {
            return Err(DialCheckError::AlreadyConnected);
        }
        if let (Some(allowed), Some(ip)) = (&self.config.allowed_ips, node.ip) {
            if !allowed.contains(&ip) {
                return Err(DialCheckError::NotAllowed);
            }
        }
        if self.history.contains(&node.id) {
            return Err(DialCheckError::RecentlyDialed);
        }
        Ok(())
    }

    fn start_dial(&mut self, task: DialTask) {
        let id = task.dest.id;
        trace!(%id, flag = ?task.flag, "starting dial");
        self.history
            .add(id, Instant::now() + self.config.history_expiration);
        self.dialing.lock().insert(id, task.flag);

        let dialer = self.dialer.clone();
        let resolver = self.resolver.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let mut task = task;
            run_dial_task(&mut task, dialer.as_ref(), resolver.as_deref()).await;
            let _ = done.send(task);
        });
    }

    /// Launch up to `n` static dials, in random pool order.
    fn start_static_dials(&mut self, n: usize) -> usize {
        let mut started = 0;
        while started < n && !self.static_pool.is_empty() {
            let idx = self.rng.gen_range(0..self.static_pool.len());
            let id = self.static_pool[idx];
            self.remove_from_static_pool(idx);
            if let Some(task) = self
                .static_entries
                .get_mut(&id)
                .and_then(|entry| entry.task.take())
            {
                self.start_dial(task);
                started += 1;
            }
        }
        started
    }

    fn add_to_static_pool(&mut self, id: NodeId) {
        let Some(entry) = self.static_entries.get_mut(&id) else {
            return;
        };
        if entry.pool_index.is_some() || entry.task.is_none() {
            return;
        }
        self.static_pool.push(id);
        entry.pool_index = Some(self.static_pool.len() - 1);
    }

    /// Swap-remove the pool entry at `idx`, fixing the moved entry's index.
    fn remove_from_static_pool(&mut self, idx: usize) {
        let removed = self.static_pool.swap_remove(idx);
        if let Some(entry) = self.static_entries.get_mut(&removed) {
            entry.pool_index = None;
        }
        if idx < self.static_pool.len() {
            let moved = self.static_pool[idx];
            if let Some(entry) = self.static_entries.get_mut(&moved) {
                entry.pool_index = Some(idx);
            }
        }
    }

    /// Reconsider a static node for the pool after its task completed, its
    /// peer disconnected, or its history entry expired.
    fn update_static_pool(&mut self, id: NodeId) {
        let eligible = match self.static_entries.get(&id) {
            Some(entry) => {
                entry.pool_index.is_none()
                    && entry
                        .task
                        .as_ref()
                        .map(|task| self.check_dial(&task.dest).is_ok())
                        .unwrap_or(false)
            }
            None => false,
        };
        if eligible {
            self.add_to_static_pool(id);
        }
    }

    fn handle_done(&mut self, task: DialTask) {
        let id = task.dest.id;
        self.dialing.lock().remove(&id);
        self.done_since_last_log += 1;
        if task.flag == DialFlag::Static {
            if let Some(entry) = self.static_entries.get_mut(&id) {
                entry.task = Some(task);
            }
        }
        self.update_static_pool(id);
    }

    fn handle_add_peer(&mut self, id: NodeId, direction: PeerDirection) {
        if direction.is_dialed() {
            self.dial_peers += 1;
        }
        self.peers.lock().insert(id, direction);
        // The node is connected now: a pooled static task is moot.
        if let Some(idx) = self
            .static_entries
            .get(&id)
            .and_then(|entry| entry.pool_index)
        {
            self.remove_from_static_pool(idx);
        }
    }

    fn handle_remove_peer(&mut self, id: NodeId) {
        if let Some(direction) = self.peers.lock().remove(&id) {
            if direction.is_dialed() {
                self.dial_peers = self.dial_peers.saturating_sub(1);
            }
        }
        self.update_static_pool(id);
    }

    fn handle_add_static(&mut self, node: NodeRecord) {
        let id = node.id;
        if self.static_entries.contains_key(&id) {
            return;
        }
        trace!(%id, "adding static node");
        let task = DialTask::new(node, DialFlag::Static);
        let dialable = self.check_dial(&task.dest).is_ok();
        self.static_entries.insert(
            id,
            StaticEntry {
                task: Some(task),
                pool_index: None,
            },
        );
        if dialable {
            self.add_to_static_pool(id);
        }
    }

    fn handle_remove_static(&mut self, id: NodeId) {
        if let Some(entry) = self.static_entries.remove(&id) {
            trace!(%id, "removing static node");
            if let Some(idx) = entry.pool_index {
                self.static_pool.swap_remove(idx);
                if idx < self.static_pool.len() {
                    let moved = self.static_pool[idx];
                    if let Some(moved_entry) = self.static_entries.get_mut(&moved) {
                        moved_entry.pool_index = Some(idx);
                    }
                }
            }
        }
    }

    fn expire_history(&mut self) {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.history.expire(now, |id| expired.push(id));
        for id in expired {
            self.update_static_pool(id);
        }
    }
}

/// Handle to a running dial scheduler.
pub struct DialSchedulerHandle {
    nodes_tx: mpsc::Sender<NodeRecord>,
    add_static_tx: mpsc::Sender<NodeRecord>,
    remove_static_tx: mpsc::Sender<NodeId>,
    add_peer_tx: mpsc::Sender<(NodeId, PeerDirection)>,
    remove_peer_tx: mpsc::Sender<NodeId>,
    stop_tx: watch::Sender<bool>,
    dialing: Arc<Mutex<HashMap<NodeId, DialFlag>>>,
    peers: Arc<Mutex<HashMap<NodeId, PeerDirection>>>,
    join: JoinHandle<()>,
}

impl DialSchedulerHandle {
    /// Spawn the scheduler loop.
    pub fn spawn(
        config: DialConfig,
        dialer: Arc<dyn NodeDialer>,
        resolver: Option<Arc<dyn NodeResolver>>,
    ) -> Self {
        let (nodes_tx, nodes_rx) = mpsc::channel(64);
        let (add_static_tx, add_static_rx) = mpsc::channel(16);
        let (remove_static_tx, remove_static_rx) = mpsc::channel(16);
        let (add_peer_tx, add_peer_rx) = mpsc::channel(64);
        let (remove_peer_tx, remove_peer_rx) = mpsc::channel(64);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let dialing = Arc::new(Mutex::new(HashMap::new()));
        let peers = Arc::new(Mutex::new(HashMap::new()));
        let core = SchedulerCore::new(
            config,
            dialer,
            resolver,
            done_tx,
            dialing.clone(),
            peers.clone(),
        );

        let join = tokio::spawn(scheduler_loop(
            core,
            nodes_rx,
            add_static_rx,
            remove_static_rx,
            add_peer_rx,
            remove_peer_rx,
            done_rx,
            stop_rx,
        ));

        Self {
            nodes_tx,
            add_static_tx,
            remove_static_tx,
            add_peer_tx,
            remove_peer_tx,
            stop_tx,
            dialing,
            peers,
            join,
        }
    }

    /// Feed a discovered node. A missing port is filled with the default.
    pub async fn add_node(&self, mut node: NodeRecord) -> Result<()> {
        if node.ip.is_some() && node.tcp_port == 0 {
            node.tcp_port = DEFAULT_TCP_PORT;
        }
        self.nodes_tx
            .send(node)
            .await
            .map_err(|_| NetworkError::SchedulerStopped)
    }

    pub async fn add_static(&self, node: NodeRecord) -> Result<()> {
        self.add_static_tx
            .send(node)
            .await
            .map_err(|_| NetworkError::SchedulerStopped)
    }

    pub async fn remove_static(&self, id: NodeId) -> Result<()> {
        self.remove_static_tx
            .send(id)
            .await
            .map_err(|_| NetworkError::SchedulerStopped)
    }

    /// Report a new peer connection to the scheduler.
    pub async fn peer_added(&self, id: NodeId, direction: PeerDirection) -> Result<()> {
        self.add_peer_tx
            .send((id, direction))
            .await
            .map_err(|_| NetworkError::SchedulerStopped)
    }

    /// Report a peer disconnect to the scheduler.
    pub async fn peer_removed(&self, id: NodeId) -> Result<()> {
        self.remove_peer_tx
            .send(id)
            .await
            .map_err(|_| NetworkError::SchedulerStopped)
    }

    pub fn dialing_count(&self) -> usize {
        self.dialing.lock().len()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Stop the scheduler and wait for outstanding dial tasks to report.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.join.await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn scheduler_loop(
    mut core: SchedulerCore,
    mut nodes_rx: mpsc::Receiver<NodeRecord>,
    mut add_static_rx: mpsc::Receiver<NodeRecord>,
    mut remove_static_rx: mpsc::Receiver<NodeId>,
    mut add_peer_rx: mpsc::Receiver<(NodeId, PeerDirection)>,
    mut remove_peer_rx: mpsc::Receiver<NodeId>,
    mut done_rx: mpsc::UnboundedReceiver<DialTask>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut stats = interval(core.config.stats_interval);
    stats.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut nodes_closed = false;

    loop {
        let slots = {
            let free = core.free_dial_slots();
            free.saturating_sub(core.start_static_dials(free))
        };
        let next_expiry = core.history.next_expiry();

        tokio::select! {
            maybe_node = nodes_rx.recv(), if slots > 0 && !nodes_closed => {
                match maybe_node {
                    Some(node) => match core.check_dial(&node) {
                        Ok(()) => core.start_dial(DialTask::new(node, DialFlag::Dynamic)),
                        Err(err) => trace!(%err, "discarding dial candidate"),
                    },
                    None => nodes_closed = true,
                }
            }
            Some(task) = done_rx.recv() => core.handle_done(task),
            Some((id, direction)) = add_peer_rx.recv() => core.handle_add_peer(id, direction),
            Some(id) = remove_peer_rx.recv() => core.handle_remove_peer(id),
            Some(node) = add_static_rx.recv() => core.handle_add_static(node),
            Some(id) = remove_static_rx.recv() => core.handle_remove_static(id),
            _ = sleep_until(next_expiry.unwrap_or_else(Instant::now)), if next_expiry.is_some() => {
                core.expire_history();
            }
            _ = stats.tick() => {
                info!(
                    peers = core.peers.lock().len(),
                    dialing = core.dialing.lock().len(),
                    statics = core.static_entries.len(),
                    tried = core.done_since_last_log,
                    "dial scheduler stats"
                );
                core.done_since_last_log = 0;
            }
            _ = stop_rx.changed() => break,
        }
    }

    // Drain outstanding dial tasks so their workers can finish sending.
    while !core.dialing.lock().is_empty() {
        match done_rx.recv().await {
            Some(task) => core.handle_done(task),
            None => break,
        }
    }
    debug!("dial scheduler stopped");
}
