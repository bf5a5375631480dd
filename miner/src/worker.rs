// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! The block-production worker.
//!
//! Four cooperating tasks connected by channels:
//!
//! - **new-work loop**: turns start/head/tick events into proposal requests,
//!   each carrying a fresh interrupt word; the previous word is advanced so
//!   an in-flight round can observe it.
//! - **main loop**: runs the proposal phase; the environment is touched only
//!   here.
//! - **task loop**: deduplicates sealing tasks by seal-hash and drives the
//!   engine's sealer, aborting the previous one through its stop channel.
//! - **result loop**: stamps receipts and logs with block coordinates,
//!   writes the sealed block to the chain, and announces it.

use crate::unconfirmed::UnconfirmedBlocks;
use crate::MinerConfig;
use lattica_core::{
    apply_transaction, calc_gas_limit, ChainConfig, ChainError, ChainStore, ConsensusEngine,
    EngineError, EventBus, GasPool, NewMinedBlockEvent, StateDatabase, TransactionPool, VmConfig,
    ELASTICITY_MULTIPLIER,
};
use lattica_types::{
    Block, Hash, Header, Receipt, Signer, Transaction, TransactionsByNonce, TX_GAS,
};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Recommit interval bounds; user-provided intervals are clamped.
pub const MIN_RECOMMIT: Duration = Duration::from_millis(500);
pub const MAX_RECOMMIT: Duration = Duration::from_secs(15);

/// Pending tasks older than this many blocks are dropped.
pub const STALE_THRESHOLD: u64 = 7;

/// Depth at which locally mined blocks are confirmed in the logs.
const LOG_AT_DEPTH: u64 = 7;

/// Interrupt words carried by a proposal round.
pub const INTERRUPT_NONE: u32 = 0;
pub const INTERRUPT_NEW_HEAD: u32 = 1;
pub const INTERRUPT_RESUBMIT: u32 = 2;
pub const INTERRUPT_BLOCK_PHASE: u32 = 3;

type InterruptFlag = Arc<AtomicU32>;

/// Why a proposal round ended without a sealing task.
#[derive(Debug, Error)]
pub enum ProposeError {
    #[error("refusing to propose without an author address")]
    NoAuthor,

    #[error("block not ready to be sealed")]
    NotReady,

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

struct ProposeRequest {
    interrupt: InterruptFlag,
    timestamp: u64,
}

/// The worker's in-progress block state. Owned by the main loop.
struct Environment {
    signer: Signer,
    state: Box<dyn StateDatabase>,
    ancestors: HashSet<Hash>,
    family: HashSet<Hash>,
    tx_count: usize,
    gas_pool: Option<GasPool>,
    header: Header,
    txs: Vec<Transaction>,
    receipts: Vec<Receipt>,
}

/// A sealing task, indexed by the engine's seal-hash.
struct Task {
    block: Block,
    receipts: Vec<Receipt>,
    state: Box<dyn StateDatabase>,
    created_at: Instant,
}

struct PendingSnapshot {
    block: Block,
    receipts: Vec<Receipt>,
    state: Box<dyn StateDatabase>,
}

enum CommitOutcome {
    /// Packing was cut short by a new head; the round is discarded.
    Aborted,
    Done,
}

struct WorkerInner {
    config: RwLock<MinerConfig>,
    chain_config: ChainConfig,
    engine: Arc<dyn ConsensusEngine>,
    chain: Arc<dyn ChainStore>,
    pool: Arc<dyn TransactionPool>,
    backend: Arc<dyn lattica_core::ExecutionBackend>,
    signer: Signer,
    bus: EventBus,

    running: AtomicBool,
    pending_tasks: RwLock<HashMap<Hash, Task>>,
    snapshot: RwLock<Option<PendingSnapshot>>,
    unconfirmed: UnconfirmedBlocks,

    task_tx: mpsc::UnboundedSender<Task>,
    result_tx: mpsc::UnboundedSender<Block>,
}

impl WorkerInner {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Handle to the running worker tasks.
pub struct Worker {
    inner: Arc<WorkerInner>,
    start_tx: mpsc::Sender<()>,
    exit_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl Worker {
    /// Spawn the four worker loops.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        config: MinerConfig,
        chain_config: ChainConfig,
        engine: Arc<dyn ConsensusEngine>,
        chain: Arc<dyn ChainStore>,
        pool: Arc<dyn TransactionPool>,
        backend: Arc<dyn lattica_core::ExecutionBackend>,
        signer: Signer,
        bus: EventBus,
    ) -> Self {
        let recommit = sanitize_recommit(config.recommit);

        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let (propose_tx, propose_rx) = mpsc::channel(8);
        let (start_tx, start_rx) = mpsc::channel(1);
        let (exit_tx, exit_rx) = watch::channel(false);

        let inner = Arc::new(WorkerInner {
            config: RwLock::new(config),
            chain_config,
            engine,
            chain: chain.clone(),
            pool,
            backend,
            signer,
            bus: bus.clone(),
            running: AtomicBool::new(false),
            pending_tasks: RwLock::new(HashMap::new()),
            snapshot: RwLock::new(None),
            unconfirmed: UnconfirmedBlocks::new(chain, LOG_AT_DEPTH),
            task_tx,
            result_tx,
        });

        let joins = vec![
            tokio::spawn(new_work_loop(
                inner.clone(),
                start_rx,
                bus.subscribe_head(),
                propose_tx,
                exit_rx.clone(),
                recommit,
            )),
            tokio::spawn(main_loop(
                inner.clone(),
                propose_rx,
                bus.subscribe_new_txs(),
                bus.subscribe_side(),
                exit_rx.clone(),
            )),
            tokio::spawn(task_loop(inner.clone(), task_rx, exit_rx.clone())),
            tokio::spawn(result_loop(inner.clone(), result_rx, exit_rx)),
        ];

        Self {
            inner,
            start_tx,
            exit_tx,
            joins,
        }
    }

    /// Mark the worker running and trigger the first proposal round.
    pub fn start(&self) {
        self.inner.running.store(true, Ordering::SeqCst);
        let _ = self.start_tx.try_send(());
    }

    /// Stop producing blocks. In-flight loops keep running.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Terminate all worker loops.
    pub async fn close(self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let _ = self.exit_tx.send(true);
        for join in self.joins {
            let _ = join.await;
        }
    }

    pub fn set_author(&self, author: lattica_types::Address) {
        self.inner.config.write().author = author;
    }

    pub fn set_extra(&self, extra: Vec<u8>) {
        self.inner.config.write().extra = extra;
    }

    pub fn set_gas_ceil(&self, ceil: u64) {
        self.inner.config.write().gas_ceil = ceil;
    }

    /// The pending block and a copy of its state, if a round has run.
    pub fn pending(&self) -> Option<(Block, Box<dyn StateDatabase>)> {
        self.inner
            .snapshot
            .read()
            .as_ref()
            .map(|snap| (snap.block.clone(), snap.state.boxed_copy()))
    }

    pub fn pending_block(&self) -> Option<Block> {
        self.inner.snapshot.read().as_ref().map(|snap| snap.block.clone())
    }

    pub fn pending_block_and_receipts(&self) -> Option<(Block, Vec<Receipt>)> {
        self.inner
            .snapshot
            .read()
            .as_ref()
            .map(|snap| (snap.block.clone(), snap.receipts.clone()))
    }
}

/// Clamp the recommit interval into `[MIN_RECOMMIT, MAX_RECOMMIT]`.
pub(crate) fn sanitize_recommit(interval: Duration) -> Duration {
    if interval < MIN_RECOMMIT {
        info!(provided = ?interval, updated = ?MIN_RECOMMIT, "sanitizing miner recommit interval");
        MIN_RECOMMIT
    } else if interval > MAX_RECOMMIT {
        info!(provided = ?interval, updated = ?MAX_RECOMMIT, "sanitizing miner recommit interval");
        MAX_RECOMMIT
    } else {
        interval
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Drop pending tasks that fell behind the chain head.
fn clear_stale_tasks(inner: &WorkerInner, number: u64) {
    inner
        .pending_tasks
        .write()
        .retain(|_, task| task.block.number() + STALE_THRESHOLD > number);
}

async fn new_work_loop(
    inner: Arc<WorkerInner>,
    mut start_rx: mpsc::Receiver<()>,
    mut head_rx: tokio::sync::broadcast::Receiver<lattica_core::ChainHeadEvent>,
    propose_tx: mpsc::Sender<ProposeRequest>,
    mut exit_rx: watch::Receiver<bool>,
    recommit: Duration,
) {
    let mut interrupt: Option<InterruptFlag> = None;
    let timer = tokio::time::sleep(recommit);
    tokio::pin!(timer);

    macro_rules! propose {
        ($reason:expr) => {{
            if let Some(prev) = interrupt.take() {
                prev.store($reason, Ordering::SeqCst);
            }
            let flag: InterruptFlag = Arc::new(AtomicU32::new(INTERRUPT_NONE));
            interrupt = Some(flag.clone());
            let request = ProposeRequest {
                interrupt: flag,
                timestamp: unix_now(),
            };
            if propose_tx.send(request).await.is_err() {
                return;
            }
            timer.as_mut().reset(tokio::time::Instant::now() + recommit);
        }};
    }

    loop {
        tokio::select! {
            Some(()) = start_rx.recv() => {
                trace!("worker start requested");
                clear_stale_tasks(&inner, inner.chain.current_block().number());
                propose!(INTERRUPT_NEW_HEAD);
            }
            head = head_rx.recv() => {
                if let Ok(event) = head {
                    trace!(number = event.block.number(), "chain head event");
                    clear_stale_tasks(&inner, event.block.number());
                    propose!(INTERRUPT_NEW_HEAD);
                }
            }
            _ = &mut timer => {
                if inner.is_running() {
                    propose!(INTERRUPT_RESUBMIT);
                } else {
                    timer.as_mut().reset(tokio::time::Instant::now() + recommit);
                }
            }
            _ = exit_rx.changed() => return,
        }
    }
}

async fn main_loop(
    inner: Arc<WorkerInner>,
    mut propose_rx: mpsc::Receiver<ProposeRequest>,
    mut txs_rx: tokio::sync::broadcast::Receiver<lattica_core::NewTxsEvent>,
    mut side_rx: tokio::sync::broadcast::Receiver<lattica_core::ChainSideEvent>,
    mut exit_rx: watch::Receiver<bool>,
) {
    let mut current: Option<Environment> = None;

    loop {
        tokio::select! {
            Some(request) = propose_rx.recv() => {
                match propose_phase(&inner, &mut current, &request).await {
                    Ok(()) => {}
                    Err(ProposeError::NotReady) => {
                        trace!("block not ready to be sealed, will retry");
                    }
                    Err(err) => debug!(%err, "proposal round failed"),
                }
            }
            event = side_rx.recv() => {
                if let Ok(event) = event {
                    trace!(hash = ?event.block.hash(), number = event.block.number(), "side chain block");
                }
            }
            event = txs_rx.recv() => {
                if let Ok(event) = event {
                    trace!(count = event.txs.len(), "new pool transactions");
                }
            }
            _ = exit_rx.changed() => {
                if let Some(env) = current.as_mut() {
                    env.state.stop_prefetcher();
                }
                return;
            }
        }
    }
}

async fn task_loop(
    inner: Arc<WorkerInner>,
    mut task_rx: mpsc::UnboundedReceiver<Task>,
    mut exit_rx: watch::Receiver<bool>,
) {
    let mut stop_tx: Option<oneshot::Sender<()>> = None;
    let mut prev_seal_hash: Option<Hash> = None;

    loop {
        tokio::select! {
            Some(task) = task_rx.recv() => {
                let seal_hash = inner.engine.seal_hash(task.block.header());
                // Resubmitted rounds produce identical tasks; seal only once.
                if prev_seal_hash == Some(seal_hash) {
                    trace!(?seal_hash, "duplicate sealing task skipped");
                    continue;
                }
                if let Some(stop) = stop_tx.take() {
                    let _ = stop.send(());
                }
                let (tx, rx) = oneshot::channel();
                stop_tx = Some(tx);
                prev_seal_hash = Some(seal_hash);

                let block = task.block.clone();
                inner.pending_tasks.write().insert(seal_hash, task);

                let engine = inner.engine.clone();
                let results = inner.result_tx.clone();
                let seal_block = block.clone();
                tokio::spawn(async move {
                    if let Err(err) = engine.seal(seal_block, results, rx).await {
                        warn!(%err, "block sealing failed");
                    }
                });

                let backup = inner.config.read().backup.clone();
                if let Some(backup) = backup {
                    if let Err(err) = backup.backup_block(&block) {
                        warn!(%err, "error backing up block");
                    }
                }
            }
            _ = exit_rx.changed() => {
                if let Some(stop) = stop_tx.take() {
                    let _ = stop.send(());
                }
                return;
            }
        }
    }
}

async fn result_loop(
    inner: Arc<WorkerInner>,
    mut result_rx: mpsc::UnboundedReceiver<Block>,
    mut exit_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            Some(block) = result_rx.recv() => {
                if inner.chain.has_block(block.hash(), block.number()) {
                    continue;
                }
                let seal_hash = inner.engine.seal_hash(block.header());
                let hash = block.hash();

                let Some((receipts, state, created_at)) = ({
                    let tasks = inner.pending_tasks.read();
                    tasks.get(&seal_hash).map(|task| {
                        (task.receipts.clone(), task.state.boxed_copy(), task.created_at)
                    })
                }) else {
                    error!(number = block.number(), ?seal_hash, ?hash, "sealed block has no pending task");
                    continue;
                };

                // Stamp block coordinates into receipts and logs; different
                // blocks can share a seal-hash, so work on copies.
                let mut logs = Vec::new();
                let receipts: Vec<Receipt> = receipts
                    .into_iter()
                    .enumerate()
                    .map(|(index, mut receipt)| {
                        receipt.block_hash = Some(hash);
                        receipt.block_number = Some(block.number());
                        receipt.transaction_index = index as u32;
                        for log in &mut receipt.logs {
                            log.block_hash = Some(hash);
                            log.block_number = Some(block.number());
                        }
                        logs.extend(receipt.logs.iter().cloned());
                        receipt
                    })
                    .collect();

                match inner.chain.write_block_with_state(block.clone(), receipts, logs, state) {
                    Ok(status) => {
                        info!(
                            number = block.number(),
                            ?seal_hash,
                            ?hash,
                            elapsed = ?created_at.elapsed(),
                            ?status,
                            "successfully sealed new block"
                        );
                        inner.bus.post_mined(NewMinedBlockEvent { block: block.clone() });
                        inner.unconfirmed.insert(block.number(), hash);
                    }
                    Err(err) => {
                        error!(%err, "failed writing block to chain");
                        continue;
                    }
                }
            }
            _ = exit_rx.changed() => return,
        }
    }
}

/// One proposal round: build the environment, pack transactions, and hand a
/// sealing task to the task loop.
async fn propose_phase(
    inner: &Arc<WorkerInner>,
    current: &mut Option<Environment>,
    request: &ProposeRequest,
) -> Result<(), ProposeError> {
    let round_start = Instant::now();
    let parent = inner.chain.current_block();

    let mut timestamp = request.timestamp;
    if parent.time() >= timestamp {
        timestamp = parent.time() + 1;
    }

    let (author, extra, gas_floor, gas_ceil) = {
        let config = inner.config.read();
        (
            config.author,
            config.extra.clone(),
            config.gas_floor,
            config.gas_ceil,
        )
    };

    let mut header = Header {
        parent_hash: parent.hash(),
        number: parent.number() + 1,
        gas_limit: gas_floor,
        extra,
        time: timestamp,
        ..Default::default()
    };

    if inner.chain_config.is_fee_market(header.number) {
        let mut parent_limit = parent.gas_limit();
        if !inner.chain_config.is_fee_market(parent.number()) {
            // Transition block: the parent limit is bumped by the
            // elasticity multiplier before the elastic rule applies.
            parent_limit *= ELASTICITY_MULTIPLIER;
        }
        header.gas_limit = calc_gas_limit(parent_limit, gas_ceil);
    }

    if inner.is_running() {
        if author.is_zero() {
            error!("refusing to propose without an author address");
            return Err(ProposeError::NoAuthor);
        }
        header.coinbase = author;
    }

    inner.engine.prepare(inner.chain.as_ref(), &mut header)?;

    // Fresh state on the parent root, with the previous round's prefetcher
    // stopped once the new environment replaces it.
    let mut state = inner.chain.state_at(parent.state_root())?;
    state.start_prefetcher("miner");

    let mut ancestors = HashSet::new();
    let mut family = HashSet::new();
    let mut cursor = parent.clone();
    for _ in 0..STALE_THRESHOLD {
        ancestors.insert(cursor.hash());
        family.insert(cursor.hash());
        if cursor.number() == 0 {
            break;
        }
        match inner.chain.block(cursor.parent_hash()) {
            Some(block) => cursor = block,
            None => break,
        }
    }

    if let Some(previous) = current.as_mut() {
        previous.state.stop_prefetcher();
    }
    *current = Some(Environment {
        signer: inner.signer.clone(),
        state,
        ancestors,
        family,
        tx_count: 0,
        gas_pool: None,
        header: header.clone(),
        txs: Vec::new(),
        receipts: Vec::new(),
    });
    let Some(env) = current.as_mut() else {
        return Ok(());
    };
    trace!(
        number = env.header.number,
        ancestors = env.ancestors.len(),
        family = env.family.len(),
        "proposal environment ready"
    );

    // Pending pool snapshot, minus transactions already on chain.
    let mut pending = inner.pool.pending();
    for txs in pending.values_mut() {
        txs.retain(|tx| !inner.chain.transaction_exists(tx.hash()));
    }
    pending.retain(|_, txs| !txs.is_empty());
    let pending_count: usize = pending.values().map(|txs| txs.len()).sum();

    let mut engine_state = env.state.boxed_copy();
    let selected = inner.engine.handle_transactions(
        inner.chain.as_ref(),
        &env.header,
        engine_state.as_mut(),
        pending,
    )?;
    if !inner
        .engine
        .is_block_ready_to_seal(inner.chain.as_ref(), &env.header, engine_state.as_mut())
    {
        return Err(ProposeError::NotReady);
    }

    let selected_count: usize = selected.values().map(|txs| txs.len()).sum();
    debug!(pending_count, selected_count, "worker transactions");

    let txs = TransactionsByNonce::new(selected);
    if let CommitOutcome::Aborted = commit_transactions(inner, env, txs, &request.interrupt) {
        trace!("proposal discarded after new-head interrupt");
        return Ok(());
    }

    commit(inner, env, round_start).await
}

/// Pack transactions into the environment in per-sender nonce order.
fn commit_transactions(
    inner: &Arc<WorkerInner>,
    env: &mut Environment,
    mut txs: TransactionsByNonce,
    interrupt: &InterruptFlag,
) -> CommitOutcome {
    if env.gas_pool.is_none() {
        env.gas_pool = Some(GasPool::new(env.header.gas_limit));
    }
    // Provisional block hash for receipts; the result loop restamps them.
    let provisional_hash = env.header.hash();

    loop {
        match interrupt.load(Ordering::SeqCst) {
            INTERRUPT_NEW_HEAD => return CommitOutcome::Aborted,
            INTERRUPT_RESUBMIT | INTERRUPT_BLOCK_PHASE => break,
            _ => {}
        }

        let Some(gas_pool) = env.gas_pool.as_mut() else {
            break;
        };
        if gas_pool.gas() < TX_GAS {
            info!(have = gas_pool.gas(), want = TX_GAS, "not enough gas for further transactions");
            break;
        }

        let Some(tx) = txs.peek().map(|(_, t)| t.clone()) else {
            break;
        };
        let sender = match env.signer.sender(&tx) {
            Ok(sender) => sender,
            Err(err) => {
                trace!(hash = ?tx.hash(), %err, "sender recovery failed, transaction skipped");
                txs.advance();
                continue;
            }
        };

        env.state.prepare(tx.hash(), env.tx_count);
        let snapshot = env.state.snapshot();
        let mut cumulative_gas = env.header.gas_used;

        let applied = apply_transaction(
            &inner.chain_config,
            inner.backend.as_ref(),
            gas_pool,
            env.state.as_mut(),
            &env.header,
            &tx,
            sender,
            &mut cumulative_gas,
            &VmConfig::default(),
            provisional_hash,
            env.tx_count as u32,
        );

        match applied {
            Ok(receipt) => {
                env.header.gas_used = cumulative_gas;
                env.txs.push(tx);
                env.receipts.push(receipt);
                env.tx_count += 1;
            }
            Err(err) if err.is_transient() => {
                trace!(sender = ?sender, nonce = tx.nonce(), %err, "skipping transaction");
                env.state.revert_to_snapshot(snapshot);
            }
            Err(err) => {
                trace!(hash = ?tx.hash(), %err, "transaction failed, discarded");
                env.state.revert_to_snapshot(snapshot);
            }
        }
        txs.advance();
    }

    CommitOutcome::Done
}

/// Assemble the block and hand it to the task loop.
async fn commit(
    inner: &Arc<WorkerInner>,
    env: &mut Environment,
    round_start: Instant,
) -> Result<(), ProposeError> {
    // Deep-copied receipts and state so concurrent tasks cannot interact.
    let receipts = env.receipts.clone();
    let mut state = env.state.boxed_copy();
    let block = inner.engine.finalize_and_assemble(
        inner.chain.as_ref(),
        env.header.clone(),
        state.as_mut(),
        env.txs.clone(),
        &receipts,
    )?;

    if inner.is_running() {
        inner.unconfirmed.shift(block.number().saturating_sub(1));
        let task = Task {
            block: block.clone(),
            receipts,
            state,
            created_at: Instant::now(),
        };
        if inner.task_tx.send(task).is_ok() {
            info!(
                number = block.number(),
                seal_hash = ?inner.engine.seal_hash(block.header()),
                txs = env.tx_count,
                gas = block.gas_used(),
                elapsed = ?round_start.elapsed(),
                "commit new sealing work"
            );
        }
    }

    update_snapshot(inner, env);
    Ok(())
}

fn update_snapshot(inner: &Arc<WorkerInner>, env: &Environment) {
    let block = Block::assemble(env.header.clone(), env.txs.clone(), &env.receipts);
    *inner.snapshot.write() = Some(PendingSnapshot {
        block,
        receipts: env.receipts.clone(),
        state: env.state.boxed_copy(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lattica_consensus::InstantSealEngine;
    use lattica_core::{
        EventBus, MemoryChain, MemoryPool, MemoryState, TransferBackend,
    };
    use lattica_types::{
        keccak256_concat, signing_hash, Address, DevSignature, DevSigner, GasTier, TxPayload, U256,
        DEFAULT_CHAIN_ID,
    };
    use tokio::time::timeout;

    /// Engine wrapper with a switchable ready flag, a seal counter, and a
    /// time-independent seal hash.
    struct TestEngine {
        inner: InstantSealEngine,
        ready: AtomicBool,
        seal_calls: AtomicU32,
    }

    impl TestEngine {
        fn new(seal_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                inner: InstantSealEngine::new(Arc::new(DevSigner::new([7u8; 32])))
                    .with_seal_delay(seal_delay),
                ready: AtomicBool::new(true),
                seal_calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ConsensusEngine for TestEngine {
        fn seal_hash(&self, header: &Header) -> Hash {
            keccak256_concat(&[header.parent_hash.as_bytes(), &header.number.to_be_bytes()])
        }

        fn prepare(
            &self,
            chain: &dyn ChainStore,
            header: &mut Header,
        ) -> Result<(), EngineError> {
            self.inner.prepare(chain, header)
        }

        fn post_prepare(&self, chain: &dyn ChainStore, header: &Header) -> Result<(), EngineError> {
            self.inner.post_prepare(chain, header)
        }

        fn handle_transactions(
            &self,
            chain: &dyn ChainStore,
            header: &Header,
            state: &mut dyn StateDatabase,
            pending: HashMap<Address, Vec<Transaction>>,
        ) -> Result<HashMap<Address, Vec<Transaction>>, EngineError> {
            self.inner.handle_transactions(chain, header, state, pending)
        }

        fn is_block_ready_to_seal(
            &self,
            _chain: &dyn ChainStore,
            _header: &Header,
            _state: &mut dyn StateDatabase,
        ) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        fn finalize(
            &self,
            chain: &dyn ChainStore,
            header: &Header,
            state: &mut dyn StateDatabase,
            txs: &[Transaction],
        ) -> Result<(), EngineError> {
            self.inner.finalize(chain, header, state, txs)
        }

        fn finalize_and_assemble(
            &self,
            chain: &dyn ChainStore,
            header: Header,
            state: &mut dyn StateDatabase,
            txs: Vec<Transaction>,
            receipts: &[Receipt],
        ) -> Result<Block, EngineError> {
            self.inner
                .finalize_and_assemble(chain, header, state, txs, receipts)
        }

        async fn seal(
            &self,
            block: Block,
            results: mpsc::UnboundedSender<Block>,
            stop: oneshot::Receiver<()>,
        ) -> Result<(), EngineError> {
            self.seal_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.seal(block, results, stop).await
        }
    }

    struct Fixture {
        worker: Worker,
        chain: Arc<MemoryChain>,
        pool: Arc<MemoryPool>,
        engine: Arc<TestEngine>,
        bus: EventBus,
    }

    fn author() -> Address {
        Address::repeat_byte(0xA0)
    }

    fn fixture_with(seal_delay: Duration) -> Fixture {
        let bus = EventBus::new();
        let chain_config = ChainConfig::default();
        let signer = Signer::new(DEFAULT_CHAIN_ID, Arc::new(DevSignature));

        let mut genesis_state = MemoryState::new();
        genesis_state.fund(
            DevSignature::address_for_seed(&[1; 32]),
            U256::from(10u64).pow(U256::from(24u64)),
        );
        let chain = Arc::new(MemoryChain::new(
            chain_config.clone(),
            bus.clone(),
            Box::new(genesis_state),
            30_000_000,
        ));
        let pool = Arc::new(MemoryPool::new(signer.clone(), bus.clone()));
        let engine = TestEngine::new(seal_delay);

        let worker = Worker::spawn(
            MinerConfig {
                author: author(),
                recommit: Duration::from_millis(100),
                ..Default::default()
            },
            chain_config,
            engine.clone(),
            chain.clone(),
            pool.clone(),
            Arc::new(TransferBackend),
            signer,
            bus.clone(),
        );
        Fixture {
            worker,
            chain,
            pool,
            engine,
            bus,
        }
    }

    fn signed_transfer(seed: [u8; 32], nonce: u64) -> Transaction {
        let payload = TxPayload::DefaultFee {
            chain_id: DEFAULT_CHAIN_ID,
            nonce,
            gas: TX_GAS,
            max_gas_tier: GasTier::Default,
            to: Some(Address::repeat_byte(0x33)),
            value: U256::from(10u64),
            data: Vec::new(),
            remarks: Vec::new(),
            access_list: Vec::new(),
        };
        let digest = signing_hash(&payload, DEFAULT_CHAIN_ID);
        Transaction::new(payload, DevSignature::sign_with_seed(&seed, digest.as_bytes()))
    }

    #[tokio::test]
    async fn test_empty_pool_seals_empty_block() {
        let fixture = fixture_with(Duration::ZERO);
        let mut mined = fixture.bus.subscribe_mined();
        fixture.worker.start();

        let event = timeout(Duration::from_secs(2), mined.recv())
            .await
            .expect("mined event")
            .unwrap();
        assert_eq!(event.block.number(), 1);
        assert!(event.block.transactions().is_empty());
        assert_eq!(
            fixture.chain.receipts(event.block.hash()),
            Some(Vec::new())
        );
        fixture.worker.close().await;
    }

    #[tokio::test]
    async fn test_pool_transactions_are_packed_and_stamped() {
        let fixture = fixture_with(Duration::ZERO);
        fixture.pool.add(signed_transfer([1; 32], 0)).unwrap();
        fixture.pool.add(signed_transfer([1; 32], 1)).unwrap();

        let mut mined = fixture.bus.subscribe_mined();
        fixture.worker.start();

        let event = loop {
            let event = timeout(Duration::from_secs(2), mined.recv())
                .await
                .expect("mined event")
                .unwrap();
            if !event.block.transactions().is_empty() {
                break event;
            }
        };

        assert_eq!(event.block.transactions().len(), 2);
        let receipts = fixture.chain.receipts(event.block.hash()).unwrap();
        assert_eq!(receipts.len(), 2);
        assert_eq!(receipts[0].block_hash, Some(event.block.hash()));
        assert_eq!(receipts[1].transaction_index, 1);
        fixture.worker.close().await;
    }

    #[tokio::test]
    async fn test_not_ready_round_produces_nothing() {
        let fixture = fixture_with(Duration::ZERO);
        fixture.engine.ready.store(false, Ordering::SeqCst);
        let mut mined = fixture.bus.subscribe_mined();
        fixture.worker.start();

        assert!(timeout(Duration::from_millis(400), mined.recv()).await.is_err());
        assert_eq!(fixture.chain.current_block().number(), 0);
        fixture.worker.close().await;
    }

    #[tokio::test]
    async fn test_duplicate_seal_hash_seals_once() {
        // A long seal delay keeps the first task in flight while resubmit
        // rounds regenerate the identical task.
        let fixture = fixture_with(Duration::from_secs(30));
        fixture.worker.start();

        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(fixture.engine.seal_calls.load(Ordering::SeqCst), 1);
        fixture.worker.close().await;
    }

    #[tokio::test]
    async fn test_new_head_interrupt_discards_round() {
        let fixture = fixture_with(Duration::ZERO);
        let inner = fixture.worker.inner.clone();

        let parent = inner.chain.current_block();
        let mut env = Environment {
            signer: inner.signer.clone(),
            state: inner.chain.state_at(parent.state_root()).unwrap(),
            ancestors: HashSet::new(),
            family: HashSet::new(),
            tx_count: 0,
            gas_pool: None,
            header: Header {
                parent_hash: parent.hash(),
                number: 1,
                gas_limit: 30_000_000,
                coinbase: author(),
                ..Default::default()
            },
            txs: Vec::new(),
            receipts: Vec::new(),
        };

        let mut by_sender = HashMap::new();
        by_sender.insert(
            DevSignature::address_for_seed(&[1; 32]),
            vec![signed_transfer([1; 32], 0), signed_transfer([1; 32], 1)],
        );
        let txs = TransactionsByNonce::new(by_sender);

        let interrupt: InterruptFlag = Arc::new(AtomicU32::new(INTERRUPT_NEW_HEAD));
        let outcome = commit_transactions(&inner, &mut env, txs, &interrupt);

        assert!(matches!(outcome, CommitOutcome::Aborted));
        assert!(env.txs.is_empty());
        assert_eq!(env.tx_count, 0);
        fixture.worker.close().await;
    }

    #[tokio::test]
    async fn test_pending_snapshot_follows_rounds() {
        let fixture = fixture_with(Duration::ZERO);
        assert!(fixture.worker.pending_block().is_none());
        let mut mined = fixture.bus.subscribe_mined();
        fixture.worker.start();
        timeout(Duration::from_secs(2), mined.recv())
            .await
            .expect("mined event")
            .unwrap();

        let (block, receipts) = fixture.worker.pending_block_and_receipts().unwrap();
        assert!(block.number() >= 1);
        assert_eq!(receipts.len(), block.transactions().len());
        fixture.worker.close().await;
    }

    #[test]
    fn test_sanitize_recommit_bounds() {
        assert_eq!(sanitize_recommit(Duration::from_millis(1)), MIN_RECOMMIT);
        assert_eq!(sanitize_recommit(Duration::from_secs(60)), MAX_RECOMMIT);
        assert_eq!(
            sanitize_recommit(Duration::from_secs(2)),
            Duration::from_secs(2)
        );
    }
}
