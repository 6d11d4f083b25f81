//! Bounded task processor.
//!
//! Runs data transforms on an isolated worker with a hard ceiling on the
//! number of operations in flight and a per-operation timeout. There is no
//! queue: a submission over the ceiling is rejected immediately.
//!
//! ```rust,no_run
//! use pulse_link::processor::{BoundedTaskProcessor, SortOptions};
//! use serde_json::json;
//!
//! # async fn example() -> pulse_link::Result<()> {
//! let processor = BoundedTaskProcessor::new(Default::default());
//! let sorted = processor
//!     .sort(vec![json!({"n": 2}), json!({"n": 1})], SortOptions::ascending("n"))
//!     .await?;
//! assert_eq!(sorted[0]["n"], 1);
//! # Ok(())
//! # }
//! ```

pub mod transforms;
pub mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{LinkError, Result};
use crate::models::operation::epoch_millis;
use crate::models::{
    Operation, OperationStatus, ProcessorOptions, ProcessorStats, TaskKind, WorkerOutcome,
    WorkerRequest, WorkerResponse,
};

pub use transforms::{
    AggregateOp, AggregateOptions, Analysis, AnalyzeOptions, FilterOp, FilterOptions,
    SortDirection, SortOptions, TransformError, TransformOptions,
};
pub use worker::{
    IsolatedWorker, ThreadWorkerSpawner, WorkerEvent, WorkerHandler, WorkerReplies,
    WorkerSpawner,
};

type Reply = oneshot::Sender<Result<JsonValue>>;

/// Concurrency-bounded front end to an isolated worker.
///
/// Cheap to clone; clones share the same worker and operation table.
#[derive(Clone)]
pub struct BoundedTaskProcessor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BoundedTaskProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedTaskProcessor")
            .field("options", &self.inner.options)
            .field("active", &self.active_count())
            .finish()
    }
}

struct Inner {
    options: ProcessorOptions,
    spawner: Arc<dyn WorkerSpawner>,
    state: Mutex<State>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct State {
    operations: HashMap<String, Entry>,
    pending: HashMap<String, Pending>,
    worker: Option<WorkerSlot>,
    worker_generation: u64,
    next_seq: u64,
}

struct Entry {
    seq: u64,
    op: Operation,
}

struct Pending {
    reply: Reply,
    timer: Option<JoinHandle<()>>,
}

struct WorkerSlot {
    generation: u64,
    worker: Box<dyn IsolatedWorker>,
    pump: JoinHandle<()>,
}

impl WorkerSlot {
    fn shutdown(mut self, abort_pump: bool) {
        self.worker.terminate();
        if abort_pump {
            self.pump.abort();
        }
    }
}

/// A settled reply waiting to be delivered outside the state lock.
struct Settled {
    reply: Reply,
    result: Result<JsonValue>,
}

impl Settled {
    fn deliver(self) {
        // The caller may have dropped its future.
        let _ = self.reply.send(self.result);
    }
}

fn deliver_all(settled: Vec<Settled>) {
    settled.into_iter().for_each(Settled::deliver);
}

/// Handle to a submitted operation.
#[derive(Debug)]
pub struct PendingOperation {
    id: String,
    rx: oneshot::Receiver<Result<JsonValue>>,
}

impl PendingOperation {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the operation to settle.
    pub async fn wait(self) -> Result<JsonValue> {
        self.rx.await.map_err(|_| LinkError::OperationCancelled { id: self.id })?
    }
}

impl BoundedTaskProcessor {
    /// A processor backed by the built-in thread worker.
    pub fn new(options: ProcessorOptions) -> Self {
        Self::with_spawner(options, ThreadWorkerSpawner::new())
    }

    pub fn with_spawner(options: ProcessorOptions, spawner: impl WorkerSpawner) -> Self {
        Self::with_spawner_arc(options, Arc::new(spawner))
    }

    /// A `max_concurrent` of zero would reject every submission; it is raised to 1.
    pub fn with_spawner_arc(
        mut options: ProcessorOptions,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> Self {
        if options.max_concurrent == 0 {
            log::warn!("[pulse-link] max_concurrent = 0 admits no operations; using 1");
            options.max_concurrent = 1;
        }
        Self {
            inner: Arc::new(Inner {
                options,
                spawner,
                state: Mutex::new(State::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn options(&self) -> &ProcessorOptions {
        &self.inner.options
    }

    /// Submit an operation and wait for its result.
    pub async fn process(
        &self,
        kind: TaskKind,
        data: Vec<JsonValue>,
        options: JsonValue,
    ) -> Result<JsonValue> {
        self.submit(kind, data, options)?.wait().await
    }

    /// Register and dispatch an operation without waiting for it.
    ///
    /// The operation counts against the ceiling as soon as this returns.
    /// Must be called from within a Tokio runtime.
    pub fn submit(
        &self,
        kind: TaskKind,
        data: Vec<JsonValue>,
        options: JsonValue,
    ) -> Result<PendingOperation> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            LinkError::ConfigurationError(
                "BoundedTaskProcessor must be used inside a Tokio runtime".to_string(),
            )
        })?;
        let inner = &self.inner;
        let limit = inner.options.max_concurrent;

        let mut settled = Vec::new();
        let result = {
            let mut state = inner.lock();
            if state.pending.len() >= limit {
                if inner.options.debug {
                    log::debug!(
                        "[pulse-link] Rejecting {} operation: {} of {} slots in use",
                        kind,
                        state.pending.len(),
                        limit
                    );
                }
                return Err(LinkError::ConcurrencyLimitExceeded {
                    active: state.pending.len(),
                    limit,
                });
            }

            let id = format!("op_{}", inner.next_id.fetch_add(1, Ordering::Relaxed));
            let seq = state.next_seq;
            state.next_seq += 1;
            state.operations.insert(id.clone(), Entry {
                seq,
                op: Operation::new(id.clone(), kind),
            });

            let (reply, rx) = oneshot::channel();
            let timer = inner.options.timeout().map(|timeout| {
                let weak = Arc::downgrade(inner);
                let timer_id = id.clone();
                runtime.spawn(async move {
                    tokio::time::sleep(timeout).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.on_timeout(&timer_id);
                    }
                })
            });
            state.pending.insert(id.clone(), Pending { reply, timer });

            match inner.dispatch(&mut state, &runtime, &id, kind, data, options, &mut settled) {
                Ok(()) => Ok(PendingOperation { id, rx }),
                Err(e) => {
                    if let Some(entry) = state.finish(&id, Err(e.clone()), None) {
                        settled.push(entry);
                    }
                    Err(e)
                },
            }
        };
        deliver_all(settled);
        result
    }

    /// Reject every outstanding operation with [`LinkError::OperationCancelled`]
    /// and discard the worker. Returns how many operations were cancelled.
    pub fn cancel_all(&self) -> usize {
        let inner = &self.inner;
        let settled = {
            let mut state = inner.lock();
            if let Some(slot) = state.worker.take() {
                slot.shutdown(true);
            }

            let mut ids: Vec<(u64, String)> = state
                .pending
                .keys()
                .map(|id| (state.operations.get(id).map_or(u64::MAX, |e| e.seq), id.clone()))
                .collect();
            ids.sort();

            ids.into_iter()
                .filter_map(|(_, id)| {
                    let error = LinkError::OperationCancelled { id: id.clone() };
                    state.finish(&id, Err(error), None)
                })
                .collect::<Vec<_>>()
        };

        let count = settled.len();
        if count > 0 {
            log::info!("[pulse-link] Cancelled {} operation(s)", count);
        }
        deliver_all(settled);
        count
    }

    pub async fn aggregate(
        &self,
        data: Vec<JsonValue>,
        options: AggregateOptions,
    ) -> Result<JsonValue> {
        self.process(TaskKind::Aggregate, data, to_options(&options)?)
            .await
    }

    pub async fn filter(
        &self,
        data: Vec<JsonValue>,
        options: FilterOptions,
    ) -> Result<Vec<JsonValue>> {
        self.process_as(TaskKind::Filter, data, &options).await
    }

    pub async fn sort(&self, data: Vec<JsonValue>, options: SortOptions) -> Result<Vec<JsonValue>> {
        self.process_as(TaskKind::Sort, data, &options).await
    }

    pub async fn transform(
        &self,
        data: Vec<JsonValue>,
        options: TransformOptions,
    ) -> Result<Vec<JsonValue>> {
        self.process_as(TaskKind::Transform, data, &options).await
    }

    pub async fn analyze(&self, data: Vec<JsonValue>, options: AnalyzeOptions) -> Result<Analysis> {
        self.process_as(TaskKind::Analyze, data, &options).await
    }

    async fn process_as<O: Serialize, T: DeserializeOwned>(
        &self,
        kind: TaskKind,
        data: Vec<JsonValue>,
        options: &O,
    ) -> Result<T> {
        let value = self.process(kind, data, to_options(options)?).await?;
        Ok(serde_json::from_value(value)?)
    }

    // ── Inspection ──────────────────────────────────────────────────────────

    pub fn operation(&self, id: &str) -> Option<Operation> {
        self.inner.lock().operations.get(id).map(|e| e.op.clone())
    }

    /// Every retained operation, oldest first.
    pub fn operations(&self) -> Vec<Operation> {
        let state = self.inner.lock();
        let mut entries: Vec<&Entry> = state.operations.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.op.clone()).collect()
    }

    /// Operations in `pending` or `processing`.
    pub fn active_count(&self) -> usize {
        self.inner
            .lock()
            .operations
            .values()
            .filter(|e| e.op.status.is_active())
            .count()
    }

    /// Callers still waiting for a result.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Drop terminal operations from the history. Returns how many were removed.
    pub fn clear_history(&self) -> usize {
        let mut state = self.inner.lock();
        let before = state.operations.len();
        state.operations.retain(|_, e| !e.op.status.is_terminal());
        before - state.operations.len()
    }

    pub fn stats(&self) -> ProcessorStats {
        let state = self.inner.lock();
        state
            .operations
            .values()
            .fold(ProcessorStats::default(), |mut stats, e| {
                stats.total += 1;
                match e.op.status {
                    OperationStatus::Pending | OperationStatus::Processing => stats.active += 1,
                    OperationStatus::Completed => stats.completed += 1,
                    OperationStatus::Error => stats.failed += 1,
                }
                stats
            })
    }
}

fn to_options<O: Serialize>(options: &O) -> Result<JsonValue> {
    Ok(serde_json::to_value(options)?)
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the operation processing and post it, spawning a worker first if
    /// none is running. A failed post faults the worker; the rejections it
    /// produces are pushed onto `settled`.
    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        self: &Arc<Self>,
        state: &mut State,
        runtime: &tokio::runtime::Handle,
        id: &str,
        kind: TaskKind,
        data: Vec<JsonValue>,
        options: JsonValue,
        settled: &mut Vec<Settled>,
    ) -> Result<()> {
        if state.worker.is_none() {
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = self.spawner.spawn(WorkerReplies::new(tx))?;
            state.worker_generation += 1;
            let generation = state.worker_generation;
            let pump = runtime.spawn(pump_worker_events(Arc::downgrade(self), generation, rx));
            state.worker = Some(WorkerSlot {
                generation,
                worker,
                pump,
            });
        }

        if let Some(entry) = state.operations.get_mut(id) {
            entry.op.status = OperationStatus::Processing;
        }
        if self.options.debug {
            log::debug!("[pulse-link] Dispatching {} ({}, {} records)", id, kind, data.len());
        }

        let request = WorkerRequest {
            id: id.to_string(),
            kind,
            data,
            options,
        };
        let posted = match state.worker.as_mut() {
            Some(slot) => slot.worker.post(request),
            None => Err(LinkError::WorkerFault("worker unavailable".to_string())),
        };
        if let Err(e) = posted {
            let generation = state.worker_generation;
            settled.extend(state.fault_worker(generation, &e.to_string()));
            return Err(e);
        }
        Ok(())
    }

    fn on_response(&self, response: WorkerResponse) {
        let WorkerResponse {
            id,
            outcome,
            processing_time_ms,
        } = response;
        let result = match outcome {
            WorkerOutcome::Completed(value) => Ok(value),
            WorkerOutcome::Failed(message) => Err(LinkError::OperationFailed {
                id: id.clone(),
                message,
            }),
            WorkerOutcome::Unsupported(message) => Err(LinkError::WorkerFault(message)),
        };

        let settled = self.lock().finish(&id, result, processing_time_ms);
        match settled {
            Some(settled) => {
                if self.options.debug {
                    log::debug!(
                        "[pulse-link] {} settled in {}ms",
                        id,
                        processing_time_ms.unwrap_or_default()
                    );
                }
                settled.deliver();
            },
            None => log::debug!("[pulse-link] Ignoring reply for settled operation {}", id),
        }
    }

    fn on_timeout(&self, id: &str) {
        let error = LinkError::OperationTimeout {
            id: id.to_string(),
            timeout_ms: self.options.timeout_ms,
        };
        let settled = self.lock().finish(id, Err(error), None);
        if let Some(settled) = settled {
            log::warn!(
                "[pulse-link] Operation {} timed out after {}ms",
                id,
                self.options.timeout_ms
            );
            settled.deliver();
        }
    }

    fn on_fault(&self, generation: u64, message: &str) {
        let settled = self.lock().fault_worker(generation, message);
        deliver_all(settled);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = state.worker.take() {
            slot.shutdown(true);
        }
        for pending in state.pending.values_mut() {
            if let Some(timer) = pending.timer.take() {
                timer.abort();
            }
        }
    }
}

impl State {
    /// Settle `id` exactly once. Returns `None` when it already settled.
    fn finish(
        &mut self,
        id: &str,
        result: Result<JsonValue>,
        processing_time_ms: Option<u64>,
    ) -> Option<Settled> {
        let pending = self.pending.remove(id)?;
        if let Some(timer) = pending.timer {
            timer.abort();
        }

        if let Some(entry) = self.operations.get_mut(id) {
            let op = &mut entry.op;
            if !op.status.is_terminal() {
                op.end_time = Some(epoch_millis());
                op.processing_time_ms = processing_time_ms;
                match &result {
                    Ok(_) => op.status = OperationStatus::Completed,
                    Err(e) => {
                        op.status = OperationStatus::Error;
                        op.error = Some(e.to_string());
                    },
                }
            }
        }

        Some(Settled {
            reply: pending.reply,
            result,
        })
    }

    /// Drop the worker of `generation` and reject everything in flight.
    fn fault_worker(&mut self, generation: u64, message: &str) -> Vec<Settled> {
        match &self.worker {
            Some(slot) if slot.generation == generation => {},
            _ => return Vec::new(),
        }
        if let Some(slot) = self.worker.take() {
            // The pump may be the caller; it exits on its own.
            slot.shutdown(false);
        }
        log::error!("[pulse-link] Worker fault: {}", message);

        let mut ids: Vec<(u64, String)> = self
            .pending
            .keys()
            .map(|id| (self.operations.get(id).map_or(u64::MAX, |e| e.seq), id.clone()))
            .collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|(_, id)| {
                self.finish(&id, Err(LinkError::WorkerFault(message.to_string())), None)
            })
            .collect()
    }
}

async fn pump_worker_events(
    inner: Weak<Inner>,
    generation: u64,
    mut rx: mpsc::UnboundedReceiver<WorkerEvent>,
) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            WorkerEvent::Response(response) => inner.on_response(response),
            WorkerEvent::Fault(message) => {
                inner.on_fault(generation, &message);
                return;
            },
        }
    }

    // Reply channel closed without a fault report.
    if let Some(inner) = inner.upgrade() {
        inner.on_fault(generation, "worker exited unexpectedly");
    }
}
