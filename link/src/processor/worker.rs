//! Isolated worker seam for the task processor.
//!
//! A worker receives [`WorkerRequest`]s, runs them away from the caller's
//! execution context and replies with [`WorkerResponse`]s tagged by request
//! id. The processor talks to workers only through [`IsolatedWorker`] and
//! [`WorkerSpawner`], so tests can drive replies by hand.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tokio::sync::mpsc as tokio_mpsc;

use super::transforms;
use crate::error::{LinkError, Result};
use crate::models::{WorkerOutcome, WorkerRequest, WorkerResponse};

/// What a worker sends back to the processor.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Response(WorkerResponse),
    /// The worker hit an unrecoverable error and will not answer again.
    Fault(String),
}

/// Reply channel handed to a worker when it is spawned.
#[derive(Debug, Clone)]
pub struct WorkerReplies {
    tx: tokio_mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerReplies {
    pub(crate) fn new(tx: tokio_mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self { tx }
    }

    /// Returns `false` once the processor stopped listening.
    pub fn respond(&self, response: WorkerResponse) -> bool {
        self.tx.send(WorkerEvent::Response(response)).is_ok()
    }

    pub fn fault(&self, message: impl Into<String>) -> bool {
        self.tx.send(WorkerEvent::Fault(message.into())).is_ok()
    }
}

/// A running worker.
pub trait IsolatedWorker: Send {
    /// Queue a request. Must not block on the request being processed.
    fn post(&mut self, request: WorkerRequest) -> Result<()>;

    /// Stop the worker. Requests already queued may be dropped.
    fn terminate(&mut self);
}

/// Creates workers on demand.
pub trait WorkerSpawner: Send + Sync + 'static {
    fn spawn(&self, replies: WorkerReplies) -> Result<Box<dyn IsolatedWorker>>;
}

/// Function a thread worker runs for each request.
pub type WorkerHandler = Arc<dyn Fn(&WorkerRequest) -> WorkerOutcome + Send + Sync>;

/// Spawns one OS thread per worker running the built-in transforms.
pub struct ThreadWorkerSpawner {
    handler: WorkerHandler,
    spawned: AtomicU64,
}

impl std::fmt::Debug for ThreadWorkerSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadWorkerSpawner")
            .field("spawned", &self.spawned.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for ThreadWorkerSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadWorkerSpawner {
    pub fn new() -> Self {
        Self::with_handler(Arc::new(run_builtin))
    }

    /// Run `handler` instead of the built-in transforms.
    pub fn with_handler(handler: WorkerHandler) -> Self {
        Self {
            handler,
            spawned: AtomicU64::new(0),
        }
    }

    /// Number of worker threads started so far.
    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }
}

impl WorkerSpawner for ThreadWorkerSpawner {
    fn spawn(&self, replies: WorkerReplies) -> Result<Box<dyn IsolatedWorker>> {
        let index = self.spawned.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel::<WorkerRequest>();
        let handler = Arc::clone(&self.handler);

        let thread = thread::Builder::new()
            .name(format!("pulse-link-worker-{}", index))
            .spawn(move || worker_loop(handler, rx, replies))
            .map_err(|e| LinkError::WorkerFault(format!("failed to start worker: {}", e)))?;

        log::debug!("[pulse-link] Started worker thread #{}", index);
        Ok(Box::new(ThreadWorker {
            tx: Some(tx),
            _thread: thread,
        }))
    }
}

struct ThreadWorker {
    tx: Option<Sender<WorkerRequest>>,
    _thread: JoinHandle<()>,
}

impl IsolatedWorker for ThreadWorker {
    fn post(&mut self, request: WorkerRequest) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| LinkError::WorkerFault("worker terminated".to_string()))?;
        tx.send(request)
            .map_err(|_| LinkError::WorkerFault("worker thread exited".to_string()))
    }

    fn terminate(&mut self) {
        // Dropping the sender ends the loop after the current request.
        self.tx = None;
    }
}

impl Drop for ThreadWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn run_builtin(request: &WorkerRequest) -> WorkerOutcome {
    match transforms::run(request.kind, &request.data, &request.options) {
        Ok(value) => WorkerOutcome::Completed(value),
        Err(e) => WorkerOutcome::Failed(e.to_string()),
    }
}

fn worker_loop(handler: WorkerHandler, rx: Receiver<WorkerRequest>, replies: WorkerReplies) {
    while let Ok(request) = rx.recv() {
        let started = Instant::now();
        let outcome = match catch_unwind(AssertUnwindSafe(|| handler(&request))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_payload_to_string(&payload);
                log::error!(
                    "[pulse-link] Worker panicked on {} ({}): {}",
                    request.id,
                    request.kind,
                    message
                );
                replies.fault(message);
                return;
            },
        };

        let response = WorkerResponse {
            id: request.id,
            outcome,
            processing_time_ms: None,
        }
        .with_processing_time_ms(started.elapsed().as_millis() as u64);
        if !replies.respond(response) {
            return;
        }
    }
}

fn panic_payload_to_string(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
