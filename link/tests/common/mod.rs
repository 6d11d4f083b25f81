//! Shared fixtures for the integration suites: an in-memory transport with a
//! scripted sequence of connection outcomes, a hand-driven worker, and JWT
//! helpers.

#![allow(dead_code)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use pulse_link::{
    ClientFrame, CloseReason, IsolatedWorker, LinkError, Result, ServerFrame, Transport,
    TransportEvent, TransportLink, WorkerReplies, WorkerRequest, WorkerResponse, WorkerSpawner,
};
use serde_json::{json, Value as JsonValue};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const ENDPOINT: &str = "https://hub.test/hubs/reasoning";

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

// ── JWT helpers ──────────────────────────────────────────────────────────────

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

pub fn jwt(claims: JsonValue) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.signature", header, payload)
}

/// A token valid for another hour.
pub fn valid_token(sub: &str) -> String {
    jwt(json!({ "sub": sub, "exp": now_secs() + 3600 }))
}

/// A token that expired a minute ago.
pub fn expired_token() -> String {
    jwt(json!({ "sub": "stale", "exp": now_secs() - 60 }))
}

// ── Mock transport ───────────────────────────────────────────────────────────

/// Outcome of one `open()` call.
#[derive(Debug, Clone)]
pub enum Step {
    Accept,
    Fail(LinkError),
}

impl Step {
    pub fn network_failure() -> Self {
        Step::Fail(LinkError::NetworkError("connection refused".to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct OpenRecord {
    pub at: Instant,
    pub token: String,
}

/// Transport that follows a script. Once the script runs out every open
/// fails with a network error.
#[derive(Clone)]
pub struct MockTransport {
    script: Arc<Mutex<VecDeque<Step>>>,
    opens: Arc<Mutex<Vec<OpenRecord>>>,
    servers: mpsc::UnboundedSender<MockServer>,
}

/// Receives the server side of every accepted connection.
pub struct MockServers {
    rx: mpsc::UnboundedReceiver<MockServer>,
}

impl MockServers {
    pub async fn next(&mut self) -> MockServer {
        self.rx.recv().await.expect("transport dropped")
    }
}

impl MockTransport {
    pub fn new(script: impl IntoIterator<Item = Step>) -> (Self, MockServers) {
        let (servers, rx) = mpsc::unbounded_channel();
        let transport = Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            opens: Arc::new(Mutex::new(Vec::new())),
            servers,
        };
        (transport, MockServers { rx })
    }

    pub fn opens(&self) -> Vec<OpenRecord> {
        self.opens.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    pub fn push_step(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn open(&self, _endpoint: &str, token: &str) -> Result<TransportLink> {
        self.opens.lock().unwrap().push(OpenRecord {
            at: Instant::now(),
            token: token.to_string(),
        });
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Step::network_failure);

        match step {
            Step::Accept => {
                let (outbound_tx, outbound_rx) = mpsc::channel(64);
                let (inbound_tx, inbound_rx) = mpsc::channel(64);
                let _ = self.servers.send(MockServer {
                    inbound: inbound_tx,
                    outbound: outbound_rx,
                });
                Ok(TransportLink {
                    outbound: outbound_tx,
                    inbound: inbound_rx,
                })
            },
            Step::Fail(err) => Err(err),
        }
    }
}

/// Server end of an accepted mock connection. Dropping it closes the
/// connection without a close frame.
pub struct MockServer {
    inbound: mpsc::Sender<TransportEvent>,
    outbound: mpsc::Receiver<ClientFrame>,
}

impl MockServer {
    pub async fn close(&self, reason: CloseReason) {
        let _ = self.inbound.send(TransportEvent::Closed(reason)).await;
    }

    pub async fn send(&self, frame: ServerFrame) {
        self.inbound
            .send(TransportEvent::Frame(frame))
            .await
            .expect("hub stopped reading");
    }

    pub async fn push_event(&self, target: &str, payload: JsonValue) {
        self.send(ServerFrame::Event {
            target: target.to_string(),
            payload,
        })
        .await;
    }

    pub async fn complete(&self, invocation_id: &str, result: JsonValue) {
        self.send(ServerFrame::Completion {
            invocation_id: invocation_id.to_string(),
            result: Some(result),
            error: None,
        })
        .await;
    }

    /// Next frame the hub sent.
    pub async fn next_frame(&mut self) -> ClientFrame {
        self.outbound.recv().await.expect("hub closed the connection")
    }

    /// Next invocation as `(invocation_id, target, arguments)`.
    pub async fn next_invocation(&mut self) -> (String, String, Vec<JsonValue>) {
        loop {
            match self.next_frame().await {
                ClientFrame::Invocation {
                    invocation_id,
                    target,
                    arguments,
                } => return (invocation_id, target, arguments),
                ClientFrame::Ping => continue,
            }
        }
    }
}

// ── Manual worker ────────────────────────────────────────────────────────────

/// Worker whose replies are driven by the test.
#[derive(Clone, Default)]
pub struct ManualSpawner {
    inner: Arc<Mutex<ManualState>>,
}

#[derive(Default)]
struct ManualState {
    spawned: usize,
    terminated: usize,
    requests: Vec<WorkerRequest>,
    replies: Option<WorkerReplies>,
}

impl ManualSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawned(&self) -> usize {
        self.inner.lock().unwrap().spawned
    }

    pub fn terminated(&self) -> usize {
        self.inner.lock().unwrap().terminated
    }

    pub fn requests(&self) -> Vec<WorkerRequest> {
        self.inner.lock().unwrap().requests.clone()
    }

    fn replies(&self) -> WorkerReplies {
        self.inner
            .lock()
            .unwrap()
            .replies
            .clone()
            .expect("no worker spawned")
    }

    pub fn respond(&self, response: WorkerResponse) {
        self.replies().respond(response);
    }

    pub fn complete(&self, id: &str, result: JsonValue) {
        self.respond(WorkerResponse::completed(id, result));
    }

    pub fn fault(&self, message: &str) {
        self.replies().fault(message);
    }
}

impl WorkerSpawner for ManualSpawner {
    fn spawn(&self, replies: WorkerReplies) -> Result<Box<dyn IsolatedWorker>> {
        let mut state = self.inner.lock().unwrap();
        state.spawned += 1;
        state.replies = Some(replies);
        Ok(Box::new(ManualWorker {
            inner: Arc::clone(&self.inner),
            terminated: false,
        }))
    }
}

struct ManualWorker {
    inner: Arc<Mutex<ManualState>>,
    terminated: bool,
}

impl IsolatedWorker for ManualWorker {
    fn post(&mut self, request: WorkerRequest) -> Result<()> {
        if self.terminated {
            return Err(LinkError::WorkerFault("worker terminated".to_string()));
        }
        self.inner.lock().unwrap().requests.push(request);
        Ok(())
    }

    fn terminate(&mut self) {
        if !self.terminated {
            self.terminated = true;
            self.inner.lock().unwrap().terminated += 1;
        }
    }
}
