//! In-memory hub for tests
//!
//! `FakeHub` hands out a [`Connector`] whose transports are tokio channels.
//! It answers the handshake, records every invocation and acknowledges it
//! according to the current [`AckMode`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use super::connection::{Connector, FrameChannel};
use super::protocol::{FrameBuffer, RECORD_SEPARATOR};
use crate::error::{SyncError, SyncResult};
use crate::settings::ReconnectSettings;

pub type Call = (String, Vec<Value>);

/// How the fake hub answers invocations
#[derive(Debug, Clone, PartialEq)]
pub enum AckMode {
    Ok,
    Error(String),
    Silent,
}

/// Fast reconnect schedule without jitter
pub fn test_settings() -> ReconnectSettings {
    ReconnectSettings {
        delays_ms: vec![0, 10, 20],
        jitter: 0.0,
        keep_alive_ms: 1_000,
        server_timeout_ms: 5_000,
    }
}

#[derive(Default)]
struct HubState {
    tokens: Mutex<Vec<String>>,
    calls: Mutex<Vec<Call>>,
    mode: Mutex<Option<AckMode>>,
    refuse: AtomicBool,
    /// Control channel and task of the live connection
    live: Mutex<Option<(mpsc::UnboundedSender<String>, JoinHandle<()>)>>,
    call_notify: Notify,
}

impl HubState {
    fn handle_record(&self, record: &str, to_client: &mpsc::UnboundedSender<String>) {
        let Ok(value) = serde_json::from_str::<Value>(record) else {
            return;
        };
        if value["type"] != json!(1) {
            return;
        }
        let Some(id) = value["invocationId"].as_str() else {
            return;
        };

        let target = value["target"].as_str().unwrap_or_default().to_string();
        let arguments = value["arguments"].as_array().cloned().unwrap_or_default();
        self.calls.lock().push((target, arguments));
        self.call_notify.notify_waiters();

        let reply = match self.mode.lock().clone().unwrap_or(AckMode::Ok) {
            AckMode::Ok => json!({"type": 3, "invocationId": id, "result": null}),
            AckMode::Error(error) => json!({"type": 3, "invocationId": id, "error": error}),
            AckMode::Silent => return,
        };
        let _ = to_client.send(format!("{}{}", reply, RECORD_SEPARATOR));
    }
}

struct MemoryConnector {
    state: Arc<HubState>,
}

impl Connector for MemoryConnector {
    fn connect(&self, token: String) -> BoxFuture<'static, SyncResult<FrameChannel>> {
        let state = Arc::clone(&self.state);
        async move {
            if state.refuse.load(Ordering::SeqCst) {
                return Err(SyncError::ConnectionError("connection refused".to_string()));
            }
            state.tokens.lock().push(token);

            let (outbound, mut from_client) = mpsc::unbounded_channel::<String>();
            let (to_client, inbound) = mpsc::unbounded_channel::<String>();
            let (control_tx, mut control_rx) = mpsc::unbounded_channel::<String>();

            let task_state = Arc::clone(&state);
            let task = tokio::spawn(async move {
                let mut buffer = FrameBuffer::new();
                let mut handshaken = false;
                loop {
                    tokio::select! {
                        Some(text) = from_client.recv() => {
                            for record in buffer.push(&text).unwrap_or_default() {
                                if !handshaken {
                                    handshaken = true;
                                    let _ = to_client.send(format!("{{}}{}", RECORD_SEPARATOR));
                                    continue;
                                }
                                task_state.handle_record(&record, &to_client);
                            }
                        }
                        Some(raw) = control_rx.recv() => {
                            let _ = to_client.send(raw);
                        }
                        else => break,
                    }
                }
            });

            if let Some((_, old)) = state.live.lock().replace((control_tx, task)) {
                old.abort();
            }
            Ok(FrameChannel { outbound, inbound })
        }
        .boxed()
    }
}

pub struct FakeHub {
    state: Arc<HubState>,
}

impl FakeHub {
    pub fn start() -> Self {
        Self {
            state: Arc::new(HubState::default()),
        }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MemoryConnector {
            state: Arc::clone(&self.state),
        })
    }

    pub fn tokens(&self) -> Vec<String> {
        self.state.tokens.lock().clone()
    }

    /// Accepted transports so far
    pub fn connection_count(&self) -> usize {
        self.state.tokens.lock().len()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().clone()
    }

    pub fn targets(&self) -> Vec<String> {
        self.calls().into_iter().map(|(target, _)| target).collect()
    }

    /// Wait until at least `count` invocations arrived
    pub async fn wait_for_calls(&self, count: usize) -> Vec<Call> {
        let wait = async {
            loop {
                let notified = self.state.call_notify.notified();
                let calls = self.calls();
                if calls.len() >= count {
                    return calls;
                }
                notified.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(2), wait)
            .await
            .expect("hub did not receive the expected invocations")
    }

    pub fn set_mode(&self, mode: AckMode) {
        *self.state.mode.lock() = Some(mode);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Write raw transport text to the live client
    pub fn send_raw(&self, text: &str) {
        if let Some((control, _)) = self.state.live.lock().as_ref() {
            let _ = control.send(text.to_string());
        }
    }

    pub fn push(&self, target: &str, argument: Value) {
        let record = json!({"type": 1, "target": target, "arguments": [argument]});
        self.send_raw(&format!("{}{}", record, RECORD_SEPARATOR));
    }

    pub fn push_state(&self, state: Value) {
        self.push("PlaybackState", state);
    }

    /// Kill the live transport from the server side
    pub fn drop_connection(&self) {
        if let Some((_, task)) = self.state.live.lock().take() {
            task.abort();
        }
    }
}
