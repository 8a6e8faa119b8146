//! Hub session
//!
//! Owns one duplex connection to the playback hub: handshake, keep-alive,
//! invocation/acknowledgement matching and the reconnect loop. Decoded
//! server pushes are forwarded on an event channel; connection changes on
//! a lifecycle broadcast.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, sleep, timeout};
use tracing::{debug, info, warn};

use super::connection::{Connector, FrameChannel};
use super::messages::{HubCommand, ServerEvent};
use super::protocol::{
    FrameBuffer, HandshakeRequest, HubMessage, InvocationRequest, PingRecord, check_handshake,
    encode,
};
use crate::auth::CredentialResolver;
use crate::error::{SyncError, SyncResult};
use crate::settings::ReconnectSettings;
use crate::sync::GroupId;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);
const LIFECYCLE_CAPACITY: usize = 16;
/// Floor for keep-alive and silence timers
const MIN_TIMER: Duration = Duration::from_millis(1);

/// Connection readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Connection changes observed by the session
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Connected,
    /// Connection lost; `attempt` counts from 1
    Reconnecting { attempt: usize, error: String },
    /// Transport re-established (the group is NOT rejoined)
    Reconnected,
    /// Gave up, or disconnected on request
    Closed { error: Option<String> },
}

/// Backoff schedule for automatic reconnection
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub delays: Vec<Duration>,
    /// Up to this fraction of each delay is added at random
    pub jitter: f64,
}

impl ReconnectPolicy {
    pub fn from_settings(settings: &ReconnectSettings) -> Self {
        Self {
            delays: settings
                .delays_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            jitter: settings.jitter.clamp(0.0, 1.0),
        }
    }

    /// Delay before reconnect attempt `attempt` (0-based), `None` once exhausted
    pub fn delay_for(&self, attempt: usize) -> Option<Duration> {
        let base = *self.delays.get(attempt)?;
        if self.jitter <= 0.0 || base.is_zero() {
            return Some(base);
        }
        let extra = rand::rng().random_range(0.0..=self.jitter);
        Some(base.mul_f64(1.0 + extra))
    }
}

struct PendingInvocation {
    target: &'static str,
    reply: oneshot::Sender<SyncResult<Value>>,
}

/// An established transport with the handshake done
struct Transport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
    buffer: FrameBuffer,
    /// Records that arrived together with the handshake response
    leftover: Vec<String>,
}

/// Why a transport stopped
struct CloseReason {
    error: Option<String>,
    allow_reconnect: bool,
}

impl CloseReason {
    fn lost(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            allow_reconnect: true,
        }
    }
}

struct Inner {
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialResolver>,
    policy: ReconnectPolicy,
    keep_alive: Duration,
    server_timeout: Duration,
    state_tx: watch::Sender<ConnectionState>,
    lifecycle_tx: broadcast::Sender<LifecycleEvent>,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ServerEvent>>>,
    /// Outbound side of the live transport
    link: Mutex<Option<mpsc::UnboundedSender<String>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    pending: Mutex<HashMap<String, PendingInvocation>>,
    next_invocation: AtomicU64,
    current_group: Mutex<Option<GroupId>>,
    connect_lock: tokio::sync::Mutex<()>,
}

/// Cloneable handle to the hub connection
#[derive(Clone)]
pub struct HubSession {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for HubSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubSession")
            .field("state", &self.state())
            .field("group", &self.current_group())
            .finish_non_exhaustive()
    }
}

impl HubSession {
    pub fn new(
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialResolver>,
        settings: &ReconnectSettings,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (lifecycle_tx, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(Inner {
                connector,
                credentials,
                policy: ReconnectPolicy::from_settings(settings),
                keep_alive: settings.keep_alive().max(MIN_TIMER),
                server_timeout: settings.server_timeout().max(MIN_TIMER),
                state_tx,
                lifecycle_tx,
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                link: Mutex::new(None),
                driver: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                next_invocation: AtomicU64::new(0),
                current_group: Mutex::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Establish the connection
    ///
    /// A no-op while connected or already reconnecting.
    pub async fn connect(&self) -> SyncResult<()> {
        let _guard = self.inner.connect_lock.lock().await;
        if self.state() != ConnectionState::Disconnected {
            return Ok(());
        }

        self.inner.state_tx.send_replace(ConnectionState::Connecting);
        let transport = match self.inner.open().await {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Hub connection failed: {}", e);
                self.inner.state_tx.send_replace(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        self.inner.install(&transport);
        self.inner.state_tx.send_replace(ConnectionState::Connected);
        let _ = self.inner.lifecycle_tx.send(LifecycleEvent::Connected);
        info!("Connected to playback hub");

        let driver = tokio::spawn(Inner::drive(Arc::clone(&self.inner), transport));
        *self.inner.driver.lock() = Some(driver);
        Ok(())
    }

    /// Close the connection; calling it again does nothing
    pub async fn disconnect(&self) {
        let _guard = self.inner.connect_lock.lock().await;
        if let Some(driver) = self.inner.driver.lock().take() {
            driver.abort();
        }
        self.inner.link.lock().take();
        self.inner.fail_pending(|| SyncError::NotConnected);
        self.inner.current_group.lock().take();

        let previous = self.inner.state_tx.send_replace(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            let _ = self.inner.lifecycle_tx.send(LifecycleEvent::Closed { error: None });
            info!("Disconnected from playback hub");
        }
    }

    /// Send a hub method and wait for its completion
    pub async fn invoke(&self, command: &HubCommand, ack_timeout: Duration) -> SyncResult<Value> {
        let target = command.target();
        let outbound = self.ready_link().ok_or(SyncError::NotConnected)?;

        let id = self.inner.next_invocation.fetch_add(1, Ordering::Relaxed).to_string();
        let arguments = command.arguments();
        let text = encode(&InvocationRequest::new(&id, target, &arguments))
            .map_err(|e| SyncError::remote(target, e.to_string()))?;

        let (reply, response) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .insert(id.clone(), PendingInvocation { target, reply });

        if outbound.send(text).is_err() {
            self.inner.pending.lock().remove(&id);
            return Err(SyncError::NotConnected);
        }
        debug!("Invoked {} (#{})", target, id);

        match timeout(ack_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SyncError::ConnectionError(format!(
                "connection dropped before {target} was acknowledged"
            ))),
            Err(_) => {
                self.inner.pending.lock().remove(&id);
                Err(SyncError::remote(
                    target,
                    format!("no acknowledgement within {} ms", ack_timeout.as_millis()),
                ))
            }
        }
    }

    fn ready_link(&self) -> Option<mpsc::UnboundedSender<String>> {
        if self.state() != ConnectionState::Connected {
            return None;
        }
        self.inner.link.lock().clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch readiness changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.lifecycle_tx.subscribe()
    }

    /// Server pushes; only the first caller gets the receiver
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.inner.events_rx.lock().take()
    }

    pub fn current_group(&self) -> Option<GroupId> {
        self.inner.current_group.lock().clone()
    }

    pub fn set_current_group(&self, group: Option<GroupId>) {
        *self.inner.current_group.lock() = group;
    }
}

impl Inner {
    /// Resolve a fresh credential, open a transport and do the handshake
    async fn open(&self) -> SyncResult<Transport> {
        let token = self
            .credentials
            .bearer_token()
            .ok_or_else(|| SyncError::ConnectionError("no access token available".to_string()))?;

        let FrameChannel { outbound, mut inbound } = self.connector.connect(token).await?;
        let handshake = encode(&HandshakeRequest::default())
            .map_err(|e| SyncError::ConnectionError(e.to_string()))?;
        outbound
            .send(handshake)
            .map_err(|_| SyncError::ConnectionError("transport closed during handshake".to_string()))?;

        let mut buffer = FrameBuffer::new();
        let mut records = Vec::new();
        let wait = async {
            while records.is_empty() {
                let Some(text) = inbound.recv().await else {
                    return Err("transport closed during handshake".to_string());
                };
                records = buffer.push(&text).map_err(|e| e.to_string())?;
            }
            Ok(())
        };
        match timeout(HANDSHAKE_TIMEOUT, wait).await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return Err(SyncError::ConnectionError(reason)),
            Err(_) => {
                return Err(SyncError::ConnectionError(
                    "handshake timed out".to_string(),
                ));
            }
        }

        let mut records = records.into_iter();
        if let Some(response) = records.next() {
            check_handshake(&response).map_err(|e| SyncError::ConnectionError(e.to_string()))?;
        }
        debug!("Hub handshake complete");

        Ok(Transport {
            outbound,
            inbound,
            buffer,
            leftover: records.collect(),
        })
    }

    fn install(&self, transport: &Transport) {
        *self.link.lock() = Some(transport.outbound.clone());
    }

    fn fail_pending(&self, error: impl Fn() -> SyncError) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        for (_, invocation) in pending {
            let _ = invocation.reply.send(Err(error()));
        }
    }

    /// Connection task: pump the live transport, reconnect when it drops
    async fn drive(self: Arc<Self>, transport: Transport) {
        let mut transport = transport;
        loop {
            let reason = self.pump(&mut transport).await;
            let error = reason
                .error
                .clone()
                .unwrap_or_else(|| "connection closed by server".to_string());

            self.link.lock().take();
            self.fail_pending(|| SyncError::ConnectionError(error.clone()));
            if self.current_group.lock().take().is_some() {
                debug!("Group membership dropped with the connection");
            }

            if !reason.allow_reconnect {
                self.close(reason.error);
                return;
            }

            warn!("Hub connection lost: {}", error);
            self.state_tx.send_replace(ConnectionState::Reconnecting);
            match self.reconnect(error).await {
                Some(next) => {
                    self.install(&next);
                    transport = next;
                    self.state_tx.send_replace(ConnectionState::Connected);
                    let _ = self.lifecycle_tx.send(LifecycleEvent::Reconnected);
                    info!("Reconnected to playback hub");
                }
                None => {
                    self.close(Some("reconnect attempts exhausted".to_string()));
                    return;
                }
            }
        }
    }

    async fn reconnect(&self, error: String) -> Option<Transport> {
        let mut error = error;
        for attempt in 0.. {
            let delay = self.policy.delay_for(attempt)?;
            let _ = self.lifecycle_tx.send(LifecycleEvent::Reconnecting {
                attempt: attempt + 1,
                error: error.clone(),
            });
            debug!("Reconnect attempt {} in {:?}", attempt + 1, delay);
            sleep(delay).await;

            match self.open().await {
                Ok(transport) => return Some(transport),
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {}", attempt + 1, e);
                    error = e.to_string();
                }
            }
        }
        None
    }

    fn close(&self, error: Option<String>) {
        self.driver.lock().take();
        self.state_tx.send_replace(ConnectionState::Disconnected);
        info!("Hub connection closed: {}", error.as_deref().unwrap_or("no error"));
        let _ = self.lifecycle_tx.send(LifecycleEvent::Closed { error });
    }

    async fn pump(&self, transport: &mut Transport) -> CloseReason {
        for record in std::mem::take(&mut transport.leftover) {
            if let Some(reason) = self.handle_record(&record) {
                return reason;
            }
        }

        let mut ping = interval_at(Instant::now() + self.keep_alive, self.keep_alive);
        let silence = sleep(self.server_timeout);
        tokio::pin!(silence);

        loop {
            tokio::select! {
                frame = transport.inbound.recv() => {
                    let Some(text) = frame else {
                        return CloseReason::lost("transport closed");
                    };
                    silence.as_mut().reset(Instant::now() + self.server_timeout);
                    let records = match transport.buffer.push(&text) {
                        Ok(records) => records,
                        Err(e) => return CloseReason::lost(e.to_string()),
                    };
                    for record in records {
                        if let Some(reason) = self.handle_record(&record) {
                            return reason;
                        }
                    }
                }
                _ = ping.tick() => {
                    let Ok(text) = encode(&PingRecord::default()) else {
                        continue;
                    };
                    if transport.outbound.send(text).is_err() {
                        return CloseReason::lost("transport closed");
                    }
                }
                () = &mut silence => {
                    return CloseReason::lost("server timeout elapsed without messages");
                }
            }
        }
    }

    /// Act on one record; `Some` ends the transport
    fn handle_record(&self, record: &str) -> Option<CloseReason> {
        let message = match HubMessage::parse(record) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping hub record: {}", e);
                return None;
            }
        };

        match message {
            HubMessage::Invocation {
                target, arguments, ..
            } => match ServerEvent::decode(&target, arguments) {
                Ok(event) => {
                    let _ = self.events_tx.send(event);
                }
                Err(e) => warn!("Dropping {} push: {}", target, e),
            },
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => {
                let Some(pending) = self.pending.lock().remove(&invocation_id) else {
                    debug!("Completion for unknown invocation #{}", invocation_id);
                    return None;
                };
                let outcome = match error {
                    Some(reason) => Err(SyncError::remote(pending.target, reason)),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                let _ = pending.reply.send(outcome);
            }
            HubMessage::Ping => {}
            HubMessage::Close {
                error,
                allow_reconnect,
            } => {
                return Some(CloseReason {
                    error,
                    allow_reconnect,
                });
            }
            HubMessage::Other(kind) => debug!("Ignoring hub message type {}", kind),
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::hub::protocol::MAX_PENDING_RECORD;
    use crate::hub::testing::{AckMode, FakeHub, test_settings};
    use serde_json::json;

    fn session(hub: &FakeHub) -> HubSession {
        HubSession::new(
            hub.connector(),
            Arc::new(StaticToken("token-1".to_string())),
            &test_settings(),
        )
    }

    #[test]
    fn test_reconnect_policy_schedule() {
        let policy = ReconnectPolicy::from_settings(&ReconnectSettings::default());
        assert_eq!(policy.delay_for(0), Some(Duration::ZERO));
        let second = policy.delay_for(1).unwrap();
        assert!(second >= Duration::from_secs(2) && second <= Duration::from_millis(2_200));
        let last = policy.delay_for(3).unwrap();
        assert!(last >= Duration::from_secs(30) && last <= Duration::from_secs(33));
        assert_eq!(policy.delay_for(4), None);
    }

    #[test]
    fn test_timers_come_from_settings() {
        let hub = FakeHub::start();
        let credentials = Arc::new(StaticToken("token-1".to_string()));
        let settings = ReconnectSettings {
            keep_alive_ms: 250,
            server_timeout_ms: 900,
            ..test_settings()
        };
        let session = HubSession::new(hub.connector(), credentials.clone(), &settings);
        assert_eq!(session.inner.keep_alive, settings.keep_alive());
        assert_eq!(session.inner.server_timeout, settings.server_timeout());

        let zeroed = ReconnectSettings {
            keep_alive_ms: 0,
            server_timeout_ms: 0,
            ..test_settings()
        };
        let session = HubSession::new(hub.connector(), credentials, &zeroed);
        assert_eq!(session.inner.keep_alive, MIN_TIMER);
        assert_eq!(session.inner.server_timeout, MIN_TIMER);
    }

    #[tokio::test]
    async fn test_connect_requires_credentials() {
        let hub = FakeHub::start();
        let session = HubSession::new(hub.connector(), Arc::new(|| None::<String>), &test_settings());
        assert!(matches!(
            session.connect().await,
            Err(SyncError::ConnectionError(_))
        ));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_invoke_before_connect_fails_fast() {
        let hub = FakeHub::start();
        let session = session(&hub);
        let result = session
            .invoke(&HubCommand::PlayPause(true), Duration::from_secs(1))
            .await;
        assert_eq!(result, Err(SyncError::NotConnected));
        assert!(hub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_connect_invoke_and_push() {
        let hub = FakeHub::start();
        let session = session(&hub);
        let mut events = session.take_events().unwrap();
        let mut lifecycle = session.lifecycle();

        session.connect().await.unwrap();
        assert!(session.is_ready());
        assert_eq!(lifecycle.recv().await.unwrap(), LifecycleEvent::Connected);
        assert_eq!(hub.tokens(), vec!["token-1".to_string()]);

        // Second connect is a no-op
        session.connect().await.unwrap();
        assert_eq!(hub.connection_count(), 1);

        session
            .invoke(&HubCommand::Seek(42.0), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(hub.calls(), vec![("Seek".to_string(), vec![json!(42.0)])]);

        hub.push_state(json!({
            "currentSongId": "a",
            "currentPosition": 1.0,
            "currentLength": 10.0,
            "nextSongId": null,
            "isPlaying": true,
            "lastUpdated": "2025-05-01T08:00:00Z"
        }));
        let event = events.recv().await.unwrap();
        assert!(matches!(event, ServerEvent::PlaybackState(state) if state.is_playing));
    }

    #[tokio::test]
    async fn test_remote_error_and_ack_timeout() {
        let hub = FakeHub::start();
        let session = session(&hub);
        session.connect().await.unwrap();

        hub.set_mode(AckMode::Error("not in a group".to_string()));
        let result = session
            .invoke(&HubCommand::PlayPause(false), Duration::from_secs(1))
            .await;
        assert_eq!(
            result,
            Err(SyncError::remote("PlayPause", "not in a group"))
        );

        hub.set_mode(AckMode::Silent);
        let result = session
            .invoke(&HubCommand::GetPlaybackState, Duration::from_millis(50))
            .await;
        assert!(matches!(
            result,
            Err(SyncError::RemoteCommandFailure { ref command, .. }) if command == "GetPlaybackState"
        ));
        assert!(session.inner.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn test_reconnects_with_fresh_token_and_clears_group() {
        let hub = FakeHub::start();
        let tokens = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&tokens);
        let resolver = move || Some(format!("t{}", counter.fetch_add(1, Ordering::SeqCst)));
        let session = HubSession::new(hub.connector(), Arc::new(resolver), &test_settings());
        let mut lifecycle = session.lifecycle();

        session.connect().await.unwrap();
        session.set_current_group(Some(GroupId::from("g")));
        assert_eq!(lifecycle.recv().await.unwrap(), LifecycleEvent::Connected);

        hub.drop_connection();
        assert!(matches!(
            lifecycle.recv().await.unwrap(),
            LifecycleEvent::Reconnecting { attempt: 1, .. }
        ));
        assert_eq!(lifecycle.recv().await.unwrap(), LifecycleEvent::Reconnected);

        assert!(session.is_ready());
        assert_eq!(session.current_group(), None);
        assert_eq!(hub.tokens(), vec!["t0".to_string(), "t1".to_string()]);
        // No implicit rejoin
        assert!(hub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_gives_up_after_schedule() {
        let hub = FakeHub::start();
        let session = session(&hub);
        let mut lifecycle = session.lifecycle();
        session.connect().await.unwrap();
        lifecycle.recv().await.unwrap();

        hub.refuse_connections(true);
        hub.drop_connection();
        loop {
            match lifecycle.recv().await.unwrap() {
                LifecycleEvent::Reconnecting { .. } => continue,
                LifecycleEvent::Closed { error } => {
                    assert!(error.is_some());
                    break;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(
            session
                .invoke(&HubCommand::LeavePlaylist, Duration::from_secs(1))
                .await,
            Err(SyncError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_commands_fail_fast_while_reconnecting() {
        let hub = FakeHub::start();
        let settings = ReconnectSettings {
            delays_ms: vec![0, 10_000],
            ..test_settings()
        };
        let session = HubSession::new(
            hub.connector(),
            Arc::new(StaticToken("token-1".to_string())),
            &settings,
        );
        let mut lifecycle = session.lifecycle();
        session.connect().await.unwrap();
        lifecycle.recv().await.unwrap();

        hub.refuse_connections(true);
        hub.drop_connection();
        // First attempt fails at once; the second waits ten seconds
        loop {
            match lifecycle.recv().await.unwrap() {
                LifecycleEvent::Reconnecting { attempt: 2, .. } => break,
                LifecycleEvent::Reconnecting { .. } => continue,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(session.state(), ConnectionState::Reconnecting);
        assert!(!session.is_ready());

        let result = timeout(
            Duration::from_millis(200),
            session.invoke(&HubCommand::PlayPause(true), Duration::from_secs(5)),
        )
        .await
        .expect("invoke waited instead of failing");
        assert_eq!(result, Err(SyncError::NotConnected));
        assert!(hub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unterminated_flood_drops_transport() {
        let hub = FakeHub::start();
        let session = session(&hub);
        let mut lifecycle = session.lifecycle();
        session.connect().await.unwrap();
        lifecycle.recv().await.unwrap();

        hub.send_raw(&"x".repeat(MAX_PENDING_RECORD + 1));
        assert!(matches!(
            lifecycle.recv().await.unwrap(),
            LifecycleEvent::Reconnecting { attempt: 1, .. }
        ));
        assert_eq!(lifecycle.recv().await.unwrap(), LifecycleEvent::Reconnected);
        assert_eq!(hub.connection_count(), 2);
    }

    #[tokio::test]
    async fn test_server_close_without_reconnect() {
        let hub = FakeHub::start();
        let session = session(&hub);
        let mut lifecycle = session.lifecycle();
        session.connect().await.unwrap();
        lifecycle.recv().await.unwrap();

        hub.send_raw("{\"type\":7,\"error\":\"bye\"}\u{1e}");
        assert_eq!(
            lifecycle.recv().await.unwrap(),
            LifecycleEvent::Closed {
                error: Some("bye".to_string())
            }
        );
        assert_eq!(hub.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let hub = FakeHub::start();
        let session = session(&hub);
        let mut lifecycle = session.lifecycle();
        session.connect().await.unwrap();
        session.set_current_group(Some(GroupId::from("g")));
        lifecycle.recv().await.unwrap();

        session.disconnect().await;
        session.disconnect().await;
        assert_eq!(
            lifecycle.recv().await.unwrap(),
            LifecycleEvent::Closed { error: None }
        );
        assert!(lifecycle.try_recv().is_err());
        assert_eq!(session.current_group(), None);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }
}
