//! Hub transports
//!
//! A [`Connector`] turns a bearer token into a pair of text channels. The
//! session above it only ever sees whole transport messages as `String`s;
//! framing and the SignalR handshake are handled by the session.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tracing::{debug, trace, warn};

use crate::error::{SyncError, SyncResult};
use crate::settings::EndpointSettings;

const NEGOTIATE_TIMEOUT: u64 = 15;
/// Oversized transport messages are dropped instead of buffered
const MAX_MESSAGE_SIZE: usize = 1 << 20;

/// Text channels of one established transport
///
/// Dropping `outbound` closes the transport; `inbound` yielding `None`
/// means the remote side went away.
#[derive(Debug)]
pub struct FrameChannel {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Opens transports to the playback hub
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, token: String) -> BoxFuture<'static, SyncResult<FrameChannel>>;
}

/// Negotiate response of the hub
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NegotiateResponse {
    #[serde(default)]
    connection_token: Option<String>,
    #[serde(default)]
    connection_id: Option<String>,
    /// Redirect to another hub endpoint
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// WebSocket transport with the optional negotiate round trip
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    hub_url: String,
    skip_negotiation: bool,
    http: reqwest::Client,
}

impl WebSocketConnector {
    pub fn new(endpoints: &EndpointSettings) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(NEGOTIATE_TIMEOUT))
            .build()
            .map_err(|e| SyncError::ConnectionError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            hub_url: endpoints.hub_url.trim_end_matches('/').to_string(),
            skip_negotiation: endpoints.skip_negotiation,
            http,
        })
    }

    async fn negotiate(&self, hub_url: &str, token: &str) -> SyncResult<NegotiateResponse> {
        let url = format!("{}/negotiate?negotiateVersion=1", hub_url.trim_end_matches('/'));
        debug!("Negotiating with {}", url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SyncError::ConnectionError(format!("negotiate failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SyncError::ConnectionError(format!(
                "hub rejected credentials ({status})"
            )));
        }
        if !status.is_success() {
            return Err(SyncError::ConnectionError(format!("negotiate returned {status}")));
        }

        let negotiated: NegotiateResponse = response
            .json()
            .await
            .map_err(|e| SyncError::ConnectionError(format!("invalid negotiate response: {e}")))?;
        if let Some(error) = negotiated.error {
            return Err(SyncError::ConnectionError(error));
        }
        Ok(negotiated)
    }

    /// Resolve the WebSocket URL and the token to present on it
    async fn resolve(&self, token: String) -> SyncResult<(String, String)> {
        if self.skip_negotiation {
            return Ok((socket_url(&self.hub_url, None, &token), token));
        }

        let mut hub_url = self.hub_url.clone();
        let mut token = token;
        // Redirects may chain, but not forever
        for _ in 0..10 {
            let negotiated = self.negotiate(&hub_url, &token).await?;
            match negotiated.url {
                Some(redirect) => {
                    debug!("Hub redirected negotiation to {}", redirect);
                    hub_url = redirect;
                    if let Some(access_token) = negotiated.access_token {
                        token = access_token;
                    }
                }
                None => {
                    let id = negotiated.connection_token.or(negotiated.connection_id);
                    return Ok((socket_url(&hub_url, id.as_deref(), &token), token));
                }
            }
        }
        Err(SyncError::ConnectionError("too many negotiate redirects".to_string()))
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, token: String) -> BoxFuture<'static, SyncResult<FrameChannel>> {
        let connector = self.clone();
        async move {
            let (url, token) = connector.resolve(token).await?;
            open_socket(&url, &token).await
        }
        .boxed()
    }
}

/// `{hub}?id=<connection>&access_token=<token>` with a ws/wss scheme
fn socket_url(hub_url: &str, connection_id: Option<&str>, token: &str) -> String {
    let url = if let Some(rest) = hub_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = hub_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        hub_url.to_string()
    };

    let mut params = Vec::new();
    if let Some(id) = connection_id {
        params.push(format!("id={}", urlencoding::encode(id)));
    }
    params.push(format!("access_token={}", urlencoding::encode(token)));

    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, separator, params.join("&"))
}

async fn open_socket(url: &str, token: &str) -> SyncResult<FrameChannel> {
    let mut request = url
        .into_client_request()
        .map_err(|e| SyncError::ConnectionError(format!("invalid hub URL: {e}")))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| SyncError::ConnectionError(format!("invalid token: {e}")))?;
    request.headers_mut().insert(header::AUTHORIZATION, bearer);

    let (ws_stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| SyncError::ConnectionError(format!("websocket connect failed: {e}")))?;
    debug!("WebSocket open");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            trace!("hub <- {}", text);
            if let Err(e) = ws_tx.send(Message::Text(text)).await {
                warn!("WebSocket send failed: {}", e);
                return;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    tokio::spawn(async move {
        while let Some(message) = ws_rx.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        warn!("Ignoring non UTF-8 binary hub message");
                        continue;
                    }
                },
                Ok(Message::Close(frame)) => {
                    debug!("WebSocket closed by server: {:?}", frame);
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!("WebSocket receive failed: {}", e);
                    break;
                }
            };
            if text.len() > MAX_MESSAGE_SIZE {
                warn!("Ignoring oversized hub message ({} bytes)", text.len());
                continue;
            }
            trace!("hub -> {}", text);
            if inbound_tx.send(text).is_err() {
                break;
            }
        }
    });

    Ok(FrameChannel {
        outbound: outbound_tx,
        inbound: inbound_rx,
    })
}
