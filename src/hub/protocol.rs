//! SignalR JSON hub protocol framing
//!
//! Every record is a JSON document terminated by the ASCII record
//! separator (0x1E). A transport message may carry several records, and in
//! principle a record may span transport messages, so inbound text goes
//! through [`FrameBuffer`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

pub const RECORD_SEPARATOR: char = '\u{1e}';

const TYPE_INVOCATION: u64 = 1;
const TYPE_STREAM_ITEM: u64 = 2;
const TYPE_COMPLETION: u64 = 3;
const TYPE_PING: u64 = 6;
const TYPE_CLOSE: u64 = 7;

/// First record sent by the client on a fresh transport
#[derive(Debug, Serialize)]
pub struct HandshakeRequest {
    pub protocol: &'static str,
    pub version: u32,
}

impl Default for HandshakeRequest {
    fn default() -> Self {
        Self {
            protocol: "json",
            version: 1,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HandshakeResponse {
    #[serde(default)]
    error: Option<String>,
}

/// Check the server's handshake record
pub fn check_handshake(record: &str) -> Result<(), ProtocolError> {
    let response: HandshakeResponse = serde_json::from_str(record)?;
    match response.error {
        Some(error) => Err(ProtocolError::Handshake(error)),
        None => Ok(()),
    }
}

/// Client-to-server invocation expecting a completion
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest<'a> {
    #[serde(rename = "type")]
    kind: u64,
    invocation_id: &'a str,
    target: &'a str,
    arguments: &'a [Value],
}

impl<'a> InvocationRequest<'a> {
    pub fn new(invocation_id: &'a str, target: &'a str, arguments: &'a [Value]) -> Self {
        Self {
            kind: TYPE_INVOCATION,
            invocation_id,
            target,
            arguments,
        }
    }
}

/// Keep-alive record
#[derive(Debug, Serialize)]
pub struct PingRecord {
    #[serde(rename = "type")]
    kind: u64,
}

impl Default for PingRecord {
    fn default() -> Self {
        Self { kind: TYPE_PING }
    }
}

/// Inbound hub records the session acts on
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Server-to-client method call (pushes arrive this way)
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    /// Result of a client invocation
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// Valid record of a type this client does not use
    Other(u64),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInvocation {
    #[serde(default)]
    invocation_id: Option<String>,
    target: String,
    #[serde(default)]
    arguments: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCompletion {
    invocation_id: String,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClose {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: Option<bool>,
}

impl HubMessage {
    /// Decode one record (without its separator)
    pub fn parse(record: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(record)?;
        let kind = value
            .get("type")
            .and_then(Value::as_u64)
            .ok_or_else(|| ProtocolError::invalid("type", "missing message type"))?;

        let message = match kind {
            TYPE_INVOCATION => {
                let raw: RawInvocation = serde_json::from_value(value)?;
                Self::Invocation {
                    invocation_id: raw.invocation_id,
                    target: raw.target,
                    arguments: raw.arguments,
                }
            }
            TYPE_COMPLETION => {
                let raw: RawCompletion = serde_json::from_value(value)?;
                Self::Completion {
                    invocation_id: raw.invocation_id,
                    result: raw.result,
                    error: raw.error,
                }
            }
            TYPE_PING => Self::Ping,
            TYPE_CLOSE => {
                let raw: RawClose = serde_json::from_value(value)?;
                Self::Close {
                    error: raw.error,
                    allow_reconnect: raw.allow_reconnect.unwrap_or(false),
                }
            }
            TYPE_STREAM_ITEM => Self::Other(kind),
            other => Self::Other(other),
        };
        Ok(message)
    }
}

/// Serialize a record and append the separator
pub fn encode<T: Serialize>(record: &T) -> Result<String, ProtocolError> {
    let mut text = serde_json::to_string(record)?;
    text.push(RECORD_SEPARATOR);
    Ok(text)
}

/// Upper bound for text still waiting for its record separator
pub const MAX_PENDING_RECORD: usize = 1 << 20;

/// Accumulates transport text and yields complete records
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: String,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append transport text, returning every record it completes
    ///
    /// Fails once an unterminated record grows past [`MAX_PENDING_RECORD`];
    /// the buffer is emptied and the transport should be dropped.
    pub fn push(&mut self, text: &str) -> Result<Vec<String>, ProtocolError> {
        self.pending.push_str(text);

        let Some(last_sep) = self.pending.rfind(RECORD_SEPARATOR) else {
            return self.check_pending().map(|()| Vec::new());
        };
        let rest = self.pending.split_off(last_sep + RECORD_SEPARATOR.len_utf8());
        let complete = std::mem::replace(&mut self.pending, rest);
        self.check_pending()?;

        Ok(complete
            .split(RECORD_SEPARATOR)
            .filter(|record| !record.trim().is_empty())
            .map(str::to_owned)
            .collect())
    }

    fn check_pending(&mut self) -> Result<(), ProtocolError> {
        if self.pending.len() > MAX_PENDING_RECORD {
            self.pending = String::new();
            return Err(ProtocolError::Oversized(MAX_PENDING_RECORD));
        }
        Ok(())
    }

    /// Bytes of an unfinished record waiting for more text
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
