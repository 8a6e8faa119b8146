//! Playback hub client
//!
//! SignalR JSON protocol framing, the typed message schema, transports and
//! the reconnecting session built on them.

mod connection;
pub mod messages;
pub mod protocol;
mod session;

#[cfg(test)]
pub mod testing;

pub use connection::{Connector, FrameChannel, WebSocketConnector};
pub use messages::{HubCommand, Reaction, ReactionKind, ServerEvent};
pub use session::{ConnectionState, HubSession, LifecycleEvent, ReconnectPolicy};
