//! playsync - keeps local audio in step with a server-driven group
//! playback session
//!
//! The hub owns the canonical playback state of a group and pushes it to
//! every member. [`PlaybackController`] applies those pushes to a local
//! [`audio::AudioDriver`] and forwards user commands to the hub; it never
//! changes shared state on its own.

pub mod api;
pub mod audio;
pub mod auth;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod settings;
pub mod sync;
pub mod utils;

pub use controller::PlaybackController;
pub use dispatcher::CommandDispatcher;
pub use error::{ProtocolError, SyncError, SyncResult};
pub use settings::Settings;
