//! Group playback state and its reconciliation with local audio

mod state;
mod synchronizer;

pub use state::{
    GroupId, LocalPlaybackIntent, PlaybackState, PlayerView, SyncPhase, TrackId,
};
pub use synchronizer::{
    CommandReply, Effect, PlayerCommand, SyncConfig, SyncMessage, Synchronizer,
};
