//! Playback domain types shared by the hub, synchronizer and audio driver

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::TrackInfo;

/// Server-side identifier of a track (song)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of a shared playback group (a playlist session)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Authoritative playback snapshot pushed by the hub
///
/// Replaced wholesale on every push. `current_track == None` is the hub's
/// request to start the first queued track.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub current_track: Option<TrackId>,
    /// Seconds into the current track
    pub position: f64,
    /// Track length in seconds, 0 when unknown
    pub length: f64,
    pub next_track: Option<TrackId>,
    pub is_playing: bool,
    pub last_updated: DateTime<Utc>,
}

/// Synchronizer phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    /// Not in a group
    #[default]
    Idle,
    /// Joined, no push received yet
    AwaitingFirstState,
    /// Following pushed state
    Synced,
    /// User is dragging the position slider
    Seeking,
}

/// Client intents sent but not yet acknowledged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalPlaybackIntent {
    pub toggle_to: Option<bool>,
    pub seek_target: Option<f64>,
    pub track_to_play: Option<TrackId>,
}

impl LocalPlaybackIntent {
    pub fn is_empty(&self) -> bool {
        self.toggle_to.is_none() && self.seek_target.is_none() && self.track_to_play.is_none()
    }
}

/// What a player bar needs to render
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerView {
    pub phase: SyncPhase,
    pub group: Option<GroupId>,
    pub track: Option<TrackId>,
    pub track_info: Option<TrackInfo>,
    pub next_track: Option<TrackId>,
    /// Visible position; follows the slider while seeking
    pub position: f64,
    pub duration: f64,
    pub is_playing: bool,
    /// A track change is waiting for its audio to become ready
    pub is_loading: bool,
    pub intent: LocalPlaybackIntent,
}
