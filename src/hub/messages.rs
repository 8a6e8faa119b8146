//! Typed hub schema
//!
//! Server pushes are decoded strictly: unknown targets, unknown fields,
//! wrong arity or out-of-range values are rejected instead of guessed at.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ProtocolError;
use crate::sync::{GroupId, PlaybackState, TrackId};
use crate::utils::parse_timestamp;

pub const TARGET_PLAYBACK_STATE: &str = "PlaybackState";
pub const TARGET_RECEIVE_REACTION: &str = "ReceiveReaction";

/// Emoji reactions listeners can send to the group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReactionKind {
    Heart,
    Fire,
    Laughing,
    Crying,
    StarEyes,
    Clapping,
    ThumbsUp,
    PartyPopper,
    MusicalNote,
    Rocket,
}

impl ReactionKind {
    pub fn all() -> [Self; 10] {
        [
            Self::Heart,
            Self::Fire,
            Self::Laughing,
            Self::Crying,
            Self::StarEyes,
            Self::Clapping,
            Self::ThumbsUp,
            Self::PartyPopper,
            Self::MusicalNote,
            Self::Rocket,
        ]
    }

    /// Wire code
    pub fn code(self) -> u8 {
        match self {
            Self::Heart => 0,
            Self::Fire => 1,
            Self::Laughing => 2,
            Self::Crying => 3,
            Self::StarEyes => 4,
            Self::Clapping => 5,
            Self::ThumbsUp => 6,
            Self::PartyPopper => 7,
            Self::MusicalNote => 8,
            Self::Rocket => 9,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::all().into_iter().find(|kind| kind.code() == code)
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Self::Heart => "❤️",
            Self::Fire => "🔥",
            Self::Laughing => "😂",
            Self::Crying => "😭",
            Self::StarEyes => "🤩",
            Self::Clapping => "👏",
            Self::ThumbsUp => "👍",
            Self::PartyPopper => "🎉",
            Self::MusicalNote => "🎵",
            Self::Rocket => "🚀",
        }
    }
}

/// A reaction broadcast by the hub
#[derive(Debug, Clone, PartialEq)]
pub struct Reaction {
    pub user_id: Option<String>,
    pub track: Option<TrackId>,
    pub kind: ReactionKind,
    pub timestamp: DateTime<Utc>,
}

/// Validated server push
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    PlaybackState(PlaybackState),
    Reaction(Reaction),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct WirePlaybackState {
    #[serde(default)]
    current_song_id: Option<String>,
    current_position: f64,
    current_length: f64,
    #[serde(default)]
    next_song_id: Option<String>,
    is_playing: bool,
    last_updated: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct WireReaction {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    song_id: Option<String>,
    reaction: u8,
    timestamp: String,
}

impl ServerEvent {
    /// Decode a server-to-client invocation
    pub fn decode(target: &str, arguments: Vec<Value>) -> Result<Self, ProtocolError> {
        match target {
            TARGET_PLAYBACK_STATE => {
                let wire: WirePlaybackState = serde_json::from_value(single(target, arguments)?)?;
                validate_playback_state(wire).map(Self::PlaybackState)
            }
            TARGET_RECEIVE_REACTION => {
                let wire: WireReaction = serde_json::from_value(single(target, arguments)?)?;
                validate_reaction(wire).map(Self::Reaction)
            }
            other => Err(ProtocolError::UnknownTarget(other.to_string())),
        }
    }
}

fn single(target: &str, arguments: Vec<Value>) -> Result<Value, ProtocolError> {
    let got = arguments.len();
    let mut arguments = arguments.into_iter();
    match (arguments.next(), got) {
        (Some(value), 1) => Ok(value),
        _ => Err(ProtocolError::Arity {
            target: target.to_string(),
            expected: 1,
            got,
        }),
    }
}

fn track_id(field: &'static str, raw: Option<String>) -> Result<Option<TrackId>, ProtocolError> {
    match raw {
        None => Ok(None),
        Some(id) if id.trim().is_empty() => Err(ProtocolError::invalid(field, "empty id")),
        Some(id) => Ok(Some(TrackId::new(id))),
    }
}

fn seconds(field: &'static str, value: f64) -> Result<f64, ProtocolError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ProtocolError::invalid(field, format!("{value} is not a valid time")));
    }
    Ok(value)
}

fn timestamp(field: &'static str, raw: &str) -> Result<DateTime<Utc>, ProtocolError> {
    parse_timestamp(raw).ok_or_else(|| ProtocolError::invalid(field, format!("unparsable `{raw}`")))
}

fn validate_playback_state(wire: WirePlaybackState) -> Result<PlaybackState, ProtocolError> {
    let length = seconds("currentLength", wire.current_length)?;
    let mut position = seconds("currentPosition", wire.current_position)?;
    if length > 0.0 && position > length {
        tracing::warn!(
            "Pushed position {:.2}s exceeds length {:.2}s, clamping",
            position,
            length
        );
        position = length;
    }

    Ok(PlaybackState {
        current_track: track_id("currentSongId", wire.current_song_id)?,
        position,
        length,
        next_track: track_id("nextSongId", wire.next_song_id)?,
        is_playing: wire.is_playing,
        last_updated: timestamp("lastUpdated", &wire.last_updated)?,
    })
}

fn validate_reaction(wire: WireReaction) -> Result<Reaction, ProtocolError> {
    let kind = ReactionKind::from_code(wire.reaction)
        .ok_or_else(|| ProtocolError::invalid("reaction", format!("unknown code {}", wire.reaction)))?;
    Ok(Reaction {
        user_id: wire.user_id,
        track: track_id("songId", wire.song_id)?,
        kind,
        timestamp: timestamp("timestamp", &wire.timestamp)?,
    })
}

/// Client-to-server hub methods
#[derive(Debug, Clone, PartialEq)]
pub enum HubCommand {
    JoinPlaylist(GroupId),
    LeavePlaylist,
    /// `None` asks the hub to advance to its next track
    PlaySong(Option<TrackId>),
    PlayPause(bool),
    Seek(f64),
    GetPlaybackState,
    SendReaction(ReactionKind),
}

impl HubCommand {
    /// Hub method name
    pub fn target(&self) -> &'static str {
        match self {
            Self::JoinPlaylist(_) => "JoinPlaylist",
            Self::LeavePlaylist => "LeavePlaylist",
            Self::PlaySong(_) => "PlaySong",
            Self::PlayPause(_) => "PlayPause",
            Self::Seek(_) => "Seek",
            Self::GetPlaybackState => "GetPlaybackState",
            Self::SendReaction(_) => "SendReaction",
        }
    }

    pub fn arguments(&self) -> Vec<Value> {
        match self {
            Self::JoinPlaylist(group) => vec![json!(group.as_str())],
            Self::LeavePlaylist | Self::GetPlaybackState => Vec::new(),
            Self::PlaySong(track) => vec![json!(track.as_ref().map(TrackId::as_str))],
            Self::PlayPause(playing) => vec![json!(playing)],
            Self::Seek(seconds) => vec![json!(seconds)],
            Self::SendReaction(kind) => vec![json!(kind.code())],
        }
    }
}
