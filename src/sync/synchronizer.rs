//! Playback state synchronizer
//!
//! Decision core that reconciles hub pushes with the local audio driver.
//! It is synchronous: every input is a [`SyncMessage`], and anything that
//! has to wait (hub commands, metadata lookups, the seek deadline) comes
//! back as an [`Effect`] for the caller to run. Completions re-enter as
//! messages, so inputs are handled strictly in queue order.

use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::state::{
    GroupId, LocalPlaybackIntent, PlaybackState, PlayerView, SyncPhase, TrackId,
};
use crate::api::TrackInfo;
use crate::audio::{AudioDriver, AudioEvent};
use crate::error::{SyncError, SyncResult};
use crate::settings::SyncSettings;

/// Reply channel for a command issued on behalf of a caller
pub type CommandReply = oneshot::Sender<SyncResult<()>>;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Seconds of drift tolerated before a corrective seek
    pub drift_tolerance: f64,
    pub seek_timeout: Duration,
    /// Ask the hub to start the first queued track when it reports none
    pub auto_start_on_empty: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}

impl SyncConfig {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            drift_tolerance: settings.drift_tolerance_secs.max(0.0),
            seek_timeout: settings.seek_timeout(),
            auto_start_on_empty: settings.auto_start_on_empty,
        }
    }
}

/// Hub commands the synchronizer asks to have sent
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    PlayTrack(Option<TrackId>),
    SetPlayPause(bool),
    Seek { position: f64, ticket: u64 },
}

/// Inputs of the synchronizer
#[derive(Debug)]
pub enum SyncMessage {
    /// A join request is about to be sent
    Joining(GroupId),
    JoinFailed(GroupId),
    Left,
    /// Transport dropped or closed; group membership is gone
    ConnectionLost,
    /// Tracks of the joined group, in order
    QueueKnown(Vec<TrackId>),
    Push(PlaybackState),
    Audio(AudioEvent),
    Metadata {
        generation: u64,
        result: Result<TrackInfo, String>,
    },
    /// User command to forward to the hub
    Intent {
        command: PlayerCommand,
        reply: Option<CommandReply>,
    },
    /// Slider moved
    SeekGesture(f64),
    /// Slider released
    SeekReleased { reply: Option<CommandReply> },
    /// Slider released but the command cannot be sent
    SeekCancelled,
    CommandSettled {
        command: PlayerCommand,
        result: SyncResult<()>,
    },
    SeekTimedOut { ticket: u64 },
    SetVolume(f32),
    Tick,
}

/// Work the synchronizer hands back to its runner
#[derive(Debug)]
pub enum Effect {
    /// Send a hub command; report the outcome as `CommandSettled`
    Dispatch {
        command: PlayerCommand,
        reply: Option<CommandReply>,
    },
    /// Look up display metadata; report as `Metadata`
    FetchMetadata { track: TrackId, generation: u64 },
    /// Post `SeekTimedOut { ticket }` after the delay
    SeekDeadline { ticket: u64, after: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SeekGesture {
    position: f64,
    /// Set once released and the command is in flight
    ticket: Option<u64>,
}

pub struct Synchronizer<A: AudioDriver> {
    config: SyncConfig,
    audio: A,
    phase: SyncPhase,
    group: Option<GroupId>,
    queue: Vec<TrackId>,
    last_state: Option<PlaybackState>,
    /// Track whose source is loaded or loading
    loaded_track: Option<TrackId>,
    /// Generation of the latest load
    generation: Option<u64>,
    loading: bool,
    /// Play flag last applied to the driver
    applied_playing: Option<bool>,
    last_preloaded: Option<TrackId>,
    track_info: Option<TrackInfo>,
    decoder_duration: Option<f64>,
    seek: Option<SeekGesture>,
    next_ticket: u64,
    intent: LocalPlaybackIntent,
}

impl<A: AudioDriver> std::fmt::Debug for Synchronizer<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("phase", &self.phase)
            .field("group", &self.group)
            .field("loaded_track", &self.loaded_track)
            .field("generation", &self.generation)
            .field("loading", &self.loading)
            .finish_non_exhaustive()
    }
}

impl<A: AudioDriver> Synchronizer<A> {
    pub fn new(audio: A, config: SyncConfig) -> Self {
        Self {
            config,
            audio,
            phase: SyncPhase::Idle,
            group: None,
            queue: Vec::new(),
            last_state: None,
            loaded_track: None,
            generation: None,
            loading: false,
            applied_playing: None,
            last_preloaded: None,
            track_info: None,
            decoder_duration: None,
            seek: None,
            next_ticket: 0,
            intent: LocalPlaybackIntent::default(),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn audio(&self) -> &A {
        &self.audio
    }

    pub fn audio_mut(&mut self) -> &mut A {
        &mut self.audio
    }

    pub fn last_state(&self) -> Option<&PlaybackState> {
        self.last_state.as_ref()
    }

    pub fn update(&mut self, message: SyncMessage) -> Vec<Effect> {
        match message {
            SyncMessage::Joining(group) => {
                if self.phase != SyncPhase::Idle {
                    self.reset();
                }
                info!("Waiting for playback state of group {}", group);
                self.group = Some(group);
                self.phase = SyncPhase::AwaitingFirstState;
                Vec::new()
            }
            SyncMessage::JoinFailed(group) => {
                if self.group.as_ref() == Some(&group) {
                    self.reset();
                }
                Vec::new()
            }
            SyncMessage::Left | SyncMessage::ConnectionLost => {
                if self.phase != SyncPhase::Idle {
                    info!("Playback sync stopped");
                    self.reset();
                }
                Vec::new()
            }
            SyncMessage::QueueKnown(queue) => {
                self.queue = queue;
                Vec::new()
            }
            SyncMessage::Push(state) => self.apply_push(state),
            SyncMessage::Audio(event) => self.handle_audio(event),
            SyncMessage::Metadata { generation, result } => {
                if self.generation != Some(generation) {
                    debug!("Dropping metadata for superseded load #{}", generation);
                    return Vec::new();
                }
                match result {
                    Ok(info) => self.track_info = Some(info),
                    Err(e) => warn!("Track metadata unavailable: {}", e),
                }
                Vec::new()
            }
            SyncMessage::Intent { command, reply } => {
                match &command {
                    PlayerCommand::PlayTrack(track) => self.intent.track_to_play = track.clone(),
                    PlayerCommand::SetPlayPause(playing) => self.intent.toggle_to = Some(*playing),
                    PlayerCommand::Seek { position, .. } => self.intent.seek_target = Some(*position),
                }
                vec![Effect::Dispatch { command, reply }]
            }
            SyncMessage::SeekGesture(position) => {
                self.seek_gesture(position);
                Vec::new()
            }
            SyncMessage::SeekReleased { reply } => self.seek_released(reply),
            SyncMessage::SeekCancelled => {
                if self.phase == SyncPhase::Seeking {
                    self.exit_seeking(true);
                }
                Vec::new()
            }
            SyncMessage::CommandSettled { command, result } => {
                self.command_settled(command, result);
                Vec::new()
            }
            SyncMessage::SeekTimedOut { ticket } => {
                if self.seek.and_then(|seek| seek.ticket) == Some(ticket) {
                    warn!("Seek was not acknowledged in time");
                    self.intent.seek_target = None;
                    self.exit_seeking(true);
                }
                Vec::new()
            }
            SyncMessage::SetVolume(volume) => {
                if volume.is_finite() {
                    self.audio.set_volume(volume.clamp(0.0, 1.0));
                } else {
                    debug!("Ignoring volume {}", volume);
                }
                Vec::new()
            }
            SyncMessage::Tick => {
                self.audio.tick();
                Vec::new()
            }
        }
    }

    fn reset(&mut self) {
        if self.loaded_track.is_some() {
            self.audio.pause();
        }
        self.phase = SyncPhase::Idle;
        self.group = None;
        self.queue.clear();
        self.last_state = None;
        self.loaded_track = None;
        self.loading = false;
        self.applied_playing = None;
        self.last_preloaded = None;
        self.track_info = None;
        self.decoder_duration = None;
        self.seek = None;
        self.intent = LocalPlaybackIntent::default();
    }

    fn apply_push(&mut self, state: PlaybackState) -> Vec<Effect> {
        if self.phase == SyncPhase::Idle {
            debug!("Ignoring playback state outside a group");
            return Vec::new();
        }
        if self.phase == SyncPhase::AwaitingFirstState {
            self.phase = SyncPhase::Synced;
        }

        let mut effects = Vec::new();
        match &state.current_track {
            None => {
                if self.loaded_track.is_some() && self.applied_playing != Some(false) {
                    self.audio.pause();
                    self.applied_playing = Some(false);
                }
                if let Some(command) = self.auto_start() {
                    effects.push(Effect::Dispatch {
                        command,
                        reply: None,
                    });
                }
            }
            Some(track) if self.loaded_track.as_ref() != Some(track) => {
                effects.push(self.change_track(track));
            }
            Some(_) => {
                if !self.loading {
                    self.apply_play_flag(state.is_playing);
                    if self.phase != SyncPhase::Seeking {
                        self.reconcile_position(state.position);
                    }
                }
            }
        }

        if let Some(next) = &state.next_track {
            let fresh = self.last_preloaded.as_ref() != Some(next)
                && self.loaded_track.as_ref() != Some(next);
            if fresh {
                debug!("Preloading next track {}", next);
                self.audio.preload_track(next);
                self.last_preloaded = Some(next.clone());
            }
        }

        self.last_state = Some(state);
        effects
    }

    /// One play command for the first queued track, unless one is in flight
    fn auto_start(&mut self) -> Option<PlayerCommand> {
        if !self.config.auto_start_on_empty || self.intent.track_to_play.is_some() {
            return None;
        }
        let first = self.queue.first()?.clone();
        info!("No current track, starting {}", first);
        self.intent.track_to_play = Some(first.clone());
        Some(PlayerCommand::PlayTrack(Some(first)))
    }

    fn change_track(&mut self, track: &TrackId) -> Effect {
        info!("Track changed to {}", track);
        self.audio.pause();
        let generation = self.audio.load_track(track);

        self.generation = Some(generation);
        self.loading = true;
        self.loaded_track = Some(track.clone());
        self.applied_playing = None;
        self.track_info = None;
        self.decoder_duration = None;
        if self.last_preloaded.as_ref() == Some(track) {
            self.last_preloaded = None;
        }
        // A gesture or pending seek belongs to the previous track
        if self.seek.take().is_some() {
            debug!("Dropping seek on track change");
        }
        if self.phase == SyncPhase::Seeking {
            self.phase = SyncPhase::Synced;
        }
        self.intent.seek_target = None;

        Effect::FetchMetadata {
            track: track.clone(),
            generation,
        }
    }

    fn apply_play_flag(&mut self, playing: bool) {
        if self.applied_playing == Some(playing) {
            return;
        }
        if playing {
            self.audio.play();
        } else {
            self.audio.pause();
        }
        self.applied_playing = Some(playing);
    }

    fn reconcile_position(&mut self, pushed: f64) {
        if !self.audio.is_ready() {
            return;
        }
        let local = self.audio.current_position();
        if (local - pushed).abs() > self.config.drift_tolerance {
            debug!("Drifted {:.2}s from the group, seeking to {:.2}s", local - pushed, pushed);
            self.audio.seek_to(pushed);
        }
    }

    fn handle_audio(&mut self, event: AudioEvent) -> Vec<Effect> {
        match event {
            AudioEvent::Ready {
                generation,
                track,
                duration,
            } => {
                if !self.loading || self.generation != Some(generation) {
                    debug!("Discarding stale ready event for {} (#{})", track, generation);
                    return Vec::new();
                }
                self.loading = false;
                self.decoder_duration = duration;

                let pushed = self
                    .last_state
                    .as_ref()
                    .filter(|state| state.current_track.as_ref() == Some(&track))
                    .map(|state| (state.position, state.is_playing));
                if let Some((position, playing)) = pushed {
                    self.audio.seek_to(position);
                    self.apply_play_flag(playing);
                }
            }
            AudioEvent::LoadFailed {
                generation,
                track,
                error,
            } => {
                if self.generation == Some(generation) {
                    self.loading = false;
                    let failure = SyncError::ResourceLoadFailure {
                        track: track.to_string(),
                        reason: error,
                    };
                    warn!("{}", failure);
                }
            }
            AudioEvent::PlayFailed { error } => warn!("Playback did not start: {}", error),
            AudioEvent::Preloaded { track } => debug!("Preloaded {}", track),
            AudioEvent::PreloadFailed { track, error } => {
                warn!("Preloading {} failed: {}", track, error);
                if self.last_preloaded.as_ref() == Some(&track) {
                    self.last_preloaded = None;
                }
            }
            AudioEvent::Finished { generation } => {
                if self.generation != Some(generation) || self.loading {
                    return Vec::new();
                }
                self.applied_playing = None;
                let has_next = self
                    .last_state
                    .as_ref()
                    .is_some_and(|state| state.next_track.is_some());
                if has_next && self.intent.track_to_play.is_none() && self.phase == SyncPhase::Synced {
                    info!("Track finished, advancing");
                    return vec![Effect::Dispatch {
                        command: PlayerCommand::PlayTrack(None),
                        reply: None,
                    }];
                }
            }
            AudioEvent::OutputUnavailable { error } => {
                error!("Audio output unavailable: {}", error);
            }
        }
        Vec::new()
    }

    fn seek_gesture(&mut self, position: f64) {
        if !position.is_finite() {
            debug!("Ignoring seek to {}", position);
            return;
        }
        if !matches!(self.phase, SyncPhase::Synced | SyncPhase::Seeking) {
            return;
        }
        let duration = self.duration();
        let position = if duration > 0.0 {
            position.clamp(0.0, duration)
        } else {
            position.max(0.0)
        };
        self.phase = SyncPhase::Seeking;
        self.seek = Some(SeekGesture {
            position,
            ticket: None,
        });
    }

    fn seek_released(&mut self, reply: Option<CommandReply>) -> Vec<Effect> {
        let Some(seek) = self.seek.as_mut() else {
            if let Some(reply) = reply {
                let _ = reply.send(Ok(()));
            }
            return Vec::new();
        };

        let position = seek.position.floor();
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        seek.ticket = Some(ticket);
        self.intent.seek_target = Some(position);
        if !self.loading {
            self.audio.seek_to(position);
        }

        vec![
            Effect::Dispatch {
                command: PlayerCommand::Seek { position, ticket },
                reply,
            },
            Effect::SeekDeadline {
                ticket,
                after: self.config.seek_timeout,
            },
        ]
    }

    fn exit_seeking(&mut self, reconcile: bool) {
        self.seek = None;
        if self.phase == SyncPhase::Seeking {
            self.phase = SyncPhase::Synced;
        }
        if !reconcile || self.loading {
            return;
        }
        let pushed = self.last_state.as_ref().and_then(|state| {
            (state.current_track.is_some() && state.current_track == self.loaded_track)
                .then_some(state.position)
        });
        if let Some(position) = pushed {
            self.reconcile_position(position);
        }
    }

    fn command_settled(&mut self, command: PlayerCommand, result: SyncResult<()>) {
        if let Err(e) = &result {
            warn!("{:?} failed: {}", command, e);
        }
        match command {
            PlayerCommand::PlayTrack(track) => {
                if self.intent.track_to_play == track || track.is_none() {
                    self.intent.track_to_play = None;
                }
            }
            PlayerCommand::SetPlayPause(playing) => {
                if self.intent.toggle_to == Some(playing) {
                    self.intent.toggle_to = None;
                }
            }
            PlayerCommand::Seek { position, ticket } => {
                if self.intent.seek_target == Some(position) {
                    self.intent.seek_target = None;
                }
                if self.seek.and_then(|seek| seek.ticket) == Some(ticket) {
                    // After an accepted seek the next push carries the new
                    // position; the last one is already outdated
                    self.exit_seeking(result.is_err());
                }
            }
        }
    }

    /// Pushed length, then metadata, then decoder
    fn duration(&self) -> f64 {
        self.last_state
            .as_ref()
            .map(|state| state.length)
            .filter(|length| *length > 0.0)
            .or_else(|| self.track_info.as_ref().and_then(|info| info.duration))
            .or(self.decoder_duration)
            .unwrap_or_default()
    }

    pub fn view(&self) -> PlayerView {
        let position = match (self.seek, &self.last_state) {
            (Some(seek), _) => seek.position,
            _ if self.audio.is_ready() && !self.loading && self.loaded_track.is_some() => {
                self.audio.current_position()
            }
            (None, Some(state)) => state.position,
            (None, None) => 0.0,
        };

        PlayerView {
            phase: self.phase,
            group: self.group.clone(),
            track: self
                .last_state
                .as_ref()
                .and_then(|state| state.current_track.clone()),
            track_info: self.track_info.clone(),
            next_track: self
                .last_state
                .as_ref()
                .and_then(|state| state.next_track.clone()),
            position,
            duration: self.duration(),
            is_playing: self
                .last_state
                .as_ref()
                .is_some_and(|state| state.is_playing),
            is_loading: self.loading,
            intent: self.intent.clone(),
        }
    }
}
