//! Audio thread
//!
//! Runs rodio in a dedicated thread that owns the output stream and the
//! two sinks (current and preload slot). Downloads run on the tokio
//! runtime and report back through the command channel, so the thread
//! only ever blocks on `blocking_recv`.

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rodio::mixer::Mixer;
use rodio::{Decoder, OutputStreamBuilder, Sink, Source};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use super::events::{AudioEvent, AudioEventReceiver, AudioEventSender, audio_event_channel};
use super::handle::RodioDriver;
use crate::api::ApiClient;
use crate::sync::TrackId;

// ============ Commands (driver -> audio thread) ============

pub(super) enum AudioCommand {
    Load { track: TrackId, generation: u64 },
    /// Download for a `Load` finished
    Loaded {
        track: TrackId,
        generation: u64,
        result: Result<Vec<u8>, String>,
    },
    Preload { track: TrackId },
    /// Download for a `Preload` finished
    Preloaded {
        track: TrackId,
        result: Result<Vec<u8>, String>,
    },
    Play,
    Pause,
    Seek { position: f64 },
    SetVolume { volume: f32 },
    /// Periodic end-of-track check and position sync
    Tick,
    Shutdown,
}

impl fmt::Debug for AudioCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load { track, generation } => f
                .debug_struct("Load")
                .field("track", track)
                .field("generation", generation)
                .finish(),
            Self::Loaded {
                track,
                generation,
                result,
            } => f
                .debug_struct("Loaded")
                .field("track", track)
                .field("generation", generation)
                .field("bytes", &result.as_ref().map(Vec::len))
                .finish(),
            Self::Preload { track } => f.debug_struct("Preload").field("track", track).finish(),
            Self::Preloaded { track, result } => f
                .debug_struct("Preloaded")
                .field("track", track)
                .field("bytes", &result.as_ref().map(Vec::len))
                .finish(),
            Self::Play => write!(f, "Play"),
            Self::Pause => write!(f, "Pause"),
            Self::Seek { position } => f.debug_struct("Seek").field("position", position).finish(),
            Self::SetVolume { volume } => {
                f.debug_struct("SetVolume").field("volume", volume).finish()
            }
            Self::Tick => write!(f, "Tick"),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

pub(super) type AudioCommandSender = tokio::sync::mpsc::UnboundedSender<AudioCommand>;
type AudioCommandReceiver = tokio::sync::mpsc::UnboundedReceiver<AudioCommand>;

// ============ Shared State ============

#[derive(Debug)]
struct OutputInner {
    generation: u64,
    ready: bool,
    playing: bool,
    anchor_position: f64,
    anchor_at: Instant,
}

impl OutputInner {
    fn position_at(&self, now: Instant) -> f64 {
        if self.playing {
            self.anchor_position + now.saturating_duration_since(self.anchor_at).as_secs_f64()
        } else {
            self.anchor_position
        }
    }
}

/// Output state mirrored for non-blocking reads
#[derive(Clone)]
pub(super) struct SharedOutputState {
    inner: Arc<RwLock<OutputInner>>,
}

impl fmt::Debug for SharedOutputState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SharedOutputState")
            .field("generation", &inner.generation)
            .field("ready", &inner.ready)
            .field("playing", &inner.playing)
            .finish()
    }
}

impl SharedOutputState {
    fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(OutputInner {
                generation: 0,
                ready: false,
                playing: false,
                anchor_position: 0.0,
                anchor_at: Instant::now(),
            })),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.read().ready
    }

    pub fn position(&self) -> f64 {
        let inner = self.inner.read();
        if inner.ready {
            inner.position_at(Instant::now())
        } else {
            0.0
        }
    }

    /// New load requested: nothing is ready until it completes
    pub fn reset(&self, generation: u64) {
        let mut inner = self.inner.write();
        inner.generation = generation;
        inner.ready = false;
        inner.playing = false;
        inner.anchor_position = 0.0;
        inner.anchor_at = Instant::now();
    }

    fn mark_ready(&self, generation: u64) -> bool {
        let mut inner = self.inner.write();
        if inner.generation != generation {
            return false;
        }
        inner.ready = true;
        inner.anchor_position = 0.0;
        inner.anchor_at = Instant::now();
        true
    }

    pub fn set_playing(&self, playing: bool, now: Instant) {
        let mut inner = self.inner.write();
        inner.anchor_position = inner.position_at(now);
        inner.anchor_at = now;
        inner.playing = playing;
    }

    pub fn set_position(&self, position: f64, now: Instant) {
        let mut inner = self.inner.write();
        inner.anchor_position = position;
        inner.anchor_at = now;
    }

    fn set_stopped(&self) {
        let now = Instant::now();
        self.set_playing(false, now);
    }
}

// ============ Thread ============

struct LoadedSink {
    track: TrackId,
    sink: Sink,
    duration: Option<f64>,
}

struct OutputThread {
    mixer: Mixer,
    command_tx: AudioCommandSender,
    event_tx: AudioEventSender,
    state: SharedOutputState,
    api: ApiClient,
    runtime: Handle,
    volume: f32,
    /// Latest requested load
    generation: u64,
    current: Option<(u64, LoadedSink)>,
    preload: Option<LoadedSink>,
    pending_preload: Option<TrackId>,
    finished_sent: bool,
}

/// Spawn the audio thread
///
/// Audio bytes are fetched with `api` on `runtime`. The returned driver
/// shuts the thread down when dropped.
pub fn spawn_audio_thread(
    api: ApiClient,
    runtime: Handle,
    volume: f32,
) -> Result<(RodioDriver, AudioEventReceiver), String> {
    let (command_tx, command_rx) = tokio::sync::mpsc::unbounded_channel();
    let (event_tx, event_rx) = audio_event_channel();
    let state = SharedOutputState::new();

    let driver = RodioDriver::new(command_tx.clone(), state.clone());

    thread::Builder::new()
        .name("audio-output".to_string())
        .spawn(move || {
            let stream = match OutputStreamBuilder::open_default_stream() {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to open audio output: {}", e);
                    let _ = event_tx.send(AudioEvent::OutputUnavailable {
                        error: e.to_string(),
                    });
                    return;
                }
            };
            let output = OutputThread {
                mixer: stream.mixer().clone(),
                command_tx,
                event_tx,
                state,
                api,
                runtime,
                volume: volume.clamp(0.0, 1.0),
                generation: 0,
                current: None,
                preload: None,
                pending_preload: None,
                finished_sent: false,
            };
            output.run(command_rx);
            drop(stream);
        })
        .map_err(|e| format!("Failed to spawn audio thread: {}", e))?;

    Ok((driver, event_rx))
}

impl OutputThread {
    fn run(mut self, mut command_rx: AudioCommandReceiver) {
        info!("Audio thread started");
        while let Some(command) = command_rx.blocking_recv() {
            match command {
                AudioCommand::Load { track, generation } => self.load(track, generation),
                AudioCommand::Loaded {
                    track,
                    generation,
                    result,
                } => self.loaded(track, generation, result),
                AudioCommand::Preload { track } => self.preload(track),
                AudioCommand::Preloaded { track, result } => self.preloaded(track, result),
                AudioCommand::Play => {
                    if let Some((_, loaded)) = &self.current {
                        loaded.sink.play();
                    }
                }
                AudioCommand::Pause => {
                    if let Some((_, loaded)) = &self.current {
                        loaded.sink.pause();
                    }
                }
                AudioCommand::Seek { position } => {
                    if let Some((_, loaded)) = &self.current {
                        if let Err(e) = loaded.sink.try_seek(Duration::from_secs_f64(position)) {
                            warn!("Seek to {:.1}s failed: {}", position, e);
                        }
                        self.finished_sent = false;
                    }
                }
                AudioCommand::SetVolume { volume } => {
                    self.volume = volume;
                    if let Some((_, loaded)) = &self.current {
                        loaded.sink.set_volume(volume);
                    }
                    if let Some(slot) = &self.preload {
                        slot.sink.set_volume(volume);
                    }
                }
                AudioCommand::Tick => self.tick(),
                AudioCommand::Shutdown => break,
            }
        }
        info!("Audio thread stopped");
    }

    fn fetch<F>(&self, track: TrackId, reply: F)
    where
        F: FnOnce(TrackId, Result<Vec<u8>, String>) -> AudioCommand + Send + 'static,
    {
        let api = self.api.clone();
        let command_tx = self.command_tx.clone();
        self.runtime.spawn(async move {
            let result = api.fetch_audio(&track).await.map_err(|e| format!("{e:#}"));
            let _ = command_tx.send(reply(track, result));
        });
    }

    fn load(&mut self, track: TrackId, generation: u64) {
        self.generation = generation;
        self.finished_sent = false;
        if let Some((_, old)) = self.current.take() {
            old.sink.stop();
        }

        match self.preload.take_if(|slot| slot.track == track) {
            Some(slot) => {
                debug!("Promoting preloaded {}", track);
                self.install(generation, slot);
            }
            None => {
                debug!("Fetching {} for load #{}", track, generation);
                self.fetch(track, move |track, result| AudioCommand::Loaded {
                    track,
                    generation,
                    result,
                });
            }
        }
    }

    fn loaded(&mut self, track: TrackId, generation: u64, result: Result<Vec<u8>, String>) {
        if generation != self.generation {
            debug!("Discarding superseded load #{} of {}", generation, track);
            return;
        }
        let decoded = result.and_then(|bytes| decode(&self.mixer, bytes, self.volume));
        match decoded {
            Ok((sink, duration)) => self.install(
                generation,
                LoadedSink {
                    track,
                    sink,
                    duration,
                },
            ),
            Err(error) => {
                warn!("Loading {} failed: {}", track, error);
                let _ = self.event_tx.send(AudioEvent::LoadFailed {
                    generation,
                    track,
                    error,
                });
            }
        }
    }

    fn install(&mut self, generation: u64, loaded: LoadedSink) {
        loaded.sink.pause();
        let _ = loaded.sink.try_seek(Duration::ZERO);
        loaded.sink.set_volume(self.volume);
        if self.state.mark_ready(generation) {
            let _ = self.event_tx.send(AudioEvent::Ready {
                generation,
                track: loaded.track.clone(),
                duration: loaded.duration,
            });
        }
        self.current = Some((generation, loaded));
    }

    fn preload(&mut self, track: TrackId) {
        let already = self.preload.as_ref().is_some_and(|slot| slot.track == track)
            || self.pending_preload.as_ref() == Some(&track);
        if already {
            return;
        }
        self.pending_preload = Some(track.clone());
        self.fetch(track, |track, result| AudioCommand::Preloaded { track, result });
    }

    fn preloaded(&mut self, track: TrackId, result: Result<Vec<u8>, String>) {
        if self.pending_preload.as_ref() != Some(&track) {
            return;
        }
        self.pending_preload = None;

        match result.and_then(|bytes| decode(&self.mixer, bytes, self.volume)) {
            Ok((sink, duration)) => {
                if let Some(old) = self.preload.replace(LoadedSink {
                    track: track.clone(),
                    sink,
                    duration,
                }) {
                    old.sink.stop();
                }
                let _ = self.event_tx.send(AudioEvent::Preloaded { track });
            }
            Err(error) => {
                let _ = self.event_tx.send(AudioEvent::PreloadFailed { track, error });
            }
        }
    }

    fn tick(&mut self) {
        let Some((generation, loaded)) = &self.current else {
            return;
        };
        if loaded.sink.empty() {
            if !self.finished_sent {
                self.finished_sent = true;
                self.state.set_stopped();
                let _ = self.event_tx.send(AudioEvent::Finished {
                    generation: *generation,
                });
            }
            return;
        }
        self.state
            .set_position(loaded.sink.get_pos().as_secs_f64(), Instant::now());
    }
}

/// Decode a whole file into a paused sink
fn decode(mixer: &Mixer, bytes: Vec<u8>, volume: f32) -> Result<(Sink, Option<f64>), String> {
    let source =
        Decoder::new(Cursor::new(bytes)).map_err(|e| format!("Failed to decode audio: {}", e))?;
    let duration = source.total_duration().map(|d| d.as_secs_f64());

    let sink = Sink::connect_new(mixer);
    sink.append(source);
    sink.set_volume(volume);
    sink.pause();
    Ok((sink, duration))
}
