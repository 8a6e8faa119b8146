//! Silent audio driver
//!
//! Models a playback timeline with a monotonic clock instead of producing
//! sound. Loads become ready immediately; track lengths are only known for
//! tracks registered with [`ClockDriver::set_duration`].

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tracing::debug;

use super::driver::AudioDriver;
use super::events::{AudioEvent, AudioEventSender};
use crate::sync::TrackId;

#[derive(Debug, Default)]
struct Timeline {
    /// Position at the last play/pause/seek
    anchor_position: f64,
    /// Set while playing
    playing_since: Option<Instant>,
    duration: Option<f64>,
    finished: bool,
}

impl Timeline {
    fn position(&self) -> f64 {
        let elapsed = self
            .playing_since
            .map(|since| since.elapsed().as_secs_f64())
            .unwrap_or_default();
        let position = self.anchor_position + elapsed;
        match self.duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }

    fn freeze(&mut self) {
        self.anchor_position = self.position();
        self.playing_since = None;
    }
}

#[derive(Debug)]
pub struct ClockDriver {
    events: AudioEventSender,
    generation: u64,
    current: Option<(TrackId, Timeline)>,
    durations: HashMap<TrackId, f64>,
    preloaded: HashSet<TrackId>,
    volume: f32,
}

impl ClockDriver {
    pub fn new(events: AudioEventSender) -> Self {
        Self {
            events,
            generation: 0,
            current: None,
            durations: HashMap::new(),
            preloaded: HashSet::new(),
            volume: 1.0,
        }
    }

    /// Known length of a track, used for end-of-track detection
    pub fn set_duration(&mut self, track: TrackId, seconds: f64) {
        if seconds.is_finite() && seconds > 0.0 {
            self.durations.insert(track, seconds);
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_playing(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|(_, timeline)| timeline.playing_since.is_some())
    }
}

impl AudioDriver for ClockDriver {
    fn play(&mut self) {
        if let Some((_, timeline)) = self.current.as_mut() {
            if timeline.playing_since.is_none() && !timeline.finished {
                timeline.playing_since = Some(Instant::now());
            }
        }
    }

    fn pause(&mut self) {
        if let Some((_, timeline)) = self.current.as_mut() {
            timeline.freeze();
        }
    }

    fn seek_to(&mut self, position: f64) {
        if let Some((_, timeline)) = self.current.as_mut() {
            let playing = timeline.playing_since.is_some();
            timeline.anchor_position = match timeline.duration {
                Some(duration) => position.clamp(0.0, duration),
                None => position.max(0.0),
            };
            timeline.playing_since = playing.then(Instant::now);
            timeline.finished = false;
        }
    }

    fn current_position(&self) -> f64 {
        self.current
            .as_ref()
            .map(|(_, timeline)| timeline.position())
            .unwrap_or_default()
    }

    fn load_track(&mut self, track: &TrackId) -> u64 {
        self.generation += 1;
        if self.preloaded.remove(track) {
            debug!("Promoting preloaded track {}", track);
        }

        let duration = self.durations.get(track).copied();
        self.current = Some((
            track.clone(),
            Timeline {
                duration,
                ..Timeline::default()
            },
        ));
        let _ = self.events.send(AudioEvent::Ready {
            generation: self.generation,
            track: track.clone(),
            duration,
        });
        self.generation
    }

    fn preload_track(&mut self, track: &TrackId) {
        self.preloaded.clear();
        self.preloaded.insert(track.clone());
        let _ = self.events.send(AudioEvent::Preloaded {
            track: track.clone(),
        });
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn is_ready(&self) -> bool {
        self.current.is_some()
    }

    fn tick(&mut self) {
        let generation = self.generation;
        let Some((track, timeline)) = self.current.as_mut() else {
            return;
        };
        let Some(duration) = timeline.duration else {
            return;
        };
        if !timeline.finished && timeline.position() >= duration {
            timeline.freeze();
            timeline.finished = true;
            debug!("Track {} reached its end", track);
            let _ = self.events.send(AudioEvent::Finished { generation });
        }
    }
}
