//! Non-blocking handle to the audio thread
//!
//! `RodioDriver` implements [`AudioDriver`] by sending commands to the
//! audio thread and returning immediately. Position and readiness are read
//! from `SharedOutputState` without waiting for the thread.

use std::time::Instant;

use super::driver::AudioDriver;
use super::thread::{AudioCommand, AudioCommandSender, SharedOutputState};
use crate::sync::TrackId;

pub struct RodioDriver {
    command_tx: AudioCommandSender,
    state: SharedOutputState,
    generation: u64,
}

impl std::fmt::Debug for RodioDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RodioDriver")
            .field("generation", &self.generation)
            .field("state", &self.state)
            .finish()
    }
}

impl RodioDriver {
    pub(super) fn new(command_tx: AudioCommandSender, state: SharedOutputState) -> Self {
        Self {
            command_tx,
            state,
            generation: 0,
        }
    }
}

impl AudioDriver for RodioDriver {
    fn play(&mut self) {
        if self.state.is_ready() {
            self.state.set_playing(true, Instant::now());
            let _ = self.command_tx.send(AudioCommand::Play);
        }
    }

    fn pause(&mut self) {
        if self.state.is_ready() {
            self.state.set_playing(false, Instant::now());
            let _ = self.command_tx.send(AudioCommand::Pause);
        }
    }

    fn seek_to(&mut self, position: f64) {
        if self.state.is_ready() {
            // Reflect the target at once so reads don't bounce back while
            // the thread is busy
            self.state.set_position(position.max(0.0), Instant::now());
            let _ = self
                .command_tx
                .send(AudioCommand::Seek { position: position.max(0.0) });
        }
    }

    fn current_position(&self) -> f64 {
        self.state.position()
    }

    fn load_track(&mut self, track: &TrackId) -> u64 {
        self.generation += 1;
        self.state.reset(self.generation);
        let _ = self.command_tx.send(AudioCommand::Load {
            track: track.clone(),
            generation: self.generation,
        });
        self.generation
    }

    fn preload_track(&mut self, track: &TrackId) {
        let _ = self.command_tx.send(AudioCommand::Preload {
            track: track.clone(),
        });
    }

    fn set_volume(&mut self, volume: f32) {
        let _ = self.command_tx.send(AudioCommand::SetVolume {
            volume: volume.clamp(0.0, 1.0),
        });
    }

    fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    fn tick(&mut self) {
        let _ = self.command_tx.send(AudioCommand::Tick);
    }
}

impl Drop for RodioDriver {
    fn drop(&mut self) {
        let _ = self.command_tx.send(AudioCommand::Shutdown);
    }
}
