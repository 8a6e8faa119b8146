//! Audio driver events
//!
//! Drivers report asynchronous outcomes (a load finishing, a track ending)
//! on an unbounded channel drained by the synchronizer.

use crate::sync::TrackId;

/// Events emitted by an audio driver
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    /// Source for load `generation` is decoded and positioned at 0, paused
    Ready {
        generation: u64,
        track: TrackId,
        /// Decoder-reported length, when known
        duration: Option<f64>,
    },
    /// Source for load `generation` could not be fetched or decoded
    LoadFailed {
        generation: u64,
        track: TrackId,
        error: String,
    },
    /// Output refused to start
    PlayFailed { error: String },
    /// Secondary slot filled
    Preloaded { track: TrackId },
    PreloadFailed { track: TrackId, error: String },
    /// Source of load `generation` reached its end
    Finished { generation: u64 },
    /// No output device; the driver stays silent
    OutputUnavailable { error: String },
}

/// Sender for audio events (held by the driver)
pub type AudioEventSender = tokio::sync::mpsc::UnboundedSender<AudioEvent>;

/// Receiver for audio events (held by the synchronizer task)
pub type AudioEventReceiver = tokio::sync::mpsc::UnboundedReceiver<AudioEvent>;

/// Create a new audio event channel
pub fn audio_event_channel() -> (AudioEventSender, AudioEventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}
