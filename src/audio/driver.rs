use crate::sync::TrackId;

/// Local playback resource
///
/// Only the synchronizer calls these. Controls are fire-and-forget:
/// `play`, `pause` and `seek_to` do nothing while no source is ready, and
/// `load_track` always replaces the source. Outcomes come back as
/// [`AudioEvent`](super::AudioEvent)s.
pub trait AudioDriver: Send + 'static {
    fn play(&mut self);

    fn pause(&mut self);

    /// Seconds from the start of the current source
    fn seek_to(&mut self, position: f64);

    /// Seconds into the current source, 0 when nothing is ready
    fn current_position(&self) -> f64;

    /// Replace the source, returning the load generation that its
    /// `Ready`/`LoadFailed` event will carry
    fn load_track(&mut self, track: &TrackId) -> u64;

    /// Fetch and decode a track into the secondary slot
    fn preload_track(&mut self, track: &TrackId);

    /// 0.0 to 1.0
    fn set_volume(&mut self, volume: f32);

    fn is_ready(&self) -> bool;

    /// Periodic housekeeping (end-of-track detection)
    fn tick(&mut self) {}
}
