//! Local audio output
//!
//! - `AudioDriver`: the imperative controls the synchronizer drives
//! - `ClockDriver`: silent driver that only models the timeline
//! - `RodioDriver`: real output on a dedicated thread (`rodio-output` feature)
//! - `events`: asynchronous results reported back by drivers

mod clock;
mod driver;
pub mod events;
#[cfg(feature = "rodio-output")]
mod handle;
#[cfg(feature = "rodio-output")]
mod thread;

pub use clock::ClockDriver;
pub use driver::AudioDriver;
pub use events::{AudioEvent, AudioEventReceiver, AudioEventSender, audio_event_channel};
#[cfg(feature = "rodio-output")]
pub use handle::RodioDriver;
#[cfg(feature = "rodio-output")]
pub use thread::spawn_audio_thread;
