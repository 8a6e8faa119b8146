//! REST collaborators
//!
//! Track metadata and content URLs. The synchronizer only sees the
//! [`TrackMetadataSource`] trait.

mod client;
pub mod model;

use futures_util::future::BoxFuture;

use crate::sync::TrackId;

pub use client::ApiClient;
pub use model::{AuthorData, SongData, TrackInfo};

/// Looks up display metadata for a track
pub trait TrackMetadataSource: Send + Sync + 'static {
    fn track_info(&self, track: &TrackId) -> BoxFuture<'static, anyhow::Result<TrackInfo>>;
}
