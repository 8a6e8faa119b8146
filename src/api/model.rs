//! REST payload types

use serde::Deserialize;

use crate::sync::TrackId;
use crate::utils::parse_duration;

/// Standard response envelope of the REST API
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorData {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Song record as returned by `/api/v1/Songs/{id}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongData {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// "MM:SS" or "H:MM:SS"
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub plays: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub authors: Vec<AuthorData>,
}

/// Display metadata for the current track
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub id: TrackId,
    pub title: String,
    pub author: String,
    pub image_url: String,
    /// Seconds, when the API reported one
    pub duration: Option<f64>,
}

impl SongData {
    /// Comma separated author names
    pub fn author_names(&self) -> String {
        if self.authors.is_empty() {
            return "Unknown".to_string();
        }
        self.authors
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Length in seconds from whichever duration field is usable
    pub fn length_seconds(&self) -> Option<f64> {
        self.duration_seconds
            .filter(|d| d.is_finite() && *d > 0.0)
            .or_else(|| self.duration.as_deref().and_then(parse_duration))
    }

    pub fn into_track_info(self, image_url: String) -> TrackInfo {
        TrackInfo {
            id: TrackId::new(self.id.clone()),
            author: self.author_names(),
            duration: self.length_seconds(),
            title: self.name,
            image_url,
        }
    }
}
