//! REST client for song metadata and content
//!
//! Thin wrapper over reqwest. Requests carry the stored bearer token and
//! keep cookies, mirroring what the web client sent.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use reqwest::{Client, StatusCode, header};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::TrackMetadataSource;
use super::model::{ApiEnvelope, SongData, TrackInfo};
use crate::auth::CredentialResolver;
use crate::settings::EndpointSettings;
use crate::sync::{GroupId, TrackId};
use crate::utils::join_url;

const TIMEOUT: u64 = 30;

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    api_base: String,
    content_base: String,
    credentials: Arc<dyn CredentialResolver>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("api_base", &self.api_base)
            .field("content_base", &self.content_base)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(endpoints: &EndpointSettings, credentials: Arc<dyn CredentialResolver>) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT))
            .cookie_store(true);
        if let Some(proxy) = &endpoints.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy).context("invalid proxy URL")?);
        }

        Ok(Self {
            client: builder.build().context("failed to build HTTP client")?,
            api_base: endpoints.api_base_url.clone(),
            content_base: endpoints.content_base_url.clone(),
            credentials,
        })
    }

    /// Streamable audio for a track
    pub fn audio_url(&self, track: &TrackId) -> String {
        join_url(&self.content_base, &format!("contents/audio/{}", track))
    }

    /// Cover image for a track
    pub fn image_url(&self, track: &TrackId) -> String {
        join_url(&self.content_base, &format!("contents/images/{}", track))
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match self.credentials.bearer_token() {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn get_envelope<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = join_url(&self.api_base, path);
        debug!("GET {}", url);

        let response = self.get(&url).send().await.with_context(|| format!("GET {}", url))?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            bail!("authentication rejected by API ({})", status);
        }
        if !status.is_success() {
            bail!("GET {} returned {}", url, status);
        }

        let envelope: ApiEnvelope<T> = response.json().await.context("invalid API response")?;
        match (envelope.success, envelope.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(anyhow!(
                "API reported failure: {}",
                envelope.message.unwrap_or_else(|| "no data".to_string())
            )),
        }
    }

    /// Song record by id
    pub async fn fetch_song(&self, track: &TrackId) -> Result<SongData> {
        self.get_envelope(&format!("api/v1/Songs/{}", track)).await
    }

    /// Songs of a playlist, in playlist order
    pub async fn fetch_playlist_songs(&self, group: &GroupId) -> Result<Vec<SongData>> {
        self.get_envelope(&format!("api/v1/Playlists/{}/songs", group))
            .await
    }

    /// Display metadata for a track
    pub async fn fetch_track_info(&self, track: &TrackId) -> Result<TrackInfo> {
        let song = self.fetch_song(track).await?;
        Ok(song.into_track_info(self.image_url(track)))
    }

    /// Whole audio file for a track
    pub async fn fetch_audio(&self, track: &TrackId) -> Result<Vec<u8>> {
        let url = self.audio_url(track);
        let response = self.get(&url).send().await.with_context(|| format!("GET {}", url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("audio request for {} returned {}", track, status);
        }
        let bytes = response.bytes().await.context("audio download interrupted")?;
        Ok(bytes.to_vec())
    }
}

impl TrackMetadataSource for ApiClient {
    fn track_info(&self, track: &TrackId) -> BoxFuture<'static, Result<TrackInfo>> {
        let client = self.clone();
        let track = track.clone();
        async move { client.fetch_track_info(&track).await }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;

    #[test]
    fn test_content_urls() {
        let endpoints = EndpointSettings {
            content_base_url: "http://content:5039/".to_string(),
            ..EndpointSettings::default()
        };
        let client = ApiClient::new(&endpoints, Arc::new(StaticToken("t".to_string()))).unwrap();
        let track = TrackId::from("abc");
        assert_eq!(client.audio_url(&track), "http://content:5039/contents/audio/abc");
        assert_eq!(client.image_url(&track), "http://content:5039/contents/images/abc");
    }

    #[test]
    fn test_invalid_proxy_is_rejected() {
        let endpoints = EndpointSettings {
            proxy: Some("::not a proxy::".to_string()),
            ..EndpointSettings::default()
        };
        assert!(ApiClient::new(&endpoints, Arc::new(StaticToken("t".to_string()))).is_err());
    }
}
