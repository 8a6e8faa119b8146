//! playsync - headless group playback client
//!
//! Joins the playlist given on the command line and follows its shared
//! playback until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use playsync::api::{ApiClient, SongData};
use playsync::audio::AudioEventReceiver;
use playsync::auth::{CredentialResolver, StaticToken, TokenStore};
use playsync::hub::{HubSession, LifecycleEvent, WebSocketConnector};
use playsync::sync::{GroupId, PlayerView, SyncConfig, TrackId};
use playsync::utils::format_time;
use playsync::{CommandDispatcher, PlaybackController, Settings};

const TOKEN_ENV: &str = "PLAYSYNC_TOKEN";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let group = std::env::args()
        .nth(1)
        .map(GroupId::new)
        .context("usage: playsync <playlist-id>")?;
    let settings = Settings::load();

    let credentials: Arc<dyn CredentialResolver> = match std::env::var(TOKEN_ENV) {
        Ok(token) if !token.trim().is_empty() => Arc::new(StaticToken(token.trim().to_string())),
        _ => {
            let store = TokenStore::default_location()
                .context("no data directory for the credential store")?;
            if !store.is_auth_valid() {
                warn!("No valid login stored, set {} or log in first", TOKEN_ENV);
            } else if let Some(name) = store.claims().and_then(|claims| claims.name) {
                info!("Signed in as {}", name);
            }
            Arc::new(store)
        }
    };

    let api = ApiClient::new(&settings.endpoints, credentials.clone())?;
    let songs = api
        .fetch_playlist_songs(&group)
        .await
        .with_context(|| format!("loading playlist {}", group))?;
    let queue: Vec<TrackId> = songs.iter().map(|song| TrackId::new(song.id.clone())).collect();
    info!("Playlist {} has {} tracks", group, queue.len());

    let connector = WebSocketConnector::new(&settings.endpoints)?;
    let session = HubSession::new(Arc::new(connector), credentials, &settings.reconnect);
    let dispatcher = CommandDispatcher::new(session, settings.sync.ack_timeout());
    let config = SyncConfig::from_settings(&settings.sync);

    let controller = start_controller(dispatcher, &api, &songs, &settings, config)?;
    controller.set_volume(settings.audio.volume);

    controller.connect().await?;
    controller.join_group(group.clone(), queue.clone()).await?;

    let mut view = controller.watch_view();
    let mut reactions = controller.reactions();
    let mut lifecycle = controller.lifecycle();
    let mut last_logged = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = view.borrow_and_update().clone();
                log_view(&current, &mut last_logged);
            }
            Ok(reaction) = reactions.recv() => {
                info!(
                    "{} from {}",
                    reaction.kind.emoji(),
                    reaction.user_id.as_deref().unwrap_or("someone")
                );
            }
            Ok(event) = lifecycle.recv() => match event {
                LifecycleEvent::Reconnected => {
                    info!("Reconnected, joining {} again", group);
                    if let Err(e) = controller.join_group(group.clone(), queue.clone()).await {
                        warn!("Rejoining failed: {}", e);
                    }
                }
                LifecycleEvent::Closed { error } => {
                    warn!("Hub connection closed: {}", error.unwrap_or_default());
                    break;
                }
                _ => {}
            },
        }
    }

    if let Err(e) = controller.leave_group().await {
        warn!("Leaving group failed: {}", e);
    }
    controller.disconnect().await;
    Ok(())
}

#[cfg(feature = "rodio-output")]
fn start_controller(
    dispatcher: CommandDispatcher,
    api: &ApiClient,
    _songs: &[SongData],
    settings: &Settings,
    config: SyncConfig,
) -> Result<PlaybackController> {
    let (driver, events): (_, AudioEventReceiver) = playsync::audio::spawn_audio_thread(
        api.clone(),
        tokio::runtime::Handle::current(),
        settings.audio.volume,
    )
    .map_err(anyhow::Error::msg)?;
    Ok(PlaybackController::start(
        dispatcher,
        Arc::new(api.clone()),
        driver,
        events,
        config,
    )?)
}

#[cfg(not(feature = "rodio-output"))]
fn start_controller(
    dispatcher: CommandDispatcher,
    api: &ApiClient,
    songs: &[SongData],
    _settings: &Settings,
    config: SyncConfig,
) -> Result<PlaybackController> {
    use playsync::audio::{ClockDriver, audio_event_channel};

    info!("Built without audio output, following the timeline silently");
    let (events_tx, events): (_, AudioEventReceiver) = audio_event_channel();
    let mut driver = ClockDriver::new(events_tx);
    for song in songs {
        if let Some(length) = song.length_seconds() {
            driver.set_duration(TrackId::new(song.id.clone()), length);
        }
    }
    Ok(PlaybackController::start(
        dispatcher,
        Arc::new(api.clone()),
        driver,
        events,
        config,
    )?)
}

/// Log state changes at info level and progress at debug level
fn log_view(view: &PlayerView, last: &mut Option<(Option<TrackId>, bool, bool, bool)>) {
    let key = (
        view.track.clone(),
        view.is_playing,
        view.is_loading,
        view.track_info.is_some(),
    );
    if last.as_ref() != Some(&key) {
        let title = view
            .track_info
            .as_ref()
            .map(|info| format!("{} - {}", info.author, info.title))
            .or_else(|| view.track.as_ref().map(ToString::to_string))
            .unwrap_or_else(|| "nothing".to_string());
        info!(
            "[{:?}] {} {} ({}/{})",
            view.phase,
            if view.is_playing { "playing" } else { "paused" },
            title,
            format_time(view.position),
            format_time(view.duration)
        );
        *last = Some(key);
    } else {
        tracing::debug!("{} / {}", format_time(view.position), format_time(view.duration));
    }
}
