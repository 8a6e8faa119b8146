//! Playback controller
//!
//! Owns the synchronizer on a single task and feeds it hub pushes, audio
//! events, lifecycle changes and user requests in arrival order. The
//! resulting [`PlayerView`] is published on a watch channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::TrackMetadataSource;
use crate::audio::{AudioDriver, AudioEventReceiver};
use crate::dispatcher::CommandDispatcher;
use crate::error::{SyncError, SyncResult};
use crate::hub::{HubSession, LifecycleEvent, Reaction, ReactionKind, ServerEvent};
use crate::sync::{
    Effect, GroupId, PlayerCommand, PlayerView, SyncConfig, SyncMessage, Synchronizer, TrackId,
};

/// Progress refresh and end-of-track polling
const REFRESH_INTERVAL: Duration = Duration::from_millis(500);

pub struct PlaybackController {
    dispatcher: CommandDispatcher,
    inbox: mpsc::UnboundedSender<SyncMessage>,
    view_rx: watch::Receiver<PlayerView>,
    reactions_tx: broadcast::Sender<Reaction>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackController")
            .field("dispatcher", &self.dispatcher)
            .field("view", &*self.view_rx.borrow())
            .finish_non_exhaustive()
    }
}

impl PlaybackController {
    /// Start the controller task
    ///
    /// Takes the session's push stream, so only one controller can run per
    /// session. Must be called within a tokio runtime.
    pub fn start<A: AudioDriver>(
        dispatcher: CommandDispatcher,
        metadata: Arc<dyn TrackMetadataSource>,
        audio: A,
        audio_events: AudioEventReceiver,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        let session = dispatcher.session().clone();
        let Some(hub_events) = session.take_events() else {
            return Err(SyncError::ConnectionError(
                "hub events already consumed by another controller".to_string(),
            ));
        };

        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(PlayerView::default());
        let (reactions_tx, _) = broadcast::channel(32);

        let runner = Runner {
            sync: Synchronizer::new(audio, config),
            dispatcher: dispatcher.clone(),
            metadata,
            inbox: inbox.clone(),
            view_tx,
            reactions_tx: reactions_tx.clone(),
        };
        let task = tokio::spawn(runner.run(inbox_rx, hub_events, audio_events, session.lifecycle()));

        Ok(Self {
            dispatcher,
            inbox,
            view_rx,
            reactions_tx,
            task,
        })
    }

    pub fn session(&self) -> &HubSession {
        self.dispatcher.session()
    }

    pub async fn connect(&self) -> SyncResult<()> {
        self.session().connect().await
    }

    pub async fn disconnect(&self) {
        self.session().disconnect().await;
        self.post(SyncMessage::ConnectionLost);
    }

    /// Join a group whose tracks are `queue`, then ask for its state
    pub async fn join_group(&self, group: GroupId, queue: Vec<TrackId>) -> SyncResult<()> {
        self.dispatcher.ensure_ready()?;
        self.post(SyncMessage::Joining(group.clone()));
        self.post(SyncMessage::QueueKnown(queue));

        if let Err(e) = self.dispatcher.join_group(group.clone()).await {
            warn!("Joining group {} failed: {}", group, e);
            self.post(SyncMessage::JoinFailed(group));
            return Err(e);
        }
        self.dispatcher.request_current_state().await
    }

    pub async fn leave_group(&self) -> SyncResult<()> {
        let had_group = self.session().current_group().is_some();
        self.dispatcher.leave_group().await?;
        if had_group {
            self.post(SyncMessage::Left);
        }
        Ok(())
    }

    /// Replace the known track list of the joined group
    pub fn set_queue(&self, queue: Vec<TrackId>) {
        self.post(SyncMessage::QueueKnown(queue));
    }

    pub async fn play_track(&self, track: TrackId) -> SyncResult<()> {
        self.command(PlayerCommand::PlayTrack(Some(track))).await
    }

    pub async fn set_play_pause(&self, playing: bool) -> SyncResult<()> {
        self.command(PlayerCommand::SetPlayPause(playing)).await
    }

    pub async fn toggle_play(&self) -> SyncResult<()> {
        let playing = self.view_rx.borrow().is_playing;
        self.set_play_pause(!playing).await
    }

    /// Advance to the next track; `false` when the group has none
    pub async fn next(&self) -> SyncResult<bool> {
        self.dispatcher.ensure_ready()?;
        if self.view_rx.borrow().next_track.is_none() {
            return Ok(false);
        }
        self.command(PlayerCommand::PlayTrack(None)).await?;
        Ok(true)
    }

    /// Move the seek slider; the position is only shown locally
    pub fn update_seek(&self, position: f64) {
        self.post(SyncMessage::SeekGesture(position));
    }

    /// Release the seek slider and send the position to the group
    pub async fn end_seek(&self) -> SyncResult<()> {
        if let Err(e) = self.dispatcher.ensure_ready() {
            self.post(SyncMessage::SeekCancelled);
            return Err(e);
        }
        let (reply, rx) = oneshot::channel();
        self.post(SyncMessage::SeekReleased { reply: Some(reply) });
        rx.await.unwrap_or_else(|_| {
            Err(SyncError::ConnectionError(
                "playback controller stopped".to_string(),
            ))
        })
    }

    pub async fn request_current_state(&self) -> SyncResult<()> {
        self.dispatcher.request_current_state().await
    }

    pub async fn send_reaction(&self, kind: ReactionKind) -> SyncResult<()> {
        self.dispatcher.send_reaction(kind).await
    }

    pub fn set_volume(&self, volume: f32) {
        self.post(SyncMessage::SetVolume(volume));
    }

    pub fn view(&self) -> PlayerView {
        self.view_rx.borrow().clone()
    }

    pub fn watch_view(&self) -> watch::Receiver<PlayerView> {
        self.view_rx.clone()
    }

    pub fn reactions(&self) -> broadcast::Receiver<Reaction> {
        self.reactions_tx.subscribe()
    }

    pub fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.session().lifecycle()
    }

    async fn command(&self, command: PlayerCommand) -> SyncResult<()> {
        self.dispatcher.ensure_ready()?;
        let (reply, rx) = oneshot::channel();
        self.post(SyncMessage::Intent {
            command,
            reply: Some(reply),
        });
        rx.await.unwrap_or_else(|_| {
            Err(SyncError::ConnectionError(
                "playback controller stopped".to_string(),
            ))
        })
    }

    fn post(&self, message: SyncMessage) {
        if self.inbox.send(message).is_err() {
            warn!("Playback controller task is gone");
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Runner<A: AudioDriver> {
    sync: Synchronizer<A>,
    dispatcher: CommandDispatcher,
    metadata: Arc<dyn TrackMetadataSource>,
    inbox: mpsc::UnboundedSender<SyncMessage>,
    view_tx: watch::Sender<PlayerView>,
    reactions_tx: broadcast::Sender<Reaction>,
}

impl<A: AudioDriver> Runner<A> {
    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<SyncMessage>,
        mut hub_events: mpsc::UnboundedReceiver<ServerEvent>,
        mut audio_events: AudioEventReceiver,
        mut lifecycle: broadcast::Receiver<LifecycleEvent>,
    ) {
        let mut refresh = tokio::time::interval(REFRESH_INTERVAL);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let message = tokio::select! {
                biased;
                // Connection changes first: a join posted after a reconnect
                // must not be undone by the older loss event
                Ok(event) = lifecycle.recv() => match event {
                    LifecycleEvent::Reconnecting { .. } | LifecycleEvent::Closed { .. } => {
                        SyncMessage::ConnectionLost
                    }
                    LifecycleEvent::Connected | LifecycleEvent::Reconnected => continue,
                },
                Some(message) = inbox.recv() => message,
                Some(event) = hub_events.recv() => match event {
                    ServerEvent::PlaybackState(state) => SyncMessage::Push(state),
                    ServerEvent::Reaction(reaction) => {
                        debug!("Reaction {} from {:?}", reaction.kind.emoji(), reaction.user_id);
                        let _ = self.reactions_tx.send(reaction);
                        continue;
                    }
                },
                Some(event) = audio_events.recv() => SyncMessage::Audio(event),
                _ = refresh.tick() => SyncMessage::Tick,
            };
            self.handle(message);
        }
    }

    fn handle(&mut self, message: SyncMessage) {
        for effect in self.sync.update(message) {
            self.spawn_effect(effect);
        }
        let view = self.sync.view();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    fn spawn_effect(&self, effect: Effect) {
        let inbox = self.inbox.clone();
        match effect {
            Effect::Dispatch { command, reply } => {
                let dispatcher = self.dispatcher.clone();
                tokio::spawn(async move {
                    let result = match &command {
                        PlayerCommand::PlayTrack(track) => dispatcher.play_track(track.clone()).await,
                        PlayerCommand::SetPlayPause(playing) => dispatcher.set_play_pause(*playing).await,
                        PlayerCommand::Seek { position, .. } => dispatcher.seek(*position).await,
                    };
                    if let Some(reply) = reply {
                        let _ = reply.send(result.clone());
                    }
                    let _ = inbox.send(SyncMessage::CommandSettled { command, result });
                });
            }
            Effect::FetchMetadata { track, generation } => {
                let lookup = self.metadata.track_info(&track);
                tokio::spawn(async move {
                    let result = lookup.await.map_err(|e| format!("{:#}", e));
                    if result.is_ok() {
                        info!("Fetched metadata for {}", track);
                    }
                    let _ = inbox.send(SyncMessage::Metadata { generation, result });
                });
            }
            Effect::SeekDeadline { ticket, after } => {
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = inbox.send(SyncMessage::SeekTimedOut { ticket });
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TrackInfo;
    use crate::audio::{ClockDriver, audio_event_channel};
    use crate::auth::StaticToken;
    use crate::hub::testing::{FakeHub, test_settings};
    use crate::sync::SyncPhase;
    use futures_util::FutureExt;
    use futures_util::future::BoxFuture;
    use serde_json::{Value, json};

    struct FixedMetadata;

    impl TrackMetadataSource for FixedMetadata {
        fn track_info(&self, track: &TrackId) -> BoxFuture<'static, anyhow::Result<TrackInfo>> {
            let info = TrackInfo {
                id: track.clone(),
                title: format!("Title {}", track),
                author: "Someone".to_string(),
                image_url: String::new(),
                duration: Some(10.0),
            };
            async move { Ok(info) }.boxed()
        }
    }

    fn controller(hub: &FakeHub) -> PlaybackController {
        let session = HubSession::new(
            hub.connector(),
            Arc::new(StaticToken("t".to_string())),
            &test_settings(),
        );
        let dispatcher = CommandDispatcher::new(session, Duration::from_secs(1));
        let (events_tx, events_rx) = audio_event_channel();
        PlaybackController::start(
            dispatcher,
            Arc::new(FixedMetadata),
            ClockDriver::new(events_tx),
            events_rx,
            SyncConfig::default(),
        )
        .unwrap()
    }

    fn wire_state(track: Value, position: f64, playing: bool) -> Value {
        json!({
            "currentSongId": track,
            "currentPosition": position,
            "currentLength": 10.0,
            "nextSongId": null,
            "isPlaying": playing,
            "lastUpdated": "2025-05-01T08:00:00Z"
        })
    }

    async fn wait_view(
        controller: &PlaybackController,
        condition: impl FnMut(&PlayerView) -> bool,
    ) -> PlayerView {
        let mut rx = controller.watch_view();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(condition))
            .await
            .expect("view condition not reached")
            .expect("controller stopped")
            .clone()
    }

    async fn joined(hub: &FakeHub, queue: &[&str]) -> PlaybackController {
        let controller = controller(hub);
        controller.connect().await.unwrap();
        let queue = queue.iter().copied().map(TrackId::from).collect();
        controller.join_group(GroupId::from("g"), queue).await.unwrap();
        controller
    }

    #[tokio::test]
    async fn test_second_controller_is_rejected() {
        let hub = FakeHub::start();
        let first = controller(&hub);
        let (events_tx, events_rx) = audio_event_channel();
        let dispatcher = CommandDispatcher::new(first.session().clone(), Duration::from_secs(1));
        let second = PlaybackController::start(
            dispatcher,
            Arc::new(FixedMetadata),
            ClockDriver::new(events_tx),
            events_rx,
            SyncConfig::default(),
        );
        assert!(matches!(second, Err(SyncError::ConnectionError(_))));
    }

    #[tokio::test]
    async fn test_end_seek_reports_stopped_controller() {
        let hub = FakeHub::start();
        let mut controller = controller(&hub);
        controller.connect().await.unwrap();

        controller.task.abort();
        assert!((&mut controller.task).await.is_err());
        assert_eq!(
            controller.end_seek().await,
            Err(SyncError::ConnectionError(
                "playback controller stopped".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_commands_fail_when_not_connected() {
        let hub = FakeHub::start();
        let controller = controller(&hub);

        assert_eq!(controller.set_play_pause(true).await, Err(SyncError::NotConnected));
        assert_eq!(controller.next().await, Err(SyncError::NotConnected));
        assert_eq!(
            controller.join_group(GroupId::from("g"), Vec::new()).await,
            Err(SyncError::NotConnected)
        );
        assert_eq!(controller.view(), PlayerView::default());
        assert!(hub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_join_requests_state_and_starts_queue() {
        let hub = FakeHub::start();
        let controller = joined(&hub, &["A", "B"]).await;
        assert_eq!(hub.targets(), vec!["JoinPlaylist", "GetPlaybackState"]);
        wait_view(&controller, |view| view.phase == SyncPhase::AwaitingFirstState).await;

        hub.push_state(wire_state(Value::Null, 0.0, false));
        let calls = hub.wait_for_calls(3).await;
        assert_eq!(calls[2], ("PlaySong".to_string(), vec![json!("A")]));
    }

    #[tokio::test]
    async fn test_push_loads_track_with_metadata() {
        let hub = FakeHub::start();
        let controller = joined(&hub, &["a"]).await;

        hub.push_state(wire_state(json!("a"), 5.0, true));
        let view = wait_view(&controller, |view| {
            view.track_info.is_some() && !view.is_loading
        })
        .await;
        assert_eq!(view.phase, SyncPhase::Synced);
        assert_eq!(view.track, Some(TrackId::from("a")));
        assert_eq!(view.track_info.unwrap().title, "Title a");
        assert!(view.is_playing);
        assert_eq!(view.duration, 10.0);
        assert!(view.position >= 5.0);
    }

    #[tokio::test]
    async fn test_seek_gesture_round_trip() {
        let hub = FakeHub::start();
        let controller = joined(&hub, &["a"]).await;
        hub.push_state(wire_state(json!("a"), 1.0, false));
        wait_view(&controller, |view| view.track.is_some() && !view.is_loading).await;

        controller.update_seek(7.6);
        let view = wait_view(&controller, |view| view.phase == SyncPhase::Seeking).await;
        assert_eq!(view.position, 7.6);

        controller.end_seek().await.unwrap();
        let last = hub.calls().last().cloned().unwrap();
        assert_eq!(last, ("Seek".to_string(), vec![json!(7.0)]));
        wait_view(&controller, |view| view.phase == SyncPhase::Synced).await;
    }

    #[tokio::test]
    async fn test_next_without_next_track() {
        let hub = FakeHub::start();
        let controller = joined(&hub, &["a"]).await;
        hub.push_state(wire_state(json!("a"), 0.0, true));
        wait_view(&controller, |view| view.track.is_some()).await;

        assert_eq!(controller.next().await, Ok(false));
        assert!(!hub.targets().contains(&"PlaySong".to_string()));
    }

    #[tokio::test]
    async fn test_connection_loss_returns_to_idle() {
        let hub = FakeHub::start();
        let controller = joined(&hub, &["a"]).await;
        hub.push_state(wire_state(json!("a"), 0.0, true));
        wait_view(&controller, |view| view.phase == SyncPhase::Synced).await;

        hub.drop_connection();
        let view = wait_view(&controller, |view| view.phase == SyncPhase::Idle).await;
        assert_eq!(view.group, None);
        assert_eq!(controller.session().current_group(), None);
    }

    #[tokio::test]
    async fn test_leave_twice_transitions_once() {
        let hub = FakeHub::start();
        let controller = joined(&hub, &["a"]).await;

        controller.leave_group().await.unwrap();
        controller.leave_group().await.unwrap();
        wait_view(&controller, |view| view.phase == SyncPhase::Idle).await;
        let leaves = hub
            .targets()
            .into_iter()
            .filter(|target| target == "LeavePlaylist")
            .count();
        assert_eq!(leaves, 1);
    }

    #[tokio::test]
    async fn test_reactions_are_forwarded() {
        let hub = FakeHub::start();
        let controller = joined(&hub, &[]).await;
        let mut reactions = controller.reactions();

        hub.push(
            "ReceiveReaction",
            json!({
                "userId": "u1",
                "songId": "a",
                "reaction": 1,
                "timestamp": "2025-05-01T08:00:00Z"
            }),
        );
        let reaction = tokio::time::timeout(Duration::from_secs(2), reactions.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reaction.kind, ReactionKind::Fire);
        assert_eq!(reaction.user_id.as_deref(), Some("u1"));
    }
}
