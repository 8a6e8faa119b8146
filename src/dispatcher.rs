//! Command dispatcher
//!
//! Turns user intents into hub invocations and waits for the hub to
//! acknowledge them. Nothing here touches local playback state; the effect
//! of a command only becomes visible through the next server push.

use std::time::Duration;

use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};
use crate::hub::{HubCommand, HubSession, ReactionKind};
use crate::sync::{GroupId, TrackId};

#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    session: HubSession,
    ack_timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(session: HubSession, ack_timeout: Duration) -> Self {
        Self {
            session,
            ack_timeout,
        }
    }

    pub fn session(&self) -> &HubSession {
        &self.session
    }

    /// Fail with `NotConnected` unless the session can take commands
    pub fn ensure_ready(&self) -> SyncResult<()> {
        if self.session.is_ready() {
            Ok(())
        } else {
            Err(SyncError::NotConnected)
        }
    }

    async fn send(&self, command: HubCommand) -> SyncResult<()> {
        self.ensure_ready()?;
        self.session.invoke(&command, self.ack_timeout).await?;
        debug!("{} acknowledged", command.target());
        Ok(())
    }

    /// Play a specific track, or let the hub advance when `None`
    pub async fn play_track(&self, track: Option<TrackId>) -> SyncResult<()> {
        self.send(HubCommand::PlaySong(track)).await
    }

    pub async fn set_play_pause(&self, playing: bool) -> SyncResult<()> {
        self.send(HubCommand::PlayPause(playing)).await
    }

    pub async fn seek(&self, position: f64) -> SyncResult<()> {
        self.send(HubCommand::Seek(position)).await
    }

    /// Join a group; membership is recorded once the hub accepts it
    pub async fn join_group(&self, group: GroupId) -> SyncResult<()> {
        self.send(HubCommand::JoinPlaylist(group.clone())).await?;
        info!("Joined group {}", group);
        self.session.set_current_group(Some(group));
        Ok(())
    }

    /// Leave the current group; without one this sends nothing
    pub async fn leave_group(&self) -> SyncResult<()> {
        self.ensure_ready()?;
        let Some(group) = self.session.current_group() else {
            debug!("Not in a group, nothing to leave");
            return Ok(());
        };
        self.send(HubCommand::LeavePlaylist).await?;
        info!("Left group {}", group);
        self.session.set_current_group(None);
        Ok(())
    }

    /// Ask the hub to re-push the group's playback state
    pub async fn request_current_state(&self) -> SyncResult<()> {
        self.send(HubCommand::GetPlaybackState).await
    }

    pub async fn send_reaction(&self, kind: ReactionKind) -> SyncResult<()> {
        self.send(HubCommand::SendReaction(kind)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::hub::testing::{AckMode, FakeHub, test_settings};
    use serde_json::json;
    use std::sync::Arc;

    fn dispatcher(hub: &FakeHub) -> CommandDispatcher {
        let session = HubSession::new(
            hub.connector(),
            Arc::new(StaticToken("t".to_string())),
            &test_settings(),
        );
        CommandDispatcher::new(session, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_commands_require_ready_session() {
        let hub = FakeHub::start();
        let dispatcher = dispatcher(&hub);

        assert_eq!(dispatcher.set_play_pause(true).await, Err(SyncError::NotConnected));
        assert_eq!(dispatcher.play_track(None).await, Err(SyncError::NotConnected));
        assert_eq!(dispatcher.seek(3.0).await, Err(SyncError::NotConnected));
        assert_eq!(
            dispatcher.join_group(GroupId::from("g")).await,
            Err(SyncError::NotConnected)
        );
        assert_eq!(dispatcher.leave_group().await, Err(SyncError::NotConnected));
        assert_eq!(
            dispatcher.request_current_state().await,
            Err(SyncError::NotConnected)
        );
        assert!(hub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_join_and_leave_twice() {
        let hub = FakeHub::start();
        let dispatcher = dispatcher(&hub);
        dispatcher.session().connect().await.unwrap();

        dispatcher.join_group(GroupId::from("g1")).await.unwrap();
        assert_eq!(dispatcher.session().current_group(), Some(GroupId::from("g1")));

        dispatcher.leave_group().await.unwrap();
        dispatcher.leave_group().await.unwrap();
        assert_eq!(dispatcher.session().current_group(), None);
        assert_eq!(hub.targets(), vec!["JoinPlaylist", "LeavePlaylist"]);
        assert_eq!(hub.calls()[0].1, vec![json!("g1")]);
    }

    #[tokio::test]
    async fn test_rejected_join_records_nothing() {
        let hub = FakeHub::start();
        let dispatcher = dispatcher(&hub);
        dispatcher.session().connect().await.unwrap();
        hub.set_mode(AckMode::Error("no such playlist".to_string()));

        let result = dispatcher.join_group(GroupId::from("missing")).await;
        assert_eq!(
            result,
            Err(SyncError::remote("JoinPlaylist", "no such playlist"))
        );
        assert_eq!(dispatcher.session().current_group(), None);
    }

    #[tokio::test]
    async fn test_play_track_and_reaction_arguments() {
        let hub = FakeHub::start();
        let dispatcher = dispatcher(&hub);
        dispatcher.session().connect().await.unwrap();

        dispatcher.play_track(Some(TrackId::from("a"))).await.unwrap();
        dispatcher.play_track(None).await.unwrap();
        dispatcher.send_reaction(ReactionKind::Heart).await.unwrap();

        let calls = hub.calls();
        assert_eq!(calls[0], ("PlaySong".to_string(), vec![json!("a")]));
        assert_eq!(calls[1], ("PlaySong".to_string(), vec![json!(null)]));
        assert_eq!(calls[2], ("SendReaction".to_string(), vec![json!(0)]));
    }
}
