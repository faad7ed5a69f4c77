//! Per-guild audio sessions.
//!
//! Each [`GuildAudioSession`] owns its scheduler and playback plumbing behind
//! one `tokio::sync::Mutex`.  Commands and node events for the same guild
//! serialize on that lock; different guilds never contend.  The registry
//! lock is only held to look a session up, never while one is mutated.

use crate::node::{DisconnectHandle, NodeClient};
use crate::notify::NotificationSink;
use crate::scheduler::{Playback, QueueScheduler, RadioScheduler, Scheduler};
use crate::vote::Ballot;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};
use voice_proto::config::{Config, GuildSettings};
use voice_proto::protocol::{
    ContentMode, GuildId, NodeEvent, Notification, NotificationKind, RadioStation, RepeatMode,
    SessionSnapshot, SessionState, Track,
};

pub struct SessionInner {
    pub playback: Playback,
    pub scheduler: Scheduler,
    pub ballot: Option<Ballot>,
}

impl SessionInner {
    pub fn mode(&self) -> ContentMode {
        self.scheduler.mode()
    }

    /// Derived from the current track, the idle timer and the node's
    /// paused flag.
    pub fn state(&self) -> SessionState {
        match self.playback.current() {
            None if self.playback.is_leaving() => SessionState::Leaving,
            None => SessionState::Empty,
            Some(_) if self.playback.is_paused() => SessionState::Paused,
            Some(_) => SessionState::Playing,
        }
    }

    /// Tracks waiting behind the current one.
    pub fn queue_len(&self) -> usize {
        match &self.scheduler {
            Scheduler::Queue(s) => s.queue().len(),
            Scheduler::Radio(_) => 0,
        }
    }

    /// Nothing playing, nothing queued and no leave pending.
    pub fn is_idle(&self) -> bool {
        self.state() == SessionState::Empty && self.queue_len() == 0
    }

    pub fn queue_scheduler(&mut self) -> Option<&mut QueueScheduler> {
        match &mut self.scheduler {
            Scheduler::Queue(s) => Some(s),
            Scheduler::Radio(_) => None,
        }
    }

    pub fn radio_station(&self) -> Option<&RadioStation> {
        match &self.scheduler {
            Scheduler::Radio(s) => Some(s.station()),
            Scheduler::Queue(_) => None,
        }
    }

    /// Install the queue scheduler.  Callers make sure nothing is playing.
    pub fn switch_to_queue(&mut self) {
        if self.mode() != ContentMode::Queue {
            debug!(guild = %self.playback.guild(), "switching session to queue playback");
            self.scheduler = Scheduler::Queue(QueueScheduler::default());
        }
    }

    /// Install a radio scheduler for `station`.  Callers make sure nothing is
    /// playing.
    pub fn switch_to_radio(&mut self, station: RadioStation) {
        debug!(guild = %self.playback.guild(), station = %station.name, "switching session to radio playback");
        self.scheduler = Scheduler::Radio(RadioScheduler::new(station));
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (queue, repeat_mode, repeats_remaining) = match &self.scheduler {
            Scheduler::Queue(s) => (
                s.queue().iter().cloned().collect(),
                s.repeat().mode(),
                s.repeat().count().remaining(),
            ),
            Scheduler::Radio(_) => (Vec::new(), RepeatMode::None, 0),
        };
        SessionSnapshot {
            guild: self.playback.guild(),
            mode: self.mode(),
            state: self.state(),
            current: self.playback.current().cloned(),
            queue,
            repeat_mode,
            repeats_remaining,
            radio_station: self.radio_station().map(|s| s.name.clone()),
            volume: self.playback.volume(),
        }
    }
}

pub struct GuildAudioSession {
    guild: GuildId,
    inner: Mutex<SessionInner>,
    /// Told when the session went idle and may be dropped.
    retire: Option<mpsc::Sender<GuildId>>,
}

impl GuildAudioSession {
    pub fn new(
        guild: GuildId,
        node: Arc<dyn NodeClient>,
        sink: Arc<dyn NotificationSink>,
        settings: GuildSettings,
    ) -> Arc<Self> {
        Self::with_retire(guild, node, sink, settings, None)
    }

    pub fn with_retire(
        guild: GuildId,
        node: Arc<dyn NodeClient>,
        sink: Arc<dyn NotificationSink>,
        settings: GuildSettings,
        retire: Option<mpsc::Sender<GuildId>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            guild,
            inner: Mutex::new(SessionInner {
                playback: Playback::new(guild, node, sink, settings, weak.clone()),
                scheduler: Scheduler::default(),
                ballot: None,
            }),
            retire,
        })
    }

    /// Ask the owner to drop this session if it is still idle by then.
    pub fn request_retire(&self) {
        if let Some(tx) = &self.retire {
            if tx.try_send(self.guild).is_err() {
                debug!(guild = %self.guild, "retire notice dropped");
            }
        }
    }

    pub fn guild(&self) -> GuildId {
        self.guild
    }

    /// Enter the session's exclusive section.
    pub async fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().await
    }

    pub async fn load_content(&self, tracks: Vec<Track>) {
        let mut inner = self.inner.lock().await;
        let SessionInner {
            playback,
            scheduler,
            ..
        } = &mut *inner;
        scheduler.load_content(playback, tracks);
    }

    pub async fn set_repeat_count(&self, count: u32) {
        self.inner.lock().await.scheduler.set_repeat_count(count);
    }

    pub async fn stop_and_destroy(&self) -> DisconnectHandle {
        let mut inner = self.inner.lock().await;
        let SessionInner {
            playback,
            scheduler,
            ..
        } = &mut *inner;
        info!(guild = %self.guild, "stop and destroy session");
        scheduler.stop_and_destroy(playback)
    }

    pub async fn handle_event(&self, event: &NodeEvent) {
        let mut inner = self.inner.lock().await;
        let SessionInner {
            playback,
            scheduler,
            ..
        } = &mut *inner;
        scheduler.handle_event(playback, event);
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock().await.snapshot()
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state()
    }

    /// Idle timer fired: drop everything and leave the voice channel.
    pub(crate) async fn leave_idle(&self) {
        let disconnect = {
            let mut inner = self.inner.lock().await;
            let SessionInner {
                playback,
                scheduler,
                ballot,
            } = &mut *inner;
            // We are the timer task; forget our own handle instead of aborting it.
            playback.leave_timer_mut().disarm_fired();
            info!(guild = %self.guild, "leaving voice channel after inactivity");
            let disconnect = scheduler.stop_and_destroy(playback);
            *ballot = None;
            playback.notify(Notification::new(self.guild, NotificationKind::LeftIdle));
            disconnect
        };
        self.request_retire();
        match disconnect.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(guild = %self.guild, "idle disconnect failed: {}", e),
            Err(e) => warn!(guild = %self.guild, "idle disconnect task failed: {}", e),
        }
    }
}

/// All live sessions, keyed by guild.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<GuildId, Arc<GuildAudioSession>>>,
    node: Arc<dyn NodeClient>,
    sink: Arc<dyn NotificationSink>,
    config: Arc<Config>,
    retire: Option<mpsc::Sender<GuildId>>,
}

impl SessionRegistry {
    pub fn new(
        node: Arc<dyn NodeClient>,
        sink: Arc<dyn NotificationSink>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            node,
            sink,
            config,
            retire: None,
        }
    }

    /// Sessions created from now on send their guild on `tx` when they go
    /// idle.
    pub fn with_retire(mut self, tx: mpsc::Sender<GuildId>) -> Self {
        self.retire = Some(tx);
        self
    }

    pub async fn get(&self, guild: GuildId) -> Option<Arc<GuildAudioSession>> {
        self.sessions.read().await.get(&guild).cloned()
    }

    pub async fn get_or_create(&self, guild: GuildId) -> Arc<GuildAudioSession> {
        if let Some(session) = self.get(guild).await {
            return session;
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(guild)
            .or_insert_with(|| {
                info!(guild = %guild, "creating audio session");
                GuildAudioSession::with_retire(
                    guild,
                    self.node.clone(),
                    self.sink.clone(),
                    self.config.guild_settings(guild),
                    self.retire.clone(),
                )
            })
            .clone()
    }

    pub async fn remove(&self, guild: GuildId) -> Option<Arc<GuildAudioSession>> {
        let removed = self.sessions.write().await.remove(&guild);
        if removed.is_some() {
            info!(guild = %guild, "dropping audio session");
        }
        removed
    }

    /// Take every session out of the registry (shutdown).
    pub async fn drain(&self) -> Vec<Arc<GuildAudioSession>> {
        self.sessions.write().await.drain().map(|(_, s)| s).collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::BridgeNode;
    use crate::notify::BroadcastSink;
    use crate::BroadcastMessage;
    use std::time::Duration;
    use tokio::sync::broadcast;
    use voice_proto::config::GuildOverrides;
    use voice_proto::protocol::{ChannelId, EndReason, NodeRequest, UserId};

    fn registry(config: Config) -> SessionRegistry {
        let (tx, _) = broadcast::channel(16);
        SessionRegistry::new(
            Arc::new(BridgeNode::new("bridge", tx.clone())),
            Arc::new(BroadcastSink::new(tx)),
            Arc::new(config),
        )
    }

    #[tokio::test]
    async fn test_registry_reuses_sessions() {
        let registry = registry(Config::default());
        let a = registry.get_or_create(GuildId(1)).await;
        let b = registry.get_or_create(GuildId(1)).await;
        assert!(Arc::ptr_eq(&a, &b));

        registry.get_or_create(GuildId(2)).await;
        assert_eq!(registry.len().await, 2);
        assert!(registry.get(GuildId(3)).await.is_none());

        assert_eq!(registry.drain().await.len(), 2);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_new_session_uses_guild_settings() {
        let mut config = Config::default();
        config.guilds.insert(
            "5".to_string(),
            GuildOverrides {
                music_text_channel_id: Some(55),
                ..Default::default()
            },
        );
        let registry = registry(config);

        let session = registry.get_or_create(GuildId(5)).await;
        let inner = session.lock().await;
        assert_eq!(
            inner.playback.settings().music_text_channel,
            Some(ChannelId(55))
        );
        assert_eq!(inner.mode(), ContentMode::Queue);
        assert_eq!(inner.state(), SessionState::Empty);
    }

    #[tokio::test]
    async fn test_remove_drops_only_that_guild() {
        let registry = registry(Config::default());
        let a = registry.get_or_create(GuildId(1)).await;
        registry.get_or_create(GuildId(2)).await;

        let removed = registry.remove(GuildId(1)).await.unwrap();
        assert!(Arc::ptr_eq(&a, &removed));
        assert!(registry.remove(GuildId(1)).await.is_none());
        assert_eq!(registry.len().await, 1);

        let fresh = registry.get_or_create(GuildId(1)).await;
        assert!(!Arc::ptr_eq(&a, &fresh));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_leave_asks_to_retire() {
        let (tx, _) = broadcast::channel(16);
        let bridge = Arc::new(BridgeNode::new("bridge", tx.clone()));
        let (retire_tx, mut retire_rx) = mpsc::channel(4);
        let registry = SessionRegistry::new(
            bridge.clone(),
            Arc::new(BroadcastSink::new(tx)),
            Arc::new(Config::default()),
        )
        .with_retire(retire_tx);
        let session = registry.get_or_create(GuildId(3)).await;

        session.load_content(vec![Track::new("a", "A", UserId(1))]).await;
        let a = session.lock().await.playback.current().cloned().unwrap();
        // The node holds a live player, so the queue end waits to leave.
        bridge.observe(&NodeEvent::TrackStarted {
            guild: GuildId(3),
            track: a.clone(),
        });
        session
            .handle_event(&NodeEvent::TrackEnded {
                guild: GuildId(3),
                track: a,
                reason: EndReason::Finished,
            })
            .await;
        assert_eq!(session.state().await, SessionState::Leaving);
        assert!(retire_rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(121)).await;
        assert_eq!(retire_rx.recv().await, Some(GuildId(3)));
        assert!(session.lock().await.is_idle());
    }

    #[tokio::test]
    async fn test_load_right_after_stop_reaches_node_in_order() {
        let (tx, mut rx) = broadcast::channel(16);
        let session = GuildAudioSession::new(
            GuildId(4),
            Arc::new(BridgeNode::new("bridge", tx.clone())),
            Arc::new(BroadcastSink::new(tx)),
            GuildSettings::default(),
        );

        session.load_content(vec![Track::new("a", "A", UserId(1))]).await;
        // The disconnect handle is left alone, as a stop command does.
        let _disconnect = session.stop_and_destroy().await;
        session.load_content(vec![Track::new("b", "B", UserId(1))]).await;

        let mut seen = Vec::new();
        while let Ok(message) = rx.try_recv() {
            match message {
                BroadcastMessage::NodeRequest(NodeRequest::StartTrack { track, .. }) => {
                    seen.push(format!("start:{}", track.id))
                }
                BroadcastMessage::NodeRequest(NodeRequest::StopAndDisconnect { .. }) => {
                    seen.push("disconnect".to_string())
                }
                _ => {}
            }
        }
        assert_eq!(seen, vec!["start:a", "disconnect", "start:b"]);
    }
}
