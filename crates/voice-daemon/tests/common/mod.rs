#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use voice_daemon::node::{DisconnectHandle, NodeClient};
use voice_daemon::notify::NotificationSink;
use voice_daemon::session::GuildAudioSession;
use voice_proto::config::GuildSettings;
use voice_proto::protocol::{
    ChannelId, EndReason, GuildId, NodeEvent, Notification, NotificationKind, PlayerSnapshot,
    Track, UserId,
};

pub const GUILD: GuildId = GuildId(1);
pub const ALICE: UserId = UserId(11);
pub const BOB: UserId = UserId(12);

#[derive(Debug, Clone, PartialEq)]
pub enum NodeCall {
    Start(String),
    Stop,
    Pause(bool),
    Connect(ChannelId),
    Disconnect,
    Volume(u16),
}

/// Records every request and keeps a player per guild like a real node.
#[derive(Default)]
pub struct FakeNode {
    calls: Mutex<Vec<NodeCall>>,
    players: Mutex<HashMap<GuildId, PlayerSnapshot>>,
    /// Tracks as the daemon sent them, play handles included.
    plays: Mutex<Vec<Track>>,
}

impl FakeNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<NodeCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Ids of started tracks, in order.
    pub fn started(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                NodeCall::Start(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// The most recent play of `id`, as the node would echo it back.
    pub fn play(&self, id: &str) -> Track {
        self.plays
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|t| t.id == id)
            .cloned()
            .unwrap_or_else(|| panic!("{} was never started", id))
    }

    /// Every play of `id`, oldest first.
    pub fn plays_of(&self, id: &str) -> Vec<Track> {
        self.plays
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.id == id)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Simulate the voice connection going away.
    pub fn drop_player(&self, guild: GuildId) {
        self.players.lock().unwrap().remove(&guild);
    }

    pub fn pause_player(&self, guild: GuildId) {
        self.players.lock().unwrap().entry(guild).or_default().paused = true;
    }

    fn record(&self, call: NodeCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl NodeClient for FakeNode {
    fn name(&self) -> &str {
        "fake"
    }

    fn start_track(&self, guild: GuildId, track: &Track) {
        self.players.lock().unwrap().entry(guild).or_default();
        self.plays.lock().unwrap().push(track.clone());
        self.record(NodeCall::Start(track.id.clone()));
    }

    fn stop_track(&self, _guild: GuildId) {
        self.record(NodeCall::Stop);
    }

    fn set_paused(&self, guild: GuildId, paused: bool) {
        self.players.lock().unwrap().entry(guild).or_default().paused = paused;
        self.record(NodeCall::Pause(paused));
    }

    fn set_volume(&self, _guild: GuildId, volume: u16) {
        self.record(NodeCall::Volume(volume));
    }

    fn connect(&self, _guild: GuildId, channel: ChannelId) {
        self.record(NodeCall::Connect(channel));
    }

    fn stop_and_disconnect(&self, guild: GuildId) -> DisconnectHandle {
        self.players.lock().unwrap().remove(&guild);
        self.record(NodeCall::Disconnect);
        tokio::spawn(async { Ok(()) })
    }

    fn player(&self, guild: GuildId) -> Option<PlayerSnapshot> {
        self.players.lock().unwrap().get(&guild).copied()
    }
}

#[derive(Default)]
pub struct RecordingSink {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn all(&self) -> Vec<Notification> {
        self.seen.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.all().into_iter().map(|n| n.kind).collect()
    }

    pub fn clear(&self) {
        self.seen.lock().unwrap().clear();
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: Notification) {
        self.seen.lock().unwrap().push(notification);
    }
}

pub fn settings() -> GuildSettings {
    GuildSettings {
        music_text_channel: None,
        leave_after: Duration::from_secs(120),
        min_repeats: 1,
        max_repeats: 30,
        default_volume: 100,
        max_volume: 150,
        vote_ratio_percent: 50,
        vote_timeout: Duration::from_secs(60),
    }
}

pub fn session(node: &Arc<FakeNode>, sink: &Arc<RecordingSink>) -> Arc<GuildAudioSession> {
    GuildAudioSession::new(GUILD, node.clone(), sink.clone(), settings())
}

pub fn track(id: &str) -> Track {
    let mut t = Track::new(id, format!("Track {}", id), ALICE);
    t.duration_ms = Some(180_000);
    t
}

pub fn started(t: &Track) -> NodeEvent {
    NodeEvent::TrackStarted {
        guild: GUILD,
        track: t.clone(),
    }
}

pub fn ended(t: &Track, reason: EndReason) -> NodeEvent {
    NodeEvent::TrackEnded {
        guild: GUILD,
        track: t.clone(),
        reason,
    }
}

/// Let spawned tasks (idle timer, disconnects) run to completion.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
