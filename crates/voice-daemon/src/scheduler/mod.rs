//! Per-session playback scheduler.
//!
//! ```text
//!   node event ──► Scheduler::handle_event ──┬─► QueueScheduler (discrete tracks)
//!                  (shared skeleton)         └─► RadioScheduler (one endless stream)
//!                        │
//!                        └── Playback: node + sink + idle timer + current track
//! ```
//!
//! Both variants get the same [`Playback`] helper and differ only in what
//! they do on load, on end of track and on failure.  Everything here runs
//! under the owning session's lock.

mod queue;
mod radio;

pub use queue::QueueScheduler;
pub use radio::RadioScheduler;

use crate::leave::IdleLeaveTimer;
use crate::node::{DisconnectHandle, NodeClient};
use crate::notify::{correlation_id, NotificationSink};
use crate::session::GuildAudioSession;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error};
use voice_proto::config::GuildSettings;
use voice_proto::protocol::{
    ChannelId, ContentMode, EndReason, GuildId, NodeEvent, Notification, NotificationKind,
    PlayerSnapshot, Track,
};

/// Next play handle.  Process-wide, so a late event from a session that was
/// torn down can never match a play of its successor.
fn next_play_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Plumbing shared by both scheduler variants.
pub struct Playback {
    guild: GuildId,
    node: Arc<dyn NodeClient>,
    sink: Arc<dyn NotificationSink>,
    settings: GuildSettings,
    leave: IdleLeaveTimer,
    session: Weak<GuildAudioSession>,
    /// Local mirror of the track the node is playing.
    current: Option<Track>,
    /// Volume last sent to the node.
    volume: u16,
}

impl Playback {
    pub fn new(
        guild: GuildId,
        node: Arc<dyn NodeClient>,
        sink: Arc<dyn NotificationSink>,
        settings: GuildSettings,
        session: Weak<GuildAudioSession>,
    ) -> Self {
        Self {
            guild,
            node,
            sink,
            volume: settings.default_volume,
            settings,
            leave: IdleLeaveTimer::new(),
            session,
            current: None,
        }
    }

    pub fn guild(&self) -> GuildId {
        self.guild
    }

    pub fn node_name(&self) -> &str {
        self.node.name()
    }

    pub fn settings(&self) -> &GuildSettings {
        &self.settings
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    pub fn player(&self) -> Option<PlayerSnapshot> {
        self.node.player(self.guild)
    }

    pub fn is_paused(&self) -> bool {
        self.player().is_some_and(|p| p.paused)
    }

    /// Start `track` as a new play.  Returns the track as sent, stamped
    /// with its play handle.
    pub fn start_track(&mut self, mut track: Track) -> Track {
        self.leave.cancel();
        track.play_id = next_play_id();
        debug!(
            guild = %self.guild,
            node = %self.node.name(),
            track = %track.qualifier(),
            play = track.play_id,
            "start track"
        );
        self.node.start_track(self.guild, &track);
        self.current = Some(track.clone());
        track
    }

    pub fn stop_track(&self) {
        self.node.stop_track(self.guild);
    }

    pub fn set_paused(&self, paused: bool) {
        self.node.set_paused(self.guild, paused);
    }

    pub fn volume(&self) -> u16 {
        self.volume
    }

    /// Returns the previous volume.
    pub fn set_volume(&mut self, volume: u16) -> u16 {
        self.node.set_volume(self.guild, volume);
        std::mem::replace(&mut self.volume, volume)
    }

    pub fn connect(&self, channel: ChannelId) {
        debug!(guild = %self.guild, channel = channel.0, "connect to voice channel");
        self.node.connect(self.guild, channel);
    }

    pub fn stop_and_disconnect(&mut self) -> DisconnectHandle {
        self.leave.cancel();
        self.current = None;
        // The node throws the player away, volume included.
        self.volume = self.settings.default_volume;
        self.node.stop_and_disconnect(self.guild)
    }

    pub fn notify(&self, notification: Notification) {
        self.sink.notify(notification);
    }

    /// Notification about `track` with the usual track arguments filled in.
    pub fn track_notification(&self, kind: NotificationKind, track: &Track) -> Notification {
        let mut n = Notification::new(self.guild, kind)
            .arg("track", &track.title)
            .arg("requester", track.requester);
        if let Some(uri) = &track.uri {
            n = n.arg("uri", uri);
        }
        n
    }

    /// Arm (or re-arm) the idle-leave timer.
    pub fn arm_leave(&mut self) {
        let session = self.session.clone();
        let after = self.settings.leave_after;
        debug!(guild = %self.guild, secs = after.as_secs(), "arming idle leave");
        self.leave.arm(after, async move {
            if let Some(session) = session.upgrade() {
                session.leave_idle().await;
            }
        });
    }

    pub fn cancel_leave(&mut self) -> bool {
        let cancelled = self.leave.cancel();
        if cancelled {
            debug!(guild = %self.guild, "idle leave cancelled");
        }
        cancelled
    }

    pub fn is_leaving(&self) -> bool {
        self.leave.is_armed()
    }

    pub(crate) fn leave_timer_mut(&mut self) -> &mut IdleLeaveTimer {
        &mut self.leave
    }

    /// Clear the current-track mirror if `track` is the play in progress.
    /// Returns false for events that no longer concern the session.
    fn finish_current(&mut self, track: &Track) -> bool {
        match &self.current {
            Some(current) if current.is_same_play(track) => {
                self.current = None;
                true
            }
            _ => false,
        }
    }
}

/// The two playback variants.
pub enum Scheduler {
    Queue(QueueScheduler),
    Radio(RadioScheduler),
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::Queue(QueueScheduler::default())
    }
}

impl Scheduler {
    pub fn mode(&self) -> ContentMode {
        match self {
            Scheduler::Queue(_) => ContentMode::Queue,
            Scheduler::Radio(_) => ContentMode::Radio,
        }
    }

    pub fn load_content(&mut self, pb: &mut Playback, tracks: Vec<Track>) {
        match self {
            Scheduler::Queue(s) => s.load_content(pb, tracks),
            Scheduler::Radio(s) => s.load_content(pb, tracks),
        }
    }

    /// Only meaningful for queue playback; streams have no repeat concept.
    pub fn set_repeat_count(&mut self, count: u32) {
        if let Scheduler::Queue(s) = self {
            s.set_repeat_count(count);
        }
    }

    pub fn stop_and_destroy(&mut self, pb: &mut Playback) -> DisconnectHandle {
        match self {
            Scheduler::Queue(s) => s.stop_and_destroy(pb),
            Scheduler::Radio(s) => s.stop_and_destroy(pb),
        }
    }

    /// Route one node event.  Player state updates are the node client's
    /// business and are ignored here.
    pub fn handle_event(&mut self, pb: &mut Playback, event: &NodeEvent) {
        match event {
            NodeEvent::TrackStarted { track, .. } => self.on_track_started(pb, track),
            NodeEvent::TrackEnded { track, reason, .. } => self.on_track_ended(pb, track, *reason),
            NodeEvent::TrackStuck {
                track,
                threshold_ms,
                ..
            } => self.on_track_stuck(pb, track, *threshold_ms),
            NodeEvent::TrackException { track, cause, .. } => {
                self.on_track_exception(pb, track, cause.as_deref())
            }
            NodeEvent::PlayerUpdate { .. } | NodeEvent::PlayerGone { .. } => {}
        }
    }

    pub fn on_track_started(&mut self, pb: &mut Playback, track: &Track) {
        pb.cancel_leave();
        if pb.current.is_none() {
            pb.current = Some(track.clone());
        }
        match self {
            Scheduler::Queue(s) => s.on_track_started(pb, track),
            Scheduler::Radio(s) => s.on_track_started(pb, track),
        }
    }

    pub fn on_track_ended(&mut self, pb: &mut Playback, track: &Track, reason: EndReason) {
        if !pb.finish_current(track) {
            debug!(
                guild = %pb.guild,
                track = %track.qualifier(),
                ?reason,
                "ignoring end of a track that is no longer current"
            );
            return;
        }
        match self {
            Scheduler::Queue(s) => s.on_track_ended(pb, track, reason),
            Scheduler::Radio(s) => s.on_track_ended(pb, track, reason),
        }
    }

    pub fn on_track_stuck(&mut self, pb: &mut Playback, track: &Track, threshold_ms: u64) {
        let cause = format!("track stuck for {} ms", threshold_ms);
        self.on_track_failure(pb, track, &cause);
    }

    pub fn on_track_exception(&mut self, pb: &mut Playback, track: &Track, cause: Option<&str>) {
        self.on_track_failure(pb, track, cause.unwrap_or("unknown cause"));
    }

    /// Stuck and exception share this path.  The failing track is abandoned,
    /// never retried, so a later end event for it is ignored as stale.  A
    /// failure of an earlier play is reported but leaves the current one
    /// alone.
    fn on_track_failure(&mut self, pb: &mut Playback, track: &Track, cause: &str) {
        let correlation = correlation_id();
        error!(
            guild = %pb.guild,
            node = %pb.node.name(),
            track = %track.qualifier(),
            play = track.play_id,
            correlation = %correlation,
            "unexpected issue while playing: {}",
            cause
        );
        if !pb.finish_current(track) {
            debug!(
                guild = %pb.guild,
                track = %track.qualifier(),
                "failed track is no longer current"
            );
            pb.notify(
                pb.track_notification(NotificationKind::PlaybackIssue, track)
                    .correlation(correlation),
            );
            return;
        }
        match self {
            Scheduler::Queue(s) => s.on_track_error(pb, track, correlation),
            Scheduler::Radio(s) => s.on_track_error(pb, track, correlation),
        }
    }
}
