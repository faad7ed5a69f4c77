use super::Playback;
use crate::error::CommandError;
use crate::node::DisconnectHandle;
use crate::queue::TrackQueue;
use crate::repeat::RepeatPolicy;
use tracing::{debug, info};
use voice_proto::protocol::{
    ActionHint, EndReason, Notification, NotificationKind, RepeatMode, Track,
};

/// Discrete-queue playback: finite tracks, repeat policy, auto-advance.
#[derive(Debug)]
pub struct QueueScheduler {
    queue: TrackQueue,
    repeat: RepeatPolicy,
    /// Whether the next start gets announced.  Cleared while repeating so
    /// the same track is not re-announced on every loop.
    announce_next: bool,
}

impl Default for QueueScheduler {
    fn default() -> Self {
        Self {
            queue: TrackQueue::new(),
            repeat: RepeatPolicy::default(),
            announce_next: true,
        }
    }
}

impl QueueScheduler {
    pub fn queue(&self) -> &TrackQueue {
        &self.queue
    }

    pub fn repeat(&self) -> &RepeatPolicy {
        &self.repeat
    }

    pub fn announces_next(&self) -> bool {
        self.announce_next
    }

    pub fn load_content(&mut self, pb: &mut Playback, tracks: Vec<Track>) {
        if tracks.is_empty() {
            return;
        }
        pb.cancel_leave();
        let nothing_playing = !pb.is_playing();
        if tracks.len() == 1 {
            let mut tracks = tracks;
            let track = tracks.remove(0);
            if nothing_playing {
                pb.start_track(track);
            } else {
                debug!(guild = %pb.guild(), track = %track.qualifier(), "track queued");
                self.queue.offer(track);
            }
            return;
        }
        debug!(guild = %pb.guild(), count = tracks.len(), "tracks queued");
        self.queue.add_all(tracks);
        if nothing_playing {
            self.next_track(pb);
        }
    }

    pub fn set_repeat_count(&mut self, count: u32) {
        self.repeat.count_mut().set(count);
        if count > 0 {
            self.announce_next = false;
        }
    }

    pub fn stop_and_destroy(&mut self, pb: &mut Playback) -> DisconnectHandle {
        self.hard_reset();
        pb.stop_and_disconnect()
    }

    pub fn on_track_started(&mut self, pb: &mut Playback, track: &Track) {
        if pb.is_paused() {
            info!(
                guild = %pb.guild(),
                node = %pb.node_name(),
                track = %track.qualifier(),
                "start playing audio track while player is paused"
            );
            pb.notify(
                pb.track_notification(NotificationKind::TrackStartedPaused, track)
                    .action(ActionHint::Resume),
            );
        } else if self.announce_next {
            info!(
                guild = %pb.guild(),
                node = %pb.node_name(),
                track = %track.qualifier(),
                "start playing audio track"
            );
            pb.notify(pb.track_notification(NotificationKind::TrackStarted, track));
        }
    }

    pub fn on_track_ended(&mut self, pb: &mut Playback, track: &Track, reason: EndReason) {
        if self.repeat.mode() == RepeatMode::Track {
            self.announce_next = false;
            pb.start_track(track.fresh_clone());
            return;
        }
        if self.repeat.mode() == RepeatMode::Queue {
            self.queue.offer(track.fresh_clone());
            if reason.may_start_next() {
                self.next_track(pb);
            }
            return;
        }
        if self.repeat.count().is_active() {
            pb.start_track(track.fresh_clone());
            self.announce_next = false;
            if let Some(current_repeat) = self.repeat.count_mut().decrease() {
                let count = *self.repeat.count();
                info!(
                    guild = %pb.guild(),
                    node = %pb.node_name(),
                    track = %track.qualifier(),
                    "repeat {} of {} ({} left)",
                    current_repeat,
                    count.total(),
                    count.remaining()
                );
                pb.notify(
                    pb.track_notification(NotificationKind::RepeatingTrack, track)
                        .arg("current_repeat", current_repeat)
                        .arg("total", count.total())
                        .arg("remaining", count.remaining()),
                );
            }
            return;
        }
        if self.queue.is_empty() {
            let connection_interrupted = pb.player().is_none();
            self.announce_next = true;
            if connection_interrupted {
                info!(guild = %pb.guild(), "queue ended, connection interrupted, resetting session");
                self.hard_reset();
            } else {
                info!(guild = %pb.guild(), "queue ended");
                pb.arm_leave();
            }
            pb.notify(Notification::new(pb.guild(), NotificationKind::QueueEnded));
            return;
        }
        if reason.may_start_next() {
            self.announce_next = true;
            self.next_track(pb);
        }
    }

    /// The failed track was the current one and is gone already; move on
    /// or go idle.
    pub fn on_track_error(&mut self, pb: &mut Playback, track: &Track, correlation: String) {
        if self.queue.is_empty() {
            pb.arm_leave();
        } else {
            self.announce_next = true;
            self.next_track(pb);
        }
        pb.notify(
            pb.track_notification(NotificationKind::PlaybackIssue, track)
                .correlation(correlation),
        );
    }

    // ── command helpers ───────────────────────────────────────────────────────

    /// Skip the current track.  A skip means "move on", so single-track
    /// repeat and the repeat counter are dropped; queue repeat keeps the
    /// skipped track in rotation.
    pub fn skip(&mut self, pb: &mut Playback) -> (Option<Track>, Option<Track>) {
        let skipped = pb.current().cloned();
        self.drop_track_repeats();
        if self.repeat.mode() == RepeatMode::Queue {
            if let Some(s) = &skipped {
                self.queue.offer(s.fresh_clone());
            }
        }
        self.announce_next = true;
        match self.next_track(pb) {
            Some(next) => (skipped, Some(next)),
            None => {
                pb.stop_track();
                (skipped, None)
            }
        }
    }

    /// Jump to the 1-based queue `position`, dropping what comes before it.
    pub fn skip_to(&mut self, pb: &mut Playback, position: usize) -> Result<Track, CommandError> {
        let len = self.queue.len();
        let (passed, target) = self
            .queue
            .skip_to(position)
            .ok_or(CommandError::PositionOutOfBounds { len })?;
        self.drop_track_repeats();
        if self.repeat.mode() == RepeatMode::Queue {
            if let Some(current) = pb.current() {
                self.queue.offer(current.fresh_clone());
            }
            self.queue.add_all(passed.iter().map(Track::fresh_clone));
        }
        self.announce_next = true;
        Ok(pb.start_track(target))
    }

    pub fn toggle_repeat(&mut self, mode: RepeatMode) -> RepeatMode {
        self.repeat.toggle(mode)
    }

    pub fn shuffle(&mut self) -> Result<usize, CommandError> {
        if self.queue.len() < 2 {
            return Err(CommandError::QueueTooShort);
        }
        self.queue.shuffle();
        Ok(self.queue.len())
    }

    pub fn clear_queue(&mut self) -> usize {
        self.queue.clear()
    }

    fn drop_track_repeats(&mut self) {
        if self.repeat.mode() == RepeatMode::Track {
            self.repeat.set_mode(RepeatMode::None);
        }
        self.repeat.count_mut().clear();
    }

    fn hard_reset(&mut self) {
        self.queue.clear();
        self.repeat.clear();
        self.announce_next = true;
    }

    fn next_track(&mut self, pb: &mut Playback) -> Option<Track> {
        let next = self.queue.poll()?;
        Some(pb.start_track(next))
    }
}
