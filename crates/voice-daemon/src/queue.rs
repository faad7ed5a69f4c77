//! Pending-track queue for one guild.
//!
//! Insertion order is play order.  The queue never holds the track that is
//! currently playing; the scheduler pops it before starting it.

use rand::seq::SliceRandom;
use std::collections::VecDeque;
use voice_proto::protocol::Track;

#[derive(Debug, Default)]
pub struct TrackQueue {
    tracks: VecDeque<Track>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&mut self, track: Track) {
        self.tracks.push_back(track);
    }

    pub fn add_all(&mut self, tracks: impl IntoIterator<Item = Track>) {
        self.tracks.extend(tracks);
    }

    pub fn poll(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    pub fn peek(&self) -> Option<&Track> {
        self.tracks.front()
    }

    /// Returns how many tracks were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.tracks.len();
        self.tracks.clear();
        n
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn shuffle(&mut self) {
        self.tracks
            .make_contiguous()
            .shuffle(&mut rand::thread_rng());
    }

    /// Drop everything before the 1-based `position` and pop the track at it.
    /// Returns the dropped tracks and the popped one, or `None` when the
    /// position is out of range (queue untouched).
    pub fn skip_to(&mut self, position: usize) -> Option<(Vec<Track>, Track)> {
        if position == 0 || position > self.tracks.len() {
            return None;
        }
        let skipped: Vec<Track> = self.tracks.drain(..position - 1).collect();
        let target = self.tracks.pop_front()?;
        Some((skipped, target))
    }
}
