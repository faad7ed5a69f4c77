use super::Playback;
use crate::node::{detach_disconnect, DisconnectHandle};
use tracing::info;
use voice_proto::protocol::{
    ActionHint, EndReason, Notification, NotificationKind, RadioStation, Track,
};

/// Continuous-stream playback.  One indefinite track, no queue, no repeats.
#[derive(Debug)]
pub struct RadioScheduler {
    station: RadioStation,
}

impl RadioScheduler {
    pub fn new(station: RadioStation) -> Self {
        Self { station }
    }

    pub fn station(&self) -> &RadioStation {
        &self.station
    }

    pub fn load_content(&mut self, pb: &mut Playback, tracks: Vec<Track>) {
        if let Some(stream) = tracks.into_iter().next() {
            pb.cancel_leave();
            pb.start_track(stream);
        }
    }

    pub fn stop_and_destroy(&mut self, pb: &mut Playback) -> DisconnectHandle {
        pb.stop_and_disconnect()
    }

    pub fn on_track_started(&mut self, pb: &mut Playback, _track: &Track) {
        info!(
            guild = %pb.guild(),
            node = %pb.node_name(),
            station = %self.station.name,
            url = %self.station.stream_url,
            "start playing radio station"
        );
        pb.notify(
            self.notification(pb, NotificationKind::RadioStarted)
                .action(ActionHint::StopRadio)
                .action(ActionHint::RadioInfo),
        );
    }

    pub fn on_track_ended(&mut self, pb: &mut Playback, _track: &Track, reason: EndReason) {
        pb.arm_leave();
        info!(
            guild = %pb.guild(),
            node = %pb.node_name(),
            station = %self.station.name,
            ?reason,
            "stop playing radio station"
        );
        pb.notify(
            self.notification(pb, NotificationKind::RadioStopped)
                .action(ActionHint::PlayRadio),
        );
    }

    /// A broken stream cannot be resumed: tear the session down and go idle.
    pub fn on_track_error(&mut self, pb: &mut Playback, _track: &Track, correlation: String) {
        let disconnect = self.stop_and_destroy(pb);
        detach_disconnect(pb.guild(), disconnect);
        pb.arm_leave();
        pb.notify(
            self.notification(pb, NotificationKind::RadioIssue)
                .correlation(correlation),
        );
    }

    fn notification(&self, pb: &Playback, kind: NotificationKind) -> Notification {
        Notification::new(pb.guild(), kind).arg("station", &self.station.name)
    }
}
