use crate::BroadcastMessage;
use tokio::sync::broadcast;
use tracing::debug;
use voice_proto::protocol::Notification;

/// Outbound user-facing messages.  The scheduler picks the kind and the
/// arguments; text belongs to whoever renders it.  Never awaited.
pub trait NotificationSink: Send + Sync + 'static {
    fn notify(&self, notification: Notification);
}

/// Publishes notifications to every connected bridge client.
pub struct BroadcastSink {
    tx: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastSink {
    pub fn new(tx: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { tx }
    }
}

impl NotificationSink for BroadcastSink {
    fn notify(&self, notification: Notification) {
        let kind = notification.kind;
        let guild = notification.guild;
        // No receivers is fine: nobody is listening yet.
        if self
            .tx
            .send(BroadcastMessage::Notification(notification))
            .is_err()
        {
            debug!(guild = %guild, ?kind, "notification dropped, no bridge clients");
        }
    }
}

/// Reference attached to diagnostic notifications so a user report can be
/// matched with the daemon log line.
pub fn correlation_id() -> String {
    format!(
        "{}-{:06x}",
        chrono::Utc::now().format("%Y%m%d%H%M%S"),
        rand::random::<u32>() & 0x00ff_ffff
    )
}
