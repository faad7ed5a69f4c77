//! Audio node seam.
//!
//! The scheduler only ever talks to a [`NodeClient`].  Requests are
//! fire-and-forget submissions, put on the wire in call order; only
//! `stop_and_disconnect` hands back a handle for the in-flight disconnect.
//!
//! [`BridgeNode`] is the production client: requests go out as
//! `NodeRequest` frames to bridge clients, and the cached player state is
//! kept in sync from the node's `PlayerUpdate` / `PlayerGone` events.

use crate::BroadcastMessage;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use voice_proto::protocol::{ChannelId, GuildId, NodeEvent, NodeRequest, PlayerSnapshot, Track};

/// Completion of an in-flight stop-and-disconnect.
pub type DisconnectHandle = JoinHandle<anyhow::Result<()>>;

pub trait NodeClient: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn start_track(&self, guild: GuildId, track: &Track);

    fn stop_track(&self, guild: GuildId);

    fn set_paused(&self, guild: GuildId, paused: bool);

    fn set_volume(&self, guild: GuildId, volume: u16);

    fn connect(&self, guild: GuildId, channel: ChannelId);

    /// The request itself must be submitted before this returns, so that
    /// whatever the caller starts next reaches the node after it.
    fn stop_and_disconnect(&self, guild: GuildId) -> DisconnectHandle;

    /// Cached player state.  `None` means the node holds no live player for
    /// this guild (voice connection gone).
    fn player(&self, guild: GuildId) -> Option<PlayerSnapshot>;
}

/// Let a disconnect finish in the background, logging a failure.
pub fn detach_disconnect(guild: GuildId, disconnect: DisconnectHandle) {
    tokio::spawn(async move {
        match disconnect.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(guild = %guild, "disconnect failed: {}", e),
            Err(e) => warn!(guild = %guild, "disconnect task failed: {}", e),
        }
    });
}

pub struct BridgeNode {
    name: String,
    tx: broadcast::Sender<BroadcastMessage>,
    players: RwLock<HashMap<GuildId, PlayerSnapshot>>,
}

impl BridgeNode {
    pub fn new(name: impl Into<String>, tx: broadcast::Sender<BroadcastMessage>) -> Self {
        Self {
            name: name.into(),
            tx,
            players: RwLock::new(HashMap::new()),
        }
    }

    /// Fold a node event into the cached player map.
    pub fn observe(&self, event: &NodeEvent) {
        let mut players = self.players.write().unwrap_or_else(|e| e.into_inner());
        match event {
            NodeEvent::PlayerUpdate {
                guild,
                paused,
                connected,
                position_ms,
            } => {
                players.insert(
                    *guild,
                    PlayerSnapshot {
                        paused: *paused,
                        connected: *connected,
                        position_ms: *position_ms,
                    },
                );
            }
            NodeEvent::PlayerGone { guild } => {
                debug!(guild = %guild, "node dropped player");
                players.remove(guild);
            }
            NodeEvent::TrackStarted { guild, .. } => {
                players.entry(*guild).or_default().position_ms = 0;
            }
            _ => {}
        }
    }

    fn submit(&self, request: NodeRequest) {
        if self.tx.send(BroadcastMessage::NodeRequest(request)).is_err() {
            warn!(node = %self.name, "no bridge client connected, node request dropped");
        }
    }

    fn with_player(&self, guild: GuildId, f: impl FnOnce(&mut PlayerSnapshot)) {
        let mut players = self.players.write().unwrap_or_else(|e| e.into_inner());
        f(players.entry(guild).or_default());
    }
}

impl NodeClient for BridgeNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_track(&self, guild: GuildId, track: &Track) {
        // The node creates a player on first start; mirror that right away.
        self.with_player(guild, |p| p.paused = false);
        self.submit(NodeRequest::StartTrack {
            guild,
            track: track.clone(),
        });
    }

    fn stop_track(&self, guild: GuildId) {
        self.submit(NodeRequest::StopTrack { guild });
    }

    fn set_paused(&self, guild: GuildId, paused: bool) {
        self.with_player(guild, |p| p.paused = paused);
        self.submit(NodeRequest::SetPaused { guild, paused });
    }

    fn set_volume(&self, guild: GuildId, volume: u16) {
        self.submit(NodeRequest::SetVolume { guild, volume });
    }

    fn connect(&self, guild: GuildId, channel: ChannelId) {
        self.submit(NodeRequest::Connect { guild, channel });
    }

    fn stop_and_disconnect(&self, guild: GuildId) -> DisconnectHandle {
        self.players
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&guild);
        let sent = self
            .tx
            .send(BroadcastMessage::NodeRequest(NodeRequest::StopAndDisconnect {
                guild,
            }))
            .map(|_| ())
            .map_err(|_| anyhow::anyhow!("no bridge client connected for disconnect of {}", guild));
        tokio::spawn(async move { sent })
    }

    fn player(&self, guild: GuildId) -> Option<PlayerSnapshot> {
        self.players
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&guild)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bridge_player_cache() {
        let (tx, mut rx) = broadcast::channel(16);
        let node = BridgeNode::new("bridge", tx);
        let guild = GuildId(1);
        assert!(node.player(guild).is_none());

        node.start_track(guild, &Track::new("a", "A", voice_proto::protocol::UserId(2)));
        assert!(node.player(guild).is_some());
        match rx.recv().await.unwrap() {
            BroadcastMessage::NodeRequest(NodeRequest::StartTrack { guild: g, track }) => {
                assert_eq!(g, guild);
                assert_eq!(track.id, "a");
            }
            other => panic!("unexpected broadcast {:?}", other),
        }

        node.observe(&NodeEvent::PlayerUpdate {
            guild,
            paused: true,
            connected: true,
            position_ms: 1_000,
        });
        assert!(node.player(guild).unwrap().paused);

        node.observe(&NodeEvent::PlayerGone { guild });
        assert!(node.player(guild).is_none());
    }

    #[tokio::test]
    async fn test_disconnect_is_on_the_wire_before_the_handle_resolves() {
        let (tx, mut rx) = broadcast::channel(16);
        let node = BridgeNode::new("bridge", tx);
        let guild = GuildId(4);
        let track = Track::new("b", "B", voice_proto::protocol::UserId(2));

        let handle = node.stop_and_disconnect(guild);
        node.start_track(guild, &track);

        let mut ops = Vec::new();
        while let Ok(BroadcastMessage::NodeRequest(request)) = rx.try_recv() {
            ops.push(request);
        }
        assert_eq!(
            ops,
            vec![
                NodeRequest::StopAndDisconnect { guild },
                NodeRequest::StartTrack { guild, track },
            ]
        );
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_without_clients_fails() {
        let (tx, rx) = broadcast::channel(16);
        drop(rx);
        let node = BridgeNode::new("bridge", tx);
        let result = node.stop_and_disconnect(GuildId(3)).await.unwrap();
        assert!(result.is_err());
    }
}
