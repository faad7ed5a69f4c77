//! DaemonCore routes every inbound item to the guild it concerns.
//!
//! Bridge clients send `DaemonEvent` messages to this loop.  Each guild gets
//! its own lane: a task fed by an mpsc channel that applies node events and
//! commands for that guild in arrival order.  Lanes of different guilds run
//! in parallel; the only shared state is the session registry, the bridge
//! node's player cache and the listener registry.
//!
//! A session that went idle (left on its own or stopped) asks to be retired.
//! The retire request travels down the guild's lane behind everything
//! already routed there, and the lane closes after it.  A lane opened later
//! for the same guild waits for the old one to finish first.
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use voice_proto::config::Config;
use voice_proto::protocol::{
    Command, CommandOutcome, CommandReply, CommandRequest, GuildId, Message, NodeEvent, Track,
};

use crate::commands;
use crate::listeners::{ListenKey, ListenKind, Listener, ListenerRegistry};
use crate::node::BridgeNode;
use crate::notify::BroadcastSink;
use crate::session::SessionRegistry;
use crate::BroadcastMessage;

const LANE_CAPACITY: usize = 64;
const RETIRE_CAPACITY: usize = 256;

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// Push event from the audio node.
    Node(NodeEvent),
    /// Command from a frontend; the outcome goes back on `reply_to`.
    Command {
        request: CommandRequest,
        reply_to: mpsc::Sender<Message>,
    },
    ClientConnected,
    ClientCountChanged(usize),
    /// Shutdown requested.
    Shutdown,
}

#[derive(Debug)]
enum LaneItem {
    Node(NodeEvent),
    Command {
        request: CommandRequest,
        reply_to: mpsc::Sender<Message>,
    },
    /// Drop the guild's session if it is still idle.
    Retire,
}

struct Lane {
    tx: mpsc::Sender<LaneItem>,
    task: JoinHandle<()>,
}

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub struct DaemonCore {
    shared: Arc<Shared>,
    lanes: HashMap<GuildId, Lane>,
    /// Lanes closed by a retire request that may still be draining.
    retiring: HashMap<GuildId, JoinHandle<()>>,
    retire_rx: mpsc::Receiver<GuildId>,
    clients: usize,
}

/// State every lane works against.
struct Shared {
    config: Arc<Config>,
    registry: Arc<SessionRegistry>,
    bridge: Arc<BridgeNode>,
    listeners: ListenerRegistry<ListenKey, Track>,
}

impl DaemonCore {
    pub fn new(config: Config, broadcast_tx: broadcast::Sender<BroadcastMessage>) -> Self {
        let config = Arc::new(config);
        let bridge = Arc::new(BridgeNode::new("bridge", broadcast_tx.clone()));
        let sink = Arc::new(BroadcastSink::new(broadcast_tx));
        let (retire_tx, retire_rx) = mpsc::channel(RETIRE_CAPACITY);
        let registry =
            SessionRegistry::new(bridge.clone(), sink, config.clone()).with_retire(retire_tx);
        Self {
            shared: Arc::new(Shared {
                config,
                registry: Arc::new(registry),
                bridge,
                listeners: ListenerRegistry::new(),
            }),
            lanes: HashMap::new(),
            retiring: HashMap::new(),
            retire_rx,
            clients: 0,
        }
    }

    /// The live sessions.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.shared.registry.clone()
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or the event channel is closed.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");

        loop {
            let event = tokio::select! {
                event = event_rx.recv() => event,
                Some(guild) = self.retire_rx.recv() => {
                    self.retire(guild).await;
                    continue;
                }
            };
            match event {
                None => {
                    info!("DaemonCore: event channel closed, shutting down");
                    break;
                }
                Some(DaemonEvent::Shutdown) => {
                    info!("DaemonCore: shutdown requested");
                    break;
                }
                Some(DaemonEvent::Node(event)) => {
                    let guild = event.guild();
                    self.route(guild, LaneItem::Node(event)).await;
                }
                Some(DaemonEvent::Command { request, reply_to }) => {
                    let guild = request.ctx.guild;
                    self.route(guild, LaneItem::Command { request, reply_to })
                        .await;
                }
                Some(DaemonEvent::ClientConnected) => {
                    debug!("DaemonCore: bridge client connected");
                }
                Some(DaemonEvent::ClientCountChanged(count)) => {
                    if count == 0 && self.clients > 0 {
                        warn!("DaemonCore: last bridge client gone, node requests will be dropped");
                    }
                    self.clients = count;
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    async fn route(&mut self, guild: GuildId, item: LaneItem) {
        let tx = match self.lanes.get(&guild) {
            Some(lane) => lane.tx.clone(),
            None => self.open_lane(guild),
        };
        if let Err(mpsc::error::SendError(item)) = tx.send(item).await {
            // Lane task died; start a fresh one and retry once.
            warn!(guild = %guild, "guild lane closed, restarting");
            self.lanes.remove(&guild);
            let tx = self.open_lane(guild);
            let _ = tx.send(item).await;
        }
    }

    fn open_lane(&mut self, guild: GuildId) -> mpsc::Sender<LaneItem> {
        let previous = self.retiring.remove(&guild);
        let lane = spawn_lane(guild, self.shared.clone(), previous);
        let tx = lane.tx.clone();
        self.lanes.insert(guild, lane);
        tx
    }

    /// Close the guild's lane behind a retire request.
    async fn retire(&mut self, guild: GuildId) {
        self.retiring.retain(|_, task| !task.is_finished());
        let Some(lane) = self.lanes.remove(&guild) else {
            // No lane routed anything yet; nothing can be queued behind us.
            self.shared.retire(guild).await;
            return;
        };
        debug!(guild = %guild, "retiring guild lane");
        if lane.tx.send(LaneItem::Retire).await.is_err() {
            debug!(guild = %guild, "guild lane already closed");
        }
        self.retiring.insert(guild, lane.task);
    }

    async fn cleanup(&mut self) {
        self.lanes.clear();
        for (_, task) in self.retiring.drain() {
            let _ = task.await;
        }
        let sessions = self.shared.registry.drain().await;
        info!("DaemonCore: tearing down {} session(s)", sessions.len());
        for session in sessions {
            let disconnect = session.stop_and_destroy().await;
            if let Ok(Err(e)) = disconnect.await {
                debug!(guild = %session.guild(), "disconnect on shutdown: {}", e);
            }
        }
    }
}

// ── guild lanes ───────────────────────────────────────────────────────────────

fn spawn_lane(guild: GuildId, shared: Arc<Shared>, previous: Option<JoinHandle<()>>) -> Lane {
    let (tx, mut rx) = mpsc::channel::<LaneItem>(LANE_CAPACITY);
    debug!(guild = %guild, "starting guild lane");
    let task = tokio::spawn(async move {
        if let Some(previous) = previous {
            // Items for the old lane go first.
            let _ = previous.await;
        }
        while let Some(item) = rx.recv().await {
            match item {
                LaneItem::Node(event) => shared.on_node_event(event).await,
                LaneItem::Command { request, reply_to } => {
                    shared.on_command(request, reply_to).await
                }
                LaneItem::Retire => shared.retire(guild).await,
            }
        }
        debug!(guild = %guild, "guild lane stopped");
    });
    Lane { tx, task }
}

impl Shared {
    /// Drop the guild's session unless something arrived since it asked.
    async fn retire(&self, guild: GuildId) {
        let Some(session) = self.registry.get(guild).await else {
            return;
        };
        let inner = session.lock().await;
        if inner.is_idle() {
            // Still under the session lock, so nothing can start on it now.
            self.registry.remove(guild).await;
        } else {
            debug!(guild = %guild, "session busy again, keeping it");
        }
    }

    async fn on_node_event(&self, event: NodeEvent) {
        self.bridge.observe(&event);
        let guild = event.guild();
        let Some(session) = self.registry.get(guild).await else {
            debug!(guild = %guild, "node event for guild without session: {:?}", event);
            return;
        };
        session.handle_event(&event).await;
        if let NodeEvent::TrackStarted { track, .. } = event {
            self.listeners
                .dispatch(&(guild, ListenKind::TrackStarted), track);
        }
    }

    async fn on_command(&self, request: CommandRequest, reply_to: mpsc::Sender<Message>) {
        let CommandRequest {
            request_id,
            ctx,
            command,
        } = request;
        let guild = ctx.guild;
        debug!(guild = %guild, author = %ctx.author, request_id, "command {}", command.name());

        let session = self.registry.get_or_create(guild).await;
        // Registered before executing so a fast start event cannot slip by.
        let listener = matches!(command, Command::PlayRadio { .. }).then(|| {
            self.listeners.listen(
                (guild, ListenKind::TrackStarted),
                Some(self.config.playback.radio_start_timeout()),
            )
        });

        let result = commands::execute(&session, &ctx, command).await;
        let outcome = match (result, listener) {
            (Ok(CommandReply::RadioPending { station }), Some(listener)) => {
                tokio::spawn(reply_when_started(request_id, station, listener, reply_to));
                return;
            }
            (result, listener) => {
                if let Some(listener) = listener {
                    listener.cancel_token().cancel();
                }
                match result {
                    Ok(reply) => done(reply),
                    Err(e) => CommandOutcome::Rejected {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    },
                }
            }
        };
        send_reply(&reply_to, request_id, outcome).await;
    }
}

async fn reply_when_started(
    request_id: u64,
    station: String,
    listener: Listener<Track>,
    reply_to: mpsc::Sender<Message>,
) {
    let reply = match listener.recv().await {
        Some(_) => CommandReply::RadioStarted { station },
        None => {
            info!(request_id, station = %station, "radio start not confirmed in time");
            CommandReply::RadioPending { station }
        }
    };
    send_reply(&reply_to, request_id, done(reply)).await;
}

fn done(reply: CommandReply) -> CommandOutcome {
    CommandOutcome::Done { reply }
}

async fn send_reply(reply_to: &mpsc::Sender<Message>, request_id: u64, outcome: CommandOutcome) {
    if reply_to
        .send(Message::Reply {
            request_id,
            outcome,
        })
        .await
        .is_err()
    {
        debug!(request_id, "reply dropped, client gone");
    }
}
