use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Current bridge protocol version.  Bump this when the wire format changes in
/// a breaking way.  Bridge clients check this on connect and can refuse to
/// talk to an incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

// ── identifiers ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuildId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

/// Text or voice channel id.  Both live in the same snowflake space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<#{}>", self.0)
    }
}

// ── tracks ────────────────────────────────────────────────────────────────────

/// A playable unit resolved by the node.  `id` is the node's encoded track
/// identity; clones produced for repeats share it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Who asked for this track.
    pub requester: UserId,
    /// Playback position the node should start from.
    #[serde(default)]
    pub position_ms: u64,
    /// Handle of one play, stamped by the daemon on every start and echoed
    /// back by the node in track events.  0 on tracks that were never
    /// started.
    #[serde(default)]
    pub play_id: u64,
}

impl Track {
    pub fn new(id: impl Into<String>, title: impl Into<String>, requester: UserId) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            uri: None,
            duration_ms: None,
            requester,
            position_ms: 0,
            play_id: 0,
        }
    }

    /// A copy that plays from the beginning as a new play.  The original is
    /// left untouched because history and notifications may still hold it.
    pub fn fresh_clone(&self) -> Self {
        Self {
            position_ms: 0,
            play_id: 0,
            ..self.clone()
        }
    }

    /// Short human qualifier used in log lines, e.g. `"Title (3:25)"`.
    pub fn qualifier(&self) -> String {
        match self.duration_ms {
            Some(ms) => {
                let secs = ms / 1000;
                format!("{} ({}:{:02})", self.title, secs / 60, secs % 60)
            }
            None => format!("{} (stream)", self.title),
        }
    }

    /// Same content, whichever play.
    pub fn is_same(&self, other: &Track) -> bool {
        self.id == other.id
    }

    /// Same play of the same content.  Two queue entries of one song, or a
    /// repeat of it, are different plays.
    pub fn is_same_play(&self, other: &Track) -> bool {
        self.play_id != 0 && self.play_id == other.play_id && self.is_same(other)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioStation {
    pub name: String,
    pub stream_url: String,
}

// ── node events / requests ────────────────────────────────────────────────────

/// Why the node stopped playing a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Track played to the end.
    Finished,
    /// Track failed to load.
    LoadFailed,
    /// Stopped by a user request.
    Stopped,
    /// Another track was started in its place.
    Replaced,
    /// Player was cleaned up by the node.
    Cleanup,
}

impl EndReason {
    /// Whether the scheduler may auto-advance to the next queued track.
    pub fn may_start_next(self) -> bool {
        matches!(self, EndReason::Finished | EndReason::LoadFailed)
    }
}

/// Push events emitted by the audio node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NodeEvent {
    TrackStarted {
        guild: GuildId,
        track: Track,
    },
    TrackEnded {
        guild: GuildId,
        track: Track,
        reason: EndReason,
    },
    TrackStuck {
        guild: GuildId,
        track: Track,
        threshold_ms: u64,
    },
    TrackException {
        guild: GuildId,
        track: Track,
        #[serde(default)]
        cause: Option<String>,
    },
    /// Periodic player state.  Keeps the daemon's cached player in sync.
    PlayerUpdate {
        guild: GuildId,
        paused: bool,
        connected: bool,
        #[serde(default)]
        position_ms: u64,
    },
    /// The node dropped the player entirely (voice connection gone).
    PlayerGone {
        guild: GuildId,
    },
}

impl NodeEvent {
    pub fn guild(&self) -> GuildId {
        match self {
            NodeEvent::TrackStarted { guild, .. }
            | NodeEvent::TrackEnded { guild, .. }
            | NodeEvent::TrackStuck { guild, .. }
            | NodeEvent::TrackException { guild, .. }
            | NodeEvent::PlayerUpdate { guild, .. }
            | NodeEvent::PlayerGone { guild } => *guild,
        }
    }
}

/// Requests the daemon sends to the node.  Fire-and-forget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NodeRequest {
    StartTrack { guild: GuildId, track: Track },
    StopTrack { guild: GuildId },
    SetPaused { guild: GuildId, paused: bool },
    SetVolume { guild: GuildId, volume: u16 },
    Connect { guild: GuildId, channel: ChannelId },
    StopAndDisconnect { guild: GuildId },
}

/// Cached player state as last reported by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub paused: bool,
    pub connected: bool,
    pub position_ms: u64,
}

// ── command context ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceChannelKind {
    Voice,
    Stage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceChannel {
    pub id: ChannelId,
    pub kind: VoiceChannelKind,
}

/// The bot's own voice state in the guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BotVoiceState {
    #[serde(default)]
    pub channel: Option<ChannelId>,
    #[serde(default)]
    pub server_muted: bool,
    /// Members in the bot's voice channel, the bot itself not counted.
    #[serde(default)]
    pub listeners: usize,
}

/// Everything the frontend resolved about one command invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandContext {
    pub guild: GuildId,
    pub author: UserId,
    pub text_channel: ChannelId,
    /// `None` when the invoker is not connected to voice at all.
    #[serde(default)]
    pub voice: Option<VoiceChannel>,
    #[serde(default)]
    pub bot_voice: BotVoiceState,
    #[serde(default)]
    pub afk_channel: Option<ChannelId>,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub is_dj: bool,
}

// ── commands ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Play { tracks: Vec<Track> },
    Skip,
    /// 1-based position in the queue.
    SkipTo { position: usize },
    Repeat { count: u32 },
    LoopTrack,
    LoopQueue,
    Pause,
    Resume,
    Shuffle,
    ClearQueue,
    Stop,
    PlayRadio { station: RadioStation, track: Track },
    StopRadio,
    /// Player volume in node units; `None` restores the default.
    Volume { units: Option<u16> },
    /// Ask the listeners to decide on `action`.
    Vote { action: VoteAction },
    Status,
}

/// What a vote decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VoteAction {
    Skip,
    /// 1-based position in the queue.
    SkipTo { position: usize },
    Shuffle,
}

impl VoteAction {
    /// The command that runs once the vote passes.
    pub fn command(self) -> Command {
        match self {
            VoteAction::Skip => Command::Skip,
            VoteAction::SkipTo { position } => Command::SkipTo { position },
            VoteAction::Shuffle => Command::Shuffle,
        }
    }
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Play { .. } => "play",
            Command::Skip => "skip",
            Command::SkipTo { .. } => "skipto",
            Command::Repeat { .. } => "repeat",
            Command::LoopTrack => "loop",
            Command::LoopQueue => "loopqueue",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Shuffle => "shuffle",
            Command::ClearQueue => "clear",
            Command::Stop => "stop",
            Command::PlayRadio { .. } => "playradio",
            Command::StopRadio => "stopradio",
            Command::Volume { .. } => "volume",
            Command::Vote { action } => match action {
                VoteAction::Skip => "vskip",
                VoteAction::SkipTo { .. } => "vskipto",
                VoteAction::Shuffle => "vshuffle",
            },
            Command::Status => "status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub request_id: u64,
    pub ctx: CommandContext,
    pub command: Command,
}

// ── session state ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    #[default]
    None,
    /// Repeat the current track forever.
    Track,
    /// Re-append every finished track to the queue tail.
    Queue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentMode {
    #[default]
    Queue,
    Radio,
}

/// Derived session state.  Never stored, always computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Empty,
    Playing,
    Paused,
    Leaving,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub guild: GuildId,
    pub mode: ContentMode,
    pub state: SessionState,
    pub current: Option<Track>,
    pub queue: Vec<Track>,
    pub repeat_mode: RepeatMode,
    pub repeats_remaining: u32,
    #[serde(default)]
    pub radio_station: Option<String>,
    #[serde(default)]
    pub volume: u16,
}

// ── notifications ─────────────────────────────────────────────────────────────

/// What happened.  Rendering and localisation belong to the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TrackStarted,
    TrackStartedPaused,
    RepeatingTrack,
    QueueEnded,
    PlaybackIssue,
    RadioStarted,
    RadioStopped,
    RadioIssue,
    LeftIdle,
}

/// Follow-up command the frontend may offer next to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionHint {
    Resume,
    StopRadio,
    RadioInfo,
    PlayRadio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub guild: GuildId,
    pub kind: NotificationKind,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
    #[serde(default)]
    pub actions: Vec<ActionHint>,
    /// Reference the frontend turns into an issue-tracker link.
    #[serde(default)]
    pub correlation: Option<String>,
}

impl Notification {
    pub fn new(guild: GuildId, kind: NotificationKind) -> Self {
        Self {
            guild,
            kind,
            args: BTreeMap::new(),
            actions: Vec::new(),
            correlation: None,
        }
    }

    pub fn arg(mut self, key: &str, value: impl ToString) -> Self {
        self.args.insert(key.to_string(), value.to_string());
        self
    }

    pub fn action(mut self, hint: ActionHint) -> Self {
        self.actions.push(hint);
        self
    }

    pub fn correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation = Some(id.into());
        self
    }
}

// ── replies ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum CommandReply {
    Loaded {
        started: Option<Track>,
        queued: usize,
    },
    Skipped {
        skipped: Option<Track>,
        next: Option<Track>,
    },
    RepeatSet {
        count: u32,
    },
    RepeatModeSet {
        mode: RepeatMode,
    },
    Paused,
    Resumed,
    Shuffled {
        len: usize,
    },
    Cleared {
        removed: usize,
    },
    Stopped,
    RadioStarted {
        station: String,
    },
    /// The node did not confirm the stream start in time.  The stream may
    /// still come up later.
    RadioPending {
        station: String,
    },
    RadioStopped {
        station: String,
    },
    VolumeSet {
        previous: u16,
        volume: u16,
    },
    /// Vote recorded; not enough votes yet.
    VoteCast {
        action: VoteAction,
        votes: usize,
        required: usize,
    },
    /// This vote decided it; `result` is what the action replied.
    VotePassed {
        action: VoteAction,
        votes: usize,
        required: usize,
        result: Box<CommandReply>,
    },
    Status {
        snapshot: SessionSnapshot,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    Done { reply: CommandReply },
    Rejected { code: String, message: String },
}

// ── framing ───────────────────────────────────────────────────────────────────

/// Everything that travels over the bridge socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Message {
    /// Sent by the daemon immediately on connect.
    Hello { protocol_version: u32 },
    Node(NodeEvent),
    Command(CommandRequest),
    Notification(Notification),
    NodeRequest(NodeRequest),
    Reply {
        request_id: u64,
        outcome: CommandOutcome,
    },
    Log { message: String },
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
