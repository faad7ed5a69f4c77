use thiserror::Error;
use voice_proto::protocol::ChannelId;

/// Why the gate refused a command.  Always user-facing, never a system error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("commands are not accepted in {used}, use {accepted}")]
    ForbiddenChannel { used: ChannelId, accepted: ChannelId },

    #[error("bot is muted, playback is temporarily halted")]
    TemporarilyHalted,

    #[error("only the requester of the current track, a DJ or a superuser can do this")]
    NotSenderOrSuperuser,

    #[error("only a DJ or a superuser can do this")]
    NotDjOrSuperuser,

    #[error("you must be in a voice channel")]
    UserNotInVoiceChannel,

    #[error("you must be in the same voice channel as the bot ({bot_channel})")]
    UserNotWithBot {
        user_channel: Option<ChannelId>,
        bot_channel: ChannelId,
    },
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::ForbiddenChannel { .. } => "forbidden_channel",
            AuthError::TemporarilyHalted => "temporarily_halted",
            AuthError::NotSenderOrSuperuser => "not_sender_or_superuser",
            AuthError::NotDjOrSuperuser => "not_dj_or_superuser",
            AuthError::UserNotInVoiceChannel => "user_not_in_voice_channel",
            AuthError::UserNotWithBot { .. } => "user_not_with_bot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error(transparent)]
    Unauthorized(#[from] AuthError),

    #[error("nothing is playing")]
    NothingPlaying,

    #[error("no tracks to play")]
    NoTracks,

    #[error("repeat count must be between {min} and {max}")]
    RepeatOutOfBounds { min: u32, max: u32 },

    #[error("queue position must be between 1 and {len}")]
    PositionOutOfBounds { len: usize },

    #[error("a queued track is playing, stop it first")]
    DiscreteAudioPlaying,

    #[error("no radio station is playing")]
    RadioNotPlaying,

    #[error("a radio station is playing, stop it first")]
    RadioPlaying,

    #[error("the queue needs at least two tracks")]
    QueueTooShort,

    #[error("the queue still holds {len} track(s), clear it first")]
    QueueNotEmpty { len: usize },

    #[error("volume must be between 0 and {max}")]
    VolumeOutOfBounds { max: u16 },

    #[error("you already voted")]
    AlreadyVoted,

    #[error("another vote is running")]
    VoteInProgress,
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::Unauthorized(e) => e.code(),
            CommandError::NothingPlaying => "nothing_playing",
            CommandError::NoTracks => "no_tracks",
            CommandError::RepeatOutOfBounds { .. } => "repeat_out_of_bounds",
            CommandError::PositionOutOfBounds { .. } => "position_out_of_bounds",
            CommandError::DiscreteAudioPlaying => "discrete_audio_playing",
            CommandError::RadioNotPlaying => "radio_not_playing",
            CommandError::RadioPlaying => "radio_playing",
            CommandError::QueueTooShort => "queue_too_short",
            CommandError::QueueNotEmpty { .. } => "queue_not_empty",
            CommandError::VolumeOutOfBounds { .. } => "volume_out_of_bounds",
            CommandError::AlreadyVoted => "already_voted",
            CommandError::VoteInProgress => "vote_in_progress",
        }
    }
}
