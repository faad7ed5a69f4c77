//! Audio command execution.
//!
//! Every command runs under the session lock from gate to action, so the
//! state the gate looked at is the state the action sees.

use crate::error::CommandError;
use crate::gate::{self, CommandRequirements, SessionView};
use crate::node::detach_disconnect;
use crate::scheduler::{Playback, QueueScheduler, Scheduler};
use crate::session::{GuildAudioSession, SessionInner};
use crate::vote::{required_votes, Ballot, Tally};
use tracing::{debug, info};
use voice_proto::protocol::{
    Command, CommandContext, CommandReply, ContentMode, RepeatMode, Track, VoteAction,
};

const NONE: CommandRequirements = CommandRequirements {
    sender_or_superuser: false,
    dj_or_superuser: false,
    in_voice_channel: false,
    same_channel_as_bot: false,
    auto_join: false,
};

const LISTENER: CommandRequirements = CommandRequirements {
    in_voice_channel: true,
    same_channel_as_bot: true,
    ..NONE
};

const JOINING: CommandRequirements = CommandRequirements {
    auto_join: true,
    ..LISTENER
};

const CONTROLLER: CommandRequirements = CommandRequirements {
    sender_or_superuser: true,
    ..LISTENER
};

const DJ: CommandRequirements = CommandRequirements {
    dj_or_superuser: true,
    ..NONE
};

pub fn requirements(command: &Command) -> CommandRequirements {
    match command {
        Command::Play { .. } | Command::PlayRadio { .. } => JOINING,
        Command::Skip
        | Command::SkipTo { .. }
        | Command::Repeat { .. }
        | Command::LoopTrack
        | Command::LoopQueue
        | Command::Pause
        | Command::Resume
        | Command::ClearQueue
        | Command::Stop => CONTROLLER,
        Command::Shuffle | Command::StopRadio | Command::Vote { .. } => LISTENER,
        Command::Volume { .. } => DJ,
        Command::Status => NONE,
    }
}

pub async fn execute(
    session: &GuildAudioSession,
    ctx: &CommandContext,
    command: Command,
) -> Result<CommandReply, CommandError> {
    let mut inner = session.lock().await;
    let view = SessionView {
        bound_channel: inner.playback.settings().music_text_channel,
        current_requester: inner.playback.current().map(|t| t.requester),
    };
    let clearance = gate::authorize(ctx, &view, &requirements(&command))?;
    let name = command.name();

    check_content(&inner, &command)?;
    if let Some(channel) = clearance.join {
        inner.playback.connect(channel);
    }

    let stopping = matches!(command, Command::Stop);
    let reply = apply(&mut inner, ctx, command)?;
    debug!(guild = %ctx.guild, author = %ctx.author, command = name, "command executed");
    drop(inner);
    if stopping {
        session.request_retire();
    }
    Ok(reply)
}

/// Content preconditions, checked before any side effect.
fn check_content(inner: &SessionInner, command: &Command) -> Result<(), CommandError> {
    let playing = inner.playback.is_playing();
    let mode = inner.mode();
    match command {
        Command::Play { tracks } => {
            if tracks.is_empty() {
                return Err(CommandError::NoTracks);
            }
            if mode == ContentMode::Radio && playing {
                return Err(CommandError::RadioPlaying);
            }
        }
        Command::Skip
        | Command::SkipTo { .. }
        | Command::Repeat { .. }
        | Command::LoopTrack
        | Command::LoopQueue => {
            if !playing {
                return Err(CommandError::NothingPlaying);
            }
            if mode == ContentMode::Radio {
                return Err(CommandError::RadioPlaying);
            }
        }
        Command::Pause | Command::Resume => {
            if !playing {
                return Err(CommandError::NothingPlaying);
            }
        }
        Command::Shuffle if mode == ContentMode::Radio && playing => {
            return Err(CommandError::RadioPlaying);
        }
        Command::PlayRadio { .. } if playing => {
            return Err(match mode {
                ContentMode::Queue => CommandError::DiscreteAudioPlaying,
                ContentMode::Radio => CommandError::RadioPlaying,
            });
        }
        Command::PlayRadio { .. } if inner.queue_len() > 0 => {
            return Err(CommandError::QueueNotEmpty {
                len: inner.queue_len(),
            });
        }
        Command::Volume { units: Some(units) } => {
            let max = inner.playback.settings().max_volume;
            if *units > max {
                return Err(CommandError::VolumeOutOfBounds { max });
            }
        }
        Command::Vote { action } => {
            check_content(inner, &action.command())?;
            if let VoteAction::SkipTo { position } = action {
                // Reject before anyone votes for a jump that cannot happen.
                let len = inner.queue_len();
                if *position == 0 || *position > len {
                    return Err(CommandError::PositionOutOfBounds { len });
                }
            }
        }
        Command::StopRadio => {
            if mode != ContentMode::Radio || !playing {
                return Err(CommandError::RadioNotPlaying);
            }
        }
        _ => {}
    }
    Ok(())
}

fn apply(
    inner: &mut SessionInner,
    ctx: &CommandContext,
    command: Command,
) -> Result<CommandReply, CommandError> {
    match command {
        Command::Play { tracks } => {
            inner.switch_to_queue();
            let started = if inner.playback.is_playing() {
                None
            } else {
                tracks.first().cloned()
            };
            let queued = tracks.len() - usize::from(started.is_some());
            load(inner, tracks);
            Ok(CommandReply::Loaded { started, queued })
        }
        Command::Skip => {
            let (pb, s) = queue_parts(inner)?;
            let (skipped, next) = s.skip(pb);
            Ok(CommandReply::Skipped { skipped, next })
        }
        Command::SkipTo { position } => {
            let (pb, s) = queue_parts(inner)?;
            let skipped = pb.current().cloned();
            let next = s.skip_to(pb, position)?;
            Ok(CommandReply::Skipped {
                skipped,
                next: Some(next),
            })
        }
        Command::Repeat { count } => {
            let settings = inner.playback.settings();
            let (min, max) = (settings.min_repeats, settings.max_repeats);
            if count != 0 && !(min..=max).contains(&count) {
                return Err(CommandError::RepeatOutOfBounds { min, max });
            }
            inner.scheduler.set_repeat_count(count);
            Ok(CommandReply::RepeatSet { count })
        }
        Command::LoopTrack => toggle(inner, RepeatMode::Track),
        Command::LoopQueue => toggle(inner, RepeatMode::Queue),
        Command::Pause => {
            inner.playback.set_paused(true);
            Ok(CommandReply::Paused)
        }
        Command::Resume => {
            inner.playback.set_paused(false);
            Ok(CommandReply::Resumed)
        }
        Command::Shuffle => {
            let len = inner
                .queue_scheduler()
                .ok_or(CommandError::QueueTooShort)?
                .shuffle()?;
            Ok(CommandReply::Shuffled { len })
        }
        Command::ClearQueue => {
            let removed = inner
                .queue_scheduler()
                .map(QueueScheduler::clear_queue)
                .unwrap_or(0);
            Ok(CommandReply::Cleared { removed })
        }
        Command::Stop => {
            let guild = inner.playback.guild();
            let SessionInner {
                playback,
                scheduler,
                ..
            } = inner;
            let disconnect = scheduler.stop_and_destroy(playback);
            detach_disconnect(guild, disconnect);
            inner.ballot = None;
            info!(guild = %guild, "playback stopped on request");
            Ok(CommandReply::Stopped)
        }
        Command::PlayRadio { station, track } => {
            let name = station.name.clone();
            inner.switch_to_radio(station);
            load(inner, vec![track]);
            Ok(CommandReply::RadioPending { station: name })
        }
        Command::StopRadio => {
            let station = inner
                .radio_station()
                .map(|s| s.name.clone())
                .ok_or(CommandError::RadioNotPlaying)?;
            inner.playback.stop_track();
            Ok(CommandReply::RadioStopped { station })
        }
        Command::Volume { units } => {
            let volume = units.unwrap_or(inner.playback.settings().default_volume);
            let previous = inner.playback.set_volume(volume);
            info!(guild = %ctx.guild, author = %ctx.author, previous, volume, "player volume set");
            Ok(CommandReply::VolumeSet { previous, volume })
        }
        Command::Vote { action } => vote(inner, ctx, action),
        Command::Status => Ok(CommandReply::Status {
            snapshot: inner.snapshot(),
        }),
    }
}

/// Count the author's vote on `action`; runs the action once enough
/// listeners agree.
fn vote(
    inner: &mut SessionInner,
    ctx: &CommandContext,
    action: VoteAction,
) -> Result<CommandReply, CommandError> {
    let subject = inner.playback.current().map(|t| t.play_id);
    let settings = inner.playback.settings();
    let required = required_votes(ctx.bot_voice.listeners, settings.vote_ratio_percent);
    let window = settings.vote_timeout;

    if !inner.ballot.as_ref().is_some_and(|b| b.is_open(subject)) {
        inner.ballot = None;
    }
    let ballot = inner.ballot.get_or_insert_with(|| {
        debug!(guild = %ctx.guild, ?action, required, "vote opened");
        Ballot::open(action, subject, required, window)
    });
    if ballot.action() != action {
        return Err(CommandError::VoteInProgress);
    }
    match ballot.cast(ctx.author)? {
        Tally::Pending { votes, required } => Ok(CommandReply::VoteCast {
            action,
            votes,
            required,
        }),
        Tally::Passed { votes, required } => {
            inner.ballot = None;
            info!(guild = %ctx.guild, ?action, votes, required, "vote passed");
            let result = apply(inner, ctx, action.command())?;
            Ok(CommandReply::VotePassed {
                action,
                votes,
                required,
                result: Box::new(result),
            })
        }
    }
}

fn load(inner: &mut SessionInner, tracks: Vec<Track>) {
    let SessionInner {
        playback,
        scheduler,
        ..
    } = inner;
    scheduler.load_content(playback, tracks);
}

fn toggle(inner: &mut SessionInner, mode: RepeatMode) -> Result<CommandReply, CommandError> {
    let (_, s) = queue_parts(inner)?;
    Ok(CommandReply::RepeatModeSet {
        mode: s.toggle_repeat(mode),
    })
}

fn queue_parts(
    inner: &mut SessionInner,
) -> Result<(&mut Playback, &mut QueueScheduler), CommandError> {
    let SessionInner {
        playback,
        scheduler,
        ..
    } = inner;
    match scheduler {
        Scheduler::Queue(s) => Ok((playback, s)),
        Scheduler::Radio(_) => Err(CommandError::RadioPlaying),
    }
}
