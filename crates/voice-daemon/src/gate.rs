//! Command authorization gate.
//!
//! Pure precondition checks evaluated before any command touches a session.
//! The order of checks is fixed; the first failing one decides the error.

use crate::error::AuthError;
use tracing::debug;
use voice_proto::protocol::{ChannelId, CommandContext, UserId, VoiceChannelKind};

/// Fixed per-command flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandRequirements {
    /// Only the requester of the current track, a DJ or a superuser.
    pub sender_or_superuser: bool,
    pub dj_or_superuser: bool,
    pub in_voice_channel: bool,
    pub same_channel_as_bot: bool,
    /// Join the invoker's channel when the bot is not connected yet.
    pub auto_join: bool,
}

/// The parts of a session the gate looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionView {
    /// Text channel the guild binds audio commands to, if any.
    pub bound_channel: Option<ChannelId>,
    pub current_requester: Option<UserId>,
}

/// Successful gate outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Clearance {
    /// Voice channel the caller must connect to before acting.
    pub join: Option<ChannelId>,
}

pub fn authorize(
    ctx: &CommandContext,
    view: &SessionView,
    req: &CommandRequirements,
) -> Result<Clearance, AuthError> {
    let result = check(ctx, view, req);
    if let Err(e) = &result {
        debug!(guild = %ctx.guild, author = %ctx.author, code = e.code(), "command refused: {}", e);
    }
    result
}

fn check(
    ctx: &CommandContext,
    view: &SessionView,
    req: &CommandRequirements,
) -> Result<Clearance, AuthError> {
    if let Some(accepted) = view.bound_channel {
        if ctx.text_channel != accepted {
            return Err(AuthError::ForbiddenChannel {
                used: ctx.text_channel,
                accepted,
            });
        }
    }
    if ctx.bot_voice.server_muted {
        return Err(AuthError::TemporarilyHalted);
    }
    if req.sender_or_superuser {
        let is_sender = view.current_requester == Some(ctx.author);
        if !is_sender && !ctx.is_dj && !ctx.is_superuser {
            return Err(AuthError::NotSenderOrSuperuser);
        }
    }
    if req.dj_or_superuser && !ctx.is_dj && !ctx.is_superuser {
        return Err(AuthError::NotDjOrSuperuser);
    }

    let mut clearance = Clearance::default();
    if !req.in_voice_channel {
        return Ok(clearance);
    }

    let user_channel = match ctx.voice {
        Some(v) if v.kind == VoiceChannelKind::Voice => v.id,
        _ => return Err(AuthError::UserNotInVoiceChannel),
    };
    if ctx.afk_channel == Some(user_channel) {
        return Err(AuthError::ForbiddenChannel {
            used: user_channel,
            accepted: ctx.text_channel,
        });
    }

    match ctx.bot_voice.channel {
        None if req.auto_join => clearance.join = Some(user_channel),
        Some(bot_channel)
            if req.same_channel_as_bot && !ctx.is_superuser && bot_channel != user_channel =>
        {
            return Err(AuthError::UserNotWithBot {
                user_channel: Some(user_channel),
                bot_channel,
            });
        }
        _ => {}
    }
    Ok(clearance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_proto::protocol::{BotVoiceState, GuildId, VoiceChannel};

    const TEXT: ChannelId = ChannelId(100);
    const VOICE: ChannelId = ChannelId(200);
    const AFK: ChannelId = ChannelId(300);

    fn ctx() -> CommandContext {
        CommandContext {
            guild: GuildId(1),
            author: UserId(10),
            text_channel: TEXT,
            voice: Some(VoiceChannel {
                id: VOICE,
                kind: VoiceChannelKind::Voice,
            }),
            bot_voice: BotVoiceState {
                channel: Some(VOICE),
                server_muted: false,
                listeners: 2,
            },
            afk_channel: Some(AFK),
            is_superuser: false,
            is_dj: false,
        }
    }

    fn full() -> CommandRequirements {
        CommandRequirements {
            sender_or_superuser: true,
            dj_or_superuser: false,
            in_voice_channel: true,
            same_channel_as_bot: true,
            auto_join: false,
        }
    }

    #[test]
    fn test_bound_channel_checked_first() {
        let mut c = ctx();
        c.text_channel = ChannelId(101);
        c.bot_voice.server_muted = true;
        let view = SessionView {
            bound_channel: Some(TEXT),
            current_requester: None,
        };
        assert_eq!(
            authorize(&c, &view, &full()),
            Err(AuthError::ForbiddenChannel {
                used: ChannelId(101),
                accepted: TEXT
            })
        );
    }

    #[test]
    fn test_muted_bot_halts() {
        let mut c = ctx();
        c.bot_voice.server_muted = true;
        assert_eq!(
            authorize(&c, &SessionView::default(), &CommandRequirements::default()),
            Err(AuthError::TemporarilyHalted)
        );
    }

    #[test]
    fn test_sender_or_superuser() {
        let view = SessionView {
            bound_channel: None,
            current_requester: Some(UserId(99)),
        };
        assert_eq!(
            authorize(&ctx(), &view, &full()),
            Err(AuthError::NotSenderOrSuperuser)
        );

        let mut dj = ctx();
        dj.is_dj = true;
        assert!(authorize(&dj, &view, &full()).is_ok());

        let mut su = ctx();
        su.is_superuser = true;
        assert!(authorize(&su, &view, &full()).is_ok());

        let mut sender = ctx();
        sender.author = UserId(99);
        assert!(authorize(&sender, &view, &full()).is_ok());
    }

    #[test]
    fn test_nothing_playing_means_no_sender() {
        assert_eq!(
            authorize(&ctx(), &SessionView::default(), &full()),
            Err(AuthError::NotSenderOrSuperuser)
        );
    }

    #[test]
    fn test_dj_only() {
        let req = CommandRequirements {
            dj_or_superuser: true,
            ..Default::default()
        };
        // Owning the current track is not enough.
        let view = SessionView {
            bound_channel: None,
            current_requester: Some(UserId(10)),
        };
        let mut c = ctx();
        c.voice = None;
        assert_eq!(authorize(&c, &view, &req), Err(AuthError::NotDjOrSuperuser));

        c.is_dj = true;
        assert_eq!(authorize(&c, &view, &req), Ok(Clearance::default()));
    }

    #[test]
    fn test_voice_channel_required() {
        let req = CommandRequirements {
            in_voice_channel: true,
            ..Default::default()
        };
        let mut c = ctx();
        c.voice = None;
        assert_eq!(
            authorize(&c, &SessionView::default(), &req),
            Err(AuthError::UserNotInVoiceChannel)
        );

        c.voice = Some(VoiceChannel {
            id: VOICE,
            kind: VoiceChannelKind::Stage,
        });
        assert_eq!(
            authorize(&c, &SessionView::default(), &req),
            Err(AuthError::UserNotInVoiceChannel)
        );
    }

    #[test]
    fn test_afk_channel_is_forbidden() {
        let req = CommandRequirements {
            in_voice_channel: true,
            ..Default::default()
        };
        let mut c = ctx();
        c.voice = Some(VoiceChannel {
            id: AFK,
            kind: VoiceChannelKind::Voice,
        });
        assert_eq!(
            authorize(&c, &SessionView::default(), &req),
            Err(AuthError::ForbiddenChannel {
                used: AFK,
                accepted: TEXT
            })
        );
    }

    #[test]
    fn test_same_channel_as_bot() {
        let req = CommandRequirements {
            in_voice_channel: true,
            same_channel_as_bot: true,
            ..Default::default()
        };
        let mut c = ctx();
        c.bot_voice.channel = Some(ChannelId(201));
        assert_eq!(
            authorize(&c, &SessionView::default(), &req),
            Err(AuthError::UserNotWithBot {
                user_channel: Some(VOICE),
                bot_channel: ChannelId(201)
            })
        );

        c.is_superuser = true;
        assert_eq!(
            authorize(&c, &SessionView::default(), &req),
            Ok(Clearance::default())
        );
    }

    #[test]
    fn test_auto_join_when_bot_disconnected() {
        let req = CommandRequirements {
            in_voice_channel: true,
            same_channel_as_bot: true,
            auto_join: true,
            ..Default::default()
        };
        let mut c = ctx();
        c.bot_voice.channel = None;
        assert_eq!(
            authorize(&c, &SessionView::default(), &req),
            Ok(Clearance { join: Some(VOICE) })
        );

        c.bot_voice.channel = Some(VOICE);
        assert_eq!(
            authorize(&c, &SessionView::default(), &req),
            Ok(Clearance { join: None })
        );
    }
}
