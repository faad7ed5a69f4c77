use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;
use crate::protocol::{ChannelId, GuildId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    /// Per-guild overrides keyed by guild id.
    #[serde(default)]
    pub guilds: BTreeMap<String, GuildOverrides>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Defaults applied to every guild unless overridden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Seconds of idleness (nothing queued) before the bot leaves voice.
    #[serde(default = "default_leave_no_tracks_sec")]
    pub leave_no_tracks_sec: u64,
    /// How long a play-radio command waits for the node to confirm.
    #[serde(default = "default_radio_start_timeout_sec")]
    pub radio_start_timeout_sec: u64,
    #[serde(default = "default_min_repeats")]
    pub min_repeats_of_track: u32,
    #[serde(default = "default_max_repeats")]
    pub max_repeats_of_track: u32,
    /// Volume a fresh player gets, and what a bare volume command restores.
    #[serde(default = "default_volume")]
    pub default_volume: u16,
    #[serde(default = "default_max_volume")]
    pub max_volume: u16,
    /// Share of the bot's channel that has to agree before a vote passes.
    #[serde(default = "default_vote_ratio_percent")]
    pub vote_ratio_percent: u8,
    #[serde(default = "default_vote_timeout_sec")]
    pub vote_timeout_sec: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuildOverrides {
    /// When set, audio commands are only accepted from this text channel.
    #[serde(default)]
    pub music_text_channel_id: Option<u64>,
    #[serde(default)]
    pub leave_no_tracks_sec: Option<u64>,
    #[serde(default)]
    pub min_repeats_of_track: Option<u32>,
    #[serde(default)]
    pub max_repeats_of_track: Option<u32>,
    #[serde(default)]
    pub default_volume: Option<u16>,
}

/// Effective settings for one guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildSettings {
    pub music_text_channel: Option<ChannelId>,
    pub leave_after: Duration,
    pub min_repeats: u32,
    pub max_repeats: u32,
    pub default_volume: u16,
    pub max_volume: u16,
    pub vote_ratio_percent: u8,
    pub vote_timeout: Duration,
}

impl Default for GuildSettings {
    fn default() -> Self {
        PlaybackConfig::default().guild_defaults()
    }
}

impl PlaybackConfig {
    fn guild_defaults(&self) -> GuildSettings {
        GuildSettings {
            music_text_channel: None,
            leave_after: Duration::from_secs(self.leave_no_tracks_sec),
            min_repeats: self.min_repeats_of_track,
            max_repeats: self.max_repeats_of_track,
            default_volume: self.default_volume.min(self.max_volume),
            max_volume: self.max_volume,
            vote_ratio_percent: self.vote_ratio_percent.clamp(1, 100),
            vote_timeout: Duration::from_secs(self.vote_timeout_sec),
        }
    }

    pub fn radio_start_timeout(&self) -> Duration {
        Duration::from_secs(self.radio_start_timeout_sec)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_file: default_log_file(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            leave_no_tracks_sec: default_leave_no_tracks_sec(),
            radio_start_timeout_sec: default_radio_start_timeout_sec(),
            min_repeats_of_track: default_min_repeats(),
            max_repeats_of_track: default_max_repeats(),
            default_volume: default_volume(),
            max_volume: default_max_volume(),
            vote_ratio_percent: default_vote_ratio_percent(),
            vote_timeout_sec: default_vote_timeout_sec(),
        }
    }
}

fn default_log_file() -> PathBuf {
    platform::data_dir().join("daemon.log")
}

fn default_bind_address() -> String {
    platform::BRIDGE_TCP_HOST.to_string()
}

fn default_port() -> u16 {
    platform::BRIDGE_TCP_PORT
}

fn default_leave_no_tracks_sec() -> u64 {
    120
}

fn default_radio_start_timeout_sec() -> u64 {
    10
}

fn default_min_repeats() -> u32 {
    1
}

fn default_max_repeats() -> u32 {
    30
}

fn default_volume() -> u16 {
    100
}

fn default_max_volume() -> u16 {
    150
}

fn default_vote_ratio_percent() -> u8 {
    50
}

fn default_vote_timeout_sec() -> u64 {
    60
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// Merge the playback defaults with this guild's overrides.
    pub fn guild_settings(&self, guild: GuildId) -> GuildSettings {
        let mut settings = self.playback.guild_defaults();
        if let Some(o) = self.guilds.get(&guild.0.to_string()) {
            settings.music_text_channel = o.music_text_channel_id.map(ChannelId);
            if let Some(secs) = o.leave_no_tracks_sec {
                settings.leave_after = Duration::from_secs(secs);
            }
            if let Some(min) = o.min_repeats_of_track {
                settings.min_repeats = min;
            }
            if let Some(max) = o.max_repeats_of_track {
                settings.max_repeats = max;
            }
            if let Some(volume) = o.default_volume {
                settings.default_volume = volume.min(settings.max_volume);
            }
        }
        settings
    }
}
