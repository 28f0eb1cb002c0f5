use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level application settings loaded from `config.toml`.
///
/// File format: TOML
/// Default path (Linux/XDG): `$XDG_CONFIG_HOME/legato/config.toml` or `~/.config/legato/config.toml`
///
/// Precedence (highest wins):
/// 1) Environment variables (prefix `LEGATO__`, `__` as nested separator)
/// 2) Config file (if present)
/// 3) Struct defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub audio: AudioSettings,
    pub playback: PlaybackSettings,
    pub equalizer: EqualizerSettings,
    pub controls: ControlsSettings,
    pub library: LibrarySettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Initial master volume, 0.0 to 1.0.
    pub volume: f32,
    /// Initial stereo balance, -1.0 (left) to 1.0 (right).
    pub balance: f32,
    /// Initial playback speed multiplier.
    pub speed: f32,
    /// Ramp the volume up from silence when playback starts.
    pub fade_in: bool,
    /// Ramp the volume down before switching to another track.
    pub fade_out: bool,
    /// Fade duration used for both fade-in and fade-out (milliseconds).
    /// Set to 0 to disable crossfade.
    pub crossfade_ms: u64,
    /// Upper bound on the fade-out before a track switch (milliseconds).
    pub max_fade_out_ms: u64,
    /// Fade-out duration when quitting (milliseconds).
    /// Set to 0 to stop immediately.
    pub quit_fade_out_ms: u64,
    /// Output device name. `None` uses the system default.
    pub device: Option<String>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            volume: 0.8,
            balance: 0.0,
            speed: 1.0,
            fade_in: true,
            fade_out: true,
            crossfade_ms: 2000,
            max_fade_out_ms: 2000,
            quit_fade_out_ms: 500,
            device: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Whether shuffle starts enabled.
    pub shuffle: bool,
    /// Default repeat mode.
    pub repeat: RepeatModeSetting,
    /// "Previous" restarts the current track instead when more than this
    /// much of it has played (milliseconds).
    pub prev_restart_ms: u64,
    /// Delay before skipping past a track that failed to play (milliseconds).
    pub error_skip_delay_ms: u64,
    /// Interval between position updates while playing (milliseconds).
    pub position_tick_ms: u64,
    /// Fixed seed for the shuffle order; unset draws one from the OS.
    pub shuffle_seed: Option<u64>,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            shuffle: false,
            repeat: RepeatModeSetting::Off,
            prev_restart_ms: 3000,
            error_skip_delay_ms: 1500,
            position_tick_ms: 250,
            shuffle_seed: None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepeatModeSetting {
    #[serde(alias = "none", alias = "no-loop", alias = "no_loop")]
    Off,
    #[serde(alias = "loop-all", alias = "loop_all", alias = "repeat-all")]
    All,
    #[serde(alias = "loop-one", alias = "loop_one", alias = "repeat-one")]
    One,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EqualizerSettings {
    pub enabled: bool,
    /// Gains in dB for the 10 bands, lowest first. Missing bands are 0 dB.
    pub gains: Vec<f32>,
    /// Bass-boost shelf gain in dB.
    pub bass_boost_db: f32,
    /// Named preset applied instead of `gains` when set.
    pub preset: Option<String>,
}

impl Default for EqualizerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            gains: vec![0.0; 10],
            bass_boost_db: 0.0,
            preset: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlsSettings {
    /// Number of seconds to scrub when pressing `h` / `l`.
    pub scrub_seconds: u64,
    /// Volume change per `+` / `-` press.
    pub volume_step: f32,
    /// Minutes added to the sleep timer per `z` press.
    pub sleep_minutes_step: u32,
}

impl Default for ControlsSettings {
    fn default() -> Self {
        Self {
            scrub_seconds: 5,
            volume_step: 0.05,
            sleep_minutes_step: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LibrarySettings {
    /// File extensions to treat as audio (case-insensitive, without dot).
    pub extensions: Vec<String>,
    /// Whether to follow symlinks during scanning.
    pub follow_links: bool,
    /// Whether to include hidden files/directories (dotfiles).
    pub include_hidden: bool,
    /// Whether to recurse into subdirectories.
    pub recursive: bool,
    /// Optional cap on directory recursion depth.
    pub max_depth: Option<usize>,
}

impl Default for LibrarySettings {
    fn default() -> Self {
        Self {
            extensions: ["mp3", "wav", "flac", "ogg", "m4a", "aac", "wma", "opus"]
                .into_iter()
                .map(String::from)
                .collect(),
            follow_links: true,
            include_hidden: true,
            recursive: true,
            max_depth: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is not set, e.g. `"info"` or `"legato=debug"`.
    pub level: String,
    /// Log file. Defaults to `legato.log` in the state directory.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}
