//! Audio-related small types shared by the transport, scheduler and session.
//!
//! This module defines the repeat/status enums and the events the engine
//! emits towards whatever presentation layer is listening.

use std::sync::Arc;
use std::time::Duration;

use crate::config::RepeatModeSetting;
use crate::library::Track;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum RepeatMode {
    /// Stop at the end of the queue.
    #[default]
    Off,
    /// Wrap around to the start of the queue.
    All,
    /// Replay the current track when it ends.
    One,
}

impl RepeatMode {
    /// `Off -> All -> One -> Off`.
    pub fn cycled(self) -> Self {
        match self {
            Self::Off => Self::All,
            Self::All => Self::One,
            Self::One => Self::Off,
        }
    }
}

impl From<RepeatModeSetting> for RepeatMode {
    fn from(s: RepeatModeSetting) -> Self {
        match s {
            RepeatModeSetting::Off => Self::Off,
            RepeatModeSetting::All => Self::All,
            RepeatModeSetting::One => Self::One,
        }
    }
}

impl From<RepeatMode> for RepeatModeSetting {
    fn from(m: RepeatMode) -> Self {
        match m {
            RepeatMode::Off => Self::Off,
            RepeatMode::All => Self::All,
            RepeatMode::One => Self::One,
        }
    }
}

/// Lifecycle of the single media source owned by the transport.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum TransportState {
    /// Nothing loaded.
    #[default]
    Idle,
    /// Fading out the previous source or opening the next one.
    Loading,
    /// Source open and paused at its start (or wherever `stop` left it).
    Ready,
    Playing,
    Paused,
    /// The last source could not be opened or decoded.
    Error,
}

/// What the session reports as "the player is ...".
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Raw lifecycle notifications from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    PositionTick {
        position: Duration,
        duration: Option<Duration>,
    },
    MetadataReady {
        duration: Duration,
    },
    Ended,
    Error {
        message: String,
    },
}

/// Events published by the session to its subscribers.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    TrackChanged {
        index: usize,
        track: Arc<Track>,
    },
    StatusChanged(PlaybackStatus),
    Position {
        position: Duration,
        duration: Option<Duration>,
    },
    DurationKnown(Duration),
    QueueChanged {
        len: usize,
    },
    ShuffleChanged(bool),
    RepeatChanged(RepeatMode),
    /// Transient message meant for a notification line, never fatal.
    Notice(String),
    SleepTimerFired,
    /// Playback reached the end of the queue and stopped.
    QueueFinished,
}
