//! Error types for the playback engine

use std::path::PathBuf;

use thiserror::Error;

use super::types::TransportState;

/// Rejected operations. None of these mutate any state.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("queue is empty")]
    QueueEmpty,

    #[error("index {index} is out of range for a queue of {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("cannot remove the entry that is currently playing")]
    RemoveCurrent,

    #[error("no track loaded")]
    NothingLoaded,

    #[error("track duration is not known yet")]
    DurationUnknown,

    #[error("equalizer band {0} does not exist")]
    NoSuchBand(usize),

    #[error("operation not valid while {0:?}")]
    InvalidState(TransportState),

    #[error(transparent)]
    Output(#[from] OutputError),
}

/// Failures reported by an audio output backend.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("seek failed: {0}")]
    Seek(String),

    #[error("audio device: {0}")]
    Device(String),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
