use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Embedded cover art as found in the file's tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artwork {
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
}

/// A playable file plus whatever metadata could be read from it.
///
/// Tracks are produced by the metadata reader and never mutated afterwards;
/// the engine shares them behind `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub path: PathBuf,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u32>,
    #[serde(default, with = "opt_secs")]
    pub duration: Option<Duration>,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    #[serde(skip)]
    pub artwork: Option<Artwork>,
}

impl Track {
    /// A track with only a path and title; every optional field is empty.
    pub fn untagged(path: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            title: title.into(),
            artist: None,
            album: None,
            genre: None,
            year: None,
            duration: None,
            bitrate: None,
            sample_rate: None,
            artwork: None,
        }
    }

    /// `Artist - Title`, or just the title when the artist is unknown.
    pub fn label(&self) -> String {
        match self.artist.as_deref().map(str::trim) {
            Some(a) if !a.is_empty() => format!("{} - {}", a, self.title),
            _ => self.title.clone(),
        }
    }
}

/// Durations are stored as fractional seconds so snapshots stay readable.
mod opt_secs {
    use super::*;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(d)?;
        Ok(secs
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(Duration::from_secs_f64))
    }
}
