//! Persisted snapshots: the session's sound settings and the scanned library.
//!
//! Both are plain TOML files in the state directory. Reading or writing
//! them never fails the caller; problems are logged and defaults used.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{RepeatModeSetting, state_dir};
use crate::library::Track;

pub const SESSION_FILE: &str = "session.toml";
pub const LIBRARY_FILE: &str = "library.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSnapshot {
    pub volume: f32,
    pub balance: f32,
    pub speed: f32,
    pub repeat: RepeatModeSetting,
    pub shuffle: bool,
    pub eq_enabled: bool,
    pub eq_gains: Vec<f32>,
    pub bass_boost_db: f32,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            volume: 0.8,
            balance: 0.0,
            speed: 1.0,
            repeat: RepeatModeSetting::Off,
            shuffle: false,
            eq_enabled: true,
            eq_gains: vec![0.0; 10],
            bass_boost_db: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LibrarySnapshot {
    /// Folder the tracks were scanned from.
    pub root: Option<PathBuf>,
    pub tracks: Vec<Track>,
}

/// Reads and writes snapshots under one directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store in the default state directory, if one can be determined.
    pub fn default_location() -> Option<Self> {
        state_dir().map(Self::new)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load_session(&self) -> Option<SessionSnapshot> {
        read_toml(&self.dir.join(SESSION_FILE))
    }

    pub fn save_session(&self, snapshot: &SessionSnapshot) -> bool {
        write_toml(&self.dir, SESSION_FILE, snapshot)
    }

    pub fn load_library(&self) -> Option<LibrarySnapshot> {
        read_toml(&self.dir.join(LIBRARY_FILE))
    }

    pub fn save_library(&self, snapshot: &LibrarySnapshot) -> bool {
        write_toml(&self.dir, LIBRARY_FILE, snapshot)
    }
}

fn read_toml<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no snapshot yet");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read snapshot");
            return None;
        }
    };
    match toml::from_str(&text) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable snapshot");
            None
        }
    }
}

fn write_toml<T: Serialize>(dir: &Path, name: &str, value: &T) -> bool {
    let text = match toml::to_string_pretty(value) {
        Ok(t) => t,
        Err(e) => {
            warn!(file = name, error = %e, "failed to serialize snapshot");
            return false;
        }
    };
    if let Err(e) = fs::create_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "failed to create state directory");
        return false;
    }
    // Write-then-rename so a crash never leaves a half-written file.
    let path = dir.join(name);
    let tmp = dir.join(format!("{name}.tmp"));
    match fs::write(&tmp, text).and_then(|_| fs::rename(&tmp, &path)) {
        Ok(()) => {
            debug!(path = %path.display(), "snapshot saved");
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to write snapshot");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn missing_files_yield_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.load_session().is_none());
        assert!(store.load_library().is_none());
    }

    #[test]
    fn session_snapshot_roundtrips_and_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested").join("legato"));
        let snap = SessionSnapshot {
            volume: 0.4,
            repeat: RepeatModeSetting::All,
            shuffle: true,
            eq_gains: vec![1.0, -2.0, 3.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 12.0],
            ..SessionSnapshot::default()
        };
        assert!(store.save_session(&snap));
        assert_eq!(store.load_session(), Some(snap));
    }

    #[test]
    fn partial_session_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SESSION_FILE), "volume = 0.25\n").unwrap();
        let snap = StateStore::new(dir.path()).load_session().unwrap();
        assert_eq!(snap.volume, 0.25);
        assert_eq!(snap.speed, 1.0);
        assert_eq!(snap.eq_gains.len(), 10);
    }

    #[test]
    fn corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SESSION_FILE), "volume = [not toml").unwrap();
        assert!(StateStore::new(dir.path()).load_session().is_none());
    }

    #[test]
    fn library_snapshot_keeps_track_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut t = Track::untagged("/music/a.flac", "A");
        t.artist = Some("Someone".into());
        t.duration = Some(Duration::from_secs(181));
        let snap = LibrarySnapshot {
            root: Some(PathBuf::from("/music")),
            tracks: vec![t.clone()],
        };
        assert!(store.save_library(&snap));

        let back = store.load_library().unwrap();
        assert_eq!(back.root, snap.root);
        assert_eq!(back.tracks.len(), 1);
        assert_eq!(back.tracks[0].id, t.id);
        assert_eq!(back.tracks[0].artist.as_deref(), Some("Someone"));
        assert_eq!(back.tracks[0].duration, Some(Duration::from_secs(181)));
    }
}
