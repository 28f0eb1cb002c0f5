use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config;
use crate::library::{Track, read_metadata, scan};
use crate::playlist;
use crate::state::{LibrarySnapshot, StateStore};

fn is_playlist(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("m3u") || e.eq_ignore_ascii_case("m3u8"))
}

/// Tracks to start with, from the command-line argument:
/// a playlist file, a folder to scan, or (no argument) the saved library.
pub fn initial_tracks(
    arg: Option<String>,
    settings: &config::Settings,
    store: Option<&StateStore>,
) -> Vec<Track> {
    match arg.map(PathBuf::from) {
        Some(path) if path.is_file() && is_playlist(&path) => match playlist::read(&path) {
            Ok(paths) => {
                info!(path = %path.display(), entries = paths.len(), "loading playlist");
                paths.iter().map(|p| read_metadata(p)).collect()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read playlist");
                Vec::new()
            }
        },
        Some(dir) => scan_and_remember(&dir, settings, store),
        None => {
            let saved = store.and_then(|s| s.load_library());
            match saved {
                Some(lib) if !lib.tracks.is_empty() => {
                    info!(tracks = lib.tracks.len(), "using saved library");
                    lib.tracks
                }
                _ => {
                    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                    scan_and_remember(&cwd, settings, store)
                }
            }
        }
    }
}

fn scan_and_remember(
    dir: &Path,
    settings: &config::Settings,
    store: Option<&StateStore>,
) -> Vec<Track> {
    if !dir.is_dir() {
        warn!(path = %dir.display(), "not a folder, nothing to scan");
        return Vec::new();
    }
    let tracks = scan(dir, &settings.library);
    // An empty scan must not replace a library saved earlier.
    if tracks.is_empty() {
        return tracks;
    }
    if let Some(store) = store {
        store.save_library(&LibrarySnapshot {
            root: Some(dir.to_path_buf()),
            tracks: tracks.clone(),
        });
    }
    tracks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playlist_argument_reads_listed_files() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("one.mp3");
        std::fs::write(&song, b"not really audio").unwrap();
        let list = dir.path().join("mix.M3U");
        std::fs::write(&list, "#EXTM3U\none.mp3\nmissing.mp3\n").unwrap();

        let tracks = initial_tracks(
            Some(list.to_string_lossy().into_owned()),
            &config::Settings::default(),
            None,
        );
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].path, song);
        assert_eq!(tracks[0].title, "one");
    }

    #[test]
    fn folder_argument_is_scanned_and_saved() {
        let music = tempfile::tempdir().unwrap();
        std::fs::write(music.path().join("b.flac"), b"x").unwrap();
        std::fs::write(music.path().join("a.ogg"), b"x").unwrap();
        std::fs::write(music.path().join("notes.txt"), b"x").unwrap();
        let state = tempfile::tempdir().unwrap();
        let store = StateStore::new(state.path());

        let tracks = initial_tracks(
            Some(music.path().to_string_lossy().into_owned()),
            &config::Settings::default(),
            Some(&store),
        );
        assert_eq!(tracks.len(), 2);

        let saved = store.load_library().unwrap();
        assert_eq!(saved.tracks.len(), 2);
        assert_eq!(saved.root.as_deref(), Some(music.path()));
    }

    #[test]
    fn bad_folder_argument_keeps_the_saved_library() {
        let state = tempfile::tempdir().unwrap();
        let store = StateStore::new(state.path());
        store.save_library(&LibrarySnapshot {
            root: None,
            tracks: vec![Track::untagged("/music/x.mp3", "x")],
        });
        let empty = tempfile::tempdir().unwrap();

        for arg in [
            "/definitely/not/a/folder".to_string(),
            empty.path().to_string_lossy().into_owned(),
        ] {
            let tracks = initial_tracks(Some(arg), &config::Settings::default(), Some(&store));
            assert!(tracks.is_empty());
        }
        assert_eq!(store.load_library().unwrap().tracks.len(), 1);
    }

    #[test]
    fn no_argument_prefers_the_saved_library() {
        let state = tempfile::tempdir().unwrap();
        let store = StateStore::new(state.path());
        store.save_library(&LibrarySnapshot {
            root: None,
            tracks: vec![Track::untagged("/music/x.mp3", "x")],
        });

        let tracks = initial_tracks(None, &config::Settings::default(), Some(&store));
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "x");
    }
}
