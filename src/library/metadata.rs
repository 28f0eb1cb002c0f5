use std::path::Path;

use lofty::prelude::*;
use tracing::debug;

use super::model::{Artwork, Track};

fn non_empty(v: Option<std::borrow::Cow<'_, str>>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Read tags and stream properties for `path`.
///
/// Never fails: unreadable or untagged files come back with a title derived
/// from the file name and every other field empty.
pub fn read_metadata(path: &Path) -> Track {
    let default_title = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("UNKNOWN")
        .to_string();

    let mut track = Track::untagged(path, default_title);

    let tagged = match lofty::read_from_path(path) {
        Ok(t) => t,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no readable tags, using file name");
            return track;
        }
    };

    let props = tagged.properties();
    track.duration = Some(props.duration());
    track.bitrate = props.audio_bitrate();
    track.sample_rate = props.sample_rate();

    if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
        if let Some(title) = non_empty(tag.title()) {
            track.title = title;
        }
        track.artist = non_empty(tag.artist());
        track.album = non_empty(tag.album());
        track.genre = non_empty(tag.genre());
        track.year = tag.date().map(|d| u32::from(d.year)).filter(|&y| y > 0);
        track.artwork = tag.pictures().first().map(|p| Artwork {
            mime_type: p.mime_type().map(|m| m.as_str().to_string()),
            data: p.data().to_vec(),
        });
    }

    track
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn garbage_file_falls_back_to_file_stem() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Some Song.mp3");
        fs::write(&path, b"definitely not an mpeg stream").unwrap();

        let track = read_metadata(&path);
        assert_eq!(track.title, "Some Song");
        assert_eq!(track.path, path);
        assert!(track.artist.is_none());
        assert!(track.album.is_none());
        assert!(track.genre.is_none());
        assert!(track.year.is_none());
        assert!(track.artwork.is_none());
    }

    #[test]
    fn missing_file_still_produces_a_track() {
        let track = read_metadata(Path::new("/definitely/not/here/ghost.flac"));
        assert_eq!(track.title, "ghost");
        assert!(track.duration.is_none());
    }

    #[test]
    fn every_read_gets_a_fresh_id() {
        let p = Path::new("/nope/a.ogg");
        assert_ne!(read_metadata(p).id, read_metadata(p).id);
    }
}
