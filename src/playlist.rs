//! M3U playlist import and export.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::library::Track;

const HEADER: &str = "#EXTM3U";
const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Render `tracks` as extended M3U: one `#EXTINF` line per entry followed by
/// the absolute path. Unknown durations are written as `-1`.
pub fn export<'a>(tracks: impl IntoIterator<Item = &'a Track>) -> String {
    let mut out = String::from(HEADER);
    out.push('\n');
    for t in tracks {
        let secs = t
            .duration
            .map_or(-1, |d| d.as_secs_f64().round() as i64);
        let artist = t
            .artist
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(UNKNOWN_ARTIST);
        let path = std::path::absolute(&t.path).unwrap_or_else(|_| t.path.clone());
        let _ = writeln!(out, "#EXTINF:{secs},{artist} - {}", t.title);
        let _ = writeln!(out, "{}", path.display());
    }
    out
}

pub fn write<'a>(path: &Path, tracks: impl IntoIterator<Item = &'a Track>) -> io::Result<()> {
    let text = export(tracks);
    fs::write(path, text)?;
    info!(path = %path.display(), "playlist exported");
    Ok(())
}

/// File entries of an M3U playlist. Blank and `#` lines are skipped, relative
/// paths resolve against `base`, and entries that do not exist are dropped.
pub fn parse(text: &str, base: &Path) -> Vec<PathBuf> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| {
            let p = PathBuf::from(l);
            if p.is_absolute() { p } else { base.join(p) }
        })
        .filter(|p| {
            let exists = p.is_file();
            if !exists {
                debug!(path = %p.display(), "playlist entry missing, skipped");
            }
            exists
        })
        .collect()
}

pub fn read(path: &Path) -> io::Result<Vec<PathBuf>> {
    let text = fs::read_to_string(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(parse(&text, base))
}
