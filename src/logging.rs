use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LoggingSettings, state_dir};

/// Log file to use: the configured one, else `legato.log` in the state dir.
pub fn log_path(settings: &LoggingSettings) -> Option<PathBuf> {
    settings
        .file
        .clone()
        .or_else(|| state_dir().map(|d| d.join("legato.log")))
}

/// Route `tracing` output to the log file. The terminal is in raw mode while
/// the player runs, so nothing is written to stdout/stderr.
///
/// `RUST_LOG` overrides the configured level. Returns the file in use.
pub fn init(settings: &LoggingSettings) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let path = log_path(settings).ok_or("cannot determine a log file location")?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false),
        )
        .try_init()?;
    Ok(path)
}
