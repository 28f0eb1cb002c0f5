use std::env;
use std::io::Write;

use crossterm::cursor::{Hide, Show};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing::{info, warn};

use crate::audio::{RodioOutput, Session, SessionOptions, SystemClock};
use crate::logging;
use crate::state::StateStore;

mod event_loop;
mod settings;
mod startup;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let (settings, config_problem) = settings::load_settings();

    match logging::init(&settings.logging) {
        Ok(path) => eprintln!("legato: logging to {}", path.display()),
        Err(e) => eprintln!("legato: logging disabled: {e}"),
    }
    if let Some(problem) = config_problem {
        warn!(%problem, "using default settings");
    }

    let store = StateStore::default_location();
    let tracks = startup::initial_tracks(env::args().nth(1), &settings, store.as_ref());

    let output = RodioOutput::open(settings.audio.device.as_deref())?;
    let options = SessionOptions::from_settings(&settings);
    let mut session = Session::new(output, &options, Box::new(SystemClock));
    if let Some(snap) = store.as_ref().and_then(|s| s.load_session()) {
        info!("restoring previous session settings");
        session.restore(&snap);
    }
    let events = session.subscribe();

    if tracks.is_empty() {
        warn!("no tracks found, starting with an empty queue");
    } else if let Err(e) = session.play_queue_at(tracks, 0) {
        warn!(error = %e, "could not start playback");
    }

    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, Hide)?;

    let mut state = event_loop::EventLoopState::new(&session);
    let run_result = event_loop::run(&settings, &mut session, &events, store.as_ref(), &mut state);

    disable_raw_mode()?;
    execute!(stdout, Show)?;
    writeln!(stdout)?;

    if let Some(store) = &store {
        store.save_session(&session.snapshot());
    }
    info!("shutting down");
    run_result
}
