use std::io::{self, Write};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use crossterm::cursor::MoveToColumn;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::queue;
use tracing::{debug, info, warn};

use crate::audio::{
    AnalysisKind, EQ_BANDS, EQ_FREQUENCIES, EqPreset, Output, PlaybackStatus, PlayerEvent,
    RepeatMode, Session, TransportState,
};
use crate::config;
use crate::playlist;
use crate::state::StateStore;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const NOTICE_TTL: Duration = Duration::from_secs(4);
const BASS_BOOST_STEPS: [f32; 3] = [0.0, 6.0, 12.0];
const SLEEP_TIMER_MAX_MINUTES: u32 = 120;
const BALANCE_STEP: f32 = 0.1;
const SPEED_STEP: f32 = 0.25;
const EQ_STEP_DB: f32 = 1.0;
const SEEK_STEP: f64 = 0.05;
const METER_BARS: usize = 12;
const METER_GLYPHS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// What the meter on the status line draws.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Meter {
    Spectrum,
    Waveform,
    Off,
}

impl Meter {
    fn cycled(self) -> Self {
        match self {
            Self::Spectrum => Self::Waveform,
            Self::Waveform => Self::Off,
            Self::Off => Self::Spectrum,
        }
    }
}

/// What the status line shows, rebuilt from session events.
pub struct EventLoopState {
    title: String,
    status: PlaybackStatus,
    position: Duration,
    duration: Option<Duration>,
    notice: Option<(String, Instant)>,
    preset: Option<usize>,
    /// Queue entry the queue keys act on.
    selected: usize,
    /// EQ band the band keys adjust.
    band: usize,
    meter: Meter,
    /// Pending target while dragging the seek position, as a fraction.
    seek_target: f64,
    last_line: String,
}

impl EventLoopState {
    pub fn new<O: Output>(session: &Session<O>) -> Self {
        Self {
            title: session
                .current_track()
                .map(|t| t.label())
                .unwrap_or_default(),
            status: session.status(),
            position: Duration::ZERO,
            duration: None,
            notice: None,
            preset: None,
            selected: session.current_index().unwrap_or(0),
            band: 0,
            meter: Meter::Spectrum,
            seek_target: 0.0,
            last_line: String::new(),
        }
    }

    fn notify(&mut self, msg: impl Into<String>) {
        self.notice = Some((msg.into(), Instant::now()));
    }

    fn apply(&mut self, ev: PlayerEvent) {
        match ev {
            PlayerEvent::TrackChanged { index, track } => {
                info!(index, track = %track.label(), "track changed");
                self.selected = index;
                self.title = track.label();
                self.position = Duration::ZERO;
                self.duration = track.duration;
            }
            PlayerEvent::StatusChanged(s) => self.status = s,
            PlayerEvent::Position { position, duration } => {
                self.position = position;
                self.duration = duration;
            }
            PlayerEvent::DurationKnown(d) => self.duration = Some(d),
            PlayerEvent::QueueChanged { len } => debug!(len, "queue changed"),
            PlayerEvent::ShuffleChanged(on) => {
                self.notify(if on { "Shuffle on" } else { "Shuffle off" })
            }
            PlayerEvent::RepeatChanged(mode) => self.notify(match mode {
                RepeatMode::Off => "Repeat off",
                RepeatMode::All => "Repeat all",
                RepeatMode::One => "Repeat one",
            }),
            PlayerEvent::Notice(msg) => {
                warn!(%msg, "notice");
                self.notify(msg);
            }
            PlayerEvent::SleepTimerFired => self.notify("Sleep timer: paused"),
            PlayerEvent::QueueFinished => self.notify("End of queue"),
        }
    }

    fn status_line<O: Output>(&mut self, session: &Session<O>) -> String {
        if self
            .notice
            .as_ref()
            .is_some_and(|(_, at)| at.elapsed() > NOTICE_TTL)
        {
            self.notice = None;
        }
        let icon = match (session.transport_state(), self.status) {
            (TransportState::Error, _) => "!!",
            (_, PlaybackStatus::Playing) => ">",
            (_, PlaybackStatus::Paused) => "||",
            (_, PlaybackStatus::Stopped) => "[]",
        };
        let total = self
            .duration
            .map(format_time)
            .unwrap_or_else(|| "--:--".to_string());
        let meter = match self.meter {
            Meter::Spectrum if self.status == PlaybackStatus::Playing => {
                spectrum_bars(&session.read_analysis(AnalysisKind::Frequency))
            }
            Meter::Waveform if self.status == PlaybackStatus::Playing => {
                waveform_bars(&session.read_analysis(AnalysisKind::Waveform))
            }
            _ => String::new(),
        };
        let shown_position = match (session.is_seek_dragging(), self.duration) {
            (true, Some(d)) => d.mul_f64(self.seek_target),
            _ => self.position,
        };
        let mut line = format!(
            "{icon} {meter} {}  {} / {total}  vol {:.0}%",
            self.title,
            format_time(shown_position),
            session.chain().volume() * 100.0
        );
        if session.is_seek_dragging() {
            line.push_str("  [seek: h/l, enter]");
        }
        if session.shuffle() {
            line.push_str("  [shuffle]");
        }
        match session.repeat() {
            RepeatMode::Off => {}
            RepeatMode::All => line.push_str("  [repeat all]"),
            RepeatMode::One => line.push_str("  [repeat one]"),
        }
        if !session.chain().equalizer().enabled {
            line.push_str("  [eq off]");
        }
        if let Some(left) = session.sleep_remaining() {
            line.push_str(&format!("  [sleep {}]", format_time(left)));
        }
        if let Some((msg, _)) = &self.notice {
            line.push_str("  | ");
            line.push_str(msg);
        } else if let Some(next) = session.up_next() {
            line.push_str("  | next: ");
            line.push_str(&next.label());
        }
        line
    }

    fn render<O: Output>(&mut self, out: &mut impl Write, session: &Session<O>) -> io::Result<()> {
        let mut line = self.status_line(session);
        let width = terminal::size().map(|(w, _)| w as usize).unwrap_or(80);
        if line.chars().count() > width {
            line = line.chars().take(width.saturating_sub(1)).collect();
        }
        if line == self.last_line {
            return Ok(());
        }
        queue!(out, MoveToColumn(0), Clear(ClearType::CurrentLine), Print(&line))?;
        out.flush()?;
        self.last_line = line;
        Ok(())
    }
}

fn format_time(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn glyph(level: f32) -> char {
    let top = METER_GLYPHS.len() - 1;
    let idx = (level.clamp(0.0, 1.0) * top as f32).round() as usize;
    METER_GLYPHS[idx.min(top)]
}

/// Spectrum bins folded into `METER_BARS` bars on a log frequency scale,
/// each bar the loudest bin it covers.
fn spectrum_bars(bins: &[f32]) -> String {
    if bins.len() < 2 {
        return String::new();
    }
    let n = bins.len() as f32;
    (0..METER_BARS)
        .map(|i| {
            let lo = n.powf(i as f32 / METER_BARS as f32) as usize;
            let hi = (n.powf((i + 1) as f32 / METER_BARS as f32) as usize)
                .max(lo + 1)
                .min(bins.len());
            let peak = bins[lo.min(bins.len() - 1)..hi]
                .iter()
                .copied()
                .fold(0.0, f32::max);
            glyph(peak)
        })
        .collect()
}

/// Peak level of `METER_BARS` consecutive slices of the waveform.
fn waveform_bars(samples: &[f32]) -> String {
    if samples.is_empty() {
        return String::new();
    }
    let chunk = samples.len().div_ceil(METER_BARS);
    samples
        .chunks(chunk)
        .map(|c| glyph(c.iter().fold(0.0f32, |m, s| m.max(s.abs()))))
        .collect()
}

/// Drive the session until the user quits: poll keys, tick the session and
/// redraw the status line.
pub fn run<O: Output>(
    settings: &config::Settings,
    session: &mut Session<O>,
    events: &Receiver<PlayerEvent>,
    store: Option<&StateStore>,
    state: &mut EventLoopState,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    loop {
        session.tick();
        for ev in events.try_iter() {
            state.apply(ev);
        }
        state.render(&mut stdout, session)?;

        if !event::poll(POLL_INTERVAL)? {
            continue;
        }
        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            if handle_key_event(key, settings, session, store, state) {
                quit_softly(
                    session,
                    Duration::from_millis(settings.audio.quit_fade_out_ms),
                );
                return Ok(());
            }
        }
    }
}

/// Fade the output to silence before returning, bounded by `fade` plus a
/// little slack in case the ramp never reports completion.
fn quit_softly<O: Output>(session: &mut Session<O>, fade: Duration) {
    if fade.is_zero() || session.status() != PlaybackStatus::Playing {
        return;
    }
    session.fade_out(fade);
    let deadline = Instant::now() + fade + Duration::from_millis(500);
    while session.is_fading() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
        session.tick();
    }
}

/// Keys while the seek position is being dragged: move the target, commit
/// it with Enter, or drop back to where playback is with Esc.
fn handle_seek_drag_key<O: Output>(
    key: KeyEvent,
    session: &mut Session<O>,
    state: &mut EventLoopState,
) -> Result<(), String> {
    match key.code {
        KeyCode::Char('h') | KeyCode::Left => {
            state.seek_target = (state.seek_target - SEEK_STEP).max(0.0);
            Ok(())
        }
        KeyCode::Char('l') | KeyCode::Right => {
            state.seek_target = (state.seek_target + SEEK_STEP).min(1.0);
            Ok(())
        }
        KeyCode::Enter | KeyCode::Char('g') => session
            .end_seek_drag(state.seek_target)
            .map(|pos| state.notify(format!("Seek to {}", format_time(pos))))
            .map_err(|e| e.to_string()),
        KeyCode::Esc => {
            let fraction = current_fraction(session).unwrap_or(0.0);
            session
                .end_seek_drag(fraction)
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
        _ => Ok(()),
    }
}

fn current_fraction<O: Output>(session: &Session<O>) -> Option<f64> {
    let total = session.duration()?.as_secs_f64();
    (total > 0.0).then(|| (session.position().as_secs_f64() / total).clamp(0.0, 1.0))
}

/// Apply one key press. Returns `true` when the user asked to quit.
fn handle_key_event<O: Output>(
    key: KeyEvent,
    settings: &config::Settings,
    session: &mut Session<O>,
    store: Option<&StateStore>,
    state: &mut EventLoopState,
) -> bool {
    let controls = &settings.controls;
    let outcome: Result<(), String> = if key.code == KeyCode::Char('q') {
        return true;
    } else if session.is_seek_dragging() {
        handle_seek_drag_key(key, session, state)
    } else {
        match key.code {
            KeyCode::Char(' ') => session.toggle().map_err(|e| e.to_string()),
            KeyCode::Char('n') => session.next().map(|_| ()).map_err(|e| e.to_string()),
            KeyCode::Char('p') => session.prev().map_err(|e| e.to_string()),
            KeyCode::Char('S') => session.stop().map_err(|e| e.to_string()),
            KeyCode::Char('s') => {
                session.toggle_shuffle();
                Ok(())
            }
            KeyCode::Char('r') => {
                session.cycle_repeat();
                Ok(())
            }
            KeyCode::Char('+') | KeyCode::Char('=') => {
                let v = session.set_volume(session.chain().volume() + controls.volume_step);
                state.notify(format!("Volume {:.0}%", v * 100.0));
                Ok(())
            }
            KeyCode::Char('-') => {
                let v = session.set_volume(session.chain().volume() - controls.volume_step);
                state.notify(format!("Volume {:.0}%", v * 100.0));
                Ok(())
            }
            KeyCode::Char('h') | KeyCode::Left => session
                .seek_by(-(controls.scrub_seconds as i64))
                .map(|_| ())
                .map_err(|e| e.to_string()),
            KeyCode::Char('l') | KeyCode::Right => session
                .seek_by(controls.scrub_seconds as i64)
                .map(|_| ())
                .map_err(|e| e.to_string()),
            KeyCode::Char(c @ '0'..='9') => {
                let fraction = f64::from(c as u8 - b'0') / 10.0;
                session
                    .seek_fraction(fraction)
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            KeyCode::Char('g') => match current_fraction(session) {
                Some(fraction) => {
                    state.seek_target = fraction;
                    session.begin_seek_drag();
                    Ok(())
                }
                None => Err("Track length unknown, cannot seek".to_string()),
            },
            KeyCode::Char('j') | KeyCode::Down => {
                let len = session.queue().len();
                state.selected = (state.selected + 1).min(len.saturating_sub(1));
                notify_selection(session, state);
                Ok(())
            }
            KeyCode::Char('k') | KeyCode::Up => {
                state.selected = state.selected.saturating_sub(1);
                notify_selection(session, state);
                Ok(())
            }
            KeyCode::Enter => session
                .play_index(state.selected)
                .map_err(|e| e.to_string()),
            KeyCode::Char('i') => match session.queue().get(state.selected) {
                Some(entry) => {
                    let track = entry.track.as_ref().clone();
                    let label = track.label();
                    let at = session.insert_next(track);
                    state.notify(format!("Up next ({}): {label}", at + 1));
                    Ok(())
                }
                None => Err("Nothing selected".to_string()),
            },
            KeyCode::Char('d') => session
                .remove_at(state.selected)
                .map(|track| {
                    let len = session.queue().len();
                    state.selected = state.selected.min(len.saturating_sub(1));
                    state.notify(format!("Removed {}", track.label()));
                })
                .map_err(|e| e.to_string()),
            KeyCode::Char('A') => {
                let tracks = store
                    .and_then(|s| s.load_library())
                    .map(|lib| lib.tracks)
                    .unwrap_or_default();
                let count = tracks.len();
                session.append(tracks);
                state.notify(format!("Added {count} tracks"));
                Ok(())
            }
            KeyCode::Char('C') => {
                session.clear_queue();
                state.selected = 0;
                state.title.clear();
                state.notify("Queue cleared");
                Ok(())
            }
            KeyCode::Char('[') => {
                let b = session.set_balance(session.chain().balance() - BALANCE_STEP);
                state.notify(format!("Balance {b:+.1}"));
                Ok(())
            }
            KeyCode::Char(']') => {
                let b = session.set_balance(session.chain().balance() + BALANCE_STEP);
                state.notify(format!("Balance {b:+.1}"));
                Ok(())
            }
            KeyCode::Char('<') => {
                let s = session.set_speed(session.chain().speed() - SPEED_STEP);
                state.notify(format!("Speed {s:.2}x"));
                Ok(())
            }
            KeyCode::Char('>') => {
                let s = session.set_speed(session.chain().speed() + SPEED_STEP);
                state.notify(format!("Speed {s:.2}x"));
                Ok(())
            }
            KeyCode::Char('e') => {
                let enabled = !session.chain().equalizer().enabled;
                session.set_eq_enabled(enabled);
                state.notify(if enabled { "Equalizer on" } else { "Equalizer off" });
                Ok(())
            }
            KeyCode::Char('E') => {
                let next = state.preset.map_or(0, |i| (i + 1) % EqPreset::ALL.len());
                state.preset = Some(next);
                let preset = EqPreset::ALL[next];
                session.apply_preset(preset);
                state.notify(format!("Preset: {}", preset.name()));
                Ok(())
            }
            KeyCode::Tab => {
                state.band = (state.band + 1) % EQ_BANDS;
                notify_band(session, state);
                Ok(())
            }
            KeyCode::Char(c @ ('(' | ')')) => {
                let step = if c == ')' { EQ_STEP_DB } else { -EQ_STEP_DB };
                let current = session.chain().equalizer().gains[state.band];
                session
                    .set_eq_band(state.band, current + step)
                    .map(|_| notify_band(session, state))
                    .map_err(|e| e.to_string())
            }
            KeyCode::Char('b') => {
                let current = session.chain().bass_boost();
                let next = BASS_BOOST_STEPS
                    .iter()
                    .copied()
                    .find(|&s| s > current + 0.01)
                    .unwrap_or(0.0);
                let db = session.set_bass_boost(next);
                state.notify(format!("Bass boost {db:.0} dB"));
                Ok(())
            }
            KeyCode::Char('v') => {
                state.meter = state.meter.cycled();
                Ok(())
            }
            KeyCode::Char('z') => {
                let current = session
                    .sleep_remaining()
                    .map_or(0, |d| d.as_secs().div_ceil(60) as u32);
                let next = current + controls.sleep_minutes_step;
                let minutes = (controls.sleep_minutes_step > 0
                    && next <= SLEEP_TIMER_MAX_MINUTES)
                    .then_some(next);
                session.set_sleep_timer(minutes);
                state.notify(match minutes {
                    Some(m) => format!("Sleep in {m} min"),
                    None => "Sleep timer off".to_string(),
                });
                Ok(())
            }
            KeyCode::Char('x') => export_queue(session, store).map(|path| state.notify(path)),
            _ => Ok(()),
        }
    };
    if let Err(msg) = outcome {
        debug!(%msg, key = ?key.code, "key action failed");
        state.notify(msg);
    }
    false
}

fn notify_selection<O: Output>(session: &Session<O>, state: &mut EventLoopState) {
    let queue = session.queue();
    if let Some(entry) = queue.get(state.selected) {
        let msg = format!("{}/{}: {}", state.selected + 1, queue.len(), entry.track.label());
        state.notify(msg);
    }
}

fn notify_band<O: Output>(session: &Session<O>, state: &mut EventLoopState) {
    let hz = EQ_FREQUENCIES[state.band];
    let gain = session.chain().equalizer().gains[state.band];
    let freq = if hz >= 1000.0 {
        format!("{}k", hz / 1000.0)
    } else {
        format!("{hz}")
    };
    state.notify(format!("EQ {freq}Hz {gain:+.0} dB"));
}

fn export_queue<O: Output>(
    session: &Session<O>,
    store: Option<&StateStore>,
) -> Result<String, String> {
    let dir = store
        .map(|s| s.dir().to_path_buf())
        .ok_or("No state directory to export into")?;
    std::fs::create_dir_all(&dir).map_err(|e| e.to_string())?;
    let path = dir.join("queue.m3u");
    playlist::write(&path, session.queue().iter().map(|e| e.track.as_ref()))
        .map_err(|e| e.to_string())?;
    Ok(format!("Queue exported to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyModifiers;

    use crate::audio::SessionOptions;
    use crate::audio::testing::{FakeOutput, ManualClock, track};

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn setup() -> (Session<FakeOutput>, FakeOutput, EventLoopState) {
        let out = FakeOutput::new();
        let mut opts = SessionOptions::default();
        opts.fades.fade_in = false;
        opts.fades.fade_out = false;
        let mut session = Session::new(out.clone(), &opts, Box::new(ManualClock::new()));
        session
            .play_queue_at(vec![track("A", 180), track("B", 200), track("C", 150)], 0)
            .unwrap();
        let state = EventLoopState::new(&session);
        (session, out, state)
    }

    fn keys(
        session: &mut Session<FakeOutput>,
        state: &mut EventLoopState,
        codes: &[KeyCode],
    ) -> bool {
        let settings = config::Settings::default();
        codes
            .iter()
            .any(|&c| handle_key_event(press(c), &settings, session, None, state))
    }

    #[test]
    fn format_time_pads_seconds() {
        assert_eq!(format_time(Duration::from_secs(0)), "0:00");
        assert_eq!(format_time(Duration::from_secs(65)), "1:05");
        assert_eq!(format_time(Duration::from_secs(3600)), "60:00");
    }

    #[test]
    fn meters_scale_to_glyphs() {
        assert_eq!(spectrum_bars(&[0.0; 1024]), " ".repeat(METER_BARS));
        assert_eq!(spectrum_bars(&[1.0; 1024]), "█".repeat(METER_BARS));
        let wave: Vec<f32> = (0..2048).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        assert_eq!(waveform_bars(&wave), "▄".repeat(METER_BARS));
        assert!(spectrum_bars(&[]).is_empty());
    }

    #[test]
    fn selection_keys_jump_insert_and_remove() {
        let (mut session, _out, mut state) = setup();

        keys(&mut session, &mut state, &[KeyCode::Char('j'), KeyCode::Char('j'), KeyCode::Enter]);
        assert_eq!(session.current_index(), Some(2));
        assert_eq!(session.current_track().unwrap().title, "C");

        keys(&mut session, &mut state, &[KeyCode::Char('k'), KeyCode::Char('i')]);
        assert_eq!(session.queue().len(), 4);
        assert_eq!(session.up_next().unwrap().title, "B");

        // The playing entry cannot be removed; the error becomes a notice.
        state.selected = session.current_index().unwrap();
        keys(&mut session, &mut state, &[KeyCode::Char('d')]);
        assert_eq!(session.queue().len(), 4);
        assert!(state.notice.is_some());

        state.selected = 0;
        keys(&mut session, &mut state, &[KeyCode::Char('d')]);
        assert_eq!(session.queue().len(), 3);
    }

    #[test]
    fn seek_drag_commits_on_enter_and_digits_jump() {
        let (mut session, out, mut state) = setup();

        keys(&mut session, &mut state, &[KeyCode::Char('g')]);
        assert!(session.is_seek_dragging());
        keys(
            &mut session,
            &mut state,
            &[KeyCode::Char('l'), KeyCode::Char('l'), KeyCode::Enter],
        );
        assert!(!session.is_seek_dragging());
        assert_eq!(out.state.borrow().position.as_secs(), 18);

        keys(&mut session, &mut state, &[KeyCode::Char('5')]);
        assert_eq!(out.state.borrow().position.as_secs(), 90);

        keys(&mut session, &mut state, &[KeyCode::Char('g'), KeyCode::Esc]);
        assert!(!session.is_seek_dragging());
        assert_eq!(out.state.borrow().position.as_secs(), 90);
    }

    #[test]
    fn band_keys_adjust_the_selected_band() {
        let (mut session, _out, mut state) = setup();
        keys(
            &mut session,
            &mut state,
            &[KeyCode::Tab, KeyCode::Char(')'), KeyCode::Char(')'), KeyCode::Char('(')],
        );
        let gains = session.chain().equalizer().gains;
        assert_eq!(gains[1], 1.0);
        assert_eq!(gains[0], 0.0);
    }

    #[test]
    fn q_quits_and_esc_does_not() {
        let (mut session, _out, mut state) = setup();
        assert!(!keys(&mut session, &mut state, &[KeyCode::Esc]));
        assert!(keys(&mut session, &mut state, &[KeyCode::Char('q')]));
    }
}
