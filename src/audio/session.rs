//! The facade the rest of the application talks to.
//!
//! `Session` keeps the scheduler and the transport in step: user intents go
//! in, transport lifecycle events come back through `tick`, and everything
//! observable is published as [`PlayerEvent`]s to subscribers.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::library::Track;
use crate::state::SessionSnapshot;

use super::analysis::AnalysisKind;
use super::chain::{EqPreset, SignalChain};
use super::dsp::EQ_BANDS;
use super::error::{PlayerError, Result};
use super::output::Output;
use super::scheduler::{QueueEntry, Scheduler};
use super::transport::{FadeSettings, Transport};
use super::types::{PlaybackStatus, PlayerEvent, RepeatMode, TransportEvent, TransportState};

/// Source of "now" for every timed decision the session makes.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Copy, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub fades: FadeSettings,
    pub prev_restart: Duration,
    pub error_skip_delay: Duration,
    pub position_tick: Duration,
    pub volume: f32,
    pub balance: f32,
    pub speed: f32,
    pub shuffle: bool,
    pub shuffle_seed: Option<u64>,
    pub repeat: RepeatMode,
    pub eq_enabled: bool,
    pub eq_gains: [f32; EQ_BANDS],
    pub bass_boost_db: f32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl SessionOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let eq = &settings.equalizer;
        let eq_gains = match eq.preset.as_deref().and_then(EqPreset::from_name) {
            Some(preset) => preset.gains(),
            None => {
                let mut gains = [0.0; EQ_BANDS];
                for (slot, g) in gains.iter_mut().zip(&eq.gains) {
                    *slot = *g;
                }
                gains
            }
        };

        Self {
            fades: FadeSettings::from_settings(&settings.audio),
            prev_restart: Duration::from_millis(settings.playback.prev_restart_ms),
            error_skip_delay: Duration::from_millis(settings.playback.error_skip_delay_ms),
            position_tick: Duration::from_millis(settings.playback.position_tick_ms.max(1)),
            volume: settings.audio.volume,
            balance: settings.audio.balance,
            speed: settings.audio.speed,
            shuffle: settings.playback.shuffle,
            shuffle_seed: settings.playback.shuffle_seed,
            repeat: settings.playback.repeat.into(),
            eq_enabled: eq.enabled,
            eq_gains,
            bass_boost_db: eq.bass_boost_db,
        }
    }
}

/// Advance scheduled after a track failed to load.
#[derive(Debug, Clone, Copy)]
struct ErrorAdvance {
    due: Instant,
    generation: u64,
}

pub struct Session<O: Output> {
    transport: Transport<O>,
    scheduler: Scheduler,
    prev_restart: Duration,
    error_skip_delay: Duration,
    clock: Box<dyn Clock>,
    sleep_deadline: Option<Instant>,
    error_advance: Option<ErrorAdvance>,
    /// Loads that failed in a row; reset by any successful open.
    failed_loads: usize,
    seek_drag: bool,
    status: PlaybackStatus,
    listeners: Vec<Sender<PlayerEvent>>,
}

impl<O: Output> Session<O> {
    pub fn new(output: O, options: &SessionOptions, clock: Box<dyn Clock>) -> Self {
        let scheduler = match options.shuffle_seed {
            Some(seed) => Scheduler::with_seed(seed),
            None => Scheduler::new(),
        };
        Self::with_scheduler(output, options, clock, scheduler)
    }

    pub fn with_scheduler(
        output: O,
        options: &SessionOptions,
        clock: Box<dyn Clock>,
        mut scheduler: Scheduler,
    ) -> Self {
        let now = clock.now();
        let mut chain = SignalChain::new();
        chain.set_volume(options.volume, now);
        chain.set_balance(options.balance);
        chain.set_speed(options.speed);
        chain.set_eq_enabled(options.eq_enabled, Some(options.eq_gains));
        chain.set_bass_boost(options.bass_boost_db);

        scheduler.set_shuffle(options.shuffle);
        scheduler.set_repeat(options.repeat);

        let transport = Transport::new(output, chain, options.fades, options.position_tick);
        Self {
            transport,
            scheduler,
            prev_restart: options.prev_restart,
            error_skip_delay: options.error_skip_delay,
            clock,
            sleep_deadline: None,
            error_advance: None,
            failed_loads: 0,
            seek_drag: false,
            status: PlaybackStatus::Stopped,
            listeners: Vec::new(),
        }
    }

    /// A new receiver for every event published from now on.
    pub fn subscribe(&mut self) -> Receiver<PlayerEvent> {
        let (tx, rx) = mpsc::channel();
        self.listeners.push(tx);
        rx
    }

    fn emit(&mut self, event: PlayerEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_status(&mut self, status: PlaybackStatus) {
        if self.status != status {
            debug!(?status, "status changed");
            self.status = status;
            self.emit(PlayerEvent::StatusChanged(status));
        }
    }

    fn queue_changed(&mut self) {
        let len = self.scheduler.len();
        self.emit(PlayerEvent::QueueChanged { len });
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn queue(&self) -> &[QueueEntry] {
        self.scheduler.entries()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.scheduler.current()
    }

    pub fn current_track(&self) -> Option<Arc<Track>> {
        self.scheduler.current_entry().map(|e| e.track.clone())
    }

    pub fn position(&self) -> Duration {
        self.transport.position()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.transport.duration()
    }

    /// What plays after the current track ends on its own, if known.
    pub fn up_next(&self) -> Option<Arc<Track>> {
        self.scheduler.peek_next().map(|e| e.track.clone())
    }

    pub fn shuffle(&self) -> bool {
        self.scheduler.shuffle_enabled()
    }

    pub fn repeat(&self) -> RepeatMode {
        self.scheduler.repeat()
    }

    pub fn chain(&self) -> &SignalChain {
        self.transport.chain()
    }

    pub fn is_seek_dragging(&self) -> bool {
        self.seek_drag
    }

    /// Time left on the sleep timer.
    pub fn sleep_remaining(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.sleep_deadline
            .map(|d| d.saturating_duration_since(now))
    }

    pub fn read_analysis(&self, kind: AnalysisKind) -> Vec<f32> {
        self.transport.chain().read_analysis(kind)
    }

    /// Load the scheduler's current entry and start it.
    fn load_current(&mut self) {
        let Some(index) = self.scheduler.current() else {
            return;
        };
        let Some(entry) = self.scheduler.current_entry().cloned() else {
            return;
        };
        let now = self.clock.now();
        // Leaving this track behind: a pending skip for it no longer applies.
        self.error_advance = None;
        self.transport.load(entry.track.clone(), now);
        self.emit(PlayerEvent::TrackChanged {
            index,
            track: entry.track,
        });
        if self.transport.play(now).is_ok() {
            self.set_status(PlaybackStatus::Playing);
        }
        self.pump(now);
    }

    /// Replace the queue with `tracks` and start playing at `index`.
    pub fn play_queue_at(&mut self, tracks: Vec<Track>, index: usize) -> Result<()> {
        let tracks = tracks.into_iter().map(Arc::new).collect();
        self.scheduler.set_queue(tracks, index)?;
        self.failed_loads = 0;
        info!(len = self.scheduler.len(), index, "playing new queue");
        self.queue_changed();
        self.load_current();
        Ok(())
    }

    pub fn toggle(&mut self) -> Result<()> {
        match self.status {
            PlaybackStatus::Playing => self.pause(),
            _ => self.play(),
        }
    }

    pub fn play(&mut self) -> Result<()> {
        match self.transport.state() {
            TransportState::Idle | TransportState::Error => {
                if self.scheduler.is_empty() {
                    return Err(PlayerError::QueueEmpty);
                }
                if self.scheduler.current().is_none() {
                    self.scheduler.resolve_next_manual();
                }
                self.load_current();
                Ok(())
            }
            _ => {
                let now = self.clock.now();
                self.transport.play(now)?;
                self.set_status(PlaybackStatus::Playing);
                self.pump(now);
                Ok(())
            }
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        let now = self.clock.now();
        self.transport.pause(now)?;
        if self.status == PlaybackStatus::Playing {
            self.set_status(PlaybackStatus::Paused);
        }
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        let now = self.clock.now();
        self.error_advance = None;
        self.transport.stop(now)?;
        self.set_status(PlaybackStatus::Stopped);
        self.pump(now);
        Ok(())
    }

    /// Skip forward. Returns `false` at the end of the queue (nothing changes).
    pub fn next(&mut self) -> Result<bool> {
        if self.scheduler.is_empty() {
            return Err(PlayerError::QueueEmpty);
        }
        match self.scheduler.resolve_next_manual() {
            Some(_) => {
                self.load_current();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Restart the current track when it has played past the threshold,
    /// otherwise step back, or restart when there is nothing before it.
    pub fn prev(&mut self) -> Result<()> {
        if self.scheduler.is_empty() {
            return Err(PlayerError::QueueEmpty);
        }
        let now = self.clock.now();
        if self.transport.position() > self.prev_restart {
            self.transport.seek_absolute(Duration::ZERO, now)?;
            self.pump(now);
            return Ok(());
        }
        match self.scheduler.resolve_prev() {
            Some(_) => self.load_current(),
            None => {
                if matches!(
                    self.transport.state(),
                    TransportState::Ready | TransportState::Playing | TransportState::Paused
                ) {
                    self.transport.seek_absolute(Duration::ZERO, now)?;
                    self.pump(now);
                }
            }
        }
        Ok(())
    }

    pub fn play_index(&mut self, index: usize) -> Result<()> {
        self.scheduler.jump_to(index)?;
        self.load_current();
        Ok(())
    }

    pub fn insert_next(&mut self, track: Track) -> usize {
        let index = self.scheduler.insert_next(Arc::new(track));
        self.queue_changed();
        index
    }

    pub fn append(&mut self, tracks: Vec<Track>) {
        if tracks.is_empty() {
            return;
        }
        self.scheduler
            .append(tracks.into_iter().map(Arc::new).collect());
        self.queue_changed();
    }

    pub fn remove_at(&mut self, index: usize) -> Result<Arc<Track>> {
        let removed = self.scheduler.remove_at(index)?;
        self.queue_changed();
        Ok(removed.track)
    }

    pub fn clear_queue(&mut self) {
        let now = self.clock.now();
        self.error_advance = None;
        self.failed_loads = 0;
        self.transport.unload(now);
        self.scheduler.clear();
        self.set_status(PlaybackStatus::Stopped);
        self.queue_changed();
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        let enabled = self.scheduler.toggle_shuffle();
        info!(enabled, "shuffle toggled");
        self.emit(PlayerEvent::ShuffleChanged(enabled));
        enabled
    }

    pub fn cycle_repeat(&mut self) -> RepeatMode {
        let mode = self.scheduler.cycle_repeat();
        info!(?mode, "repeat mode changed");
        self.emit(PlayerEvent::RepeatChanged(mode));
        mode
    }

    /// One-shot pause after `minutes`. `None` or `Some(0)` cancels; a new
    /// timer replaces any pending one.
    pub fn set_sleep_timer(&mut self, minutes: Option<u32>) -> Option<Instant> {
        let now = self.clock.now();
        self.sleep_deadline = minutes
            .filter(|&m| m > 0)
            .map(|m| now + Duration::from_secs(u64::from(m) * 60));
        debug!(?minutes, "sleep timer set");
        self.sleep_deadline
    }

    pub fn seek_fraction(&mut self, fraction: f64) -> Result<Duration> {
        let now = self.clock.now();
        let pos = self.transport.seek_fraction(fraction, now)?;
        self.pump(now);
        Ok(pos)
    }

    pub fn seek_to(&mut self, position: Duration) -> Result<Duration> {
        let now = self.clock.now();
        let pos = self.transport.seek_absolute(position, now)?;
        self.pump(now);
        Ok(pos)
    }

    /// Relative seek; negative offsets stop at the start of the track.
    pub fn seek_by(&mut self, seconds: i64) -> Result<Duration> {
        let current = self.transport.position();
        let delta = Duration::from_secs(seconds.unsigned_abs());
        let target = if seconds < 0 {
            current.saturating_sub(delta)
        } else {
            current + delta
        };
        self.seek_to(target)
    }

    /// Position updates are held back while the user drags the seek bar.
    pub fn begin_seek_drag(&mut self) {
        self.seek_drag = true;
    }

    pub fn end_seek_drag(&mut self, fraction: f64) -> Result<Duration> {
        self.seek_drag = false;
        self.seek_fraction(fraction)
    }

    pub fn set_volume(&mut self, volume: f32) -> f32 {
        let now = self.clock.now();
        self.transport.set_volume(volume, now)
    }

    pub fn set_balance(&mut self, balance: f32) -> f32 {
        self.transport.set_balance(balance)
    }

    pub fn set_speed(&mut self, speed: f32) -> f32 {
        self.transport.set_speed(speed)
    }

    pub fn set_eq_band(&mut self, band: usize, gain_db: f32) -> Result<f32> {
        self.transport.chain_mut().set_eq_band(band, gain_db)
    }

    pub fn set_eq_enabled(&mut self, enabled: bool) {
        self.transport.chain_mut().set_eq_enabled(enabled, None);
    }

    pub fn apply_preset(&mut self, preset: EqPreset) -> [f32; EQ_BANDS] {
        self.transport.chain_mut().apply_preset(preset)
    }

    pub fn set_bass_boost(&mut self, gain_db: f32) -> f32 {
        self.transport.chain_mut().set_bass_boost(gain_db)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let chain = self.transport.chain();
        SessionSnapshot {
            volume: chain.volume(),
            balance: chain.balance(),
            speed: chain.speed(),
            repeat: self.scheduler.repeat().into(),
            shuffle: self.scheduler.shuffle_enabled(),
            eq_enabled: chain.equalizer().enabled,
            eq_gains: chain.equalizer().gains.to_vec(),
            bass_boost_db: chain.bass_boost(),
        }
    }

    /// Apply a saved snapshot. Every value goes through the same clamping
    /// setters as live changes.
    pub fn restore(&mut self, snap: &SessionSnapshot) {
        self.set_volume(snap.volume);
        self.set_balance(snap.balance);
        self.set_speed(snap.speed);
        self.set_bass_boost(snap.bass_boost_db);
        let mut gains = [0.0; EQ_BANDS];
        for (slot, g) in gains.iter_mut().zip(&snap.eq_gains) {
            *slot = *g;
        }
        self.transport
            .chain_mut()
            .set_eq_enabled(snap.eq_enabled, Some(gains));
        self.scheduler.set_repeat(snap.repeat.into());
        self.scheduler.set_shuffle(snap.shuffle);
    }

    /// Ramp to silence before shutdown. Keep calling `tick` until
    /// `is_fading` is false.
    pub fn fade_out(&mut self, duration: Duration) {
        let now = self.clock.now();
        self.transport.fade_out_to_silence(duration, now);
    }

    pub fn is_fading(&self) -> bool {
        self.transport.is_fading()
    }

    /// Drive time forward: ramps, deferred switches, the sleep timer, the
    /// debounced error skip, and transport events.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        self.transport.tick(now);

        if self.error_advance.is_some_and(|a| now >= a.due) {
            if let Some(advance) = self.error_advance.take() {
                self.run_error_advance(advance);
            }
        }

        if self.sleep_deadline.is_some_and(|d| now >= d) {
            self.sleep_deadline = None;
            info!("sleep timer fired");
            if let Err(e) = self.pause() {
                debug!(error = %e, "sleep timer found nothing to pause");
            }
            self.emit(PlayerEvent::SleepTimerFired);
        }

        self.pump(now);
    }

    fn pump(&mut self, now: Instant) {
        loop {
            let events = self.transport.drain_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                self.handle_transport_event(event, now);
            }
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::PositionTick { position, duration } => {
                if !self.seek_drag {
                    self.emit(PlayerEvent::Position { position, duration });
                }
            }
            TransportEvent::MetadataReady { duration } => {
                self.failed_loads = 0;
                self.emit(PlayerEvent::DurationKnown(duration));
            }
            TransportEvent::Ended => match self.scheduler.resolve_next() {
                Some(_) => self.load_current(),
                None => {
                    info!("end of queue");
                    if let Err(e) = self.transport.stop(now) {
                        warn!(error = %e, "failed to rewind after the last track");
                    }
                    self.set_status(PlaybackStatus::Stopped);
                    self.emit(PlayerEvent::QueueFinished);
                }
            },
            TransportEvent::Error { message } => {
                let label = self
                    .transport
                    .track()
                    .map(|t| t.label())
                    .unwrap_or_default();
                self.emit(PlayerEvent::Notice(format!("Cannot play {label}: {message}")));
                self.set_status(PlaybackStatus::Stopped);
                self.failed_loads += 1;
                self.error_advance = Some(ErrorAdvance {
                    due: now + self.error_skip_delay,
                    generation: self.transport.generation(),
                });
            }
        }
    }

    fn run_error_advance(&mut self, advance: ErrorAdvance) {
        if advance.generation != self.transport.generation()
            || self.transport.state() != TransportState::Error
        {
            return;
        }
        // Every entry failed since the last good open: wrapping would retry
        // the same broken files forever.
        let next = if self.failed_loads >= self.scheduler.len() {
            None
        } else {
            self.scheduler.resolve_next_manual()
        };
        match next {
            Some(_) => self.load_current(),
            None => {
                info!(failed = self.failed_loads, "no playable track left in the queue");
                self.failed_loads = 0;
                self.emit(PlayerEvent::Notice("End of queue".to_string()));
                self.emit(PlayerEvent::QueueFinished);
            }
        }
    }
}
