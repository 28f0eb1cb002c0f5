//! Single-source playback state machine.
//!
//! The transport owns one loaded track at a time, drives the output through
//! load/play/pause/seek/stop and runs the fade ramps on the signal chain.
//! It never decides what plays next: lifecycle events are queued for the
//! session to drain.
//!
//! There is no timer thread. Every method that cares about time takes `now`,
//! and `tick` moves ramps, deferred source switches and position reporting
//! forward.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::AudioSettings;
use crate::library::Track;

use super::chain::{RampKind, SignalChain};
use super::error::{PlayerError, Result};
use super::output::Output;
use super::types::{TransportEvent, TransportState};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FadeSettings {
    pub fade_in: bool,
    pub fade_out: bool,
    /// Length of the fade-in, and of the fade-out before a switch.
    pub crossfade: Duration,
    /// Upper bound on the fade-out so a long crossfade never stalls a switch.
    pub max_fade_out: Duration,
}

impl Default for FadeSettings {
    fn default() -> Self {
        Self::from_settings(&AudioSettings::default())
    }
}

impl FadeSettings {
    pub fn from_settings(audio: &AudioSettings) -> Self {
        Self {
            fade_in: audio.fade_in,
            fade_out: audio.fade_out,
            crossfade: Duration::from_millis(audio.crossfade_ms),
            max_fade_out: Duration::from_millis(audio.max_fade_out_ms),
        }
    }

    fn fade_out_len(&self) -> Duration {
        if self.fade_out {
            self.crossfade.min(self.max_fade_out)
        } else {
            Duration::ZERO
        }
    }

    fn fade_in_len(&self) -> Duration {
        if self.fade_in {
            self.crossfade
        } else {
            Duration::ZERO
        }
    }
}

/// A switch waiting for the outgoing track's fade-out to finish.
struct PendingSwitch {
    generation: u64,
    track: Arc<Track>,
    switch_at: Instant,
}

pub struct Transport<O: Output> {
    output: O,
    chain: SignalChain,
    fades: FadeSettings,
    state: TransportState,
    /// Bumped by every `load`/`unload`; deferred work tagged with an older
    /// value is dropped.
    generation: u64,
    track: Option<Arc<Track>>,
    pending: Option<PendingSwitch>,
    play_when_ready: bool,
    duration: Option<Duration>,
    tick_interval: Duration,
    last_tick: Option<Instant>,
    events: VecDeque<TransportEvent>,
}

impl<O: Output> Transport<O> {
    pub fn new(output: O, chain: SignalChain, fades: FadeSettings, tick_interval: Duration) -> Self {
        Self {
            output,
            chain,
            fades,
            state: TransportState::Idle,
            generation: 0,
            track: None,
            pending: None,
            play_when_ready: false,
            duration: None,
            tick_interval,
            last_tick: None,
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The loaded track, or the one being switched to while `Loading`.
    pub fn track(&self) -> Option<&Arc<Track>> {
        self.pending
            .as_ref()
            .map(|p| &p.track)
            .or(self.track.as_ref())
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn position(&self) -> Duration {
        match self.state {
            TransportState::Idle | TransportState::Error => Duration::ZERO,
            _ if self.pending.is_some() => Duration::ZERO,
            _ => self.output.position(),
        }
    }

    pub fn chain(&self) -> &SignalChain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut SignalChain {
        &mut self.chain
    }

    pub fn drain_events(&mut self) -> Vec<TransportEvent> {
        self.events.drain(..).collect()
    }

    /// Gain a freshly loaded source starts at.
    fn initial_gain(&self) -> f32 {
        if self.fades.fade_in_len().is_zero() {
            self.chain.volume()
        } else {
            0.0
        }
    }

    /// Load `track`. While something is audible the switch waits for a
    /// fade-out; otherwise it happens now. Returns the load generation.
    pub fn load(&mut self, track: Arc<Track>, now: Instant) -> u64 {
        self.generation += 1;
        self.play_when_ready = false;

        let audible = self.state == TransportState::Playing || self.pending.is_some();
        let fade = self.fades.fade_out_len();
        if audible && !fade.is_zero() {
            // Freezes a previous fade-out wherever it got to and fades from there.
            self.chain.ramp_volume(0.0, fade, now, RampKind::FadeOut);
            debug!(
                generation = self.generation,
                fade_ms = fade.as_millis() as u64,
                "fading out before switch"
            );
            self.pending = Some(PendingSwitch {
                generation: self.generation,
                track,
                switch_at: now + fade,
            });
            self.state = TransportState::Loading;
        } else {
            self.pending = None;
            self.chain.cancel_ramp(now);
            self.switch_to(track, now);
        }
        self.generation
    }

    fn switch_to(&mut self, track: Arc<Track>, now: Instant) {
        self.pending = None;
        self.output.stop();
        self.chain.clear_analysis();
        self.duration = None;
        self.last_tick = None;
        self.track = Some(track.clone());
        self.state = TransportState::Loading;

        let gain = self.initial_gain();
        self.chain.set_gain_now(gain);

        match self.output.open(&track, &self.chain.handle()) {
            Err(e) => {
                warn!(path = %track.path.display(), error = %e, "failed to load track");
                self.state = TransportState::Error;
                self.play_when_ready = false;
                self.events.push_back(TransportEvent::Error {
                    message: e.to_string(),
                });
            }
            Ok(decoded) => {
                info!(path = %track.path.display(), "loaded track");
                self.duration = decoded.or(track.duration);
                if let Some(duration) = self.duration {
                    self.events
                        .push_back(TransportEvent::MetadataReady { duration });
                }
                self.output.set_speed(self.chain.speed());
                self.state = TransportState::Ready;
                if std::mem::take(&mut self.play_when_ready) {
                    self.start(now);
                }
            }
        }
    }

    fn start(&mut self, now: Instant) {
        self.output.play();
        self.state = TransportState::Playing;
        let volume = self.chain.volume();
        let fade_in = self.fades.fade_in_len();
        if !fade_in.is_zero() && self.chain.gain() < volume {
            self.chain
                .ramp_volume(volume, fade_in, now, RampKind::FadeIn);
        } else if !self.chain.is_ramping() {
            self.chain.set_gain_now(volume);
        }
    }

    /// Start or resume. While `Loading` the request is remembered and honoured
    /// once the new source is open.
    pub fn play(&mut self, now: Instant) -> Result<()> {
        match self.state {
            TransportState::Loading => {
                self.play_when_ready = true;
                Ok(())
            }
            TransportState::Ready | TransportState::Paused => {
                if self.output.is_finished() {
                    self.reopen(now);
                    if self.state != TransportState::Ready {
                        return Err(PlayerError::InvalidState(self.state));
                    }
                }
                self.start(now);
                Ok(())
            }
            TransportState::Playing => Ok(()),
            TransportState::Idle => Err(PlayerError::NothingLoaded),
            TransportState::Error => Err(PlayerError::InvalidState(self.state)),
        }
    }

    pub fn pause(&mut self, now: Instant) -> Result<()> {
        match self.state {
            TransportState::Playing => {
                self.output.pause();
                // A half-finished fade-in restarts from here on resume.
                if self.chain.ramp_kind() == Some(RampKind::FadeIn) {
                    self.chain.cancel_ramp(now);
                }
                self.state = TransportState::Paused;
                Ok(())
            }
            TransportState::Loading => {
                self.play_when_ready = false;
                Ok(())
            }
            TransportState::Ready | TransportState::Paused => Ok(()),
            TransportState::Idle => Err(PlayerError::NothingLoaded),
            TransportState::Error => Err(PlayerError::InvalidState(self.state)),
        }
    }

    /// Back to position 0 with the source still loaded (`Ready`).
    pub fn stop(&mut self, now: Instant) -> Result<()> {
        match self.state {
            TransportState::Idle | TransportState::Error => Ok(()),
            TransportState::Loading => {
                self.play_when_ready = false;
                if let Some(p) = self.pending.take() {
                    self.switch_to(p.track, now);
                }
                Ok(())
            }
            TransportState::Ready | TransportState::Playing | TransportState::Paused => {
                self.chain.cancel_ramp(now);
                self.output.pause();
                self.last_tick = None;
                if self.output.is_finished() {
                    self.reopen(now);
                    return Ok(());
                }
                self.output.seek(Duration::ZERO)?;
                let gain = self.initial_gain();
                self.chain.set_gain_now(gain);
                self.state = TransportState::Ready;
                Ok(())
            }
        }
    }

    /// A source that played to its end cannot be rewound on every backend, so
    /// open it again.
    fn reopen(&mut self, now: Instant) {
        if let Some(track) = self.track.clone() {
            self.switch_to(track, now);
        }
    }

    /// Drop the source entirely.
    pub fn unload(&mut self, now: Instant) {
        self.generation += 1;
        self.chain.cancel_ramp(now);
        self.output.stop();
        self.chain.clear_analysis();
        self.pending = None;
        self.play_when_ready = false;
        self.track = None;
        self.duration = None;
        self.last_tick = None;
        self.state = TransportState::Idle;
    }

    fn ensure_seekable(&self) -> Result<()> {
        match self.state {
            TransportState::Ready | TransportState::Playing | TransportState::Paused => Ok(()),
            TransportState::Idle => Err(PlayerError::NothingLoaded),
            state => Err(PlayerError::InvalidState(state)),
        }
    }

    /// Seek to `fraction` of the duration. Rejected while the duration is unknown.
    pub fn seek_fraction(&mut self, fraction: f64, now: Instant) -> Result<Duration> {
        self.ensure_seekable()?;
        let duration = self.duration.ok_or(PlayerError::DurationUnknown)?;
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        self.seek_absolute(duration.mul_f64(fraction), now)
    }

    /// Seek to `position`, clamped to `[0, duration]` when the duration is known.
    pub fn seek_absolute(&mut self, position: Duration, now: Instant) -> Result<Duration> {
        self.ensure_seekable()?;
        let target = match self.duration {
            Some(d) => position.min(d),
            None => position,
        };
        if self.output.is_finished() {
            self.reopen(now);
            self.ensure_seekable()?;
        }
        self.output.seek(target)?;
        self.last_tick = None;
        self.events.push_back(TransportEvent::PositionTick {
            position: target,
            duration: self.duration,
        });
        Ok(target)
    }

    pub fn set_volume(&mut self, volume: f32, now: Instant) -> f32 {
        self.chain.set_volume(volume, now)
    }

    pub fn set_balance(&mut self, balance: f32) -> f32 {
        self.chain.set_balance(balance)
    }

    pub fn set_speed(&mut self, speed: f32) -> f32 {
        let applied = self.chain.set_speed(speed);
        self.output.set_speed(applied);
        applied
    }

    /// Ramp to silence, e.g. before quitting. `is_fading` turns false once done.
    pub fn fade_out_to_silence(&mut self, duration: Duration, now: Instant) {
        if self.state == TransportState::Playing || self.pending.is_some() {
            self.chain
                .ramp_volume(0.0, duration, now, RampKind::FadeOut);
        }
    }

    pub fn is_fading(&self) -> bool {
        self.chain.ramp_kind() == Some(RampKind::FadeOut)
    }

    /// Advance ramps, perform a due source switch, and report position or
    /// natural end while playing.
    pub fn tick(&mut self, now: Instant) {
        if let Some(kind) = self.chain.advance(now) {
            debug!(?kind, "ramp finished");
        }

        if self.pending.as_ref().is_some_and(|p| now >= p.switch_at) {
            if let Some(p) = self.pending.take() {
                if p.generation == self.generation {
                    self.switch_to(p.track, now);
                } else {
                    debug!(
                        stale = p.generation,
                        current = self.generation,
                        "dropping superseded switch"
                    );
                }
            }
        }

        if self.state != TransportState::Playing {
            return;
        }
        if let Some(fault) = self.output.take_fault() {
            warn!(error = %fault, "playback failed");
            self.state = TransportState::Error;
            self.last_tick = None;
            self.events.push_back(TransportEvent::Error {
                message: fault.to_string(),
            });
            return;
        }
        if self.output.is_finished() {
            debug!("track ended");
            self.state = TransportState::Ready;
            self.last_tick = None;
            self.events.push_back(TransportEvent::Ended);
            return;
        }
        let due = self
            .last_tick
            .is_none_or(|t| now.saturating_duration_since(t) >= self.tick_interval);
        if due {
            self.last_tick = Some(now);
            self.events.push_back(TransportEvent::PositionTick {
                position: self.output.position(),
                duration: self.duration,
            });
        }
    }
}
