//! Control-thread side of the signal chain.
//!
//! `SignalChain` holds the user-facing parameters (volume, balance, speed,
//! equalizer, bass boost) plus the gain ramp used for fades, and publishes
//! the effective values to the audio thread through a [`ChainHandle`].

use std::time::{Duration, Instant};

use tracing::debug;

use super::analysis::{AnalysisKind, AnalysisTap, Analyser};
use super::dsp::{ChainHandle, ChainParams, EQ_BANDS};
use super::error::{PlayerError, Result};

pub const MIN_SPEED: f32 = 0.25;
pub const MAX_SPEED: f32 = 4.0;
pub const EQ_GAIN_LIMIT_DB: f32 = 12.0;
pub const BASS_BOOST_MAX_DB: f32 = 12.0;

/// Built-in equalizer curves.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EqPreset {
    Flat,
    BassBoost,
    TrebleBoost,
    VShape,
    Vocal,
    Rock,
    Electronic,
    Acoustic,
}

impl EqPreset {
    pub const ALL: [EqPreset; 8] = [
        Self::Flat,
        Self::BassBoost,
        Self::TrebleBoost,
        Self::VShape,
        Self::Vocal,
        Self::Rock,
        Self::Electronic,
        Self::Acoustic,
    ];

    pub fn gains(self) -> [f32; EQ_BANDS] {
        match self {
            Self::Flat => [0.0; EQ_BANDS],
            Self::BassBoost => [6.0, 5.0, 4.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            Self::TrebleBoost => [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0, 4.0, 5.0, 6.0],
            Self::VShape => [5.0, 4.0, 2.0, -1.0, -2.0, -2.0, -1.0, 2.0, 4.0, 5.0],
            Self::Vocal => [-2.0, -1.0, 0.0, 2.0, 4.0, 4.0, 2.0, 0.0, -1.0, -2.0],
            Self::Rock => [4.0, 3.0, 1.0, 0.0, -1.0, 0.0, 1.0, 3.0, 4.0, 4.0],
            Self::Electronic => [5.0, 4.0, 2.0, 0.0, 1.0, 2.0, 1.0, 3.0, 4.0, 4.0],
            Self::Acoustic => [2.0, 1.0, 0.0, 1.0, 2.0, 2.0, 1.0, 2.0, 2.0, 1.0],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Flat => "Flat",
            Self::BassBoost => "Bass Boost",
            Self::TrebleBoost => "Treble Boost",
            Self::VShape => "V-Shape",
            Self::Vocal => "Vocal",
            Self::Rock => "Rock",
            Self::Electronic => "Electronic",
            Self::Acoustic => "Acoustic",
        }
    }

    /// Case-insensitive lookup that ignores spaces, dashes and underscores,
    /// so `"bass-boost"`, `"Bass Boost"` and `"bass_boost"` all match.
    pub fn from_name(name: &str) -> Option<Self> {
        let key: String = name
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .flat_map(char::to_lowercase)
            .collect();
        Self::ALL.into_iter().find(|p| {
            let candidate: String = p
                .name()
                .chars()
                .filter(|c| !matches!(c, ' ' | '-' | '_'))
                .flat_map(char::to_lowercase)
                .collect();
            candidate == key
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EqualizerState {
    pub enabled: bool,
    /// Stored band gains. Kept while the EQ is disabled.
    pub gains: [f32; EQ_BANDS],
}

impl Default for EqualizerState {
    fn default() -> Self {
        Self {
            enabled: true,
            gains: [0.0; EQ_BANDS],
        }
    }
}

impl EqualizerState {
    /// Gains the audio thread actually applies.
    pub fn effective(&self) -> [f32; EQ_BANDS] {
        if self.enabled {
            self.gains
        } else {
            [0.0; EQ_BANDS]
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RampKind {
    FadeIn,
    FadeOut,
}

#[derive(Debug, Clone)]
struct GainRamp {
    from: f32,
    to: f32,
    start: Instant,
    duration: Duration,
    kind: RampKind,
}

impl GainRamp {
    fn value_at(&self, now: Instant) -> f32 {
        let elapsed = now.saturating_duration_since(self.start);
        if self.duration.is_zero() || elapsed >= self.duration {
            return self.to;
        }
        let t = elapsed.as_secs_f32() / self.duration.as_secs_f32();
        self.from + (self.to - self.from) * t
    }

    fn done_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.start) >= self.duration
    }
}

fn clamp_or(v: f32, lo: f32, hi: f32, fallback: f32) -> f32 {
    if v.is_nan() { fallback } else { v.clamp(lo, hi) }
}

pub struct SignalChain {
    volume: f32,
    balance: f32,
    speed: f32,
    eq: EqualizerState,
    bass_boost_db: f32,
    /// Master gain currently applied; equals `volume` unless a ramp moved it.
    gain: f32,
    ramp: Option<GainRamp>,
    handle: ChainHandle,
    analyser: Analyser,
    revision: u64,
}

impl Default for SignalChain {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalChain {
    pub fn new() -> Self {
        let tap = AnalysisTap::new();
        let handle = ChainHandle {
            params: Default::default(),
            tap: tap.clone(),
        };
        let mut chain = Self {
            volume: 1.0,
            balance: 0.0,
            speed: 1.0,
            eq: EqualizerState::default(),
            bass_boost_db: 0.0,
            gain: 1.0,
            ramp: None,
            handle,
            analyser: Analyser::new(tap),
            revision: 0,
        };
        chain.publish();
        chain
    }

    /// Handle for output backends to splice the chain into their sources.
    pub fn handle(&self) -> ChainHandle {
        self.handle.clone()
    }

    fn publish(&mut self) {
        self.revision = self.revision.wrapping_add(1);
        let params = ChainParams {
            gain: self.gain,
            balance: self.balance,
            eq_gains: self.eq.effective(),
            bass_boost_db: self.bass_boost_db,
            revision: self.revision,
        };
        if let Ok(mut p) = self.handle.params.lock() {
            *p = params;
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn balance(&self) -> f32 {
        self.balance
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn equalizer(&self) -> &EqualizerState {
        &self.eq
    }

    pub fn bass_boost(&self) -> f32 {
        self.bass_boost_db
    }

    /// Set the configured volume. Without a ramp in flight it applies at once;
    /// during a fade-in the ramp is retargeted from where it is now; during a
    /// fade-out only the stored volume changes.
    pub fn set_volume(&mut self, volume: f32, now: Instant) -> f32 {
        let volume = clamp_or(volume, 0.0, 1.0, 0.0);
        self.volume = volume;
        match self.ramp.as_mut() {
            None => {
                self.gain = volume;
                self.publish();
            }
            Some(ramp) if ramp.kind == RampKind::FadeIn => {
                let current = ramp.value_at(now);
                let remaining = ramp
                    .duration
                    .saturating_sub(now.saturating_duration_since(ramp.start));
                ramp.from = current;
                ramp.to = volume;
                ramp.start = now;
                ramp.duration = remaining;
            }
            Some(_) => {}
        }
        volume
    }

    pub fn set_balance(&mut self, balance: f32) -> f32 {
        self.balance = clamp_or(balance, -1.0, 1.0, 0.0);
        self.publish();
        self.balance
    }

    /// The clamped speed. Applying it to the playing source is the transport's job.
    pub fn set_speed(&mut self, speed: f32) -> f32 {
        self.speed = clamp_or(speed, MIN_SPEED, MAX_SPEED, 1.0);
        self.speed
    }

    pub fn set_eq_band(&mut self, band: usize, gain_db: f32) -> Result<f32> {
        let slot = self
            .eq
            .gains
            .get_mut(band)
            .ok_or(PlayerError::NoSuchBand(band))?;
        *slot = clamp_or(gain_db, -EQ_GAIN_LIMIT_DB, EQ_GAIN_LIMIT_DB, 0.0);
        let applied = *slot;
        self.publish();
        Ok(applied)
    }

    /// Disabling forces every applied band to 0 dB but keeps the stored gains.
    /// `gains`, when given, replaces the stored gains.
    pub fn set_eq_enabled(&mut self, enabled: bool, gains: Option<[f32; EQ_BANDS]>) {
        if let Some(gains) = gains {
            for (slot, g) in self.eq.gains.iter_mut().zip(gains) {
                *slot = clamp_or(g, -EQ_GAIN_LIMIT_DB, EQ_GAIN_LIMIT_DB, 0.0);
            }
        }
        self.eq.enabled = enabled;
        self.publish();
    }

    pub fn apply_preset(&mut self, preset: EqPreset) -> [f32; EQ_BANDS] {
        debug!(preset = preset.name(), "applying equalizer preset");
        self.eq.gains = preset.gains();
        self.publish();
        self.eq.gains
    }

    pub fn set_bass_boost(&mut self, gain_db: f32) -> f32 {
        self.bass_boost_db = clamp_or(gain_db, 0.0, BASS_BOOST_MAX_DB, 0.0);
        self.publish();
        self.bass_boost_db
    }

    /// Start a linear ramp from the current gain to `target`. Any ramp already
    /// in flight is frozen where it is first.
    pub fn ramp_volume(&mut self, target: f32, duration: Duration, now: Instant, kind: RampKind) {
        self.cancel_ramp(now);
        let target = clamp_or(target, 0.0, 1.0, 0.0);
        if duration.is_zero() {
            self.gain = target;
            self.publish();
            return;
        }
        self.ramp = Some(GainRamp {
            from: self.gain,
            to: target,
            start: now,
            duration,
            kind,
        });
    }

    /// Move the gain along the ramp. Returns the ramp's kind once it completes.
    pub fn advance(&mut self, now: Instant) -> Option<RampKind> {
        let ramp = self.ramp.as_ref()?;
        let value = ramp.value_at(now);
        let done = ramp.done_at(now);
        let kind = ramp.kind;
        if (value - self.gain).abs() > f32::EPSILON {
            self.gain = value;
            self.publish();
        }
        if done {
            self.ramp = None;
            return Some(kind);
        }
        None
    }

    /// Drop the ramp's future values, keeping whatever gain it reached.
    pub fn cancel_ramp(&mut self, now: Instant) {
        if let Some(ramp) = self.ramp.take() {
            self.gain = ramp.value_at(now);
            self.publish();
        }
    }

    /// Set the master gain without touching the configured volume.
    pub fn set_gain_now(&mut self, gain: f32) {
        self.ramp = None;
        self.gain = clamp_or(gain, 0.0, 1.0, 0.0);
        self.publish();
    }

    pub fn is_ramping(&self) -> bool {
        self.ramp.is_some()
    }

    pub fn ramp_kind(&self) -> Option<RampKind> {
        self.ramp.as_ref().map(|r| r.kind)
    }

    pub fn read_analysis(&self, kind: AnalysisKind) -> Vec<f32> {
        self.analyser.read(kind)
    }

    pub fn clear_analysis(&self) {
        self.handle.tap.clear();
    }
}
