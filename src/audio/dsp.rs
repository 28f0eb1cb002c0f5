//! The per-sample side of the signal chain.
//!
//! `ChainSource` wraps a decoded `rodio` source and runs
//! EQ bands -> bass-boost shelf -> stereo balance -> master gain -> analysis
//! tap on every frame. Parameters are published by [`SignalChain`] through a
//! shared [`ChainParams`] which the audio thread only ever `try_lock`s.
//!
//! [`SignalChain`]: super::chain::SignalChain

use std::f32::consts::FRAC_PI_2;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};
use rodio::Source;

use super::analysis::AnalysisTap;

/// Centre frequencies of the ten EQ bands (Hz).
pub const EQ_FREQUENCIES: [f32; 10] = [
    32.0, 64.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];
pub const EQ_BANDS: usize = EQ_FREQUENCIES.len();
pub const EQ_Q: f32 = 1.0;
pub const BASS_BOOST_FREQUENCY: f32 = 200.0;

/// Frames between parameter polls in the audio thread.
const PARAM_POLL_FRAMES: usize = 256;
/// Mono samples buffered before they are handed to the analysis tap.
const TAP_BLOCK: usize = 512;
/// Per-frame smoothing factor for master gain changes.
const GAIN_SMOOTHING: f32 = 0.005;

/// Values the audio thread needs, as last published by the control thread.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainParams {
    pub gain: f32,
    pub balance: f32,
    /// Effective band gains: all zero while the EQ is disabled.
    pub eq_gains: [f32; EQ_BANDS],
    pub bass_boost_db: f32,
    pub revision: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            gain: 1.0,
            balance: 0.0,
            eq_gains: [0.0; EQ_BANDS],
            bass_boost_db: 0.0,
            revision: 0,
        }
    }
}

/// Everything an output backend needs to splice the chain into a source.
#[derive(Clone, Default)]
pub struct ChainHandle {
    pub(crate) params: Arc<Mutex<ChainParams>>,
    pub(crate) tap: AnalysisTap,
}

impl ChainHandle {
    pub fn wrap<S: Source>(&self, source: S) -> ChainSource<S> {
        ChainSource::new(source, self.clone())
    }

    pub fn params(&self) -> Option<ChainParams> {
        self.params.lock().ok().map(|p| p.clone())
    }
}

fn passthrough() -> Coefficients<f32> {
    Coefficients {
        a1: 0.0,
        a2: 0.0,
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
    }
}

/// Filter coefficients for EQ band `band` at `gain_db`.
///
/// Lowest band is a low shelf, highest a high shelf, the rest peaking.
/// Bands the sample rate cannot represent collapse to a pass-through.
pub fn band_coefficients(band: usize, gain_db: f32, sample_rate: u32) -> Coefficients<f32> {
    let kind = match band {
        0 => Type::LowShelf(gain_db),
        b if b == EQ_BANDS - 1 => Type::HighShelf(gain_db),
        _ => Type::PeakingEQ(gain_db),
    };
    filter_coefficients(kind, EQ_FREQUENCIES[band], gain_db, sample_rate)
}

pub fn bass_boost_coefficients(gain_db: f32, sample_rate: u32) -> Coefficients<f32> {
    filter_coefficients(
        Type::LowShelf(gain_db),
        BASS_BOOST_FREQUENCY,
        gain_db,
        sample_rate,
    )
}

fn filter_coefficients(
    kind: Type<f32>,
    frequency: f32,
    gain_db: f32,
    sample_rate: u32,
) -> Coefficients<f32> {
    if gain_db.abs() < 0.01 || sample_rate == 0 {
        return passthrough();
    }
    Coefficients::<f32>::from_params(kind, (sample_rate as f32).hz(), frequency.hz(), EQ_Q)
        .unwrap_or_else(|_| passthrough())
}

/// Equal-power stereo panner. `balance` in `[-1, 1]`; 0 leaves both channels
/// untouched, the extremes fold the opposite channel into the kept one.
pub fn pan_frame(left: f32, right: f32, balance: f32) -> (f32, f32) {
    let pan = balance.clamp(-1.0, 1.0);
    if pan <= 0.0 {
        let x = (pan + 1.0) * FRAC_PI_2;
        (left + right * x.cos(), right * x.sin())
    } else {
        let x = pan * FRAC_PI_2;
        (left * x.cos(), right + left * x.sin())
    }
}

/// One filter cascade per channel: ten EQ bands then the bass shelf.
struct ChannelFilters {
    stages: Vec<DirectForm2Transposed<f32>>,
}

impl ChannelFilters {
    fn new(coefficients: &[Coefficients<f32>]) -> Self {
        Self {
            stages: coefficients
                .iter()
                .map(|c| DirectForm2Transposed::<f32>::new(*c))
                .collect(),
        }
    }

    fn update(&mut self, coefficients: &[Coefficients<f32>]) {
        for (stage, c) in self.stages.iter_mut().zip(coefficients) {
            stage.update_coefficients(*c);
        }
    }

    fn run(&mut self, mut x: f32, active: &[bool]) -> f32 {
        for (stage, &on) in self.stages.iter_mut().zip(active) {
            if on {
                x = stage.run(x);
            }
        }
        x
    }
}

pub struct ChainSource<S> {
    inner: S,
    handle: ChainHandle,
    revision: Option<u64>,
    channels: u16,
    sample_rate: u32,
    coefficients: Vec<Coefficients<f32>>,
    active: Vec<bool>,
    filters: Vec<ChannelFilters>,
    balance: f32,
    gain: f32,
    target_gain: f32,
    frame: Vec<f32>,
    frame_pos: usize,
    frames_since_poll: usize,
    tap_block: Vec<f32>,
}

impl<S: Source> ChainSource<S> {
    fn new(inner: S, handle: ChainHandle) -> Self {
        let channels = inner.channels().max(1);
        let sample_rate = inner.sample_rate();
        let mut source = Self {
            inner,
            handle,
            revision: None,
            channels,
            sample_rate,
            coefficients: vec![passthrough(); EQ_BANDS + 1],
            active: vec![false; EQ_BANDS + 1],
            filters: Vec::new(),
            balance: 0.0,
            gain: 0.0,
            target_gain: 0.0,
            frame: Vec::with_capacity(channels as usize),
            frame_pos: 0,
            frames_since_poll: 0,
            tap_block: Vec::with_capacity(TAP_BLOCK),
        };
        source.rebuild_filters();
        // Start at whatever gain is current so a freshly opened source does
        // not glide in from silence unless a fade asked for it.
        if let Some(p) = source.handle.params() {
            source.apply_params(&p);
            source.gain = p.gain;
        }
        source
    }

    fn rebuild_filters(&mut self) {
        self.filters = (0..self.channels)
            .map(|_| ChannelFilters::new(&self.coefficients))
            .collect();
    }

    fn apply_params(&mut self, p: &ChainParams) {
        for (band, &db) in p.eq_gains.iter().enumerate() {
            self.coefficients[band] = band_coefficients(band, db, self.sample_rate);
            self.active[band] = db.abs() >= 0.01;
        }
        self.coefficients[EQ_BANDS] = bass_boost_coefficients(p.bass_boost_db, self.sample_rate);
        self.active[EQ_BANDS] = p.bass_boost_db.abs() >= 0.01;

        for f in &mut self.filters {
            f.update(&self.coefficients);
        }
        self.balance = p.balance;
        self.target_gain = p.gain;
        self.revision = Some(p.revision);
    }

    fn poll_params(&mut self) {
        let fresh = match self.handle.params.try_lock() {
            Ok(p) if Some(p.revision) != self.revision => Some(p.clone()),
            _ => None,
        };
        if let Some(p) = fresh {
            self.apply_params(&p);
        }
    }

    /// Pull one frame from the inner source and run it through the chain.
    /// Returns false once the inner source is exhausted.
    fn fill_frame(&mut self) -> bool {
        // Channel layout may change between spans.
        let channels = self.inner.channels().max(1);
        if channels != self.channels || self.inner.sample_rate() != self.sample_rate {
            self.channels = channels;
            self.sample_rate = self.inner.sample_rate();
            self.revision = None;
            self.rebuild_filters();
        }

        if self.frames_since_poll == 0 || self.revision.is_none() {
            self.poll_params();
        }
        self.frames_since_poll = (self.frames_since_poll + 1) % PARAM_POLL_FRAMES;

        self.frame.clear();
        self.frame_pos = 0;
        for c in 0..self.channels as usize {
            match self.inner.next() {
                Some(s) => {
                    let filtered = self.filters[c].run(s, &self.active);
                    self.frame.push(filtered);
                }
                None => break,
            }
        }
        if self.frame.is_empty() {
            self.flush_tap();
            return false;
        }

        if self.frame.len() == 2 {
            let (l, r) = pan_frame(self.frame[0], self.frame[1], self.balance);
            self.frame[0] = l;
            self.frame[1] = r;
        }

        self.gain += (self.target_gain - self.gain) * GAIN_SMOOTHING;
        if (self.target_gain - self.gain).abs() < 1e-4 {
            self.gain = self.target_gain;
        }

        let mut mono = 0.0;
        for s in &mut self.frame {
            *s *= self.gain;
            mono += *s;
        }
        self.tap_block.push(mono / self.frame.len() as f32);
        if self.tap_block.len() >= TAP_BLOCK {
            self.flush_tap();
        }
        true
    }

    fn flush_tap(&mut self) {
        if !self.tap_block.is_empty() {
            self.handle.tap.push_block(&self.tap_block);
            self.tap_block.clear();
        }
    }
}

impl<S: Source> Iterator for ChainSource<S> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.frame_pos >= self.frame.len() && !self.fill_frame() {
            return None;
        }
        let s = self.frame[self.frame_pos];
        self.frame_pos += 1;
        Some(s)
    }
}

impl<S: Source> Source for ChainSource<S> {
    fn current_span_len(&self) -> Option<usize> {
        self.inner.current_span_len()
    }

    fn channels(&self) -> u16 {
        self.inner.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        self.inner.total_duration()
    }

    fn try_seek(&mut self, pos: Duration) -> Result<(), rodio::source::SeekError> {
        self.inner.try_seek(pos)?;
        self.frame.clear();
        self.frame_pos = 0;
        for f in &mut self.filters {
            for stage in &mut f.stages {
                stage.reset_state();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rodio::buffer::SamplesBuffer;

    fn handle_with(p: ChainParams) -> ChainHandle {
        let h = ChainHandle::default();
        *h.params.lock().unwrap() = p;
        h
    }

    #[test]
    fn pan_center_is_identity() {
        let (l, r) = pan_frame(0.3, -0.7, 0.0);
        assert!((l - 0.3).abs() < 1e-6);
        assert!((r + 0.7).abs() < 1e-6);
    }

    #[test]
    fn pan_hard_left_folds_right_into_left() {
        let (l, r) = pan_frame(0.25, 0.5, -1.0);
        assert!((l - 0.75).abs() < 1e-6);
        assert!(r.abs() < 1e-6);
    }

    #[test]
    fn pan_hard_right_folds_left_into_right() {
        let (l, r) = pan_frame(0.25, 0.5, 1.0);
        assert!(l.abs() < 1e-6);
        assert!((r - 0.75).abs() < 1e-6);
    }

    #[test]
    fn zero_gain_bands_are_passthrough() {
        for band in 0..EQ_BANDS {
            let c = band_coefficients(band, 0.0, 44_100);
            assert_eq!(c.b0, 1.0);
            assert_eq!(c.a1, 0.0);
        }
    }

    #[test]
    fn band_above_nyquist_is_passthrough() {
        let c = band_coefficients(EQ_BANDS - 1, 6.0, 22_050);
        assert_eq!(c.b0, 1.0);
        assert_eq!(c.b1, 0.0);
    }

    #[test]
    fn boosted_band_is_not_passthrough() {
        let c = band_coefficients(5, 6.0, 44_100);
        assert!(c.b0 != 1.0 || c.a1 != 0.0);
    }

    #[test]
    fn flat_chain_at_unity_gain_passes_samples_through() {
        let input = vec![0.1, -0.2, 0.3, -0.4, 0.5, -0.6];
        let source = SamplesBuffer::new(2, 44_100, input.clone());
        let out: Vec<f32> = handle_with(ChainParams::default()).wrap(source).collect();
        assert_eq!(out.len(), input.len());
        for (a, b) in out.iter().zip(&input) {
            assert!((a - b).abs() < 1e-6, "{a} vs {b}");
        }
    }

    #[test]
    fn silent_gain_mutes_output_and_feeds_tap() {
        let handle = handle_with(ChainParams {
            gain: 0.0,
            ..ChainParams::default()
        });
        let source = SamplesBuffer::new(1, 44_100, vec![0.9; 1024]);
        let out: Vec<f32> = handle.wrap(source).collect();
        assert!(out.iter().all(|&s| s == 0.0));

        let wave = super::super::analysis::Analyser::new(handle.tap.clone())
            .read(super::super::analysis::AnalysisKind::Waveform);
        assert!(wave.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn gain_changes_are_smoothed_not_stepped() {
        let handle = handle_with(ChainParams::default());
        let mut source = handle.wrap(SamplesBuffer::new(1, 44_100, vec![1.0; 4096]));
        assert!((source.next().unwrap() - 1.0).abs() < 1e-6);

        {
            let mut p = handle.params.lock().unwrap();
            p.gain = 0.0;
            p.revision += 1;
        }
        // The change is picked up at the next poll boundary and then glides.
        let rest: Vec<f32> = source.by_ref().take(PARAM_POLL_FRAMES + 8).collect();
        let last = *rest.last().unwrap();
        assert!(last < 1.0 && last > 0.0, "{last}");
    }
}
