//! Analysis tap for visualizers.
//!
//! The audio thread pushes mono-mixed samples into a bounded ring buffer;
//! the control thread turns the latest window into a spectrum or waveform
//! snapshot on demand.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rustfft::{Fft, FftPlanner, num_complex::Complex};

/// Samples per analysis window.
pub const FFT_SIZE: usize = 2048;
/// Number of values returned for [`AnalysisKind::Frequency`].
pub const FREQUENCY_BINS: usize = FFT_SIZE / 2;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AnalysisKind {
    /// `FREQUENCY_BINS` magnitudes in `[0, 1]`, lowest frequency first.
    Frequency,
    /// The latest `FFT_SIZE` samples in `[-1, 1]`, oldest first.
    Waveform,
}

/// Shared ring buffer written by the audio thread.
#[derive(Clone, Default)]
pub struct AnalysisTap {
    samples: Arc<Mutex<VecDeque<f32>>>,
}

impl AnalysisTap {
    pub fn new() -> Self {
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(FFT_SIZE))),
        }
    }

    /// Append a block of mono samples. Never blocks: if the reader holds the
    /// lock the block is dropped.
    pub fn push_block(&self, block: &[f32]) {
        if let Ok(mut buf) = self.samples.try_lock() {
            for &s in block {
                if buf.len() >= FFT_SIZE {
                    buf.pop_front();
                }
                buf.push_back(s);
            }
        }
    }

    pub fn clear(&self) {
        if let Ok(mut buf) = self.samples.lock() {
            buf.clear();
        }
    }

    /// Exactly `FFT_SIZE` samples, zero-padded at the front while the buffer
    /// is still filling.
    fn window(&self) -> Vec<f32> {
        let mut out = vec![0.0; FFT_SIZE];
        if let Ok(buf) = self.samples.lock() {
            let offset = FFT_SIZE - buf.len();
            for (dst, &src) in out[offset..].iter_mut().zip(buf.iter()) {
                *dst = src;
            }
        }
        out
    }
}

/// Reads snapshots out of an [`AnalysisTap`].
pub struct Analyser {
    tap: AnalysisTap,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl Analyser {
    pub fn new(tap: AnalysisTap) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let window = (0..FFT_SIZE)
            .map(|i| {
                0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / FFT_SIZE as f32).cos()
            })
            .collect();
        Self { tap, fft, window }
    }

    /// Fixed-size snapshot for the visualizer. Has no side effects, so it can
    /// be called on every animation frame.
    pub fn read(&self, kind: AnalysisKind) -> Vec<f32> {
        let samples = self.tap.window();
        match kind {
            AnalysisKind::Waveform => samples.into_iter().map(|s| s.clamp(-1.0, 1.0)).collect(),
            AnalysisKind::Frequency => self.spectrum(&samples),
        }
    }

    fn spectrum(&self, samples: &[f32]) -> Vec<f32> {
        let mut buffer: Vec<Complex<f32>> = samples
            .iter()
            .zip(&self.window)
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();
        self.fft.process(&mut buffer);

        let range = MAX_DECIBELS - MIN_DECIBELS;
        buffer[..FREQUENCY_BINS]
            .iter()
            .map(|c| {
                let magnitude = c.norm() / FFT_SIZE as f32;
                if magnitude <= 0.0 {
                    return 0.0;
                }
                let db = 20.0 * magnitude.log10();
                ((db - MIN_DECIBELS) / range).clamp(0.0, 1.0)
            })
            .collect()
    }
}
