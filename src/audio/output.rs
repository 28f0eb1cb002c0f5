//! Audio output backends.
//!
//! The transport talks to the sound device through [`Output`] so it can be
//! driven by a fake in tests. [`RodioOutput`] is the real thing: one
//! `rodio::Sink` per loaded track, fed through the signal chain.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink, Source};
use tracing::{debug, info, warn};

use crate::library::Track;

use super::dsp::ChainHandle;
use super::error::OutputError;

/// One loaded media source at a time.
pub trait Output {
    /// Replace the current source with `track`, loaded paused at position 0.
    /// Returns the decoded duration when the container reports one.
    fn open(&mut self, track: &Track, chain: &ChainHandle)
    -> Result<Option<Duration>, OutputError>;
    fn play(&mut self);
    fn pause(&mut self);
    /// Drop the current source.
    fn stop(&mut self);
    fn seek(&mut self, position: Duration) -> Result<(), OutputError>;
    fn position(&self) -> Duration;
    /// True once the loaded source has played to its end.
    fn is_finished(&self) -> bool;
    fn set_speed(&mut self, speed: f32);
    /// A fault hit while the source was playing, reported once.
    fn take_fault(&mut self) -> Option<OutputError> {
        None
    }
}

/// How far short of its decoded length a source may stop before the stop
/// counts as a decode failure rather than the end of the track.
const TRUNCATION_SLACK: Duration = Duration::from_secs(2);

struct Loaded {
    path: PathBuf,
    duration: Option<Duration>,
}

pub struct RodioOutput {
    stream: OutputStream,
    sink: Option<Sink>,
    loaded: Option<Loaded>,
    speed: f32,
}

impl RodioOutput {
    /// Open the named output device, or the system default when `device` is
    /// `None` or no device by that name exists.
    pub fn open(device: Option<&str>) -> Result<Self, OutputError> {
        let mut stream = match device.and_then(find_device) {
            Some(dev) => OutputStreamBuilder::from_device(dev)
                .and_then(|b| b.open_stream())
                .map_err(|e| OutputError::Device(e.to_string()))?,
            None => {
                if let Some(name) = device {
                    warn!(device = name, "output device not found, using default");
                }
                OutputStreamBuilder::open_default_stream()
                    .map_err(|e| OutputError::Device(e.to_string()))?
            }
        };
        // rodio logs to stderr when the stream is dropped, which would land
        // on top of the raw-mode terminal.
        stream.log_on_drop(false);

        Ok(Self {
            stream,
            sink: None,
            loaded: None,
            speed: 1.0,
        })
    }
}

fn find_device(name: &str) -> Option<rodio::cpal::Device> {
    let host = rodio::cpal::default_host();
    let devices = host.output_devices().ok()?;
    for dev in devices {
        if dev.name().ok().as_deref() == Some(name) {
            info!(device = name, "using output device");
            return Some(dev);
        }
    }
    None
}

impl Output for RodioOutput {
    fn open(
        &mut self,
        track: &Track,
        chain: &ChainHandle,
    ) -> Result<Option<Duration>, OutputError> {
        self.stop();

        let file = File::open(&track.path).map_err(|source| OutputError::Open {
            path: track.path.clone(),
            source,
        })?;
        let source = Decoder::new(BufReader::new(file)).map_err(|e| OutputError::Decode {
            path: track.path.clone(),
            message: e.to_string(),
        })?;
        let duration = source.total_duration();
        debug!(path = %track.path.display(), ?duration, "opened source");

        let sink = Sink::connect_new(self.stream.mixer());
        sink.pause();
        sink.set_speed(self.speed);
        sink.append(chain.wrap(source));
        self.sink = Some(sink);
        self.loaded = Some(Loaded {
            path: track.path.clone(),
            duration,
        });
        Ok(duration)
    }

    fn play(&mut self) {
        if let Some(s) = &self.sink {
            s.play();
        }
    }

    fn pause(&mut self) {
        if let Some(s) = &self.sink {
            s.pause();
        }
    }

    fn stop(&mut self) {
        if let Some(s) = self.sink.take() {
            s.stop();
        }
        self.loaded = None;
    }

    fn seek(&mut self, position: Duration) -> Result<(), OutputError> {
        match &self.sink {
            Some(s) => s
                .try_seek(position)
                .map_err(|e| OutputError::Seek(e.to_string())),
            None => Ok(()),
        }
    }

    fn position(&self) -> Duration {
        self.sink.as_ref().map_or(Duration::ZERO, |s| s.get_pos())
    }

    fn is_finished(&self) -> bool {
        self.sink.as_ref().is_none_or(|s| s.empty())
    }

    fn set_speed(&mut self, speed: f32) {
        self.speed = speed;
        if let Some(s) = &self.sink {
            s.set_speed(speed);
        }
    }

    // rodio's decoders end the stream on a read error instead of reporting
    // it, so a source that runs dry well before its decoded length is the
    // only trace a mid-stream failure leaves.
    fn take_fault(&mut self) -> Option<OutputError> {
        let sink = self.sink.as_ref()?;
        if !sink.empty() {
            return None;
        }
        let total = self.loaded.as_ref()?.duration?;
        let reached = sink.get_pos();
        if reached + TRUNCATION_SLACK >= total {
            return None;
        }
        let loaded = self.loaded.take()?;
        self.sink = None;
        Some(OutputError::Decode {
            path: loaded.path,
            message: format!(
                "stream ended at {:.1}s of {:.1}s",
                reached.as_secs_f64(),
                total.as_secs_f64()
            ),
        })
    }
}
