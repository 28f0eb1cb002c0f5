//! Test doubles for the transport and session.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::library::Track;

use super::dsp::ChainHandle;
use super::error::OutputError;
use super::output::Output;
use super::session::Clock;

#[derive(Default)]
pub struct FakeState {
    pub opened: Vec<PathBuf>,
    pub failing: HashSet<PathBuf>,
    pub playing: bool,
    pub loaded: bool,
    pub position: Duration,
    pub finished: bool,
    /// Message of a mid-stream fault to report on the next poll.
    pub fault: Option<String>,
    pub speed: f32,
    /// Duration reported by `open`; `None` makes the transport fall back to
    /// the track's tagged duration.
    pub report_duration: Option<Duration>,
}

/// An `Output` whose state the test can inspect and poke through a shared
/// handle after the transport has taken ownership of it.
#[derive(Clone, Default)]
pub struct FakeOutput {
    pub state: Rc<RefCell<FakeState>>,
}

impl FakeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, path: impl AsRef<Path>) {
        self.state
            .borrow_mut()
            .failing
            .insert(path.as_ref().to_path_buf());
    }

    pub fn finish(&self) {
        self.state.borrow_mut().finished = true;
    }

    /// Break the playing source: the next poll reports a decode fault.
    pub fn break_stream(&self, message: &str) {
        let mut st = self.state.borrow_mut();
        st.fault = Some(message.to_string());
        st.finished = true;
    }

    pub fn set_position(&self, position: Duration) {
        self.state.borrow_mut().position = position;
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.state.borrow().opened.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.state.borrow().playing
    }
}

impl Output for FakeOutput {
    fn open(
        &mut self,
        track: &Track,
        _chain: &ChainHandle,
    ) -> Result<Option<Duration>, OutputError> {
        let mut st = self.state.borrow_mut();
        st.opened.push(track.path.clone());
        st.playing = false;
        st.finished = false;
        st.fault = None;
        st.position = Duration::ZERO;
        if st.failing.contains(&track.path) {
            st.loaded = false;
            return Err(OutputError::Decode {
                path: track.path.clone(),
                message: "unsupported format".to_string(),
            });
        }
        st.loaded = true;
        Ok(st.report_duration)
    }

    fn play(&mut self) {
        let mut st = self.state.borrow_mut();
        st.playing = st.loaded;
    }

    fn pause(&mut self) {
        self.state.borrow_mut().playing = false;
    }

    fn stop(&mut self) {
        let mut st = self.state.borrow_mut();
        st.playing = false;
        st.loaded = false;
        st.position = Duration::ZERO;
    }

    fn seek(&mut self, position: Duration) -> Result<(), OutputError> {
        self.state.borrow_mut().position = position;
        Ok(())
    }

    fn position(&self) -> Duration {
        self.state.borrow().position
    }

    fn is_finished(&self) -> bool {
        self.state.borrow().finished
    }

    fn set_speed(&mut self, speed: f32) {
        self.state.borrow_mut().speed = speed;
    }

    fn take_fault(&mut self) -> Option<OutputError> {
        let mut st = self.state.borrow_mut();
        let message = st.fault.take()?;
        st.playing = false;
        st.loaded = false;
        Some(OutputError::Decode {
            path: PathBuf::from("/music/broken"),
            message,
        })
    }
}

/// A clock that only moves when told to.
#[derive(Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

pub fn track(name: &str, secs: u64) -> Track {
    let mut t = Track::untagged(format!("/music/{name}.mp3"), name);
    t.duration = Some(Duration::from_secs(secs));
    t
}
