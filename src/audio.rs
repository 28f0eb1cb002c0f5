//! Playback engine.
//!
//! Leaves first: `chain`/`dsp`/`analysis` (signal processing), `output` and
//! `transport` (one loaded source and its fades), `scheduler` (queue order),
//! and `session`, which composes them into user-level intents.

mod analysis;
mod chain;
mod dsp;
mod error;
mod output;
mod scheduler;
mod session;
mod transport;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use analysis::AnalysisKind;
pub use chain::EqPreset;
pub use dsp::{EQ_BANDS, EQ_FREQUENCIES};
pub use output::{Output, RodioOutput};
pub use session::{Session, SessionOptions, SystemClock};
pub use types::{PlaybackStatus, PlayerEvent, RepeatMode, TransportState};
