//! User settings: the `Settings` tree (audio, playback, equalizer, controls,
//! library, logging) and where it, and the persisted state, live on disk.

mod load;
mod schema;

pub use load::state_dir;
pub use schema::*;

#[cfg(test)]
mod tests;
