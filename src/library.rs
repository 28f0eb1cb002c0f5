//! Library collaborators: the `Track` record, the tag reader and the
//! folder scanner. Everything here feeds plain `Track` values to the engine.

mod metadata;
mod model;
mod scan;

pub use metadata::read_metadata;
pub use model::*;
pub use scan::{scan, scan_folder};
