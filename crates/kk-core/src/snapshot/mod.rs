//! Keyword Snapshots and the KKS Format
//!
//! The in-memory snapshot plus the KKS file format used to persist it:
//! layout constants, an encoder, and a bounds-checked decoder.

mod format;
mod loader;
mod model;
mod writer;

pub use format::*;
pub use loader::*;
pub use model::*;
pub use writer::*;
