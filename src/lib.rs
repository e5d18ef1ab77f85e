//! Export voice-embedding packs saved as tensors to plain JSON arrays.
//!
//! A pack is stored as `[rows, 1, dim]`; the exporter drops the singleton
//! axis and writes `[[f64; dim]; rows]` as compact JSON.

pub mod error;
pub mod export;
pub mod pack;
pub mod settings;
mod torch_file;

pub use error::{ExportError, LoadFailure, WriteFailure};
pub use export::{export, ExportReport, Exporter};
pub use pack::{Precision, VoicePack};
pub use settings::{Args, Settings};
