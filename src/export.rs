use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ExportError, Result};
use crate::pack::{Precision, VoicePack};

/// Outcome of a successful export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub source: PathBuf,
    pub target: PathBuf,
    /// Shape of the pack after the singleton axis was dropped.
    pub shape: Vec<i64>,
    pub bytes_written: usize,
}

/// Converts voice packs into JSON documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct Exporter {
    precision: Precision,
}

impl Exporter {
    pub fn new(precision: Precision) -> Self {
        Self { precision }
    }

    /// Loads the pack at `source`, drops axis 1 and writes the values to
    /// `target` as nested JSON arrays.
    ///
    /// The target is only opened once the pack has been loaded, reshaped and
    /// serialized, so load and shape failures leave it untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Load`], [`ExportError::Shape`] or
    /// [`ExportError::Write`] for the stage that failed.
    pub fn run(
        &self,
        source: impl AsRef<Path>,
        target: impl AsRef<Path>,
    ) -> Result<ExportReport> {
        let source = source.as_ref();
        let target = target.as_ref();

        let pack = VoicePack::load(source)?.squeeze_axis()?;
        let shape = pack.shape();
        println!("pack: {shape:?}");
        println!("pack: {pack}");

        let nested = pack
            .to_nested(self.precision)
            .map_err(|e| ExportError::write(target, e))?;
        let json = serde_json::to_vec(&nested).map_err(|e| ExportError::write(target, e))?;
        debug!("serialized {} bytes as {:?}", json.len(), self.precision);

        fs::write(target, &json).map_err(|e| ExportError::write(target, e))?;
        info!("wrote {}", target.display());
        println!("export {} to {} ok!", source.display(), target.display());

        Ok(ExportReport {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            shape,
            bytes_written: json.len(),
        })
    }
}

/// Exports `source` to `target` with default settings.
///
/// # Errors
///
/// See [`Exporter::run`].
pub fn export(source: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<ExportReport> {
    Exporter::default().run(source, target)
}
