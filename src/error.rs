use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures of a single export run.
///
/// The variants follow the three stages of the export: reading the source
/// container, reshaping the pack, and writing the JSON document.
#[derive(Error, Debug)]
pub enum ExportError {
    /// The source file is missing, unreadable, or not a tensor container.
    #[error("failed to load voice pack from {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: LoadFailure,
    },

    /// Axis 1 of the pack is absent or not a singleton.
    #[error("invalid pack shape {found:?}: expected axis 1 of size {expected}")]
    Shape { expected: i64, found: Vec<i64> },

    /// The destination could not be written.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: WriteFailure,
    },
}

/// Underlying cause of [`ExportError::Load`].
#[derive(Error, Debug)]
pub enum LoadFailure {
    #[error(transparent)]
    Torch(#[from] tch::TchError),

    /// A multi-tensor container did not hold exactly one tensor.
    #[error("expected exactly one tensor in container, found {0}")]
    TensorCount(usize),

    #[error("unsupported element kind {0:?}")]
    Kind(tch::Kind),

    #[error(transparent)]
    Io(#[from] io::Error),

    /// The file is not a zip archive as written by `torch.save`.
    #[error(transparent)]
    Archive(#[from] zip::result::ZipError),

    /// The archive's pickle or storage records are malformed.
    #[error("invalid torch archive: {0}")]
    Format(String),
}

/// Underlying cause of [`ExportError::Write`].
#[derive(Error, Debug)]
pub enum WriteFailure {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Torch(#[from] tch::TchError),
}

impl ExportError {
    pub(crate) fn load(path: impl Into<PathBuf>, source: impl Into<LoadFailure>) -> Self {
        ExportError::Load {
            path: path.into(),
            source: source.into(),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: impl Into<WriteFailure>) -> Self {
        ExportError::Write {
            path: path.into(),
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;
