//! Pipeline-level errors.
//!
//! Everything the core correction can raise ([`CteError`]) passes through
//! unchanged; this layer only adds the failure modes of driving whole
//! files and batches.

use std::path::PathBuf;

use detrail::CteError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Cte(#[from] CteError),

    #[error("FITS I/O error: {0}")]
    Fits(#[from] fitsio::errors::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The exposure parsed as FITS but is not laid out the way a science
    /// exposure must be (missing planes, non-image extensions, and so on).
    #[error("exposure {path}: {reason}", path = .path.display())]
    MalformedExposure { path: PathBuf, reason: String },

    /// An `@listfile` argument could not be expanded.
    #[error("input list {path}: {reason}", path = .path.display())]
    BadInputList { path: PathBuf, reason: String },
}
