//! Error and warning types shared across the correction pipeline.
//!
//! Fatal conditions are represented by [`CteError`] and abort the exposure
//! before any output is finalized. Numerical conditions that the correction
//! can recover from (epoch extrapolation, negative-charge clamping) are
//! represented by [`CteWarning`]; they are accumulated during processing and
//! reported alongside the result rather than interrupting it.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::correct::AmpId;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CteError>;

/// Fatal errors raised while resolving calibration data or correcting an
/// exposure.
#[derive(Debug, Error)]
pub enum CteError {
    /// The image was taken with a detector the calibration table does not
    /// characterize.
    #[error("detector '{image}' is not supported by this calibration (characterized for '{calibration}')")]
    UnsupportedDetector { image: String, calibration: String },

    /// Read-noise model flag outside the supported set.
    #[error("read-noise model {0} is not supported (0 = none, 1 = smoothing)")]
    InvalidNoiseMode(i64),

    /// Signal units the requested operation cannot work in.
    #[error("unsupported signal units '{0}'")]
    InvalidUnits(String),

    /// No time-windowed tail-profile table covers the exposure start epoch.
    #[error("no tail-profile table covers exposure epoch MJD {epoch:.2}")]
    NoEpochWindow { epoch: f64 },

    /// The calibration locator resolved to a path that does not exist.
    #[error("calibration reference file not found: {}", path.display())]
    RefFileNotFound { path: PathBuf },

    /// A header keyword the pipeline depends on is absent.
    #[error("required header keyword {key} is missing")]
    MissingKey { key: String },

    /// The calibration table parsed but its contents violate a structural
    /// requirement (ordering, ranges, matching lengths).
    #[error("malformed calibration table: {0}")]
    MalformedCalibration(String),

    /// Science and uncertainty planes of one amp disagree in shape.
    #[error("amp {amp}: science plane {sci:?} and uncertainty plane {err:?} shapes differ")]
    RegionShape {
        amp: char,
        sci: (usize, usize),
        err: (usize, usize),
    },

    /// Underlying FITS I/O failure.
    #[error("FITS I/O error: {0}")]
    Fits(#[from] fitsio::errors::Error),

    /// Pixel buffer could not be shaped into the expected 2-D layout.
    #[error("image buffer shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Non-fatal numerical conditions observed during a correction run.
///
/// Warnings never stop processing; they are collected into the final report
/// so callers can decide whether the result is trustworthy.
#[derive(Debug, Clone, PartialEq)]
pub enum CteWarning {
    /// Exposure epoch fell outside the calibrated scale table; the scale was
    /// clamped to the nearest endpoint.
    ScaleExtrapolated {
        epoch: f64,
        table_start: f64,
        table_end: f64,
        scale: f64,
    },

    /// Simulated charge went negative and was clamped to zero.
    NegativeChargeClamped {
        amp: AmpId,
        pixels: usize,
        deepest: f64,
    },
}

impl fmt::Display for CteWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CteWarning::ScaleExtrapolated {
                epoch,
                table_start,
                table_end,
                scale,
            } => write!(
                f,
                "epoch MJD {epoch:.2} outside calibrated range [{table_start:.2}, {table_end:.2}]; scale clamped to {scale:.4}"
            ),
            CteWarning::NegativeChargeClamped {
                amp,
                pixels,
                deepest,
            } => write!(
                f,
                "amp {amp}: {pixels} pixel(s) clamped to zero charge (deepest {deepest:.3} e-)"
            ),
        }
    }
}
