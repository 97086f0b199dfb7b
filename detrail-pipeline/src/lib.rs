//! Exposure-level driver for pixel-based CCD charge transfer efficiency
//! correction.
//!
//! The [`detrail`] crate holds the column physics; this crate wraps it in
//! the file plumbing an observer actually touches: FITS exposures with
//! SCI/ERR plane pairs, amplifier quadrant geometry, unit handling, task
//! configuration, and batch processing. Binaries `cte_correct`,
//! `cte_synth`, and `make_trap_table` sit on top.

pub mod config;
pub mod error;
pub mod exposure;
pub mod pipeline;
pub mod quadrant;
pub mod synthetic;
pub mod units;

pub use config::TaskConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{
    correct_batch, correct_exposure, expand_inputs, synthesize_exposure, BatchOutcome,
    ExposureOutcome,
};
