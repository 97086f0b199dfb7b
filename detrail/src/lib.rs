//! Pixel-based correction of charge transfer inefficiency in CCD images.
//!
//! Radiation-damaged CCDs trap a little charge from every packet clocked
//! through them during readout and release it over the following shifts,
//! so sources lose signal and grow trails pointing away from the serial
//! register. This crate implements the pixel-based correction: a
//! calibration reference file describes the trap population, its growth
//! over mission time, and its release profile, and the correction
//! iteratively reconstructs the image that would have produced the
//! observed trailed one.
//!
//! Main entry points:
//!
//! * [`calib::TrapCalibration`] loads the reference file and
//!   [`TrapCalibration::model_for`](calib::TrapCalibration::model_for)
//!   specializes it to an exposure epoch.
//! * [`correct_regions`] removes trailing from amplifier regions in
//!   place; [`blur_regions`] adds trailing to synthetic frames.
//! * [`sim`] holds the per-column kernel underneath both.

pub mod calib;
pub mod correct;
pub mod curves;
pub mod error;
pub mod noise;
pub mod sim;

#[cfg(test)]
pub(crate) mod testkit;

pub use calib::{ModelConstants, TrapCalibration, TrapModel};
pub use correct::{
    blur_regions, correct_regions, AmpId, AmpRegion, CorrectionReport, RegionStats,
    AMP_LOG_PRIORITY,
};
pub use error::{CteError, CteWarning, Result};
pub use noise::NoiseMode;
