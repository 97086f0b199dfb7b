//! Time dependence of the trap population.
//!
//! Radiation damage accumulates on orbit, so the effective trap density
//! grows with time. The calibration file carries a sampled scale factor
//! versus epoch (MJD); the factor multiplies every trap capacity in the
//! readout model. Between samples the factor is interpolated linearly;
//! outside the sampled range it is held at the nearest endpoint and the
//! extrapolation is reported as a warning rather than an error.

use crate::error::{CteError, CteWarning, Result};

/// Sampled scale factor versus epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleTable {
    /// Sample epochs, MJD, strictly increasing.
    pub mjd: Vec<f64>,
    /// Scale factor at each epoch.
    pub scale: Vec<f64>,
}

impl ScaleTable {
    /// Build a scale table from matched epoch and factor samples.
    ///
    /// Epochs must be strictly increasing and at least two samples are
    /// required; factors must be finite and non-negative.
    pub fn new(mjd: Vec<f64>, scale: Vec<f64>) -> Result<Self> {
        if mjd.len() != scale.len() {
            return Err(CteError::MalformedCalibration(format!(
                "scale table has {} epochs but {} factors",
                mjd.len(),
                scale.len()
            )));
        }
        if mjd.len() < 2 {
            return Err(CteError::MalformedCalibration(
                "scale table needs at least two samples".into(),
            ));
        }
        if mjd.windows(2).any(|w| w[1] <= w[0]) {
            return Err(CteError::MalformedCalibration(
                "scale table epochs must be strictly increasing".into(),
            ));
        }
        if scale.iter().any(|&s| !s.is_finite() || s < 0.0) {
            return Err(CteError::MalformedCalibration(
                "scale factors must be finite and non-negative".into(),
            ));
        }
        Ok(ScaleTable { mjd, scale })
    }

    /// Epoch range covered by the samples.
    pub fn domain(&self) -> (f64, f64) {
        (self.mjd[0], self.mjd[self.mjd.len() - 1])
    }

    /// Scale factor at `epoch`, with a warning when the epoch falls
    /// outside the sampled range and the factor is held at the endpoint.
    pub fn scale_at(&self, epoch: f64) -> (f64, Option<CteWarning>) {
        let last = self.mjd.len() - 1;
        if epoch < self.mjd[0] || epoch > self.mjd[last] {
            let scale = if epoch < self.mjd[0] {
                self.scale[0]
            } else {
                self.scale[last]
            };
            let warning = CteWarning::ScaleExtrapolated {
                epoch,
                table_start: self.mjd[0],
                table_end: self.mjd[last],
                scale,
            };
            return (scale, Some(warning));
        }

        let hi = self.mjd.partition_point(|&m| m < epoch).max(1).min(last);
        let lo = hi - 1;
        let frac = (epoch - self.mjd[lo]) / (self.mjd[hi] - self.mjd[lo]);
        let scale = self.scale[lo] + frac * (self.scale[hi] - self.scale[lo]);
        (scale, None)
    }
}
