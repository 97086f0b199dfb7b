//! Trap calibration data and the readout model built from it.
//!
//! # Calibration file layout
//!
//! The calibration reference file is a FITS table file. The primary header
//! carries the scalar parameters (`RN_CLIP`, `SIM_NIT`, `SHFT_NIT`,
//! `NCHGLEAK`, `DETECTOR`) and the extensions carry the sampled curves:
//!
//! * `DTDE` 1 HDU with columns `DTDE`, `Q`: differential trap density
//!   versus charge packet size, electrons.
//! * `LEVELS` 1 HDU with column `LEVEL`: the charge levels the column
//!   simulation tracks, electrons.
//! * `CTE_SCALE` 1 HDU with columns `MJD`, `SCALE`: trap population growth
//!   over mission time.
//! * `CHG_LEAK<i>` 1 HDU per observation epoch, keyed by `MJD1`/`MJD2`,
//!   with a `NODE` column and one `LOG_Q_<k>` column per calibrated
//!   decade of charge: fractional charge release per shift of trail
//!   distance.
//!
//! [`TrapCalibration`] holds the file contents verbatim. [`model_for`]
//! specializes them to one exposure epoch: the epoch picks the scale
//! factor and the tail profile window, and the sampled curves are expanded
//! into the dense [`LevelTables`] the column kernel consumes.
//!
//! [`model_for`]: TrapCalibration::model_for

pub mod refpath;
pub mod scale;
mod table;

pub use refpath::{EnvPathResolver, RefPathResolver};
pub use scale::ScaleTable;
pub use table::write_calibration;

use std::path::Path;

use ndarray::Array2;

use crate::curves::{LevelTables, OccupancyCurve, TailCurves};
use crate::error::{CteError, CteWarning, Result};

/// Model constants that are fixed per detector family rather than read
/// from the calibration file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelConstants {
    /// Longest trail, in shifts, the model tracks per trap.
    pub max_tail_len: usize,
    /// Upper end of the charge axis, electrons.
    pub max_charge: f64,
    /// Dense sample count for the occupancy curve.
    pub phi_samples: usize,
    /// Release fraction below which the rest of a tail is ignored.
    pub negligible_leak: f64,
}

impl Default for ModelConstants {
    fn default() -> Self {
        ModelConstants {
            max_tail_len: 100,
            max_charge: 99_999.0,
            phi_samples: 10_000,
            negligible_leak: 1e-4,
        }
    }
}

/// Differential trap density samples: `dtde[i]` traps per electron at
/// packet size `q[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrapDensityTable {
    pub q: Vec<f64>,
    pub dtde: Vec<f64>,
}

/// Tail profile samples valid for one observation epoch window
/// `[mjd_start, mjd_end)`.
///
/// `samples[[i, k]]` is the fractional release at trail distance
/// `nodes[i]` for the charge decade `log10(q) = k + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct TailProfileTable {
    pub mjd_start: f64,
    pub mjd_end: f64,
    pub nodes: Vec<usize>,
    pub samples: Array2<f64>,
}

/// Contents of a trap calibration reference file.
#[derive(Debug, Clone, PartialEq)]
pub struct TrapCalibration {
    /// Detector the file calibrates, from the `DETECTOR` key.
    pub detector: String,
    /// Read noise search half-width for the noise model, electrons.
    pub rn_clip: f64,
    /// Correction refinement passes.
    pub sim_nit: usize,
    /// Elementary shifts per simulated readout.
    pub shft_nit: usize,
    /// Charge levels tracked by the column simulation, ascending.
    pub levels: Vec<f64>,
    pub density: TrapDensityTable,
    pub scale: ScaleTable,
    /// Tail profiles, ascending by epoch window.
    pub profiles: Vec<TailProfileTable>,
    pub constants: ModelConstants,
}

impl TrapCalibration {
    /// Assemble and validate a calibration with default constants.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        detector: impl Into<String>,
        rn_clip: f64,
        sim_nit: usize,
        shft_nit: usize,
        levels: Vec<f64>,
        density: TrapDensityTable,
        scale: ScaleTable,
        profiles: Vec<TailProfileTable>,
    ) -> Result<Self> {
        let calib = TrapCalibration {
            detector: detector.into(),
            rn_clip,
            sim_nit,
            shft_nit,
            levels,
            density,
            scale,
            profiles,
            constants: ModelConstants::default(),
        };
        calib.validate()?;
        Ok(calib)
    }

    /// Read a calibration reference file with default constants.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        Self::read_with_constants(path, ModelConstants::default())
    }

    /// Read a calibration reference file with explicit constants.
    pub fn read_with_constants(path: impl AsRef<Path>, constants: ModelConstants) -> Result<Self> {
        table::read_calibration(path.as_ref(), constants)
    }

    /// Structural validation. Numeric curve validation happens again when
    /// the dense tables are built for an epoch.
    pub fn validate(&self) -> Result<()> {
        if self.sim_nit < 1 || self.shft_nit < 1 {
            return Err(CteError::MalformedCalibration(format!(
                "iteration counts must be at least 1, got SIM_NIT={} SHFT_NIT={}",
                self.sim_nit, self.shft_nit
            )));
        }
        if !self.rn_clip.is_finite() || self.rn_clip < 0.0 {
            return Err(CteError::MalformedCalibration(format!(
                "RN_CLIP must be finite and non-negative, got {}",
                self.rn_clip
            )));
        }
        if self.levels.len() < 2 {
            return Err(CteError::MalformedCalibration(
                "LEVELS must carry at least two levels".into(),
            ));
        }
        if self.density.q.len() != self.density.dtde.len() || self.density.q.len() < 2 {
            return Err(CteError::MalformedCalibration(format!(
                "DTDE table has {} Q samples and {} DTDE samples",
                self.density.q.len(),
                self.density.dtde.len()
            )));
        }
        if self.profiles.is_empty() {
            return Err(CteError::MalformedCalibration(
                "calibration carries no CHG_LEAK extensions".into(),
            ));
        }
        for profile in &self.profiles {
            if profile.mjd_start >= profile.mjd_end {
                return Err(CteError::MalformedCalibration(format!(
                    "tail profile window [{}, {}) is empty",
                    profile.mjd_start, profile.mjd_end
                )));
            }
            if profile.nodes.len() != profile.samples.nrows() || profile.samples.ncols() == 0 {
                return Err(CteError::MalformedCalibration(format!(
                    "tail profile has {} nodes but a {}x{} sample grid",
                    profile.nodes.len(),
                    profile.samples.nrows(),
                    profile.samples.ncols()
                )));
            }
        }
        if self
            .profiles
            .windows(2)
            .any(|w| w[1].mjd_start < w[0].mjd_end)
        {
            return Err(CteError::MalformedCalibration(
                "tail profile epoch windows overlap".into(),
            ));
        }
        Ok(())
    }

    /// Tail profile whose epoch window contains `epoch`.
    pub fn profile_for(&self, epoch: f64) -> Result<&TailProfileTable> {
        self.profiles
            .iter()
            .find(|p| p.mjd_start <= epoch && epoch < p.mjd_end)
            .ok_or(CteError::NoEpochWindow { epoch })
    }

    /// Specialize the calibration to one exposure epoch.
    ///
    /// Returns the readout model together with any non-fatal warnings
    /// raised while building it. Warnings are also logged here so callers
    /// that only want the model still leave a trace.
    pub fn model_for(&self, epoch: f64) -> Result<(TrapModel, Vec<CteWarning>)> {
        self.validate()?;
        let mut warnings = Vec::new();

        let (cte_frac, warning) = self.scale.scale_at(epoch);
        if let Some(w) = warning {
            log::warn!("{w}");
            warnings.push(w);
        }

        let profile = self.profile_for(epoch)?;
        let tails = TailCurves::from_samples(
            &profile.nodes,
            &profile.samples,
            self.constants.max_tail_len,
        )?;
        let occupancy = OccupancyCurve::from_density(
            &self.density.q,
            &self.density.dtde,
            self.shft_nit,
            self.constants.max_charge,
            self.constants.phi_samples,
        )?;
        let tables = LevelTables::build(
            &tails,
            &occupancy,
            &self.levels,
            self.constants.negligible_leak,
        )?;

        log::debug!(
            "readout model for MJD {epoch}: scale {cte_frac:.4}, {} levels, tail profile [{}, {})",
            self.levels.len(),
            profile.mjd_start,
            profile.mjd_end
        );

        Ok((
            TrapModel {
                cte_frac,
                rn_clip: self.rn_clip,
                sim_nit: self.sim_nit,
                shft_nit: self.shft_nit,
                tables,
            },
            warnings,
        ))
    }

    /// A realistic in-memory calibration for demos and tests.
    ///
    /// Numbers are representative of a damaged wide-field CCD a few years
    /// into its mission, not of any particular flight detector.
    pub fn sample() -> Self {
        let nodes: Vec<usize> = vec![1, 2, 3, 4, 5, 7, 10, 14, 20, 28, 40, 56, 80, 100];
        let profile = |amplitude: f64| {
            Array2::from_shape_fn((nodes.len(), 4), |(i, c)| {
                let d = nodes[i] as f64;
                let tau = 2.0 + 1.4 * (c as f64 + 1.0);
                amplitude * (-(d - 1.0) / tau).exp()
            })
        };

        TrapCalibration {
            detector: "WFC".into(),
            rn_clip: 5.25,
            sim_nit: 5,
            shft_nit: 4,
            levels: vec![
                0.0, 2.0, 5.0, 10.0, 20.0, 35.0, 60.0, 100.0, 175.0, 300.0, 500.0, 850.0, 1400.0,
                2300.0, 3800.0, 6300.0, 10_500.0, 17_500.0, 29_000.0, 48_000.0, 80_000.0, 99_999.0,
            ],
            density: TrapDensityTable {
                q: vec![
                    1.0, 3.0, 10.0, 30.0, 100.0, 300.0, 1000.0, 3000.0, 10_000.0, 30_000.0,
                    60_000.0, 99_999.0,
                ],
                dtde: vec![
                    4.6e-3, 3.8e-3, 3.0e-3, 2.3e-3, 1.7e-3, 1.2e-3, 8.0e-4, 5.0e-4, 3.0e-4,
                    1.6e-4, 9.0e-5, 6.0e-5,
                ],
            },
            scale: ScaleTable {
                mjd: vec![52_334.0, 53_000.0, 54_000.0, 55_000.0, 56_500.0, 58_000.0],
                scale: vec![0.0, 0.246, 0.616, 0.986, 1.54, 2.09],
            },
            profiles: vec![
                TailProfileTable {
                    mjd_start: 52_334.0,
                    mjd_end: 53_920.0,
                    nodes: nodes.clone(),
                    samples: profile(0.28),
                },
                TailProfileTable {
                    mjd_start: 53_920.0,
                    mjd_end: 61_000.0,
                    samples: profile(0.34),
                    nodes,
                },
            ],
            constants: ModelConstants::default(),
        }
    }
}

/// Readout model specialized to one exposure: the dense tables plus the
/// scalar knobs the simulation and correction need.
#[derive(Debug, Clone, PartialEq)]
pub struct TrapModel {
    /// Epoch scale factor applied to every trap capacity.
    pub cte_frac: f64,
    /// Read noise search half-width, electrons.
    pub rn_clip: f64,
    /// Correction refinement passes.
    pub sim_nit: usize,
    /// Elementary shifts per simulated readout.
    pub shft_nit: usize,
    pub tables: LevelTables,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sample_calibration_validates() {
        TrapCalibration::sample().validate().unwrap();
    }

    #[test]
    fn test_profile_windows_are_half_open() {
        let calib = TrapCalibration::sample();

        let early = calib.profile_for(53_000.0).unwrap();
        assert_relative_eq!(early.mjd_start, 52_334.0);

        // The shared boundary belongs to the later window.
        let at_boundary = calib.profile_for(53_920.0).unwrap();
        assert_relative_eq!(at_boundary.mjd_start, 53_920.0);

        assert!(matches!(
            calib.profile_for(40_000.0),
            Err(CteError::NoEpochWindow { epoch }) if epoch == 40_000.0
        ));
    }

    #[test]
    fn test_model_for_carries_scale_and_knobs() {
        let calib = TrapCalibration::sample();
        let (model, warnings) = calib.model_for(54_000.0).unwrap();

        assert_relative_eq!(model.cte_frac, 0.616, epsilon = 1e-12);
        assert_eq!(model.sim_nit, 5);
        assert_eq!(model.shft_nit, 4);
        assert_relative_eq!(model.rn_clip, 5.25);
        assert!(warnings.is_empty());
        assert_eq!(model.tables.levels.len(), calib.levels.len());
    }

    #[test]
    fn test_model_for_warns_past_scale_table() {
        let calib = TrapCalibration::sample();
        let (model, warnings) = calib.model_for(59_000.0).unwrap();

        assert_relative_eq!(model.cte_frac, 2.09, epsilon = 1e-12);
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            warnings[0],
            CteWarning::ScaleExtrapolated { epoch, .. } if epoch == 59_000.0
        ));
    }

    #[test]
    fn test_validate_rejects_zero_iterations() {
        let mut calib = TrapCalibration::sample();
        calib.sim_nit = 0;
        assert!(matches!(
            calib.validate(),
            Err(CteError::MalformedCalibration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_overlapping_windows() {
        let mut calib = TrapCalibration::sample();
        calib.profiles[1].mjd_start = 53_000.0;
        assert!(matches!(
            calib.validate(),
            Err(CteError::MalformedCalibration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_ragged_density() {
        let mut calib = TrapCalibration::sample();
        calib.density.dtde.pop();
        assert!(matches!(
            calib.validate(),
            Err(CteError::MalformedCalibration(_))
        ));
    }
}
