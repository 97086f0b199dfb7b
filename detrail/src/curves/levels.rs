//! Reduction of the dense characterization curves onto the discrete charge
//! levels the simulator actually sweeps.
//!
//! Sweeping every possible charge value would make the per-column kernel
//! quadratic in practice; instead the calibration table nominates a small
//! set of ascending charge levels. For each level this module interpolates
//! the tail-profile rows at the level's position on the charge-node axis,
//! integrates the occupancy curve between adjacent levels into a cumulative
//! redistributable-charge amount, and truncates the usable tail where the
//! leaked fraction becomes negligible.

use ndarray::Array2;

use crate::curves::{OccupancyCurve, TailCurves};
use crate::error::{CteError, Result};

/// Characterization curves reduced to the discrete evaluation levels.
///
/// Shared read-only by every column and amplifier of a correction run.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelTables {
    /// Ascending charge thresholds in electrons; index 0 is the base level.
    pub levels: Vec<f64>,
    /// Leaked fraction per distance, `[max_tail x levels]`.
    pub leak: Array2<f64>,
    /// Still-held fraction per distance, `[max_tail x levels]`.
    pub open: Array2<f64>,
    /// Cumulative redistributable charge per shift, in electrons;
    /// `dpde[0] == 0`.
    pub dpde: Vec<f64>,
    /// Distance beyond which a level's release is negligible.
    pub tail_len: Vec<usize>,
}

impl LevelTables {
    /// Reduce dense curves onto `levels`.
    ///
    /// `negligible_leak` sets where a level's tail is truncated: the tail
    /// length is one less than the first distance whose leaked fraction
    /// falls below it, or the full tracked window if none does.
    pub fn build(
        tails: &TailCurves,
        occupancy: &OccupancyCurve,
        levels: &[f64],
        negligible_leak: f64,
    ) -> Result<Self> {
        if levels.len() < 2 {
            return Err(CteError::MalformedCalibration(format!(
                "need at least a base and one evaluation level, got {}",
                levels.len()
            )));
        }
        if levels[0] < 0.0 {
            return Err(CteError::MalformedCalibration(
                "base charge level must not be negative".to_string(),
            ));
        }
        for pair in levels.windows(2) {
            if pair[1] <= pair[0] {
                return Err(CteError::MalformedCalibration(
                    "charge levels must be strictly ascending".to_string(),
                ));
            }
        }

        let max_tail = tails.max_tail();
        let k = tails.node_count();
        let n_lev = levels.len();

        let mut leak = Array2::zeros((max_tail, n_lev));
        let mut open = Array2::zeros((max_tail, n_lev));
        let mut dpde = vec![0.0; n_lev];
        let mut tail_len = vec![max_tail; n_lev];

        for (l, &level) in levels.iter().enumerate() {
            // Node k sits at log10(q) = k + 1; clamp the level onto the
            // characterized node range before interpolating across columns.
            let pos = level.max(10.0).log10().clamp(1.0, k as f64);
            let x = pos - 1.0;
            let lo = (x.floor() as usize).min(k.saturating_sub(2));
            let frac = if k == 1 { 0.0 } else { x - lo as f64 };
            let hi = if k == 1 { lo } else { lo + 1 };

            for t in 0..max_tail {
                leak[[t, l]] = tails.leak[[t, lo]] * (1.0 - frac) + tails.leak[[t, hi]] * frac;
                open[[t, l]] = tails.open[[t, lo]] * (1.0 - frac) + tails.open[[t, hi]] * frac;
            }

            if l > 0 {
                dpde[l] = dpde[l - 1] + occupancy.integrate_between(levels[l - 1], level);
            }

            if let Some(t) = (0..max_tail).find(|&t| leak[[t, l]] < negligible_leak) {
                tail_len[l] = t;
            }
        }

        Ok(LevelTables {
            levels: levels.to_vec(),
            leak,
            open,
            dpde,
            tail_len,
        })
    }

    /// Tracked tail window length.
    pub fn max_tail(&self) -> usize {
        self.leak.nrows()
    }

    /// Still-held fraction after `distance` shifts for `level`, with the
    /// distance-zero sentinel (nothing released yet).
    pub fn open_at(&self, level: usize, distance: usize) -> f64 {
        if distance == 0 {
            1.0
        } else {
            self.open[[distance - 1, level]]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn uniform_tails(leak_by_distance: &[f64], k: usize, max_tail: usize) -> TailCurves {
        let nodes: Vec<usize> = (1..=leak_by_distance.len()).collect();
        let samples = Array2::from_shape_fn((leak_by_distance.len(), k), |(t, _)| {
            leak_by_distance[t]
        });
        TailCurves::from_samples(&nodes, &samples, max_tail).unwrap()
    }

    fn flat_occupancy(dtde: f64) -> OccupancyCurve {
        OccupancyCurve::from_density(&[1.0, 100_000.0], &[dtde, dtde], 1, 99_999.0, 4096)
            .unwrap()
    }

    #[test]
    fn test_cumulative_dpde_from_constant_density() {
        let tails = uniform_tails(&[0.4, 0.3, 0.2, 0.1], 2, 10);
        let occupancy = flat_occupancy(0.02);
        let tables =
            LevelTables::build(&tails, &occupancy, &[0.0, 100.0, 300.0], 1e-4).unwrap();

        assert_relative_eq!(tables.dpde[0], 0.0);
        // 0..100 clips to the characterized axis start at 1 e-.
        assert_relative_eq!(tables.dpde[1], 0.02 * 99.0, epsilon = 1e-9);
        assert_relative_eq!(tables.dpde[2], 0.02 * 99.0 + 0.02 * 200.0, epsilon = 1e-9);
    }

    #[test]
    fn test_dpde_is_monotone() {
        let tails = uniform_tails(&[0.3, 0.2, 0.1, 0.05], 3, 20);
        let occupancy = flat_occupancy(0.01);
        let levels = [0.0, 10.0, 50.0, 250.0, 4000.0];
        let tables = LevelTables::build(&tails, &occupancy, &levels, 1e-4).unwrap();

        for pair in tables.dpde.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn test_row_interpolation_across_charge_nodes() {
        // Two nodes at log10(q) = 1 and 2; leak differs by column.
        let nodes = vec![1];
        let samples = array![[0.4, 0.2]];
        let tails = TailCurves::from_samples(&nodes, &samples, 4).unwrap();
        let occupancy = flat_occupancy(0.01);

        // log10(level) halfway between the nodes blends the columns evenly.
        let level = 10f64.powf(1.5);
        let tables = LevelTables::build(&tails, &occupancy, &[0.0, level], 1e-4).unwrap();
        assert_relative_eq!(tables.leak[[0, 1]], 0.3, epsilon = 1e-12);

        // Levels below the first node clamp onto it.
        let tables = LevelTables::build(&tails, &occupancy, &[0.0, 4.0], 1e-4).unwrap();
        assert_relative_eq!(tables.leak[[0, 1]], 0.4, epsilon = 1e-12);

        // Levels above the last node clamp onto it.
        let tables = LevelTables::build(&tails, &occupancy, &[0.0, 90_000.0], 1e-4).unwrap();
        assert_relative_eq!(tables.leak[[0, 1]], 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_tail_truncates_at_negligible_leak() {
        let tails = uniform_tails(&[0.4, 0.1, 2e-5, 1e-5], 2, 8);
        let occupancy = flat_occupancy(0.01);
        let tables = LevelTables::build(&tails, &occupancy, &[0.0, 100.0], 1e-4).unwrap();

        // Distances 1 and 2 are useful; distance 3 drops below threshold.
        assert_eq!(tables.tail_len[1], 2);
    }

    #[test]
    fn test_tail_spans_window_when_never_negligible() {
        let tails = uniform_tails(&[0.4, 0.3, 0.2, 0.1], 2, 12);
        let occupancy = flat_occupancy(0.01);
        let tables = LevelTables::build(&tails, &occupancy, &[0.0, 100.0], 1e-4).unwrap();
        assert_eq!(tables.tail_len[1], 12);
    }

    #[test]
    fn test_open_at_sentinel() {
        let tails = uniform_tails(&[0.4, 0.3], 2, 4);
        let occupancy = flat_occupancy(0.01);
        let tables = LevelTables::build(&tails, &occupancy, &[0.0, 50.0], 1e-4).unwrap();

        assert_relative_eq!(tables.open_at(1, 0), 1.0);
        assert_relative_eq!(tables.open_at(1, 1), 0.6, epsilon = 1e-12);
        assert_relative_eq!(tables.open_at(1, 2), 0.6 * 0.7, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_non_ascending_levels() {
        let tails = uniform_tails(&[0.4, 0.3], 2, 4);
        let occupancy = flat_occupancy(0.01);
        let result = LevelTables::build(&tails, &occupancy, &[0.0, 100.0, 100.0], 1e-4);
        assert!(matches!(result, Err(CteError::MalformedCalibration(_))));
    }
}
