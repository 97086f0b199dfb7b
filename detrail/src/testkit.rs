//! Shared model fixtures for unit tests.

use ndarray::Array2;

use crate::calib::TrapModel;
use crate::curves::{LevelTables, OccupancyCurve, TailCurves};

/// Model small enough to check by hand: one tracked level at 100 e- over a
/// constant trap density of 0.02 traps per electron, so a single-shift
/// capacity of `cte_frac * 0.02 * 99`, and a release profile of 0.4, 0.3,
/// 0.2, 0.1 at distances 1 through 4 (held at 0.1 beyond).
pub(crate) fn golden_model(cte_frac: f64, sim_nit: usize, shft_nit: usize) -> TrapModel {
    let nodes = vec![1, 2, 3, 4];
    let samples = Array2::from_shape_fn((4, 2), |(t, _)| [0.4, 0.3, 0.2, 0.1][t]);
    let tails = TailCurves::from_samples(&nodes, &samples, 40).unwrap();
    let occupancy =
        OccupancyCurve::from_density(&[1.0, 100_000.0], &[0.02, 0.02], shft_nit, 99_999.0, 4096)
            .unwrap();
    let tables = LevelTables::build(&tails, &occupancy, &[0.0, 100.0], 1e-6).unwrap();
    TrapModel {
        cte_frac,
        rn_clip: 4.0,
        sim_nit,
        shft_nit,
        tables,
    }
}

/// Model with the texture of flight calibrations: several tracked levels,
/// a decaying trap density, and per-decade release time constants.
pub(crate) fn realistic_model(cte_frac: f64, sim_nit: usize, shft_nit: usize) -> TrapModel {
    let nodes: Vec<usize> = vec![1, 2, 3, 5, 8, 12, 20, 30, 50, 70, 100];
    let samples = Array2::from_shape_fn((nodes.len(), 4), |(i, c)| {
        let d = nodes[i] as f64;
        let tau = 2.5 + 1.5 * c as f64;
        0.22 * (-(d - 1.0) / tau).exp()
    });
    let tails = TailCurves::from_samples(&nodes, &samples, 100).unwrap();
    let occupancy = OccupancyCurve::from_density(
        &[1.0, 10.0, 100.0, 1000.0, 10_000.0, 99_999.0],
        &[5e-3, 3e-3, 1.5e-3, 6e-4, 2e-4, 5e-5],
        shft_nit,
        99_999.0,
        8192,
    )
    .unwrap();
    let tables = LevelTables::build(
        &tails,
        &occupancy,
        &[0.0, 10.0, 50.0, 200.0, 1000.0, 10_000.0],
        1e-4,
    )
    .unwrap();
    TrapModel {
        cte_frac,
        rn_clip: 5.25,
        sim_nit,
        shft_nit,
        tables,
    }
}
