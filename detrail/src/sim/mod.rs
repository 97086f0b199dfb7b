//! Per-column trap-transfer simulation.
//!
//! During readout every charge packet in a column is clocked through the
//! silicon between its pixel and the serial register. Lattice traps capture
//! a small amount of each passing packet and release it over the following
//! shifts, so released charge lands in packets read out later: bright pixels
//! lose charge and grow trails away from the register.
//!
//! The kernel models this level by level. For each calibrated charge level
//! a trap with per-shift capacity `cte_frac * (dpde[l] - dpde[l-1])` sweeps
//! the column from the register outward: packets at or above the level
//! threshold top the trap up to capacity (losing only the unfilled part),
//! and packets below it receive the drain according to the level's open
//! fraction, out to the level's useful tail length. Charge still held when
//! the sweep leaves the column is released past the boundary; charge held
//! longer than the tracked window stays in the trap by design.
//!
//! One full readout chains `shft_nit` such elementary shifts. The forward
//! correction inverts the readout by fixed-point refinement: repeat
//! `current += observed - simulate_readout(current)` for `sim_nit` passes,
//! then clamp any negative estimates to zero and report them.
//!
//! Columns are indexed with element 0 nearest the readout register.

pub mod diag;

use crate::calib::TrapModel;
use crate::curves::LevelTables;

/// Result of simulating or correcting one column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnOutcome {
    /// Output charge, electrons, same length as the input.
    pub values: Vec<f64>,
    /// Pixels whose final value went negative and was clamped to zero.
    pub clamped: usize,
    /// Most negative pre-clamp value, 0.0 when nothing clamped.
    pub deepest: f64,
    /// Largest absolute observed-minus-simulated mismatch after each
    /// refinement pass (empty for synthesis).
    pub residuals: Vec<f64>,
}

impl ColumnOutcome {
    fn unchanged(column: &[f64]) -> Self {
        ColumnOutcome {
            values: column.to_vec(),
            clamped: 0,
            deepest: 0.0,
            residuals: Vec::new(),
        }
    }
}

/// One elementary shift: redistribute `input` into `output` through every
/// calibrated level's fill/drain trap.
fn shift_once(input: &[f64], output: &mut [f64], tables: &LevelTables, cte_frac: f64) {
    output.copy_from_slice(input);
    let n = input.len();

    for level in 1..tables.levels.len() {
        let capacity = cte_frac * (tables.dpde[level] - tables.dpde[level - 1]);
        if capacity <= 0.0 {
            continue;
        }
        let threshold = tables.levels[level];
        let tail = tables.tail_len[level];

        // Trap state for this level: charge currently held and the number
        // of shifts since it was last filled.
        let mut held = 0.0;
        let mut since = 0usize;

        for i in 0..n {
            if input[i] >= threshold {
                output[i] -= capacity - held;
                held = capacity;
                since = 0;
            } else if held > 0.0 {
                since += 1;
                if since <= tail {
                    let release =
                        capacity * (tables.open_at(level, since - 1) - tables.open_at(level, since));
                    output[i] += release;
                    held = (held - release).max(0.0);
                }
            }
        }
    }
}

/// Chain `shft_nit` elementary shifts; `output` holds the full readout.
fn simulate_readout_into(input: &[f64], output: &mut [f64], scratch: &mut [f64], model: &TrapModel) {
    shift_once(input, output, &model.tables, model.cte_frac);
    for _ in 1..model.shft_nit {
        scratch.copy_from_slice(output);
        shift_once(scratch, output, &model.tables, model.cte_frac);
    }
}

/// Simulate the readout of a pristine column: what the detector would have
/// reported, trails included.
pub fn simulate_readout(column: &[f64], model: &TrapModel) -> Vec<f64> {
    let mut output = vec![0.0; column.len()];
    let mut scratch = vec![0.0; column.len()];
    simulate_readout_into(column, &mut output, &mut scratch, model);
    output
}

/// Synthesize trailing onto a clean column (the inverse of the correction).
pub fn blur_column(column: &[f64], model: &TrapModel) -> ColumnOutcome {
    if model.cte_frac == 0.0 || all_zero(column) {
        return ColumnOutcome::unchanged(column);
    }
    let mut values = vec![0.0; column.len()];
    let mut scratch = vec![0.0; column.len()];
    simulate_readout_into(column, &mut values, &mut scratch, model);
    let (clamped, deepest) = clamp_negative(&mut values);
    ColumnOutcome {
        values,
        clamped,
        deepest,
        residuals: Vec::new(),
    }
}

/// Estimate the pre-readout column behind an observed one.
pub fn correct_column(observed: &[f64], model: &TrapModel) -> ColumnOutcome {
    if model.cte_frac == 0.0 || all_zero(observed) {
        return ColumnOutcome::unchanged(observed);
    }

    let n = observed.len();
    let mut current = observed.to_vec();
    let mut readout = vec![0.0; n];
    let mut scratch = vec![0.0; n];
    let mut residuals = Vec::with_capacity(model.sim_nit);

    for _ in 0..model.sim_nit {
        simulate_readout_into(&current, &mut readout, &mut scratch, model);
        let mut worst = 0.0f64;
        for i in 0..n {
            let miss = observed[i] - readout[i];
            current[i] += miss;
            worst = worst.max(miss.abs());
        }
        residuals.push(worst);
    }

    let (clamped, deepest) = clamp_negative(&mut current);
    ColumnOutcome {
        values: current,
        clamped,
        deepest,
        residuals,
    }
}

fn all_zero(column: &[f64]) -> bool {
    column.iter().all(|&v| v == 0.0)
}

fn clamp_negative(values: &mut [f64]) -> (usize, f64) {
    let mut count = 0;
    let mut deepest = 0.0f64;
    for v in values.iter_mut() {
        if *v < 0.0 {
            count += 1;
            deepest = deepest.min(*v);
            *v = 0.0;
        }
    }
    (count, deepest)
}
