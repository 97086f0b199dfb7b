//! Trap occupancy expansion: from sparse marginal trap-density samples to a
//! dense log-spaced charge axis, rescaled to a single elementary shift.
//!
//! The calibration table records dtde, the marginal fraction of charge
//! captured by traps per electron of packet charge, at a handful of charge
//! levels. A full readout is simulated as `shft_nit` elementary shifts, so
//! the dense curve stores the per-shift capture fraction
//! `1 - (1 - dtde)^(1/shft_nit)`: applying it `shft_nit` times compounds
//! back to the full-readout occupancy. Interpolation is linear in log10 of
//! the charge, matching how the curve is characterized.

use crate::error::{CteError, Result};

/// Per-shift trap occupancy sampled on a dense log-spaced charge axis.
#[derive(Debug, Clone)]
pub struct OccupancyCurve {
    /// Charge axis in electrons, ascending, log-spaced over the
    /// characterized range.
    charge: Vec<f64>,
    /// Per-shift capture fraction at each axis point.
    fill: Vec<f64>,
}

impl OccupancyCurve {
    /// Build the dense per-shift curve from sparse (charge, dtde) samples.
    ///
    /// # Arguments
    ///
    /// * `q` - sampled charge levels in electrons, ascending, all > 0
    /// * `dtde` - marginal captured fraction at each sample, in [0, 1)
    /// * `shft_nit` - elementary shifts per full pixel transfer
    /// * `max_charge` - top of the representable charge range (electrons)
    /// * `axis_len` - number of dense axis points
    pub fn from_density(
        q: &[f64],
        dtde: &[f64],
        shft_nit: usize,
        max_charge: f64,
        axis_len: usize,
    ) -> Result<Self> {
        if q.len() != dtde.len() || q.len() < 2 {
            return Err(CteError::MalformedCalibration(format!(
                "occupancy curve needs at least 2 matched samples, got {} charges / {} densities",
                q.len(),
                dtde.len()
            )));
        }
        if q[0] <= 0.0 {
            return Err(CteError::MalformedCalibration(
                "occupancy charge samples must be positive".to_string(),
            ));
        }
        for pair in q.windows(2) {
            if pair[1] <= pair[0] {
                return Err(CteError::MalformedCalibration(
                    "occupancy charge samples must be strictly ascending".to_string(),
                ));
            }
        }
        if dtde.iter().any(|&d| !(0.0..1.0).contains(&d)) {
            return Err(CteError::MalformedCalibration(
                "occupancy densities must lie in [0, 1)".to_string(),
            ));
        }
        if shft_nit == 0 {
            return Err(CteError::MalformedCalibration(
                "shift iteration count must be at least 1".to_string(),
            ));
        }
        if axis_len < 2 || max_charge <= 1.0 {
            return Err(CteError::MalformedCalibration(
                "occupancy axis must span more than one charge decade point".to_string(),
            ));
        }

        let log_max = max_charge.log10();
        let per_shift = 1.0 / shft_nit as f64;

        let mut charge = Vec::with_capacity(axis_len);
        let mut fill = Vec::with_capacity(axis_len);
        for p in 0..axis_len {
            let c = 10f64.powf(p as f64 * log_max / (axis_len - 1) as f64);
            let d = sample_log_linear(q, dtde, c);
            charge.push(c);
            fill.push(1.0 - (1.0 - d).powf(per_shift));
        }

        Ok(OccupancyCurve { charge, fill })
    }

    /// Per-shift capture fraction at an arbitrary charge, interpolating the
    /// dense axis and holding endpoint values outside it.
    pub fn value_at(&self, charge: f64) -> f64 {
        let n = self.charge.len();
        if charge <= self.charge[0] {
            return self.fill[0];
        }
        if charge >= self.charge[n - 1] {
            return self.fill[n - 1];
        }
        let upper = self.charge.partition_point(|&c| c < charge);
        let lo = upper - 1;
        let frac = (charge - self.charge[lo]) / (self.charge[upper] - self.charge[lo]);
        self.fill[lo] * (1.0 - frac) + self.fill[upper] * frac
    }

    /// Integrate the per-shift capture fraction over charge between two
    /// levels (trapezoidal rule over the dense axis, with interpolated
    /// partial end segments). The result is the redistributable charge, in
    /// electrons per shift, contributed by packets between the two levels.
    ///
    /// The integration range is clipped to the characterized axis; charge
    /// below the first axis point carries no occupancy.
    pub fn integrate_between(&self, lo: f64, hi: f64) -> f64 {
        let n = self.charge.len();
        let a = lo.max(self.charge[0]);
        let b = hi.min(self.charge[n - 1]);
        if b <= a {
            return 0.0;
        }

        let va = self.value_at(a);
        let vb = self.value_at(b);

        // First dense point strictly inside (a, b].
        let mut idx = self.charge.partition_point(|&c| c <= a);
        let mut sum = 0.0;
        let mut prev_c = a;
        let mut prev_v = va;
        while idx < n && self.charge[idx] < b {
            let c = self.charge[idx];
            let v = self.fill[idx];
            sum += (c - prev_c) * (prev_v + v) * 0.5;
            prev_c = c;
            prev_v = v;
            idx += 1;
        }
        sum += (b - prev_c) * (prev_v + vb) * 0.5;
        sum
    }

    /// Top of the dense charge axis, in electrons.
    pub fn max_charge(&self) -> f64 {
        self.charge[self.charge.len() - 1]
    }
}

/// Linear interpolation of `values` against `samples` in log10-charge space,
/// holding endpoint values outside the sampled range.
fn sample_log_linear(samples: &[f64], values: &[f64], charge: f64) -> f64 {
    let n = samples.len();
    if charge <= samples[0] {
        return values[0];
    }
    if charge >= samples[n - 1] {
        return values[n - 1];
    }
    let upper = samples.partition_point(|&s| s < charge);
    let lo = upper - 1;
    let span = samples[upper].log10() - samples[lo].log10();
    let frac = (charge.log10() - samples[lo].log10()) / span;
    values[lo] * (1.0 - frac) + values[upper] * frac
}
