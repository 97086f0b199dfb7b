//! Tail-profile expansion: from sparse (distance, charge-node) samples to
//! every integer trailing distance.
//!
//! The calibration table samples the probability that charge captured by a
//! trap leaks back out exactly N pixel shifts after capture, at a few tens
//! of distances and a small number of charge nodes (node k corresponds to a
//! charge of 10^(k+1) electrons). The simulator needs the leaked fraction at
//! every distance 1..=max_tail, together with the complementary "open"
//! fraction: the probability that a captured electron has not yet been
//! released after N shifts.

use ndarray::Array2;

use crate::error::{CteError, Result};

/// Dense tail-profile curves, one column per charge node.
///
/// Row `t - 1` holds the values for trailing distance `t` (distances are
/// 1-based; a trap cannot release into the pixel that filled it).
#[derive(Debug, Clone)]
pub struct TailCurves {
    /// Fraction of held charge released at each distance, `[max_tail x K]`.
    pub leak: Array2<f64>,
    /// Fraction of captured charge still held after each distance,
    /// `open[t] = prod_{u<=t} (1 - leak[u])`, `[max_tail x K]`.
    pub open: Array2<f64>,
}

impl TailCurves {
    /// Expand sparse profile samples to every integer distance.
    ///
    /// # Arguments
    ///
    /// * `nodes` - sampled trailing distances, ascending, starting at >= 1
    /// * `samples` - leaked fractions `[nodes.len() x K]`, values in [0, 1]
    /// * `max_tail` - densified distance axis length
    ///
    /// Distances between samples interpolate linearly (which preserves the
    /// monotone character of the sampled profile); distances outside the
    /// sampled range hold the nearest sampled value.
    pub fn from_samples(nodes: &[usize], samples: &Array2<f64>, max_tail: usize) -> Result<Self> {
        if nodes.is_empty() || nodes.len() != samples.nrows() {
            return Err(CteError::MalformedCalibration(format!(
                "tail profile has {} distance nodes but {} sample rows",
                nodes.len(),
                samples.nrows()
            )));
        }
        if samples.ncols() == 0 {
            return Err(CteError::MalformedCalibration(
                "tail profile has no charge-node columns".to_string(),
            ));
        }
        if nodes[0] < 1 {
            return Err(CteError::MalformedCalibration(
                "tail-profile distances must start at 1 or later".to_string(),
            ));
        }
        for pair in nodes.windows(2) {
            if pair[1] <= pair[0] {
                return Err(CteError::MalformedCalibration(
                    "tail-profile distances must be strictly ascending".to_string(),
                ));
            }
        }
        if samples.iter().any(|&v| !(0.0..=1.0).contains(&v)) {
            return Err(CteError::MalformedCalibration(
                "tail-profile fractions must lie in [0, 1]".to_string(),
            ));
        }

        let k = samples.ncols();
        let mut leak = Array2::zeros((max_tail, k));

        for t in 1..=max_tail {
            // Index of the first node at or beyond this distance.
            let upper = nodes.partition_point(|&n| n < t);
            let row = if upper == 0 {
                samples.row(0).to_owned()
            } else if upper == nodes.len() {
                samples.row(nodes.len() - 1).to_owned()
            } else if nodes[upper] == t {
                samples.row(upper).to_owned()
            } else {
                let lo = upper - 1;
                let span = (nodes[upper] - nodes[lo]) as f64;
                let frac = (t - nodes[lo]) as f64 / span;
                let a = samples.row(lo);
                let b = samples.row(upper);
                let mut blended = a.to_owned();
                blended.zip_mut_with(&b, |x, &y| *x = *x * (1.0 - frac) + y * frac);
                blended
            };
            leak.row_mut(t - 1).assign(&row);
        }

        let mut open = Array2::zeros((max_tail, k));
        for col in 0..k {
            let mut still_held = 1.0;
            for t in 0..max_tail {
                still_held *= 1.0 - leak[[t, col]];
                open[[t, col]] = still_held;
            }
        }

        // Holds by construction once the leak fractions are in [0, 1].
        debug_assert!(open
            .columns()
            .into_iter()
            .all(|c| c.windows(2).into_iter().all(|w| w[1] <= w[0] + 1e-12)));

        Ok(TailCurves { leak, open })
    }

    /// Number of charge-node columns.
    pub fn node_count(&self) -> usize {
        self.leak.ncols()
    }

    /// Densified distance axis length.
    pub fn max_tail(&self) -> usize {
        self.leak.nrows()
    }
}
