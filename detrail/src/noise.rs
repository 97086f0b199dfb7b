//! Read-noise separation ahead of the trap-transfer simulation.
//!
//! The trap model describes how *signal* charge moved through the silicon
//! during readout; amplifier read noise was added afterwards and must not be
//! run through the simulation (doing so systematically redistributes noise
//! as if it were charge, amplifying it). The decomposer splits an amp region
//! into a smooth signal estimate plus a bounded residual, the correction
//! operates on the signal, and the untouched residual is added back on top.
//!
//! The split is defined so that recombination is lossless: the noise plane
//! is always the clamped residual `pixels - smooth`, and the signal plane is
//! `pixels - noise`. Structure larger than the clip (sources, cosmic rays,
//! trails) therefore stays in the signal plane where the simulation can see
//! it.

use ndarray::Array2;

use crate::error::{CteError, Result};

/// Number of smoothing refinements in the mode-1 estimator.
const SMOOTH_PASSES: usize = 3;

/// Supported read-noise separation models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseMode {
    /// No separation: the whole image is treated as signal.
    None,
    /// Local-mean smoothing with residuals clamped to the calibrated
    /// read-noise amplitude.
    Smoothing,
}

impl NoiseMode {
    /// Map the raw configuration flag onto a model, rejecting anything the
    /// correction does not support.
    pub fn from_flag(flag: i64) -> Result<Self> {
        match flag {
            0 => Ok(NoiseMode::None),
            1 => Ok(NoiseMode::Smoothing),
            other => Err(CteError::InvalidNoiseMode(other)),
        }
    }

    /// Raw flag value, for provenance records.
    pub fn flag(&self) -> i64 {
        match self {
            NoiseMode::None => 0,
            NoiseMode::Smoothing => 1,
        }
    }
}

/// Split `pixels` into (signal, noise) such that `signal + noise` reproduces
/// the input and `|noise| <= clip` everywhere.
pub fn decompose(pixels: &Array2<f64>, clip: f64, mode: NoiseMode) -> (Array2<f64>, Array2<f64>) {
    let clip = clip.max(0.0);
    match mode {
        NoiseMode::None => (pixels.clone(), Array2::zeros(pixels.raw_dim())),
        NoiseMode::Smoothing => {
            let mut signal = pixels.clone();
            for _ in 0..SMOOTH_PASSES {
                let smooth = neighborhood_mean(&signal);
                let noise = residual_clamped(pixels, &smooth, clip);
                signal = pixels - &noise;
            }
            let noise = pixels - &signal;
            (signal, noise)
        }
    }
}

/// Reassemble a corrected signal plane with its noise plane.
pub fn recombine(signal: &Array2<f64>, noise: &Array2<f64>) -> Array2<f64> {
    signal + noise
}

fn residual_clamped(pixels: &Array2<f64>, smooth: &Array2<f64>, clip: f64) -> Array2<f64> {
    let mut residual = pixels - smooth;
    residual.mapv_inplace(|v| v.clamp(-clip, clip));
    residual
}

/// 3x3 neighborhood mean, shrinking the window at the borders.
fn neighborhood_mean(a: &Array2<f64>) -> Array2<f64> {
    let (ny, nx) = a.dim();
    Array2::from_shape_fn((ny, nx), |(y, x)| {
        let y1 = (y + 1).min(ny - 1);
        let x1 = (x + 1).min(nx - 1);
        let mut sum = 0.0;
        let mut count = 0.0;
        for yy in y.saturating_sub(1)..=y1 {
            for xx in x.saturating_sub(1)..=x1 {
                sum += a[[yy, xx]];
                count += 1.0;
            }
        }
        sum / count
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn noisy_flat(ny: usize, nx: usize, base: f64) -> Array2<f64> {
        // Deterministic small perturbations standing in for read noise.
        Array2::from_shape_fn((ny, nx), |(y, x)| {
            base + 2.0 * ((y * 31 + x * 17) % 7) as f64 / 7.0 - 1.0
        })
    }

    #[test]
    fn test_mode_flags() {
        assert_eq!(NoiseMode::from_flag(0).unwrap(), NoiseMode::None);
        assert_eq!(NoiseMode::from_flag(1).unwrap(), NoiseMode::Smoothing);
        assert!(matches!(
            NoiseMode::from_flag(2),
            Err(CteError::InvalidNoiseMode(2))
        ));
        assert!(matches!(
            NoiseMode::from_flag(-1),
            Err(CteError::InvalidNoiseMode(-1))
        ));
    }

    #[test]
    fn test_mode_none_is_identity() {
        let pixels = noisy_flat(8, 8, 100.0);
        let (signal, noise) = decompose(&pixels, 5.0, NoiseMode::None);
        assert_eq!(signal, pixels);
        assert!(noise.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_decomposition_is_lossless() {
        let pixels = noisy_flat(16, 16, 250.0);
        let (signal, noise) = decompose(&pixels, 4.0, NoiseMode::Smoothing);
        let back = recombine(&signal, &noise);
        for (&a, &b) in back.iter().zip(pixels.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_noise_bounded_by_clip() {
        let clip = 1.5;
        let mut pixels = noisy_flat(16, 16, 80.0);
        pixels[[8, 8]] = 5000.0; // a source, far above the clip
        let (_, noise) = decompose(&pixels, clip, NoiseMode::Smoothing);
        assert!(noise.iter().all(|&v| v.abs() <= clip + 1e-12));
    }

    #[test]
    fn test_sources_stay_in_signal_plane() {
        let clip = 2.0;
        let mut pixels = Array2::from_elem((12, 12), 30.0);
        pixels[[6, 6]] = 8000.0;
        let (signal, noise) = decompose(&pixels, clip, NoiseMode::Smoothing);

        // The source loses at most the clip amplitude to the noise plane.
        assert!(signal[[6, 6]] >= 8000.0 - clip);
        assert!(noise[[6, 6]].abs() <= clip + 1e-12);
    }

    #[test]
    fn test_smoothing_flattens_small_residuals() {
        let pixels = noisy_flat(16, 16, 120.0);
        let (signal, _) = decompose(&pixels, 5.0, NoiseMode::Smoothing);

        // Interior signal estimate is much flatter than the input.
        let spread = |a: &Array2<f64>| {
            let inner = a.slice(ndarray::s![2..-2, 2..-2]);
            let max = inner.iter().cloned().fold(f64::MIN, f64::max);
            let min = inner.iter().cloned().fold(f64::MAX, f64::min);
            max - min
        };
        assert!(spread(&signal) < spread(&pixels));
    }
}
