//! Synthetic star-field frames for demos and tests.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Sparse star field over a flat sky, electrons.
///
/// Stars are single bright pixels with 15% of their flux bled into each
/// 4-neighbor, which is enough structure to exercise trailing without a
/// full optical model. Deterministic for a given seed.
pub fn star_field(
    shape: (usize, usize),
    sky: f64,
    stars: usize,
    peak: f64,
    seed: u64,
) -> Array2<f64> {
    let mut image = Array2::from_elem(shape, sky);
    let (ny, nx) = shape;
    if ny < 3 || nx < 3 {
        return image;
    }

    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..stars {
        let r = rng.gen_range(1..ny - 1);
        let c = rng.gen_range(1..nx - 1);
        let flux = peak * rng.gen_range(0.05..1.0);
        image[[r, c]] += flux;
        for (nr, nc) in [(r - 1, c), (r + 1, c), (r, c - 1), (r, c + 1)] {
            image[[nr, nc]] += 0.15 * flux;
        }
    }
    image
}

/// Add zero-mean Gaussian read noise in place. Deterministic for a given
/// seed; a non-positive sigma leaves the frame untouched.
pub fn add_read_noise(image: &mut Array2<f64>, sigma: f64, seed: u64) {
    if !sigma.is_finite() || sigma <= 0.0 {
        return;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    if let Ok(normal) = Normal::new(0.0, sigma) {
        image.mapv_inplace(|v| v + normal.sample(&mut rng));
    }
}
