//! Sub-texel sample patterns

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Offsets inside a texel, each in `[0, 1)^2`.
///
/// Perfect squares give a stratified `n x n` grid of cell centres; any other
/// rate gives jittered samples drawn from `seed`, so a bake is reproducible.
pub fn sample_offsets(rate: u32, seed: u64) -> Vec<(f32, f32)> {
    let rate = rate.max(1);
    let n = (rate as f64).sqrt().round() as u32;
    if n * n == rate {
        let step = 1.0 / n as f32;
        return (0..n)
            .flat_map(|y| (0..n).map(move |x| ((x as f32 + 0.5) * step, (y as f32 + 0.5) * step)))
            .collect();
    }

    let mut rng = StdRng::seed_from_u64(seed);
    (0..rate)
        .map(|_| (rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_sample_is_texel_centre() {
        assert_eq!(sample_offsets(1, 0), vec![(0.5, 0.5)]);
        assert_eq!(sample_offsets(0, 0), vec![(0.5, 0.5)]);
    }

    #[test]
    fn test_stratified_grid() {
        let offsets = sample_offsets(4, 0);
        assert_eq!(offsets, vec![(0.25, 0.25), (0.75, 0.25), (0.25, 0.75), (0.75, 0.75)]);
    }

    #[test]
    fn test_jitter_is_seeded() {
        let a = sample_offsets(3, 42);
        let b = sample_offsets(3, 42);
        let c = sample_offsets(3, 7);
        assert_eq!(a.len(), 3);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.iter().all(|&(x, y)| (0.0..1.0).contains(&x) && (0.0..1.0).contains(&y)));
    }
}
