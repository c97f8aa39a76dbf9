//! Reproducible random subsampling.
//!
//! Every call builds its own `StdRng` from an explicit seed, so two calls
//! with the same seed and population size always pick the same rows and no
//! random state is shared between calls.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Seed shared by the balancing and assembly stages.
pub const DEFAULT_SEED: u64 = 42;

/// Pick `n` distinct indices out of `0..len`, returned in ascending order.
/// When `n >= len` every index is returned.
pub fn sample_indices(len: usize, n: usize, seed: u64) -> Vec<usize> {
    if n >= len {
        return (0..len).collect();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, len, n).into_vec();
    picked.sort_unstable();
    picked
}

/// Pick `round(len * fraction)` indices.
pub fn sample_fraction(len: usize, fraction: f64, seed: u64) -> Vec<usize> {
    let n = (len as f64 * fraction.clamp(0.0, 1.0)).round() as usize;
    sample_indices(len, n, seed)
}

/// Per-member seed for ensembles: distinct for each `index`, stable across runs.
pub fn derived_seed(base: u64, index: u64) -> u64 {
    // splitmix64 finaliser
    let mut z = base ^ index.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Keep `items` at the sampled positions.
pub fn take_sample<T: Clone>(items: &[T], n: usize, seed: u64) -> Vec<T> {
    sample_indices(items.len(), n, seed).into_iter().map(|i| items[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_indices() {
        let a = sample_indices(1000, 37, DEFAULT_SEED);
        let b = sample_indices(1000, 37, DEFAULT_SEED);
        assert_eq!(a, b);
        assert_eq!(a.len(), 37);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
        assert_ne!(a, sample_indices(1000, 37, 7));
    }

    #[test]
    fn oversized_request_returns_everything() {
        assert_eq!(sample_indices(5, 10, DEFAULT_SEED), vec![0, 1, 2, 3, 4]);
        assert!(sample_indices(0, 3, DEFAULT_SEED).is_empty());
    }

    #[test]
    fn fraction_rounds() {
        assert_eq!(sample_fraction(11, 0.5, 1).len(), 6);
        assert_eq!(sample_fraction(10, 0.5, 1).len(), 5);
    }

    #[test]
    fn derived_seeds_differ_per_index() {
        let seeds: Vec<u64> = (1..=10).map(|i| derived_seed(DEFAULT_SEED, i)).collect();
        let unique: std::collections::HashSet<_> = seeds.iter().collect();
        assert_eq!(unique.len(), 10);
        assert_eq!(derived_seed(DEFAULT_SEED, 3), derived_seed(DEFAULT_SEED, 3));
    }
}
