//! # Keyed Permutations
//!
//! Deterministic, unpredictable permutations of `0..n` derived from a 16-byte
//! key. Every oracle holding the key computes the same permutation, which
//! is what lets the transmission schedule agree across the network without
//! extra communication.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};

/// Domain separator for permutation seed generation
const PERMUTATION_DOMAIN: &[u8] = b"OCR3_KEYED_PERMUTATION_V1";

/// Return a permutation `pi` of `0..n` determined by `key`.
///
/// `pi[i]` is the position element `i` is moved to.
pub fn permutation(n: usize, key: &[u8; 16]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    if n <= 1 {
        return order;
    }

    let mut rng = create_rng(key);

    // Fisher-Yates shuffle
    for i in (1..n).rev() {
        let j = rng.gen_range(0..=i);
        order.swap(i, j);
    }

    order
}

fn create_rng(key: &[u8; 16]) -> ChaCha20Rng {
    let mut hasher = Sha256::new();
    hasher.update(PERMUTATION_DOMAIN);
    hasher.update(key);

    let seed: [u8; 32] = hasher.finalize().into();
    ChaCha20Rng::from_seed(seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permutation_is_bijection() {
        for n in 0..20 {
            let mut pi = permutation(n, &[n as u8; 16]);
            pi.sort_unstable();
            assert_eq!(pi, (0..n).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_permutation_deterministic() {
        let key = [42u8; 16];
        assert_eq!(permutation(31, &key), permutation(31, &key));
    }

    #[test]
    fn test_permutation_depends_on_key() {
        let a = permutation(31, &[1u8; 16]);
        let b = permutation(31, &[2u8; 16]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_first_position_spreads() {
        // Each of 4 elements should land in front for some key.
        let mut seen = [false; 4];
        for k in 0..64u8 {
            let pi = permutation(4, &[k; 16]);
            let front = pi.iter().position(|&p| p == 0).unwrap();
            seen[front] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }
}
