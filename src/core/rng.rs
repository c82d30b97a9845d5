//! Seedable Random Number Generator
//!
//! Xorshift128+ family generator used for zone placement.
//! Given the same seed, produces the identical sequence on all platforms,
//! which lets a round's zone be regenerated from its seed.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

use super::geo::{GeoPosition, LAT_RANGE, LNG_RANGE};

/// Deterministic PRNG.
///
/// # Example
///
/// ```
/// use zone_royale::core::rng::DeterministicRng;
///
/// let mut rng = DeterministicRng::new(42);
/// assert_eq!(rng.next_u64(), 16629283624882167704);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// SplitMix64 expands the seed so weak seeds still start well mixed.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // All-zero state would only ever emit zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Create an RNG seeded from a fresh random UUID.
    pub fn from_entropy() -> Self {
        Self::new(entropy_seed())
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Uniform float in [0, 1) built from the top 53 bits.
    #[inline]
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform float in [min, max).
    #[inline]
    pub fn next_f64_range(&mut self, min: f64, max: f64) -> f64 {
        if min >= max {
            return min;
        }
        min + self.next_f64() * (max - min)
    }

    /// Random position with latitude and longitude drawn independently.
    ///
    /// Not area-uniform: points cluster toward the poles.
    pub fn random_geo_position(&mut self) -> GeoPosition {
        let lat = self.next_f64_range(LAT_RANGE.0, LAT_RANGE.1);
        let lng = self.next_f64_range(LNG_RANGE.0, LNG_RANGE.1);
        GeoPosition::new(lat, lng)
    }
}

#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

fn entropy_seed() -> u64 {
    let bytes = *uuid::Uuid::new_v4().as_bytes();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(seed)
}

/// Derive a per-round seed from a base seed and the round number.
///
/// Rounds drawn from the same base seed stay reproducible individually,
/// independent of how many draws earlier rounds consumed.
pub fn derive_round_seed(base_seed: u64, round_number: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(b"ZONE_ROYALE_SEED_V1");
    hasher.update(base_seed.to_le_bytes());
    hasher.update(round_number.to_le_bytes());
    let hash = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_determinism() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_known_values() {
        // Zones are replayed from seeds; these must never change
        let mut rng = DeterministicRng::new(2024);
        assert_eq!(rng.next_u64(), 13281608604107988903);
        assert_eq!(rng.next_u64(), 9802820252835208837);
        assert_eq!(rng.next_u64(), 4993079409577908803);
    }

    #[test]
    fn test_next_f64_unit_interval() {
        let mut rng = DeterministicRng::new(9999);
        for _ in 0..10_000 {
            let v = rng.next_f64();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn test_next_f64_range_degenerate() {
        let mut rng = DeterministicRng::new(1);
        assert_eq!(rng.next_f64_range(5.0, 5.0), 5.0);
        assert_eq!(rng.next_f64_range(5.0, 1.0), 5.0);
    }

    #[test]
    fn test_random_geo_position_valid() {
        let mut rng = DeterministicRng::new(7777);
        for _ in 0..1000 {
            assert!(rng.random_geo_position().is_valid());
        }
    }

    #[test]
    fn test_derive_round_seed() {
        let a = derive_round_seed(7, 1);
        assert_eq!(a, derive_round_seed(7, 1));
        assert_ne!(a, derive_round_seed(7, 2));
        assert_ne!(a, derive_round_seed(8, 1));
    }
}
