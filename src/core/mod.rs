//! Core primitives.
//!
//! Pure geometry, seeded randomness, time sources, and hashing.
//! Nothing in here knows about rounds.

pub mod geo;
pub mod rng;
pub mod clock;
pub mod hash;

// Re-export core types
pub use geo::{GeoPosition, haversine_distance_km, is_inside_zone, EARTH_RADIUS_KM};
pub use rng::DeterministicRng;
pub use clock::{Clock, SystemClock, ManualClock};
pub use hash::{StateHash, StateHasher};
