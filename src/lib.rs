//! # Zone Royale Round Server
//!
//! Round coordination for a geography elimination game: players guess a
//! point on the globe, a hidden circular zone is revealed when the timer
//! runs out, and every guess inside it survives.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ZONE ROYALE SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Pure primitives                           │
//! │  ├── geo.rs      - Positions and haversine distance          │
//! │  ├── rng.rs      - Seeded Xorshift128+ PRNG                  │
//! │  ├── clock.rs    - Injectable time source                    │
//! │  └── hash.rs     - Round state hashing                       │
//! │                                                              │
//! │  game/           - Round lifecycle                           │
//! │  ├── state.rs    - Round, submissions, transitions           │
//! │  ├── zone.rs     - Zone generation, survival evaluation      │
//! │  ├── ledger.rs   - Submission map, per-round locks           │
//! │  ├── round.rs    - Coordinator: start, submit, tick          │
//! │  ├── events.rs   - Committed-change events                   │
//! │  └── error.rs    - Error taxonomy                            │
//! │                                                              │
//! │  store/          - Conditional-write round storage           │
//! │  network/        - Change feed and WebSocket server          │
//! │  config.rs       - Environment configuration                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Round Lifecycle
//!
//! `waiting -> playing -> revealed -> finished`, forward only. Survival is
//! decided once, at reveal, and never changes afterwards.
//!
//! ## Determinism
//!
//! Zones are drawn from a per-round seed derived from a base seed and the
//! round number, so a round's zone can be regenerated from its stored seed.
//! Rounds and submissions are kept in `BTreeMap`s for stable ordering and
//! hashing.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod store;
pub mod network;
pub mod config;

// Re-export commonly used types
pub use crate::core::geo::{GeoPosition, haversine_distance_km};
pub use crate::core::rng::DeterministicRng;
pub use game::{Round, RoundId, RoundStatus, PlayerId, Zone, RoundCoordinator, RoundError};
pub use store::{RoundStore, MemoryStore};
pub use config::{CoordinatorConfig, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Play time before the zone is revealed (seconds)
pub const ROUND_DURATION_SECS: u64 = 60;

/// How long a started round blocks a new one (seconds)
pub const ACTIVE_ROUND_WINDOW_SECS: u64 = 70;

/// Zone radius used when none is configured (kilometers)
pub const DEFAULT_ZONE_RADIUS_KM: f64 = 6000.0;
