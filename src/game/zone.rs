//! Zone Engine
//!
//! Draws a round's target zone and evaluates survival against it.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::core::rng::DeterministicRng;
use crate::game::state::{PlayerId, Round, Zone};
use crate::DEFAULT_ZONE_RADIUS_KM;

/// Zone generation settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Radius applied to every generated zone (km).
    pub radius_km: f64,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            radius_km: DEFAULT_ZONE_RADIUS_KM,
        }
    }
}

impl ZoneConfig {
    /// Radius must be finite and positive.
    pub fn is_valid(&self) -> bool {
        self.radius_km.is_finite() && self.radius_km > 0.0
    }
}

/// Generates zones for new rounds.
#[derive(Debug, Clone, Default)]
pub struct ZoneEngine {
    config: ZoneConfig,
}

impl ZoneEngine {
    /// Create an engine. Invalid radii fall back to the default.
    pub fn new(config: ZoneConfig) -> Self {
        let config = if config.is_valid() {
            config
        } else {
            ZoneConfig::default()
        };
        Self { config }
    }

    /// Active configuration.
    pub fn config(&self) -> &ZoneConfig {
        &self.config
    }

    /// Draw a zone: latitude uniform in [-90, 90), longitude uniform in
    /// [-180, 180), drawn in that order.
    pub fn generate_zone(&self, rng: &mut DeterministicRng) -> Zone {
        Zone::new(rng.random_geo_position(), self.config.radius_km)
    }
}

/// Survival for every submission on `round`: inside-or-on-edge survives.
///
/// Reads only the round's zone and submission positions, so repeated calls
/// on the same round give identical maps.
pub fn evaluate_survival(round: &Round) -> BTreeMap<PlayerId, bool> {
    let zone = round.zone();
    round
        .submissions()
        .iter()
        .map(|s| (s.player_id.clone(), zone.contains(s.position)))
        .collect()
}
