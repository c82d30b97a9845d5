//! Geographic Math
//!
//! Great-circle distance and zone membership on a spherical Earth.
//! Every function here is pure.

use std::fmt;
use serde::{Serialize, Deserialize};

/// Mean Earth radius used for all distance calculations (km).
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Valid latitude range (degrees).
pub const LAT_RANGE: (f64, f64) = (-90.0, 90.0);

/// Valid longitude range (degrees).
pub const LNG_RANGE: (f64, f64) = (-180.0, 180.0);

/// A point on the globe in decimal degrees.
#[derive(Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPosition {
    /// Latitude in [-90, 90]
    pub lat: f64,
    /// Longitude in [-180, 180]
    pub lng: f64,
}

impl GeoPosition {
    /// Create a position without validation.
    #[inline]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Create a position, rejecting NaN and out-of-range coordinates.
    pub fn checked(lat: f64, lng: f64) -> Option<Self> {
        let pos = Self::new(lat, lng);
        if pos.is_valid() {
            Some(pos)
        } else {
            None
        }
    }

    /// Check both coordinates are finite and in range.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (LAT_RANGE.0..=LAT_RANGE.1).contains(&self.lat)
            && (LNG_RANGE.0..=LNG_RANGE.1).contains(&self.lng)
    }

    /// Great-circle distance to another position (km).
    #[inline]
    pub fn distance_km(&self, other: &GeoPosition) -> f64 {
        haversine_distance_km(*self, *other)
    }
}

impl fmt::Debug for GeoPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4})", self.lat, self.lng)
    }
}

impl fmt::Display for GeoPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4},{:.4}", self.lat, self.lng)
    }
}

/// Great-circle distance between two positions using the haversine formula.
///
/// Returns kilometers on a sphere of radius [`EARTH_RADIUS_KM`].
pub fn haversine_distance_km(a: GeoPosition, b: GeoPosition) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);

    // Rounding can push h marginally past 1 for antipodal points
    let c = 2.0 * h.clamp(0.0, 1.0).sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Check whether `point` lies inside (or exactly on the edge of) a zone.
///
/// Inside-or-equal is survival everywhere in the crate.
#[inline]
pub fn is_inside_zone(point: GeoPosition, center: GeoPosition, radius_km: f64) -> bool {
    haversine_distance_km(point, center) <= radius_km
}
