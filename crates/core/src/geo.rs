//! Geographic primitives for field operations.
//!
//! Provides a validated coordinate type and great-circle distance via the
//! haversine formula. Distances are reported in whole meters, which is the
//! resolution check-in radii are expressed in.
//!
//! Storage backends that speak GeoJSON keep `[lng, lat]` ordering; the
//! conversion helpers here are the only place that ordering appears.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Geographic coordinates (latitude, longitude)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCoordinate {
    /// Latitude in degrees (-90 to 90)
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180)
    pub longitude: f64,
}

impl GeoCoordinate {
    /// Create a new geographic coordinate
    ///
    /// # Arguments
    /// * `latitude` - Latitude in degrees (-90 to 90)
    /// * `longitude` - Longitude in degrees (-180 to 180)
    ///
    /// # Returns
    /// * `Ok(GeoCoordinate)` - Valid coordinate
    /// * `Err(CoreError::InvalidCoordinate)` - Out of range or not a number
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoreError> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(CoreError::InvalidCoordinate(format!(
                "Latitude must be between -90 and 90, got {}",
                latitude
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(CoreError::InvalidCoordinate(format!(
                "Longitude must be between -180 and 180, got {}",
                longitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Distance to another coordinate in whole meters
    pub fn distance_to(&self, other: &GeoCoordinate) -> f64 {
        distance_meters(
            self.latitude,
            self.longitude,
            other.latitude,
            other.longitude,
        )
    }

    /// GeoJSON position (`[lng, lat]`)
    pub fn to_geojson_point(&self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }

    /// Parse a GeoJSON position (`[lng, lat]`)
    pub fn from_geojson_point(position: [f64; 2]) -> Result<Self, CoreError> {
        Self::new(position[1], position[0])
    }
}

/// Great-circle distance in meters, unrounded
pub fn haversine_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Great-circle distance between two points, rounded to whole meters.
///
/// NaN inputs propagate to a NaN result; callers validate coordinates
/// through [`GeoCoordinate::new`] first.
pub fn distance_meters(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    haversine_distance(lat1, lng1, lat2, lng2).round()
}
