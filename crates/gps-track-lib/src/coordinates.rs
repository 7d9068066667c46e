//! Geographic coordinate value type and spherical helpers

use crate::{Result, TrackError};
use geo::Point;
use std::hash::{Hash, Hasher};

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS84 position with an optional altitude.
///
/// Latitude is always within `[-90, 90]` and longitude within `[-180, 180]`;
/// the constructors refuse anything else. Whether an altitude is present is
/// tracked separately from its value.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeoCoordinates {
    lat: f64,
    lon: f64,
    alt: Option<f64>,
}

impl GeoCoordinates {
    /// Create coordinates without altitude
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !is_valid_lat_lon(lat, lon) {
            return Err(TrackError::InvalidCoordinates { lat, lon });
        }
        Ok(Self { lat, lon, alt: None })
    }

    /// Create coordinates with an altitude in meters
    pub fn with_altitude(lat: f64, lon: f64, alt: f64) -> Result<Self> {
        let mut coordinates = Self::new(lat, lon)?;
        coordinates.alt = alt.is_finite().then_some(alt);
        Ok(coordinates)
    }

    #[inline]
    pub fn lat(&self) -> f64 {
        self.lat
    }

    #[inline]
    pub fn lon(&self) -> f64 {
        self.lon
    }

    #[inline]
    pub fn alt(&self) -> Option<f64> {
        self.alt
    }

    #[inline]
    pub fn has_altitude(&self) -> bool {
        self.alt.is_some()
    }

    /// Return a copy with the altitude replaced
    pub fn set_alt(self, alt: Option<f64>) -> Self {
        Self {
            alt: alt.filter(|a| a.is_finite()),
            ..self
        }
    }

    /// Convert to a `geo::Point` (x = longitude, y = latitude)
    #[inline]
    pub fn to_point(&self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }

    /// Linear interpolation between two positions.
    ///
    /// `fraction` is clamped to `[0, 1]`, and NaN yields `self`. The altitude
    /// is only interpolated when both ends carry one.
    pub fn interpolate(&self, other: &GeoCoordinates, fraction: f64) -> GeoCoordinates {
        let f = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        let alt = match (self.alt, other.alt) {
            (Some(a), Some(b)) => Some(a + (b - a) * f),
            _ => None,
        };
        GeoCoordinates {
            lat: self.lat + (other.lat - self.lat) * f,
            lon: self.lon + (other.lon - self.lon) * f,
            alt,
        }
    }

    /// Great-circle distance to `other` in meters (haversine formula)
    pub fn distance_to(&self, other: &GeoCoordinates) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let delta_lat = (other.lat - self.lat).to_radians();
        let delta_lon = (other.lon - self.lon).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_M * c
    }
}

impl Eq for GeoCoordinates {}

impl Hash for GeoCoordinates {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Normalize -0.0 so equal values hash equally
        (self.lat + 0.0).to_bits().hash(state);
        (self.lon + 0.0).to_bits().hash(state);
        self.alt.map(|a| (a + 0.0).to_bits()).hash(state);
    }
}

impl TryFrom<Point<f64>> for GeoCoordinates {
    type Error = TrackError;

    fn try_from(point: Point<f64>) -> Result<Self> {
        Self::new(point.y(), point.x())
    }
}

/// Check that latitude and longitude are finite and within WGS84 bounds
#[inline(always)]
pub fn is_valid_lat_lon(lat: f64, lon: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}
