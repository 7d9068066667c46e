//! Timestamped GPS samples

use crate::GeoCoordinates;
use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;

/// GPS fix dimension reported by the receiver
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FixType {
    TwoD,
    ThreeD,
}

impl FixType {
    /// Parse the GPX `fix` literal. Only `2d` and `3d` are meaningful here.
    pub fn from_gpx(value: &str) -> Option<Self> {
        match value.trim() {
            "2d" => Some(Self::TwoD),
            "3d" => Some(Self::ThreeD),
            _ => None,
        }
    }

    /// Numeric dimension (2 or 3)
    pub fn dimension(self) -> u8 {
        match self {
            Self::TwoD => 2,
            Self::ThreeD => 3,
        }
    }
}

/// A single sample of a track log.
///
/// Optional quality fields are `None` when the log did not record them.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackPoint {
    pub date_time: DateTime<Utc>,
    pub coordinates: GeoCoordinates,
    pub n_satellites: Option<u32>,
    pub hdop: Option<f64>,
    pub pdop: Option<f64>,
    pub fix_type: Option<FixType>,
    /// Speed in meters per second
    pub speed: Option<f64>,
}

impl TrackPoint {
    /// Create a point with only time and position set
    pub fn new(date_time: DateTime<Utc>, coordinates: GeoCoordinates) -> Self {
        Self {
            date_time,
            coordinates,
            n_satellites: None,
            hdop: None,
            pdop: None,
            fix_type: None,
            speed: None,
        }
    }

    /// Ordering used for track points: by time only
    #[inline]
    pub fn cmp_by_time(&self, other: &TrackPoint) -> Ordering {
        self.date_time.cmp(&other.date_time)
    }

    /// Absolute time difference to `t`, at full timestamp precision
    #[inline]
    pub fn time_distance(&self, t: DateTime<Utc>) -> Duration {
        (self.date_time - t).abs()
    }
}
