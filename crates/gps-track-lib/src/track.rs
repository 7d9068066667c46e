//! Track storage
//!
//! A `Track` is the time-sorted list of samples read from one log file, plus
//! the identity and display attributes assigned by the `TrackManager`.
//! Points are shared behind an `Arc` so handing out snapshots is cheap.

use crate::{GeoCoordinates, TrackPoint};
use chrono::{DateTime, Utc};
use geo::Rect;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identifier of a loaded track. Zero means "unassigned".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackId(pub u64);

impl TrackId {
    pub const INVALID: TrackId = TrackId(0);

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// RGB display color of a track
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl TrackColor {
    pub const BLACK: TrackColor = TrackColor { r: 0, g: 0, b: 0 };

    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Build a color from hue (degrees), saturation and value in `[0, 1]`
    pub fn from_hsv(hue: f32, saturation: f32, value: f32) -> Self {
        let hue = hue.rem_euclid(360.0);
        let c = value * saturation;
        let x = c * (1.0 - ((hue / 60.0) % 2.0 - 1.0).abs());
        let m = value - c;

        let (r, g, b) = if hue < 60.0 {
            (c, x, 0.0)
        } else if hue < 120.0 {
            (x, c, 0.0)
        } else if hue < 180.0 {
            (0.0, c, x)
        } else if hue < 240.0 {
            (0.0, x, c)
        } else if hue < 300.0 {
            (x, 0.0, c)
        } else {
            (c, 0.0, x)
        };

        Self::from_rgb(
            ((r + m) * 255.0) as u8,
            ((g + m) * 255.0) as u8,
            ((b + m) * 255.0) as u8,
        )
    }

    /// `#rrggbb` notation
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// A loaded track.
///
/// `points` is sorted ascending by time; the reader guarantees this and
/// nothing downstream re-sorts.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Track {
    pub id: TrackId,
    pub url: PathBuf,
    points: Arc<[TrackPoint]>,
    pub color: TrackColor,
    pub visible: bool,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Track {
    /// Build an unassigned track (id 0) from points that are already sorted
    /// by time. Used by the reader, which sorts before calling this.
    pub(crate) fn from_sorted_points(url: &Path, points: Vec<TrackPoint>) -> Self {
        debug_assert!(points.is_sorted_by(|a, b| a.date_time <= b.date_time));
        Self {
            id: TrackId::INVALID,
            url: url.to_path_buf(),
            points: points.into(),
            color: TrackColor::default(),
            visible: true,
        }
    }

    /// Build an unassigned track from arbitrary points, sorting them by time
    pub fn from_points(url: impl AsRef<Path>, mut points: Vec<TrackPoint>) -> Self {
        points.sort_by(TrackPoint::cmp_by_time);
        Self::from_sorted_points(url.as_ref(), points)
    }

    /// The time-sorted samples of this track
    #[inline]
    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn first_point(&self) -> Option<&TrackPoint> {
        self.points.first()
    }

    #[inline]
    pub fn last_point(&self) -> Option<&TrackPoint> {
        self.points.last()
    }

    /// Time of the first and last sample
    pub fn time_span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.first_point()?.date_time, self.last_point()?.date_time))
    }

    /// Bounding box in degrees (x = longitude, y = latitude)
    pub fn bounding_box(&self) -> Option<Rect<f64>> {
        let first = self.first_point()?.coordinates;
        let (mut min_x, mut min_y) = (first.lon(), first.lat());
        let (mut max_x, mut max_y) = (min_x, min_y);

        for point in self.points.iter() {
            let c = point.coordinates;
            min_x = min_x.min(c.lon());
            min_y = min_y.min(c.lat());
            max_x = max_x.max(c.lon());
            max_y = max_y.max(c.lat());
        }

        Some(Rect::new(
            geo::Coord { x: min_x, y: min_y },
            geo::Coord { x: max_x, y: max_y },
        ))
    }

    /// Total length of the track in meters
    pub fn total_distance(&self) -> f64 {
        self.points
            .windows(2)
            .map(|pair| pair[0].coordinates.distance_to(&pair[1].coordinates))
            .sum()
    }

    /// Positions of all samples in time order
    pub fn coordinates(&self) -> Vec<GeoCoordinates> {
        self.points.iter().map(|p| p.coordinates).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn create_test_point(secs: i64, lat: f64, lon: f64) -> TrackPoint {
        let t0 = Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap();
        TrackPoint::new(
            t0 + chrono::Duration::seconds(secs),
            GeoCoordinates::new(lat, lon).unwrap(),
        )
    }

    fn create_test_track() -> Track {
        // A few points around London, deliberately out of order
        Track::from_points(
            "london.gpx",
            vec![
                create_test_point(20, 51.5078, -0.1274),
                create_test_point(0, 51.5074, -0.1278),
                create_test_point(10, 51.5076, -0.1276),
            ],
        )
    }

    #[test]
    fn test_points_sorted_on_construction() {
        let track = create_test_track();
        assert_eq!(track.len(), 3);
        assert!(
            track
                .points()
                .windows(2)
                .all(|w| w[0].date_time <= w[1].date_time)
        );
        assert!(!track.id.is_valid());
        assert!(track.visible);
    }

    #[test]
    fn test_time_span() {
        let track = create_test_track();
        let (start, end) = track.time_span().unwrap();
        assert_eq!((end - start).num_seconds(), 20);
        assert!(Track::default().time_span().is_none());
    }

    #[test]
    fn test_bounding_box() {
        let track = create_test_track();
        let bbox = track.bounding_box().unwrap();
        assert!((bbox.min().y - 51.5074).abs() < 1e-9);
        assert!((bbox.max().y - 51.5078).abs() < 1e-9);
        assert!(bbox.width() > 0.0);
        assert!(Track::default().bounding_box().is_none());
    }

    #[test]
    fn test_total_distance() {
        let track = create_test_track();
        let distance = track.total_distance();
        // The test points are a few tens of meters apart
        assert!(distance > 0.0);
        assert!(distance < 1000.0);
    }

    #[test]
    fn test_clone_shares_points() {
        let track = create_test_track();
        let snapshot = track.clone();
        assert!(std::ptr::eq(track.points(), snapshot.points()));
    }

    #[test]
    fn test_colors() {
        assert_eq!(TrackColor::from_hsv(0.0, 1.0, 1.0), TrackColor::from_rgb(255, 0, 0));
        assert_eq!(TrackColor::from_rgb(255, 16, 0).to_hex(), "#ff1000");
        assert_ne!(TrackColor::from_hsv(137.5, 0.7, 0.9), TrackColor::BLACK);
    }

    #[test]
    fn test_track_id() {
        assert!(!TrackId::INVALID.is_valid());
        assert!(TrackId(3).is_valid());
        assert_eq!(TrackId(3).to_string(), "#3");
    }
}
