//! Time-based correlation of items against GPS tracks
//!
//! Every item carries a timestamp. After shifting it by the configured
//! offsets, each visible track is binary searched for the samples just
//! before and after that instant. The closest sample over all tracks gives a
//! direct match; when interpolation is enabled and the track holding that
//! sample brackets the instant closely enough, the position is interpolated
//! between the two bracketing samples of that track instead.
//!
//! Tracks are never merged or re-sorted here: each track's points are sorted
//! when it is read, and the search relies on it.

use crate::{FixType, GeoCoordinates, Track, TrackId, TrackPoint};
use chrono::{DateTime, Duration, Utc};
use std::ops::{BitOr, BitOrAssign};

/// Default interpolation limit (15 minutes)
pub const DEFAULT_INTERPOLATION_DST_TIME: i64 = 15 * 60;

/// Default direct match limit (30 seconds)
pub const DEFAULT_MAX_GAP_TIME: i64 = 30;

/// Matching parameters. All times are in seconds.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CorrelationOptions {
    /// Interpolate between the samples around an item
    pub interpolate: bool,
    /// Largest gap between two samples that may be interpolated across
    pub interpolation_dst_time: i64,
    /// Largest distance between an item and a sample for a direct match
    pub max_gap_time: i64,
    /// Constant shift applied to item times (camera clock drift)
    pub seconds_offset: i64,
    /// Time zone shift applied to item times
    pub time_zone_offset: i64,
}

impl Default for CorrelationOptions {
    fn default() -> Self {
        Self {
            interpolate: true,
            interpolation_dst_time: DEFAULT_INTERPOLATION_DST_TIME,
            max_gap_time: DEFAULT_MAX_GAP_TIME,
            seconds_offset: 0,
            time_zone_offset: 0,
        }
    }
}

impl CorrelationOptions {
    /// Item time shifted into track time
    pub fn adjusted_time(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let shift = self.seconds_offset.checked_add(self.time_zone_offset)?;
        t.checked_add_signed(Duration::try_seconds(shift)?)
    }
}

/// Result bits of a correlation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CorrelationFlags(u8);

impl CorrelationFlags {
    pub const NONE: CorrelationFlags = CorrelationFlags(0);
    pub const COORDINATES: CorrelationFlags = CorrelationFlags(1);
    pub const INTERPOLATED: CorrelationFlags = CorrelationFlags(1 << 1);
    pub const ALTITUDE: CorrelationFlags = CorrelationFlags(1 << 2);

    #[inline]
    pub fn contains(self, other: CorrelationFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for CorrelationFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        CorrelationFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for CorrelationFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// An item to correlate, and after correlation, its result.
///
/// `user_data` is whatever the caller needs to map the result back to its own
/// objects; it is passed through untouched.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Correlation<T> {
    pub date_time: DateTime<Utc>,
    pub user_data: T,
    pub coordinates: Option<GeoCoordinates>,
    pub n_satellites: Option<u32>,
    pub hdop: Option<f64>,
    pub pdop: Option<f64>,
    pub fix_type: Option<FixType>,
    pub speed: Option<f64>,
    /// Track the position came from
    pub track_id: Option<TrackId>,
    pub flags: CorrelationFlags,
}

impl<T> Correlation<T> {
    pub fn new(date_time: DateTime<Utc>, user_data: T) -> Self {
        Self {
            date_time,
            user_data,
            coordinates: None,
            n_satellites: None,
            hdop: None,
            pdop: None,
            fix_type: None,
            speed: None,
            track_id: None,
            flags: CorrelationFlags::NONE,
        }
    }

    #[inline]
    pub fn is_correlated(&self) -> bool {
        self.flags.contains(CorrelationFlags::COORDINATES)
    }

    #[inline]
    pub fn is_interpolated(&self) -> bool {
        self.flags.contains(CorrelationFlags::INTERPOLATED)
    }

    fn apply(&mut self, track_id: TrackId, coordinates: GeoCoordinates, source: &TrackPoint) {
        self.coordinates = Some(coordinates);
        self.n_satellites = source.n_satellites;
        self.hdop = source.hdop;
        self.pdop = source.pdop;
        self.fix_type = source.fix_type;
        self.speed = source.speed;
        self.track_id = Some(track_id);
        self.flags |= CorrelationFlags::COORDINATES;
        if coordinates.has_altitude() {
            self.flags |= CorrelationFlags::ALTITUDE;
        }
    }
}

/// Counts reported back to the user once a run has finished
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CorrelationSummary {
    pub total: usize,
    pub correlated: usize,
    pub interpolated: usize,
}

impl CorrelationSummary {
    /// Fold a batch of results into the summary
    pub fn add<T>(&mut self, results: &[Correlation<T>]) {
        self.total += results.len();
        self.correlated += results.iter().filter(|c| c.is_correlated()).count();
        self.interpolated += results.iter().filter(|c| c.is_interpolated()).count();
    }

    pub fn from_results<T>(results: &[Correlation<T>]) -> Self {
        let mut summary = Self::default();
        summary.add(results);
        summary
    }
}

/// Samples of one track around an instant
struct Bracket<'a> {
    track: &'a Track,
    /// Last sample strictly before the instant
    before: Option<&'a TrackPoint>,
    /// First sample at or after the instant
    after: Option<&'a TrackPoint>,
}

impl<'a> Bracket<'a> {
    fn search(track: &'a Track, t: DateTime<Utc>) -> Self {
        let points = track.points();
        let index = points.partition_point(|p| p.date_time < t);
        Self {
            track,
            before: index.checked_sub(1).map(|i| &points[i]),
            after: points.get(index),
        }
    }
}

/// Correlate a list of items against `tracks`, returning filled-in copies
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn correlate_items<T: Clone>(
    tracks: &[Track],
    items: &[Correlation<T>],
    options: &CorrelationOptions,
) -> Vec<Correlation<T>> {
    items
        .iter()
        .map(|item| correlate_item(tracks, item.clone(), options))
        .collect()
}

/// Correlate a single item. Invisible and empty tracks are ignored.
pub fn correlate_item<T>(
    tracks: &[Track],
    mut item: Correlation<T>,
    options: &CorrelationOptions,
) -> Correlation<T> {
    let Some(t) = options.adjusted_time(item.date_time) else {
        return item;
    };

    let brackets: Vec<Bracket<'_>> = tracks
        .iter()
        .filter(|track| track.visible && !track.is_empty())
        .map(|track| Bracket::search(track, t))
        .collect();

    let Some((bracket, nearest)) = nearest_point(&brackets, t) else {
        return item;
    };

    // Only the track holding the closest sample may be interpolated on
    if options.interpolate {
        if let Some((before, after, fraction)) = interpolation_pair(bracket, t, options) {
            let coordinates = before.coordinates.interpolate(&after.coordinates, fraction);
            item.apply(bracket.track.id, coordinates, before);
            item.flags |= CorrelationFlags::INTERPOLATED;
            return item;
        }
    }

    if within_limit(nearest.time_distance(t), options.max_gap_time) {
        item.apply(bracket.track.id, nearest.coordinates, nearest);
    }

    item
}

/// Closest sample to `t` over all tracks, with the bracket it came from.
/// Equal distances prefer the earlier sample, then the track listed first.
fn nearest_point<'b, 'a>(
    brackets: &'b [Bracket<'a>],
    t: DateTime<Utc>,
) -> Option<(&'b Bracket<'a>, &'a TrackPoint)> {
    let mut best: Option<((Duration, DateTime<Utc>), &'b Bracket<'a>, &'a TrackPoint)> = None;

    for bracket in brackets {
        for point in [bracket.before, bracket.after].into_iter().flatten() {
            let key = (point.time_distance(t), point.date_time);
            if best.as_ref().is_none_or(|(best_key, _, _)| key < *best_key) {
                best = Some((key, bracket, point));
            }
        }
    }

    best.map(|(_, bracket, point)| (bracket, point))
}

/// Samples of `bracket` enclosing `t` with a gap within the interpolation
/// limit, and the position of `t` between them in `(0, 1)`. Exact hits are
/// direct matches and yield `None`.
fn interpolation_pair<'a>(
    bracket: &Bracket<'a>,
    t: DateTime<Utc>,
    options: &CorrelationOptions,
) -> Option<(&'a TrackPoint, &'a TrackPoint, f64)> {
    let (before, after) = (bracket.before?, bracket.after?);
    if after.date_time == t {
        return None;
    }

    let gap = after.date_time - before.date_time;
    if !within_limit(gap, options.interpolation_dst_time) {
        return None;
    }

    let span = seconds_f64(gap);
    let fraction = seconds_f64(t - before.date_time) / span;
    (span > 0.0 && fraction.is_finite()).then_some((before, after, fraction))
}

/// Whether `distance` is at most `limit_secs` seconds. Limits too large to
/// represent never reject.
fn within_limit(distance: Duration, limit_secs: i64) -> bool {
    Duration::try_seconds(limit_secs).is_none_or(|limit| distance <= limit)
}

/// Duration in seconds, keeping the sub-second part
fn seconds_f64(d: Duration) -> f64 {
    d.num_seconds() as f64 + f64::from(d.subsec_nanos()) * 1e-9
}
