//! Track log reader
//!
//! Turns one GPX document into a time-sorted [`Track`]. Only `trkpt`
//! elements are looked at. A point is kept when it has both a parseable
//! timestamp and valid coordinates; anything else is dropped silently, since
//! GPS logs routinely contain such dropouts.

use crate::time::parse_time;
use crate::{FixType, GeoCoordinates, Track, TrackPoint};
use std::path::{Path, PathBuf};
use xml::ParserConfig;
use xml::attribute::OwnedAttribute;
use xml::reader::{EventReader, XmlEvent};

/// Reasons a whole file could not be turned into a track
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("{0}")]
    Open(#[from] std::io::Error),

    #[error("File is empty.")]
    Empty,

    #[error("Probably not a GPX file.")]
    NotGpx,

    #[error("File is a GPX file, but no track points with valid timestamps were found.")]
    NoValidPoints,

    #[error("Loading was interrupted.")]
    Interrupted,
}

/// Outcome of reading one file
#[derive(Debug)]
pub struct TrackReadResult {
    pub url: PathBuf,
    pub outcome: Result<Track, ReadError>,
}

impl TrackReadResult {
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Human readable reason for an invalid result
    pub fn load_error(&self) -> Option<String> {
        self.outcome.as_ref().err().map(|e| e.to_string())
    }
}

/// Reads GPX track logs
pub struct TrackReader;

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TrackReader {
    /// Read and parse a track log file from disk
    pub fn load_track_file(url: impl AsRef<Path>) -> TrackReadResult {
        #[cfg(feature = "profiling")]
        profiling::scope!("reader::load_track_file");

        let url = url.as_ref();
        let outcome = std::fs::read(url)
            .map_err(ReadError::Open)
            .and_then(|bytes| Self::parse(url, &bytes));

        match &outcome {
            Ok(track) => {
                tracing::debug!("Read {} track points from {}", track.len(), url.display())
            }
            Err(e) => tracing::warn!("Could not read track file {}: {}", url.display(), e),
        }

        TrackReadResult {
            url: url.to_path_buf(),
            outcome,
        }
    }

    /// Parse an in-memory document. `url` is only recorded in the result.
    pub fn read_bytes(url: impl AsRef<Path>, bytes: &[u8]) -> TrackReadResult {
        let url = url.as_ref();
        TrackReadResult {
            url: url.to_path_buf(),
            outcome: Self::parse(url, bytes),
        }
    }

    fn parse(url: &Path, bytes: &[u8]) -> Result<Track, ReadError> {
        if bytes.is_empty() {
            return Err(ReadError::Empty);
        }

        let mut points = Self::collect_points(bytes)?;
        if points.is_empty() {
            return Err(ReadError::NoValidPoints);
        }

        // Stable, so samples with equal timestamps keep file order
        points.sort_by(TrackPoint::cmp_by_time);
        Ok(Track::from_sorted_points(url, points))
    }

    fn collect_points(bytes: &[u8]) -> Result<Vec<TrackPoint>, ReadError> {
        let config = ParserConfig::new()
            .trim_whitespace(true)
            .cdata_to_characters(true);
        let reader = EventReader::new_with_config(bytes, config);

        let mut points = Vec::new();
        let mut depth = 0usize;
        // Depth of the open trkpt element and the point being assembled
        let mut current: Option<(usize, PendingPoint)> = None;
        let mut text = String::new();

        for event in reader {
            match event.map_err(|_| ReadError::NotGpx)? {
                XmlEvent::StartElement {
                    name, attributes, ..
                } => {
                    depth += 1;
                    text.clear();
                    if current.is_none() && name.local_name == "trkpt" {
                        current = Some((depth, PendingPoint::from_attributes(&attributes)));
                    }
                }
                XmlEvent::Characters(chars) => text.push_str(&chars),
                XmlEvent::EndElement { name } => {
                    match current.take() {
                        Some((point_depth, pending)) if depth == point_depth => {
                            points.extend(pending.finish());
                        }
                        Some((point_depth, mut pending)) => {
                            pending.apply_field(&name.local_name, text.trim());
                            current = Some((point_depth, pending));
                        }
                        None => {}
                    }
                    text.clear();
                    depth -= 1;
                }
                _ => {}
            }
        }

        Ok(points)
    }
}

/// Fields of a `trkpt` collected while its children are being read
#[derive(Default)]
struct PendingPoint {
    lat: Option<f64>,
    lon: Option<f64>,
    time: Option<chrono::DateTime<chrono::Utc>>,
    ele: Option<f64>,
    sat: Option<u32>,
    hdop: Option<f64>,
    pdop: Option<f64>,
    fix: Option<FixType>,
    speed: Option<f64>,
}

impl PendingPoint {
    fn from_attributes(attributes: &[OwnedAttribute]) -> Self {
        let attribute = |key: &str| {
            attributes
                .iter()
                .find(|a| a.name.local_name == key)
                .and_then(|a| parse_finite(&a.value))
        };
        Self {
            lat: attribute("lat"),
            lon: attribute("lon"),
            ..Self::default()
        }
    }

    fn apply_field(&mut self, name: &str, value: &str) {
        match name {
            "time" => self.time = parse_time(value),
            "ele" => self.ele = parse_finite(value),
            "sat" => self.sat = value.parse().ok(),
            "hdop" => self.hdop = parse_finite(value),
            "pdop" => self.pdop = parse_finite(value),
            "fix" => self.fix = FixType::from_gpx(value),
            "speed" => self.speed = parse_finite(value),
            _ => {}
        }
    }

    /// The finished point, or `None` when time or coordinates are unusable
    fn finish(self) -> Option<TrackPoint> {
        let date_time = self.time?;
        let coordinates = GeoCoordinates::new(self.lat?, self.lon?).ok()?.set_alt(self.ele);
        Some(TrackPoint {
            date_time,
            coordinates,
            n_satellites: self.sat,
            hdop: self.hdop,
            pdop: self.pdop,
            fix_type: self.fix,
            speed: self.speed,
        })
    }
}

fn parse_finite(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
