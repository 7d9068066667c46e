use clap::Parser;
use gps_track_lib::{CorrelationOptions, DEFAULT_BATCH_SIZE};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// GPS Correlate - Assign positions from GPX track logs to time-stamped items
pub struct Settings {
    /// GPX track files to load
    #[clap(value_name = "FILE", required = true)]
    pub tracks: Vec<PathBuf>,

    /// Item timestamp to correlate, e.g. 2024-05-01T10:15:00Z (repeatable)
    #[clap(short = 't', long = "time", value_name = "TIMESTAMP")]
    pub times: Vec<String>,

    /// Text file with one item per line, written as `timestamp` or `label,timestamp`
    #[clap(short, long, value_name = "FILE")]
    pub items: Option<PathBuf>,

    /// Only match items directly to the nearest track point, never interpolate
    #[clap(long, default_value = "false")]
    pub direct: bool,

    /// Largest gap between two track points that may be interpolated across (HH:MM:SS)
    #[clap(long, default_value = "00:15:00", value_parser = parse_duration)]
    pub interpolation_limit: i64,

    /// Largest time distance between an item and a track point for a direct match (HH:MM:SS)
    #[clap(long, default_value = "00:00:30", value_parser = parse_duration)]
    pub max_gap: i64,

    /// Camera clock correction added to every item time ([+-]HH:MM:SS)
    #[clap(
        long,
        default_value = "+00:00:00",
        allow_hyphen_values = true,
        value_parser = parse_offset
    )]
    pub offset: i64,

    /// Time zone correction added to every item time ([+-]HH:MM)
    #[clap(
        long,
        default_value = "+00:00",
        allow_hyphen_values = true,
        value_parser = parse_time_zone
    )]
    pub time_zone: i64,

    /// Number of results delivered per correlator batch
    #[clap(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Print results as JSON instead of text
    #[clap(long, default_value = "false")]
    pub json: bool,
}

impl Settings {
    pub fn from_cli() -> Self {
        match Settings::try_parse() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }

    /// Options handed to the correlator
    pub fn correlation_options(&self) -> CorrelationOptions {
        CorrelationOptions {
            interpolate: !self.direct,
            interpolation_dst_time: self.interpolation_limit,
            max_gap_time: self.max_gap,
            seconds_offset: self.offset,
            time_zone_offset: self.time_zone,
        }
    }
}

/// Parse `HH:MM:SS` (or `MM:SS`, or plain seconds) into seconds
pub fn parse_duration(value: &str) -> Result<i64, String> {
    let fields: Vec<&str> = value.trim().split(':').collect();
    if fields.len() > 3 || fields.iter().any(|f| f.is_empty()) {
        return Err(format!("invalid duration '{value}', expected HH:MM:SS"));
    }

    let mut total = 0i64;
    for (i, field) in fields.iter().enumerate() {
        let n: i64 = field
            .parse()
            .map_err(|_| format!("invalid number '{field}' in '{value}'"))?;
        // Minutes and seconds must stay below 60 except in the leading field
        if n < 0 || (i > 0 && n >= 60) {
            return Err(format!("field '{field}' out of range in '{value}'"));
        }
        total = total * 60 + n;
    }
    Ok(total)
}

/// Parse a signed `[+-]HH:MM:SS` offset into seconds
pub fn parse_offset(value: &str) -> Result<i64, String> {
    let value = value.trim();
    let (sign, rest) = split_sign(value);
    Ok(sign * parse_duration(rest)?)
}

/// Parse a signed `[+-]HH:MM` time zone into seconds
pub fn parse_time_zone(value: &str) -> Result<i64, String> {
    let value = value.trim();
    let (sign, rest) = split_sign(value);
    let Some((hours, minutes)) = rest.split_once(':') else {
        return Err(format!("invalid time zone '{value}', expected [+-]HH:MM"));
    };
    let hours: i64 = hours
        .parse()
        .map_err(|_| format!("invalid hours in time zone '{value}'"))?;
    let minutes: i64 = minutes
        .parse()
        .map_err(|_| format!("invalid minutes in time zone '{value}'"))?;
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return Err(format!("time zone '{value}' out of range"));
    }
    Ok(sign * (hours * 3600 + minutes * 60))
}

fn split_sign(value: &str) -> (i64, &str) {
    if let Some(rest) = value.strip_prefix('-') {
        (-1, rest)
    } else {
        (1, value.strip_prefix('+').unwrap_or(value))
    }
}
