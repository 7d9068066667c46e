//! Printing of correlation results

use gps_track_lib::{Correlation, CorrelationSummary, ManagerInfo};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct LoadError<'a> {
    path: &'a PathBuf,
    message: &'a str,
}

#[derive(Serialize)]
struct Report<'a> {
    tracks: &'a ManagerInfo,
    load_errors: Vec<LoadError<'a>>,
    summary: CorrelationSummary,
    results: &'a [Correlation<String>],
}

/// Machine readable report of a whole run
pub fn to_json(
    info: &ManagerInfo,
    load_errors: &[(PathBuf, String)],
    results: &[Correlation<String>],
) -> serde_json::Result<String> {
    let report = Report {
        tracks: info,
        load_errors: load_errors
            .iter()
            .map(|(path, message)| LoadError { path, message })
            .collect(),
        summary: CorrelationSummary::from_results(results),
        results,
    };
    serde_json::to_string_pretty(&report)
}

/// One tab separated line per item
pub fn format_result(result: &Correlation<String>) -> String {
    let time = result.date_time.format("%Y-%m-%dT%H:%M:%SZ");
    let Some(coordinates) = result.coordinates else {
        return format!("{}\t{}\tno match", result.user_data, time);
    };

    let mut line = format!(
        "{}\t{}\t{:.6},{:.6}",
        result.user_data,
        time,
        coordinates.lat(),
        coordinates.lon()
    );
    if let Some(alt) = coordinates.alt() {
        line.push_str(&format!(",{alt:.1}"));
    }
    if let Some(track_id) = result.track_id {
        line.push_str(&format!("\ttrack {track_id}"));
    }
    if result.is_interpolated() {
        line.push_str("\tinterpolated");
    }
    line
}

pub fn format_summary(summary: &CorrelationSummary) -> String {
    format!(
        "Correlated {} of {} items ({} interpolated)",
        summary.correlated, summary.total, summary.interpolated
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use gps_track_lib::{
        CorrelationOptions, GeoCoordinates, Track, TrackId, TrackPoint, correlate_items,
    };

    fn correlated(label: &str, minute: u32) -> Correlation<String> {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let points = vec![
            TrackPoint::new(start, GeoCoordinates::with_altitude(10.0, 20.0, 5.0).unwrap()),
            TrackPoint::new(
                start + chrono::Duration::minutes(10),
                GeoCoordinates::with_altitude(10.1, 20.1, 15.0).unwrap(),
            ),
        ];
        let mut track = Track::from_points("walk.gpx", points);
        track.id = TrackId(1);
        let item = Correlation::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap(),
            label.to_string(),
        );
        correlate_items(&[track], &[item], &CorrelationOptions::default()).remove(0)
    }

    #[test]
    fn test_format_result() {
        assert_eq!(
            format_result(&correlated("a.jpg", 0)),
            "a.jpg\t2024-05-01T10:00:00Z\t10.000000,20.000000,5.0\ttrack #1"
        );
        assert_eq!(
            format_result(&correlated("b.jpg", 5)),
            "b.jpg\t2024-05-01T10:05:00Z\t10.050000,20.050000,10.0\ttrack #1\tinterpolated"
        );
        assert_eq!(
            format_result(&correlated("c.jpg", 30)),
            "c.jpg\t2024-05-01T10:30:00Z\tno match"
        );
    }

    #[test]
    fn test_json_report() {
        let results = vec![correlated("a.jpg", 5), correlated("b.jpg", 40)];
        let errors = vec![(PathBuf::from("broken.gpx"), "File is empty.".to_string())];
        let json = to_json(&ManagerInfo::default(), &errors, &results).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["summary"]["total"], 2);
        assert_eq!(value["summary"]["correlated"], 1);
        assert_eq!(value["summary"]["interpolated"], 1);
        assert_eq!(value["load_errors"][0]["message"], "File is empty.");
        assert_eq!(value["results"][0]["user_data"], "a.jpg");
        assert_eq!(value["results"][1]["coordinates"], serde_json::Value::Null);
    }

    #[test]
    fn test_format_summary() {
        let summary = CorrelationSummary {
            total: 3,
            correlated: 2,
            interpolated: 1,
        };
        assert_eq!(format_summary(&summary), "Correlated 2 of 3 items (1 interpolated)");
    }
}
