//! GPS Track Library - Track Loading and Time Correlation
//!
//! This library loads GPS track logs (GPX) and assigns positions to
//! time-stamped items, such as photos, by matching their timestamps against
//! the recorded track points.
//!
//! # Architecture
//!
//! - **[`GeoCoordinates`] / [`TrackPoint`]**: Immutable position and sample values
//! - **[`TrackReader`]**: Parses one GPX file into a time-sorted [`Track`]
//! - **[`TrackManager`]**: Loads files in parallel, assigns ids and colors
//! - **[`correlate_items`]**: The matching algorithm (binary search per track,
//!   optional linear interpolation)
//! - **[`TrackCorrelator`]**: Runs a correlation on a worker thread with
//!   batched results and cooperative cancellation
//!
//! # Performance Characteristics
//!
//! - **Load**: O(N log N) per file for sorting, files read in parallel
//! - **Correlation**: O(T log N) per item where T = visible tracks

mod coordinates;
mod correlator;
mod manager;
mod point;
mod reader;
pub mod time;
mod track;
mod worker;

// Public API exports
pub use coordinates::{EARTH_RADIUS_M, GeoCoordinates, is_valid_lat_lon};
pub use correlator::{
    Correlation, CorrelationFlags, CorrelationOptions, CorrelationSummary,
    DEFAULT_INTERPOLATION_DST_TIME, DEFAULT_MAX_GAP_TIME, correlate_item, correlate_items,
};
pub use manager::{ManagerInfo, PALETTE_SIZE, TrackChange, TrackManager, TrackManagerEvent};
pub use point::{FixType, TrackPoint};
pub use reader::{ReadError, TrackReadResult, TrackReader};
pub use track::{Track, TrackColor, TrackId};
pub use worker::{
    CancellationToken, CorrelatorEvent, CorrelatorState, DEFAULT_BATCH_SIZE, TrackCorrelator,
};

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    #[error("Invalid coordinates: latitude {lat}, longitude {lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("Track files are already being loaded")]
    LoadInProgress,

    #[error("A correlation is already running")]
    CorrelationRunning,

    #[error("Could not start correlator thread: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TrackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that all public types are accessible
        let _: fn() -> TrackManager = TrackManager::new;
        let _: fn() -> TrackCorrelator = TrackCorrelator::new;
        let _: fn() -> CorrelationOptions = CorrelationOptions::default;
    }

    #[test]
    fn test_error_messages() {
        let err = GeoCoordinates::new(100.0, 0.0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid coordinates: latitude 100, longitude 0"
        );
        assert_eq!(
            TrackError::LoadInProgress.to_string(),
            "Track files are already being loaded"
        );
    }
}
