use gps_track_lib::{
    Correlation, CorrelationSummary, CorrelatorEvent, TrackCorrelator, TrackError, TrackManager,
    TrackManagerEvent,
};
use settings::Settings;
use std::path::PathBuf;
use std::process::ExitCode;

mod input;
mod logging;
mod output;
mod settings;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid timestamp in {source_name} (line {line}): '{value}'")]
    InvalidTimestamp {
        source_name: String,
        line: usize,
        value: String,
    },

    #[error("No items to correlate, use --time or --items")]
    NoItems,

    #[error("None of the track files could be loaded")]
    NoTracks,

    #[error("Correlation was canceled")]
    Canceled,

    #[error(transparent)]
    Track(#[from] TrackError),

    #[error("Could not encode results: {0}")]
    Json(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    logging::setup_logging();
    let settings = Settings::from_cli();

    match run(&settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(settings: &Settings) -> Result<(), CliError> {
    let items = input::collect_items(settings)?;

    let mut manager = TrackManager::new();
    let mut manager_events = manager.subscribe();
    manager.load_track_files(settings.tracks.clone())?;
    manager.wait_for_load();
    while let Ok(event) = manager_events.try_recv() {
        if let TrackManagerEvent::TrackFilesReady { range } = event {
            tracing::debug!("Track files {:?} ready", range);
        }
    }

    let load_errors = manager.read_load_errors();
    for (path, message) in &load_errors {
        tracing::warn!("Skipping {}: {}", path.display(), message);
    }
    for track in manager.tracks() {
        let span = track
            .time_span()
            .map(|(start, end)| format!("{start} .. {end}"))
            .unwrap_or_default();
        tracing::info!(
            "Track {} {}: {} points, {:.1} km, {}",
            track.id,
            track.url.display(),
            track.len(),
            track.total_distance() / 1000.0,
            span
        );
    }
    if manager.is_empty() {
        return Err(CliError::NoTracks);
    }

    let results = correlate(settings, &manager, items)?;

    if settings.json {
        let info = manager.get_info();
        println!("{}", output::to_json(&info, &load_errors, &results)?);
    } else {
        for result in &results {
            println!("{}", output::format_result(result));
        }
        let summary = CorrelationSummary::from_results(&results);
        println!("{}", output::format_summary(&summary));
    }
    Ok(())
}

/// Run the correlator thread and collect its batches in item order
fn correlate(
    settings: &Settings,
    manager: &TrackManager,
    items: Vec<Correlation<String>>,
) -> Result<Vec<Correlation<String>>, CliError> {
    let total = items.len();
    let mut correlator = TrackCorrelator::new().with_batch_size(settings.batch_size);
    let mut events = correlator.correlate(manager, items, settings.correlation_options())?;

    let mut results = Vec::with_capacity(total);
    while let Some(event) = events.blocking_recv() {
        match event {
            CorrelatorEvent::ItemsCorrelated(batch) => {
                results.extend(batch);
                tracing::debug!("Correlated {}/{} items", results.len(), total);
            }
            CorrelatorEvent::AllItemsCorrelated => break,
            CorrelatorEvent::CorrelationCanceled => return Err(CliError::Canceled),
        }
    }
    correlator.wait();
    Ok(results)
}
