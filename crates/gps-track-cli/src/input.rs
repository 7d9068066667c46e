//! Items to correlate, taken from the command line and from an item file

use crate::CliError;
use crate::settings::Settings;
use gps_track_lib::Correlation;
use gps_track_lib::time::parse_time;
use std::path::Path;

/// Collect the items of a run. Command line timestamps come first, then the
/// lines of the item file, in order.
pub fn collect_items(settings: &Settings) -> Result<Vec<Correlation<String>>, CliError> {
    let mut items = Vec::with_capacity(settings.times.len());
    for value in &settings.times {
        items.push(parse_item(value).ok_or_else(|| CliError::InvalidTimestamp {
            source_name: "--time".to_string(),
            line: 0,
            value: value.clone(),
        })?);
    }

    if let Some(path) = &settings.items {
        items.extend(read_item_file(path)?);
    }

    if items.is_empty() {
        return Err(CliError::NoItems);
    }
    Ok(items)
}

fn read_item_file(path: &Path) -> Result<Vec<Correlation<String>>, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_item_lines(&path.display().to_string(), &text)
}

/// Parse item lines; blank lines and lines starting with `#` are skipped
fn parse_item_lines(source_name: &str, text: &str) -> Result<Vec<Correlation<String>>, CliError> {
    let mut items = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let item = parse_item(line).ok_or_else(|| CliError::InvalidTimestamp {
            source_name: source_name.to_string(),
            line: index + 1,
            value: line.to_string(),
        })?;
        items.push(item);
    }
    tracing::debug!("Read {} items from {}", items.len(), source_name);
    Ok(items)
}

/// `label,timestamp` or a bare timestamp, which then doubles as the label
fn parse_item(value: &str) -> Option<Correlation<String>> {
    let (label, timestamp) = match value.rsplit_once(',') {
        Some((label, timestamp)) => (label.trim(), timestamp.trim()),
        None => (value.trim(), value.trim()),
    };
    let date_time = parse_time(timestamp)?;
    Some(Correlation::new(date_time, label.to_string()))
}
