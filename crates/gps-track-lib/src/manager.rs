//! TrackManager - owner of all loaded tracks
//!
//! Loads track files on the rayon pool, assigns ids and display colors, and
//! keeps the drainable list of files that failed to load. Reader tasks only
//! produce [`TrackReadResult`]s; the manager itself commits them, on the
//! thread that owns it, via [`TrackManager::process_loaded`] or
//! [`TrackManager::wait_for_load`].

use crate::reader::{ReadError, TrackReadResult, TrackReader};
use crate::{GeoCoordinates, Result, Track, TrackColor, TrackError, TrackId};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::ops::Range;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Number of distinct track colors handed out before colors repeat
pub const PALETTE_SIZE: usize = 8;

/// What happened to a track
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackChange {
    Added,
    Removed,
    VisibilityChanged,
}

/// Notifications sent to subscribers of a [`TrackManager`]
#[derive(Clone, Debug, PartialEq)]
pub enum TrackManagerEvent {
    /// Files with these indices in the current load request were committed
    TrackFilesReady { range: Range<usize> },
    /// The current load request is complete
    AllTrackFilesReady,
    TracksChanged(Vec<(TrackId, TrackChange)>),
    /// The global track visibility flag changed
    VisibilityChanged(bool),
}

/// Summary of the loaded tracks
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ManagerInfo {
    pub track_count: usize,
    pub total_points: usize,
    pub total_distance_meters: f64,
}

/// A load request whose reader tasks may still be running
struct PendingLoad {
    urls: Vec<PathBuf>,
    receiver: mpsc::Receiver<(usize, TrackReadResult)>,
    /// Results that arrived ahead of an earlier, still running file
    finished: BTreeMap<usize, TrackReadResult>,
    /// Number of leading results already committed
    committed: usize,
}

impl PendingLoad {
    fn is_done(&self) -> bool {
        self.committed == self.urls.len()
    }

    /// Fill in results that will never arrive because the reader tasks are gone
    fn mark_interrupted(&mut self) {
        for (index, url) in self.urls.iter().enumerate().skip(self.committed) {
            self.finished
                .entry(index)
                .or_insert_with(|| TrackReadResult {
                    url: url.clone(),
                    outcome: Err(ReadError::Interrupted),
                });
        }
    }
}

/// Owner of the loaded tracks of a session
pub struct TrackManager {
    /// Ids grow monotonically, so key order is insertion order
    tracks: BTreeMap<TrackId, Track>,
    next_track_id: u64,
    next_color_index: usize,
    palette: [TrackColor; PALETTE_SIZE],
    visibility: bool,
    load_errors: Vec<(PathBuf, String)>,
    loading: Option<PendingLoad>,
    subscribers: Vec<UnboundedSender<TrackManagerEvent>>,
}

impl Default for TrackManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TrackManager {
    pub fn new() -> Self {
        Self {
            tracks: BTreeMap::new(),
            next_track_id: 1,
            next_color_index: 0,
            palette: std::array::from_fn(|i| {
                // Golden angle spacing keeps neighbouring colors apart
                TrackColor::from_hsv(i as f32 * 137.508, 0.7, 0.9)
            }),
            visibility: true,
            load_errors: Vec::new(),
            loading: None,
            subscribers: Vec::new(),
        }
    }

    /// Receive all future notifications of this manager
    pub fn subscribe(&mut self) -> UnboundedReceiver<TrackManagerEvent> {
        let (sender, receiver) = unbounded_channel();
        self.subscribers.push(sender);
        receiver
    }

    fn emit(&mut self, event: TrackManagerEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Start reading `urls` in parallel.
    ///
    /// Returns immediately. Finished files are committed by
    /// [`process_loaded`](Self::process_loaded) or
    /// [`wait_for_load`](Self::wait_for_load), in the order of `urls`.
    pub fn load_track_files(&mut self, urls: Vec<PathBuf>) -> Result<()> {
        #[cfg(feature = "profiling")]
        profiling::scope!("manager::load_track_files");

        if self.loading.is_some() {
            return Err(TrackError::LoadInProgress);
        }

        tracing::info!("Loading {} track files", urls.len());
        if urls.is_empty() {
            self.emit(TrackManagerEvent::AllTrackFilesReady);
            return Ok(());
        }

        self.start_load(urls, |url: &Path| TrackReader::load_track_file(url));
        Ok(())
    }

    /// Spawn the reader tasks for a non-empty request. A reader that panics
    /// produces a [`ReadError::Interrupted`] result for its file.
    fn start_load(&mut self, urls: Vec<PathBuf>, read: fn(&Path) -> TrackReadResult) {
        let (sender, receiver) = mpsc::channel();
        let jobs = urls.clone();
        rayon::spawn(move || {
            jobs.into_par_iter()
                .enumerate()
                .for_each_with(sender, |sender, (index, url)| {
                    let result = panic::catch_unwind(|| read(&url)).unwrap_or_else(|_| {
                        tracing::error!("Reading track file {} panicked", url.display());
                        TrackReadResult {
                            url: url.clone(),
                            outcome: Err(ReadError::Interrupted),
                        }
                    });
                    // The manager may have been dropped meanwhile
                    let _ = sender.send((index, result));
                });
        });

        self.loading = Some(PendingLoad {
            urls,
            receiver,
            finished: BTreeMap::new(),
            committed: 0,
        });
    }

    /// Whether a load request has not been fully committed yet
    pub fn is_loading(&self) -> bool {
        self.loading.is_some()
    }

    /// Commit whatever files have finished reading, without blocking.
    /// Returns the number of files committed.
    pub fn process_loaded(&mut self) -> usize {
        self.drain_loaded(false)
    }

    /// Block until the current load request is complete.
    /// Returns the number of files committed.
    pub fn wait_for_load(&mut self) -> usize {
        self.drain_loaded(true)
    }

    fn drain_loaded(&mut self, block: bool) -> usize {
        let Some(mut pending) = self.loading.take() else {
            return 0;
        };

        let mut committed = 0;
        loop {
            let received = if block {
                pending
                    .receiver
                    .recv()
                    .map_err(|_| mpsc::TryRecvError::Disconnected)
            } else {
                pending.receiver.try_recv()
            };

            match received {
                Ok((index, result)) => {
                    pending.finished.insert(index, result);
                }
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    // Results are committed as soon as they are contiguous, so
                    // reaching this point means some never arrived
                    tracing::warn!("Track reader tasks stopped before all files were read");
                    pending.mark_interrupted();
                    committed += self.commit_ready(&mut pending);
                    break;
                }
            }

            committed += self.commit_ready(&mut pending);
            if pending.is_done() {
                break;
            }
        }

        if pending.is_done() {
            tracing::info!(
                "Finished loading {} track files, {} tracks loaded",
                pending.urls.len(),
                self.tracks.len()
            );
            self.emit(TrackManagerEvent::AllTrackFilesReady);
        } else {
            self.loading = Some(pending);
        }

        committed
    }

    /// Commit the contiguous run of finished results following the last
    /// committed one
    fn commit_ready(&mut self, pending: &mut PendingLoad) -> usize {
        let start = pending.committed;
        let mut changes = Vec::new();

        while let Some(result) = pending.finished.remove(&pending.committed) {
            match result.outcome {
                Ok(track) => changes.push((self.add_track(track), TrackChange::Added)),
                Err(e) => self.load_errors.push((result.url, e.to_string())),
            }
            pending.committed += 1;
        }

        let end = pending.committed;
        if !changes.is_empty() {
            self.emit(TrackManagerEvent::TracksChanged(changes));
        }
        if end > start {
            self.emit(TrackManagerEvent::TrackFilesReady { range: start..end });
        }
        end - start
    }

    /// Take ownership of `track`, giving it a fresh id and color.
    ///
    /// Subscribers are not notified; the load path batches its own
    /// `TracksChanged` event. Use [`insert_track`](Self::insert_track) for a
    /// notifying variant.
    fn add_track(&mut self, mut track: Track) -> TrackId {
        let id = TrackId(self.next_track_id);
        self.next_track_id += 1;

        track.id = id;
        track.color = self.next_color();
        track.visible = true;
        self.tracks.insert(id, track);
        id
    }

    /// Add an already built track (for example one created in memory)
    pub fn insert_track(&mut self, track: Track) -> TrackId {
        let id = self.add_track(track);
        self.emit(TrackManagerEvent::TracksChanged(vec![(id, TrackChange::Added)]));
        id
    }

    /// Pick the next palette color, skipping colors held by current tracks
    /// while unused ones remain
    fn next_color(&mut self) -> TrackColor {
        let start = self.next_color_index;
        let index = (0..PALETTE_SIZE)
            .map(|offset| (start + offset) % PALETTE_SIZE)
            .find(|&i| !self.tracks.values().any(|t| t.color == self.palette[i]))
            .unwrap_or(start);

        self.next_color_index = (index + 1) % PALETTE_SIZE;
        self.palette[index]
    }

    /// Remove and return the files that failed to load since the last call
    pub fn read_load_errors(&mut self) -> Vec<(PathBuf, String)> {
        std::mem::take(&mut self.load_errors)
    }

    /// Remove one track. Its id is never handed out again.
    pub fn remove_track(&mut self, id: TrackId) -> Option<Track> {
        let track = self.tracks.remove(&id)?;
        self.emit(TrackManagerEvent::TracksChanged(vec![(id, TrackChange::Removed)]));
        Some(track)
    }

    /// Remove all tracks. Id assignment continues where it left off.
    pub fn clear(&mut self) {
        if self.tracks.is_empty() {
            return;
        }
        let changes = self
            .tracks
            .keys()
            .map(|id| (*id, TrackChange::Removed))
            .collect();
        self.tracks.clear();
        self.emit(TrackManagerEvent::TracksChanged(changes));
    }

    /// Number of loaded tracks
    #[inline]
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Track at `index` in load order
    pub fn get_track(&self, index: usize) -> Option<&Track> {
        self.tracks.values().nth(index)
    }

    #[inline]
    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    /// Copy of the track with `id`, or an empty track with id 0 when unknown
    pub fn get_track_by_id(&self, id: TrackId) -> Track {
        self.track(id).cloned().unwrap_or_default()
    }

    /// Snapshot of all tracks in load order. Points are shared, not copied.
    pub fn get_track_list(&self) -> Vec<Track> {
        self.tracks.values().cloned().collect()
    }

    /// All tracks in load order
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    /// Positions of every track, for drawing them
    pub fn get_track_coordinates(&self) -> Vec<Vec<GeoCoordinates>> {
        self.tracks.values().map(Track::coordinates).collect()
    }

    /// Show or hide one track. Returns false for unknown ids.
    pub fn set_track_visibility(&mut self, id: TrackId, visible: bool) -> bool {
        let Some(track) = self.tracks.get_mut(&id) else {
            return false;
        };
        if track.visible != visible {
            track.visible = visible;
            self.emit(TrackManagerEvent::TracksChanged(vec![(
                id,
                TrackChange::VisibilityChanged,
            )]));
        }
        true
    }

    /// Global visibility of all tracks. A track is drawn when both this and
    /// its own flag are set.
    #[inline]
    pub fn visibility(&self) -> bool {
        self.visibility
    }

    pub fn set_visibility(&mut self, visibility: bool) {
        if self.visibility != visibility {
            self.visibility = visibility;
            self.emit(TrackManagerEvent::VisibilityChanged(visibility));
        }
    }

    pub fn get_info(&self) -> ManagerInfo {
        ManagerInfo {
            track_count: self.tracks.len(),
            total_points: self.tracks.values().map(Track::len).sum(),
            total_distance_meters: self.tracks.values().map(Track::total_distance).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrackPoint;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FILE_COUNTER: AtomicUsize = AtomicUsize::new(0);

    /// Write a small valid track file with `points` samples
    fn write_track_file(points: usize) -> PathBuf {
        let body: String = (0..points)
            .map(|i| {
                format!(
                    r#"<trkpt lat="{}" lon="13.4"><time>2015-03-01T08:{:02}:00Z</time></trkpt>"#,
                    52.0 + i as f64 * 0.001,
                    i % 60
                )
            })
            .collect();
        write_file(&format!(
            r#"<?xml version="1.0"?><gpx version="1.1"><trk><trkseg>{body}</trkseg></trk></gpx>"#
        ))
    }

    fn write_file(contents: &str) -> PathBuf {
        let n = FILE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "gps-track-manager-{}-{}.gpx",
            std::process::id(),
            n
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn memory_track(lat: f64) -> Track {
        let t0 = Utc.with_ymd_and_hms(2015, 3, 1, 8, 0, 0).unwrap();
        Track::from_points(
            "memory.gpx",
            vec![
                TrackPoint::new(t0, GeoCoordinates::new(lat, 0.0).unwrap()),
                TrackPoint::new(
                    t0 + Duration::seconds(60),
                    GeoCoordinates::new(lat, 0.01).unwrap(),
                ),
            ],
        )
    }

    fn drain(receiver: &mut UnboundedReceiver<TrackManagerEvent>) -> Vec<TrackManagerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_one_bad_file_does_not_abort_the_batch() {
        let good1 = write_track_file(3);
        let bad = write_file("");
        let good2 = write_track_file(5);

        let mut manager = TrackManager::new();
        manager
            .load_track_files(vec![good1.clone(), bad.clone(), good2.clone()])
            .unwrap();
        manager.wait_for_load();

        assert!(!manager.is_loading());
        assert_eq!(manager.track_count(), 2);

        let ids: Vec<TrackId> = manager.tracks().map(|t| t.id).collect();
        assert!(ids.iter().all(|id| id.is_valid()));
        assert_ne!(ids[0], ids[1]);
        assert_eq!(manager.get_track(0).unwrap().url, good1);
        assert_eq!(manager.get_track(1).unwrap().url, good2);

        let errors = manager.read_load_errors();
        assert_eq!(errors, vec![(bad.clone(), "File is empty.".to_string())]);
        // Draining empties the list
        assert!(manager.read_load_errors().is_empty());

        for path in [good1, bad, good2] {
            std::fs::remove_file(path).unwrap();
        }
    }

    #[test]
    fn test_reader_panic_is_recorded_as_interrupted() {
        let good = write_track_file(2);

        let mut manager = TrackManager::new();
        manager.start_load(
            vec![PathBuf::from("explodes.gpx"), good.clone()],
            |url: &Path| {
                if url.ends_with("explodes.gpx") {
                    panic!("reader failure");
                }
                TrackReader::load_track_file(url)
            },
        );
        manager.wait_for_load();

        assert!(!manager.is_loading());
        assert_eq!(manager.track_count(), 1);
        assert_eq!(manager.get_track(0).unwrap().url, good);
        assert_eq!(
            manager.read_load_errors(),
            vec![(PathBuf::from("explodes.gpx"), "Loading was interrupted.".to_string())]
        );
        std::fs::remove_file(good).unwrap();
    }

    #[test]
    fn test_loaded_tracks_are_sorted() {
        let path = write_file(
            r#"<gpx><trk><trkseg>
                <trkpt lat="1" lon="1"><time>2015-03-01T08:02:00Z</time></trkpt>
                <trkpt lat="2" lon="2"><time>2015-03-01T08:00:00Z</time></trkpt>
                <trkpt lat="3" lon="3"><time>2015-03-01T08:01:00Z</time></trkpt>
            </trkseg></trk></gpx>"#,
        );

        let mut manager = TrackManager::new();
        manager.load_track_files(vec![path.clone()]).unwrap();
        manager.wait_for_load();

        for track in manager.tracks() {
            assert!(track.points().windows(2).all(|w| w[0].date_time <= w[1].date_time));
        }
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_load_events() {
        let files: Vec<PathBuf> = (0..4).map(|i| write_track_file(i + 1)).collect();

        let mut manager = TrackManager::new();
        let mut receiver = manager.subscribe();
        manager.load_track_files(files.clone()).unwrap();
        assert!(matches!(
            manager.load_track_files(files.clone()),
            Err(TrackError::LoadInProgress)
        ));
        assert_eq!(manager.wait_for_load(), 4);

        let events = drain(&mut receiver);
        assert_eq!(events.last(), Some(&TrackManagerEvent::AllTrackFilesReady));

        // Ready ranges are contiguous and cover every file once
        let mut next = 0;
        let mut added = 0;
        for event in &events {
            match event {
                TrackManagerEvent::TrackFilesReady { range } => {
                    assert_eq!(range.start, next);
                    next = range.end;
                }
                TrackManagerEvent::TracksChanged(changes) => {
                    added += changes.iter().filter(|(_, c)| *c == TrackChange::Added).count();
                }
                _ => {}
            }
        }
        assert_eq!(next, 4);
        assert_eq!(added, 4);

        for path in files {
            std::fs::remove_file(path).unwrap();
        }
    }

    #[test]
    fn test_process_loaded_eventually_completes() {
        let path = write_track_file(2);
        let mut manager = TrackManager::new();
        manager.load_track_files(vec![path.clone()]).unwrap();

        while manager.is_loading() {
            manager.process_loaded();
            std::thread::yield_now();
        }
        assert_eq!(manager.track_count(), 1);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_empty_request_completes_immediately() {
        let mut manager = TrackManager::new();
        let mut receiver = manager.subscribe();
        manager.load_track_files(Vec::new()).unwrap();
        assert!(!manager.is_loading());
        assert_eq!(drain(&mut receiver), vec![TrackManagerEvent::AllTrackFilesReady]);
    }

    #[test]
    fn test_ids_not_reused_after_clear() {
        let mut manager = TrackManager::new();
        let first = manager.insert_track(memory_track(1.0));
        let second = manager.insert_track(memory_track(2.0));
        manager.clear();
        assert!(manager.is_empty());

        let third = manager.insert_track(memory_track(3.0));
        let ids: HashSet<TrackId> = [first, second, third].into_iter().collect();
        assert_eq!(ids.len(), 3);
        assert!(third > second);
        assert!(!manager.get_track_by_id(first).id.is_valid());
    }

    #[test]
    fn test_sentinel_for_unknown_id() {
        let manager = TrackManager::new();
        let track = manager.get_track_by_id(TrackId(42));
        assert_eq!(track.id, TrackId::INVALID);
        assert!(track.points().is_empty());
        assert!(manager.track(TrackId(42)).is_none());
    }

    #[test]
    fn test_colors() {
        let mut manager = TrackManager::new();
        let ids: Vec<TrackId> = (0..PALETTE_SIZE)
            .map(|i| manager.insert_track(memory_track(i as f64)))
            .collect();

        let colors: HashSet<TrackColor> = ids
            .iter()
            .map(|id| manager.track(*id).unwrap().color)
            .collect();
        assert_eq!(colors.len(), PALETTE_SIZE);
        assert!(!colors.contains(&TrackColor::BLACK));

        // Palette exhausted: adjacent tracks still differ
        let a = manager.insert_track(memory_track(10.0));
        let b = manager.insert_track(memory_track(11.0));
        assert_ne!(manager.track(a).unwrap().color, manager.track(b).unwrap().color);

        // A freed color is reused before repeating one in use
        let freed = manager.track(ids[3]).unwrap().color;
        manager.remove_track(ids[3]);
        manager.remove_track(a);
        manager.remove_track(b);
        let c = manager.insert_track(memory_track(12.0));
        let c_color = manager.track(c).unwrap().color;
        assert!(
            manager
                .tracks()
                .filter(|t| t.id != c)
                .all(|t| t.color != c_color)
        );
        assert_eq!(c_color, freed);
    }

    #[test]
    fn test_visibility() {
        let mut manager = TrackManager::new();
        let mut receiver = manager.subscribe();
        let id = manager.insert_track(memory_track(1.0));
        drain(&mut receiver);

        assert!(manager.set_track_visibility(id, false));
        assert!(!manager.track(id).unwrap().visible);
        assert!(!manager.set_track_visibility(TrackId(999), false));

        manager.set_visibility(false);
        assert!(!manager.visibility());
        // Global visibility does not touch the per-track flag
        manager.set_visibility(true);

        assert_eq!(
            drain(&mut receiver),
            vec![
                TrackManagerEvent::TracksChanged(vec![(id, TrackChange::VisibilityChanged)]),
                TrackManagerEvent::VisibilityChanged(false),
                TrackManagerEvent::VisibilityChanged(true),
            ]
        );
        assert!(!manager.track(id).unwrap().visible);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut manager = TrackManager::new();
        let id = manager.insert_track(memory_track(1.0));
        let snapshot = manager.get_track_list();

        manager.set_track_visibility(id, false);
        manager.clear();

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].visible);
        assert_eq!(snapshot[0].len(), 2);
    }

    #[test]
    fn test_info_and_coordinates() {
        let mut manager = TrackManager::new();
        manager.insert_track(memory_track(1.0));
        manager.insert_track(memory_track(2.0));

        let info = manager.get_info();
        assert_eq!(info.track_count, 2);
        assert_eq!(info.total_points, 4);
        assert!(info.total_distance_meters > 0.0);

        let coordinates = manager.get_track_coordinates();
        assert_eq!(coordinates.len(), 2);
        assert_eq!(coordinates[1][0].lat(), 2.0);
    }
}
