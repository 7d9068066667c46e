//! Background correlation runs
//!
//! [`TrackCorrelator`] runs the correlation of one item list on a dedicated
//! thread. Results come back as [`CorrelatorEvent`]s over an unbounded
//! channel, in the order the batches were produced. Every run ends with
//! exactly one terminal event: `AllItemsCorrelated` or `CorrelationCanceled`.

use crate::correlator::correlate_item;
use crate::{Correlation, CorrelationOptions, Result, Track, TrackError, TrackManager};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Default number of items per result batch
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Notifications sent by a correlation run
#[derive(Clone, Debug, PartialEq)]
pub enum CorrelatorEvent<T> {
    /// A batch of processed items, correlated or not
    ItemsCorrelated(Vec<Correlation<T>>),
    /// All items were processed
    AllItemsCorrelated,
    /// The run stopped early on request
    CorrelationCanceled,
}

impl<T> CorrelatorEvent<T> {
    /// Whether this event ends the run
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::ItemsCorrelated(_))
    }
}

/// Lifecycle of a [`TrackCorrelator`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CorrelatorState {
    Idle,
    Running,
    Completed,
    Canceled,
}

/// Cooperative cancellation flag shared with the worker thread
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Runs correlations off the calling thread
pub struct TrackCorrelator {
    batch_size: usize,
    state: Arc<Mutex<CorrelatorState>>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl Default for TrackCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackCorrelator {
    pub fn new() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            state: Arc::new(Mutex::new(CorrelatorState::Idle)),
            cancel: CancellationToken::default(),
            worker: None,
        }
    }

    /// Number of items delivered per `ItemsCorrelated` event (at least 1)
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn state(&self) -> CorrelatorState {
        *lock_state(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.state() == CorrelatorState::Running
    }

    /// Start correlating `items` against the tracks currently held by
    /// `manager`. The tracks are snapshotted; later changes to the manager do
    /// not affect this run.
    pub fn correlate<T: Send + 'static>(
        &mut self,
        manager: &TrackManager,
        items: Vec<Correlation<T>>,
        options: CorrelationOptions,
    ) -> Result<UnboundedReceiver<CorrelatorEvent<T>>> {
        self.correlate_tracks(manager.get_track_list(), items, options)
    }

    /// Start correlating `items` against an explicit track snapshot
    pub fn correlate_tracks<T: Send + 'static>(
        &mut self,
        tracks: Vec<Track>,
        items: Vec<Correlation<T>>,
        options: CorrelationOptions,
    ) -> Result<UnboundedReceiver<CorrelatorEvent<T>>> {
        {
            let mut state = lock_state(&self.state);
            if *state == CorrelatorState::Running {
                return Err(TrackError::CorrelationRunning);
            }
            *state = CorrelatorState::Running;
        }
        // The previous worker has already sent its terminal event
        self.join_worker();

        let (sender, receiver) = unbounded_channel();
        let cancel = CancellationToken::default();
        self.cancel = cancel.clone();

        tracing::info!(
            "Correlating {} items against {} tracks",
            items.len(),
            tracks.len()
        );

        let run = CorrelationRun {
            tracks,
            items,
            options,
            batch_size: self.batch_size,
            cancel,
            state: self.state.clone(),
            sender,
        };

        let spawned = std::thread::Builder::new()
            .name("track-correlator".to_string())
            .spawn(move || run.execute());

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(receiver)
            }
            Err(e) => {
                *lock_state(&self.state) = CorrelatorState::Idle;
                Err(TrackError::Spawn(e))
            }
        }
    }

    /// Ask the running worker to stop after its current batch. Does nothing
    /// when no run is active.
    pub fn cancel_correlation(&self) {
        if self.is_running() {
            tracing::debug!("Correlation cancel requested");
            self.cancel.cancel();
        }
    }

    /// Block until the current worker thread has exited
    pub fn wait(&mut self) {
        self.join_worker();
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::warn!("Correlator worker thread panicked");
            }
        }
    }
}

impl Drop for TrackCorrelator {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.join_worker();
    }
}

/// Everything a worker thread needs, moved into it at start
struct CorrelationRun<T> {
    tracks: Vec<Track>,
    items: Vec<Correlation<T>>,
    options: CorrelationOptions,
    batch_size: usize,
    cancel: CancellationToken,
    state: Arc<Mutex<CorrelatorState>>,
    sender: UnboundedSender<CorrelatorEvent<T>>,
}

impl<T: Send + 'static> CorrelationRun<T> {
    fn execute(self) {
        profiling::register_thread!("track-correlator");

        let CorrelationRun {
            tracks,
            items,
            options,
            batch_size,
            cancel,
            state,
            sender,
        } = self;

        let total = items.len();
        let mut done = 0usize;
        let mut items = items.into_iter();

        loop {
            if cancel.is_canceled() {
                tracing::info!("Correlation canceled after {done} of {total} items");
                finish(&state, &sender, CorrelatorState::Canceled);
                return;
            }

            let batch: Vec<Correlation<T>> = {
                #[cfg(feature = "profiling")]
                profiling::scope!("worker::batch");

                items
                    .by_ref()
                    .take(batch_size)
                    .map(|item| correlate_item(&tracks, item, &options))
                    .collect()
            };
            if batch.is_empty() {
                break;
            }

            done += batch.len();
            tracing::debug!("Correlated {done} of {total} items");

            if sender.send(CorrelatorEvent::ItemsCorrelated(batch)).is_err() {
                tracing::debug!("Correlation receiver dropped, stopping");
                *lock_state(&state) = CorrelatorState::Canceled;
                return;
            }
        }

        finish(&state, &sender, CorrelatorState::Completed);
    }
}

/// Record the terminal state, then announce it
fn finish<T>(
    state: &Mutex<CorrelatorState>,
    sender: &UnboundedSender<CorrelatorEvent<T>>,
    terminal: CorrelatorState,
) {
    *lock_state(state) = terminal;
    let event = match terminal {
        CorrelatorState::Canceled => CorrelatorEvent::CorrelationCanceled,
        _ => CorrelatorEvent::AllItemsCorrelated,
    };
    // A dropped receiver means nobody is waiting for the result
    let _ = sender.send(event);
}

fn lock_state(state: &Mutex<CorrelatorState>) -> MutexGuard<'_, CorrelatorState> {
    state.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Correlator state mutex poisoned; recovering");
        poisoned.into_inner()
    })
}
