//! Background prefetcher
//!
//! Populates the frame store ahead of the user. Two policies share one
//! concurrency limit:
//!
//! - windowed: after each navigation, fetch the uncached neighbours of the
//!   current frame
//! - bulk: on video load, sweep the whole frame range in batches, reporting
//!   progress after each batch
//!
//! Windowed top-ups are suppressed while a sweep runs. Prefetch failures are
//! logged at debug level and otherwise dropped; they are never retried.

use crate::cancel::{CancellationRegistry, CancellationToken};
use crate::source::{fetch_with_token, FetchError, FrameSource};
use crate::window::PrefetchWindow;
use frame_annotator_cache::{FrameIndex, FrameStore, SetOutcome};
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Bulk sweep progress, reported after every batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchProgress {
    pub completed: u32,
    pub total: u32,
}

impl PrefetchProgress {
    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}

pub type ProgressObserver = Arc<dyn Fn(PrefetchProgress) + Send + Sync>;

/// Prefetch statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchStats {
    /// Fetches started
    pub scheduled: u64,

    /// Fetches whose payload landed in the store
    pub stored: u64,

    /// Fetches that failed for a reason other than cancellation
    pub failed: u64,

    /// Fetches dropped because they were cancelled
    pub cancelled: u64,

    /// Fetched frames not stored because the only room was the current frame's
    pub skipped: u64,
}

struct Sweep {
    id: u64,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Best-effort background fetcher
pub struct Prefetcher<S: FrameSource + ?Sized> {
    source: Arc<S>,
    store: Arc<FrameStore>,
    window: PrefetchWindow,
    in_flight: CancellationRegistry<FrameIndex>,
    sweep: Mutex<Option<Sweep>>,
    next_sweep: AtomicU64,
    /// Held while writing to the store and while cancelling, so no write
    /// lands after `cancel_all` returns
    commit: Mutex<()>,
    permits: Semaphore,
    progress: Mutex<Option<ProgressObserver>>,
    stats: Mutex<PrefetchStats>,
}

impl<S: FrameSource + ?Sized> Prefetcher<S> {
    /// Create a prefetcher running at most `max_concurrency` fetches at once
    pub fn new(
        source: Arc<S>,
        store: Arc<FrameStore>,
        window: PrefetchWindow,
        max_concurrency: usize,
    ) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            source,
            store,
            window,
            in_flight: CancellationRegistry::new(),
            sweep: Mutex::new(None),
            next_sweep: AtomicU64::new(1),
            commit: Mutex::new(()),
            permits: Semaphore::new(max_concurrency),
            progress: Mutex::new(None),
            stats: Mutex::new(PrefetchStats::default()),
        }
    }

    /// The observer runs while background writes are held off, so it must not
    /// call back into the prefetcher.
    pub fn set_progress_observer(&self, observer: ProgressObserver) {
        *self.progress.lock() = Some(observer);
    }

    pub fn stats(&self) -> PrefetchStats {
        *self.stats.lock()
    }

    /// Number of windowed fetches currently registered
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Schedule fetches for the uncached neighbours of `center`
    ///
    /// Windowed fetches for frames that fell out of the window are cancelled.
    /// Frames already cached or already being fetched are skipped. Does
    /// nothing while a bulk sweep is active.
    ///
    /// Returns the number of fetches scheduled. Must be called from within a
    /// tokio runtime.
    pub fn top_up(self: &Arc<Self>, center: FrameIndex, total_frames: u32) -> usize {
        if self.is_sweeping() {
            tracing::trace!(frame = center, "windowed prefetch suppressed by sweep");
            return 0;
        }

        let window = self.window;
        let retargeted = self
            .in_flight
            .cancel_where(|&frame| !window.contains(center, frame));
        if retargeted > 0 {
            tracing::debug!(
                count = retargeted,
                frame = center,
                "cancelled out-of-window prefetches"
            );
        }

        let mut scheduled = 0;
        for index in window.candidates(center, total_frames) {
            if self.store.has(index) {
                continue;
            }
            let Some(token) = self.in_flight.try_register(index) else {
                continue;
            };

            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.prefetch_one(index, &token).await;
                this.in_flight.unregister(&index, &token);
            });
            scheduled += 1;
        }

        if scheduled > 0 {
            tracing::debug!(frame = center, scheduled, "windowed prefetch scheduled");
        }
        scheduled
    }

    /// Start sweeping `[0, total_frames)` in batches of `batch_width`
    ///
    /// A sweep already running is halted first. Windowed fetches in flight
    /// are cancelled since the sweep covers their frames. Must be called from
    /// within a tokio runtime.
    pub fn start_sweep(self: &Arc<Self>, total_frames: u32, batch_width: usize) {
        self.halt_sweep();
        self.in_flight.cancel_all();

        let id = self.next_sweep.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        *self.sweep.lock() = Some(Sweep {
            id,
            token: token.clone(),
            handle: None,
        });

        tracing::info!(total_frames, batch_width, "starting bulk preload");
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.run_sweep(total_frames, batch_width.max(1), &token).await;
            let mut sweep = this.sweep.lock();
            if sweep.as_ref().is_some_and(|s| s.id == id) {
                *sweep = None;
            }
        });

        // The task clears its own slot when it finishes; only attach the
        // handle if that has not happened yet.
        if let Some(sweep) = self.sweep.lock().as_mut().filter(|s| s.id == id) {
            sweep.handle = Some(handle);
        }
    }

    async fn run_sweep(&self, total_frames: u32, batch_width: usize, token: &CancellationToken) {
        let width = u32::try_from(batch_width).unwrap_or(u32::MAX);
        let mut start = 0u32;

        while start < total_frames {
            if token.is_cancelled() {
                break;
            }
            let end = start.saturating_add(width).min(total_frames);
            let batch = (start..end)
                .filter(|&index| !self.store.has(index))
                .map(|index| self.prefetch_one(index, token));
            join_all(batch).await;

            {
                let _commit = self.commit.lock();
                if token.is_cancelled() {
                    break;
                }
                self.report_progress(PrefetchProgress {
                    completed: end,
                    total: total_frames,
                });
            }
            start = end;
        }

        if token.is_cancelled() {
            tracing::info!(completed = start, total_frames, "bulk preload halted");
        } else {
            tracing::info!(
                total_frames,
                cached = self.store.size(),
                "bulk preload finished"
            );
        }
    }

    fn report_progress(&self, progress: PrefetchProgress) {
        let observer = self.progress.lock().clone();
        if let Some(observer) = observer {
            observer(progress);
        }
    }

    /// Whether a bulk sweep is running
    pub fn is_sweeping(&self) -> bool {
        self.sweep
            .lock()
            .as_ref()
            .is_some_and(|s| !s.token.is_cancelled())
    }

    /// Stop the running sweep, if any
    ///
    /// Fetches of the current batch resolve as cancelled and are not stored.
    pub fn halt_sweep(&self) -> bool {
        let _commit = self.commit.lock();
        match self.sweep.lock().take() {
            Some(sweep) => {
                sweep.token.cancel();
                tracing::debug!(sweep = sweep.id, "bulk preload cancelled");
                true
            }
            None => false,
        }
    }

    /// Wait for the running sweep to finish
    pub async fn join_sweep(&self) {
        let handle = self.sweep.lock().as_mut().and_then(|s| s.handle.take());
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                tracing::warn!(%error, "bulk preload task failed");
            }
        }
    }

    /// Cancel every background fetch and the running sweep
    ///
    /// Once this returns no prefetch result can reach the store until new
    /// work is scheduled.
    pub fn cancel_all(&self) -> usize {
        let _commit = self.commit.lock();
        let mut cancelled = self.in_flight.cancel_all();
        if let Some(sweep) = self.sweep.lock().take() {
            sweep.token.cancel();
            cancelled += 1;
        }
        if cancelled > 0 {
            tracing::debug!(count = cancelled, "cancelled background prefetch");
        }
        cancelled
    }

    async fn prefetch_one(&self, index: FrameIndex, token: &CancellationToken) {
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            permit = self.permits.acquire() => permit.ok(),
        };
        let Some(_permit) = permit else {
            self.stats.lock().cancelled += 1;
            return;
        };

        self.stats.lock().scheduled += 1;
        match fetch_with_token(self.source.as_ref(), index, token).await {
            Ok(payload) => {
                let _commit = self.commit.lock();
                if token.is_cancelled() {
                    self.stats.lock().cancelled += 1;
                    return;
                }
                match self.store.set_background(index, payload) {
                    SetOutcome::Skipped => self.stats.lock().skipped += 1,
                    _ => {
                        self.stats.lock().stored += 1;
                        tracing::trace!(frame = index, "prefetched frame");
                    }
                }
            }
            Err(FetchError::Aborted) => {
                self.stats.lock().cancelled += 1;
            }
            Err(error) => {
                self.stats.lock().failed += 1;
                tracing::debug!(frame = index, %error, "prefetch failed");
            }
        }
    }
}
