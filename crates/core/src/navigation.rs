//! Cache-first frame navigation
//!
//! "Go to frame N" for the annotation UI:
//! 1. Check the frame store and render immediately on a hit
//! 2. Otherwise fetch the frame in the foreground, superseding any earlier
//!    request, store it and render it
//! 3. Top up the prefetch window around the new frame
//!
//! Only the most recent navigation can ever render. A navigation that is
//! overtaken by a newer one, or by a clear, resolves as
//! [`NavigationOutcome::Superseded`] without side effects.

use crate::observer::NavigationObserver;
use frame_annotator_cache::{
    AnnotatorConfig, CacheStats, CacheStatus, FrameIndex, FramePayload, FrameStore,
};
use frame_annotator_scheduler::{
    FetchController, FetchError, FrameSource, PrefetchProgress, PrefetchWindow, Prefetcher,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Properties of the loaded video
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    /// Number of frames; valid indices are `0..total_frames`
    pub total_frames: u32,

    /// Frames per second, used to report timestamps
    pub fps: f64,
}

impl VideoInfo {
    pub fn new(total_frames: u32, fps: f64) -> Self {
        Self { total_frames, fps }
    }

    /// Timestamp of `index` in seconds
    ///
    /// `None` if the frame rate is unknown.
    pub fn frame_time(&self, index: FrameIndex) -> Option<f64> {
        if self.fps.is_finite() && self.fps > 0.0 {
            Some(f64::from(index) / self.fps)
        } else {
            None
        }
    }

    pub fn contains(&self, index: i64) -> bool {
        index >= 0 && index < i64::from(self.total_frames)
    }
}

/// Errors surfaced to the user by navigation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NavigationError {
    /// The frame could not be loaded; the current frame is unchanged
    #[error("failed to load frame {index}: {source}")]
    Fetch {
        index: FrameIndex,
        #[source]
        source: FetchError,
    },

    #[error("video has no frames")]
    EmptyVideo,
}

/// How a navigation request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// The frame was rendered and is now current
    Rendered { index: FrameIndex, from_cache: bool },

    /// Out of range, or no video loaded; nothing happened
    Ignored,

    /// A newer navigation or a clear took over before this one finished
    Superseded,
}

struct Session {
    video: Option<VideoInfo>,
    current: Option<FrameIndex>,

    /// Bumped by every navigation and every clear; a navigation may only
    /// commit while it still holds the latest value
    sequence: u64,

    /// Navigations currently waiting on a foreground fetch
    fetching: usize,
}

struct Ticket {
    index: FrameIndex,
    total_frames: u32,
    sequence: u64,
}

/// Navigation session for one annotator view
///
/// Owns the frame store, the foreground fetch controller and the prefetcher,
/// and reports everything that happens to a [`NavigationObserver`]. Methods
/// that spawn background work must be called from within a tokio runtime.
pub struct NavigationController<S: FrameSource + ?Sized> {
    config: AnnotatorConfig,
    store: Arc<FrameStore>,
    fetcher: FetchController<S>,
    prefetcher: Arc<Prefetcher<S>>,
    observer: Arc<dyn NavigationObserver>,
    session: Mutex<Session>,

    /// Serializes commits, clears and observer callbacks
    commit: Mutex<()>,
}

impl<S: FrameSource + ?Sized> NavigationController<S> {
    pub fn new(
        source: Arc<S>,
        config: AnnotatorConfig,
        observer: Arc<dyn NavigationObserver>,
    ) -> Self {
        let store = Arc::new(FrameStore::new(config.retention));
        {
            let observer = Arc::clone(&observer);
            store.set_observer(Arc::new(move |status: CacheStatus| {
                observer.on_cache_status(status)
            }));
        }

        let prefetcher = Arc::new(Prefetcher::new(
            Arc::clone(&source),
            Arc::clone(&store),
            PrefetchWindow::new(config.prefetch_radius),
            config.bulk_batch_width,
        ));
        {
            let observer = Arc::clone(&observer);
            prefetcher.set_progress_observer(Arc::new(move |progress: PrefetchProgress| {
                observer.on_prefetch_progress(progress)
            }));
        }

        Self {
            config,
            store,
            fetcher: FetchController::new(source),
            prefetcher,
            observer,
            session: Mutex::new(Session {
                video: None,
                current: None,
                sequence: 0,
                fetching: 0,
            }),
            commit: Mutex::new(()),
        }
    }

    /// Start a new video session
    ///
    /// Everything cached or in flight for the previous video is dropped. With
    /// bulk preload enabled a sweep over the whole video starts right away.
    ///
    /// # Errors
    /// `EmptyVideo` if the video has no frames; the previous session is
    /// still cleared.
    pub fn load_video(&self, video: VideoInfo) -> Result<(), NavigationError> {
        self.clear_all();
        {
            let mut session = self.session.lock();
            session.video = (video.total_frames > 0).then_some(video);
            session.current = None;
        }

        if video.total_frames == 0 {
            return Err(NavigationError::EmptyVideo);
        }

        tracing::info!(
            total_frames = video.total_frames,
            fps = video.fps,
            retention = ?self.config.retention,
            "video loaded"
        );
        if self.config.bulk_preload {
            self.prefetcher
                .start_sweep(video.total_frames, self.config.bulk_batch_width);
        }
        Ok(())
    }

    /// Navigate to `target`
    ///
    /// Out-of-range targets are ignored. Errors other than cancellation are
    /// also reported through [`NavigationObserver::on_error`].
    ///
    /// # Errors
    /// `Fetch` if the frame could not be loaded; the current frame stays
    /// where it was.
    pub async fn navigate_to(&self, target: i64) -> Result<NavigationOutcome, NavigationError> {
        let Some(ticket) = self.begin(target) else {
            tracing::trace!(target, "navigation out of range");
            return Ok(NavigationOutcome::Ignored);
        };

        if let Some(payload) = self.store.get(ticket.index) {
            // A hit still supersedes whatever the foreground was fetching
            self.fetcher.cancel_active();
            tracing::debug!(frame = ticket.index, "cache hit");
            return Ok(self.commit(&ticket, payload, true));
        }

        self.enter_fetch();
        let result = self.fetcher.request(ticket.index).await;
        let outcome = match result {
            Ok(payload) => Ok(self.commit(&ticket, payload, false)),
            Err(FetchError::Aborted) => Ok(NavigationOutcome::Superseded),
            Err(source) => self.fail(&ticket, source),
        };
        self.leave_fetch();
        outcome
    }

    /// Move `delta` frames from the current one
    ///
    /// A no-op until a frame has been shown.
    pub async fn step(&self, delta: i64) -> Result<NavigationOutcome, NavigationError> {
        let Some(current) = self.current_frame() else {
            return Ok(NavigationOutcome::Ignored);
        };
        self.navigate_to(i64::from(current).saturating_add(delta)).await
    }

    pub async fn first(&self) -> Result<NavigationOutcome, NavigationError> {
        self.navigate_to(0).await
    }

    pub async fn last(&self) -> Result<NavigationOutcome, NavigationError> {
        let Some(video) = self.video() else {
            return Ok(NavigationOutcome::Ignored);
        };
        self.navigate_to(i64::from(video.total_frames) - 1).await
    }

    /// Drop every cached frame and cancel all outstanding work
    ///
    /// The foreground request is cancelled first, then the prefetcher, then
    /// the store is emptied. No fetch started before this call can write to
    /// the store or render afterwards.
    pub fn clear_all(&self) {
        let _commit = self.commit.lock();
        self.session.lock().sequence += 1;

        self.fetcher.cancel_active();
        self.prefetcher.cancel_all();
        let dropped = self.store.clear();
        tracing::debug!(frames = dropped, "navigation session cleared");
    }

    /// The page is going away; always clears
    pub fn page_unloading(&self) {
        self.clear_all();
    }

    /// The page was hidden; clears only if configured to
    ///
    /// Returns whether the cache was cleared.
    pub fn page_hidden(&self) -> bool {
        if self.config.clear_on_hide {
            self.clear_all();
            true
        } else {
            false
        }
    }

    /// The navigation key was released; abandon the pending foreground fetch
    ///
    /// Returns the frame whose fetch was cancelled.
    pub fn key_released(&self) -> Option<FrameIndex> {
        self.fetcher.cancel_active()
    }

    pub fn current_frame(&self) -> Option<FrameIndex> {
        self.session.lock().current
    }

    pub fn video(&self) -> Option<VideoInfo> {
        self.session.lock().video
    }

    /// Timestamp of `index` in the loaded video
    pub fn frame_time(&self, index: FrameIndex) -> Option<f64> {
        self.video()?.frame_time(index)
    }

    /// Whether a foreground fetch is outstanding
    pub fn is_loading(&self) -> bool {
        self.session.lock().fetching > 0
    }

    pub fn cache_status(&self) -> CacheStatus {
        self.store.status()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.store.stats()
    }

    pub fn config(&self) -> &AnnotatorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<FrameStore> {
        &self.store
    }

    pub fn prefetcher(&self) -> &Arc<Prefetcher<S>> {
        &self.prefetcher
    }

    fn begin(&self, target: i64) -> Option<Ticket> {
        let mut session = self.session.lock();
        let video = session.video?;
        if !video.contains(target) {
            return None;
        }
        let index = FrameIndex::try_from(target).ok()?;

        session.sequence += 1;
        Some(Ticket {
            index,
            total_frames: video.total_frames,
            sequence: session.sequence,
        })
    }

    fn commit(
        &self,
        ticket: &Ticket,
        payload: FramePayload,
        from_cache: bool,
    ) -> NavigationOutcome {
        {
            let _commit = self.commit.lock();
            {
                let mut session = self.session.lock();
                if session.sequence != ticket.sequence {
                    tracing::debug!(frame = ticket.index, "discarding superseded frame");
                    return NavigationOutcome::Superseded;
                }
                session.current = Some(ticket.index);
            }

            // Pin before storing so background writes cannot evict the
            // frame on screen
            self.store.pin(ticket.index);
            if !from_cache {
                self.store.set(ticket.index, payload.clone());
            }
            self.observer.on_render_frame(ticket.index, &payload);
        }

        self.prefetcher.top_up(ticket.index, ticket.total_frames);
        NavigationOutcome::Rendered {
            index: ticket.index,
            from_cache,
        }
    }

    fn fail(
        &self,
        ticket: &Ticket,
        source: FetchError,
    ) -> Result<NavigationOutcome, NavigationError> {
        let _commit = self.commit.lock();
        if self.session.lock().sequence != ticket.sequence {
            return Ok(NavigationOutcome::Superseded);
        }

        let error = NavigationError::Fetch {
            index: ticket.index,
            source,
        };
        tracing::warn!(%error, "navigation failed");
        self.observer.on_error(&error);
        Err(error)
    }

    fn enter_fetch(&self) {
        let _commit = self.commit.lock();
        let started = {
            let mut session = self.session.lock();
            session.fetching += 1;
            session.fetching == 1
        };
        if started {
            self.observer.on_loading_changed(true);
        }
    }

    fn leave_fetch(&self) {
        let _commit = self.commit.lock();
        let settled = {
            let mut session = self.session.lock();
            session.fetching = session.fetching.saturating_sub(1);
            session.fetching == 0
        };
        if settled {
            self.observer.on_loading_changed(false);
        }
    }
}
