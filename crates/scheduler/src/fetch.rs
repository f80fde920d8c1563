//! Foreground fetch controller
//!
//! Owns the single network round trip that blocks the current navigation.
//! Starting a new request cancels the previous one, so at most one
//! foreground request is ever outstanding and a superseded request can only
//! resolve to [`FetchError::Aborted`].

use crate::cancel::CancellationToken;
use crate::source::{fetch_with_token, FetchError, FrameSource};
use frame_annotator_cache::{FrameIndex, FramePayload};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Identifier of one foreground request
pub type FetchId = u64;

struct ActiveFetch {
    id: FetchId,
    index: FrameIndex,
    token: CancellationToken,
}

/// Foreground fetch controller
///
/// IO and UI agnostic: it only reports which frame, if any, is pending.
pub struct FetchController<S: FrameSource + ?Sized> {
    source: Arc<S>,
    active: Mutex<Option<ActiveFetch>>,
    next_id: AtomicU64,
    pending_tx: watch::Sender<Option<FrameIndex>>,
}

impl<S: FrameSource + ?Sized> FetchController<S> {
    pub fn new(source: Arc<S>) -> Self {
        let (pending_tx, _) = watch::channel(None);
        Self {
            source,
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
            pending_tx,
        }
    }

    /// Fetch the payload for `index`, superseding any outstanding request
    ///
    /// Resolves to [`FetchError::Aborted`] if this request is itself
    /// superseded or cancelled before it completes, even if the backend
    /// answered successfully.
    ///
    /// # Errors
    /// Any backend failure, an invalid payload, or `Aborted`.
    pub async fn request(&self, index: FrameIndex) -> Result<FramePayload, FetchError> {
        let (id, token) = self.begin(index);
        let result = fetch_with_token(self.source.as_ref(), index, &token).await;
        self.settle(id);

        match &result {
            Ok(_) => tracing::debug!(frame = index, "foreground fetch completed"),
            Err(FetchError::Aborted) => tracing::debug!(frame = index, "foreground fetch aborted"),
            Err(error) => tracing::warn!(frame = index, %error, "foreground fetch failed"),
        }
        result
    }

    fn begin(&self, index: FrameIndex) -> (FetchId, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        let previous = self.active.lock().replace(ActiveFetch {
            id,
            index,
            token: token.clone(),
        });
        if let Some(previous) = previous {
            tracing::debug!(superseded = previous.index, frame = index, "superseding fetch");
            previous.token.cancel();
        }

        self.pending_tx.send_replace(Some(index));
        (id, token)
    }

    fn settle(&self, id: FetchId) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.id == id) {
            *active = None;
            drop(active);
            self.pending_tx.send_replace(None);
        }
    }

    /// Cancel the outstanding request, if any
    ///
    /// Returns the frame that was being fetched.
    pub fn cancel_active(&self) -> Option<FrameIndex> {
        let cancelled = self.active.lock().take()?;
        cancelled.token.cancel();
        self.pending_tx.send_replace(None);
        tracing::debug!(frame = cancelled.index, "cancelled foreground fetch");
        Some(cancelled.index)
    }

    /// Whether a request is outstanding
    pub fn is_pending(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Frame of the outstanding request
    pub fn pending_index(&self) -> Option<FrameIndex> {
        self.active.lock().as_ref().map(|a| a.index)
    }

    /// Observe pending/settled transitions
    ///
    /// The value is the frame being fetched, or `None` once settled.
    pub fn subscribe(&self) -> watch::Receiver<Option<FrameIndex>> {
        self.pending_tx.subscribe()
    }
}
