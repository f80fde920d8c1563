//! Events the navigation core reports to the UI layer

use crate::navigation::NavigationError;
use frame_annotator_cache::{CacheStatus, FrameIndex, FramePayload};
use frame_annotator_scheduler::PrefetchProgress;
use tokio::sync::mpsc;

/// Receiver of navigation events
///
/// Callbacks run synchronously on the task that produced the event, in the
/// order the events happened. They may read controller state such as the
/// current frame or cache status, but must not navigate or clear from inside
/// a callback.
pub trait NavigationObserver: Send + Sync {
    /// A frame should be shown
    fn on_render_frame(&self, index: FrameIndex, payload: &FramePayload);

    /// A foreground fetch started (`true`) or the last one settled (`false`)
    fn on_loading_changed(&self, _loading: bool) {}

    fn on_cache_status(&self, _status: CacheStatus) {}

    /// Bulk preload progress
    fn on_prefetch_progress(&self, _progress: PrefetchProgress) {}

    /// A foreground navigation failed; the current frame did not change
    fn on_error(&self, _error: &NavigationError) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl NavigationObserver for NoopObserver {
    fn on_render_frame(&self, _index: FrameIndex, _payload: &FramePayload) {}
}

/// Owned form of a navigation callback
#[derive(Debug, Clone, PartialEq)]
pub enum NavigationEvent {
    RenderFrame {
        index: FrameIndex,
        payload: FramePayload,
    },
    LoadingChanged(bool),
    CacheStatus(CacheStatus),
    PrefetchProgress(PrefetchProgress),
    Error(NavigationError),
}

/// Observer forwarding every callback into an unbounded channel
///
/// Events are delivered in callback order. Sending never blocks; events sent
/// after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<NavigationEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NavigationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: NavigationEvent) {
        // A closed receiver means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

impl NavigationObserver for ChannelObserver {
    fn on_render_frame(&self, index: FrameIndex, payload: &FramePayload) {
        self.send(NavigationEvent::RenderFrame {
            index,
            payload: payload.clone(),
        });
    }

    fn on_loading_changed(&self, loading: bool) {
        self.send(NavigationEvent::LoadingChanged(loading));
    }

    fn on_cache_status(&self, status: CacheStatus) {
        self.send(NavigationEvent::CacheStatus(status));
    }

    fn on_prefetch_progress(&self, progress: PrefetchProgress) {
        self.send(NavigationEvent::PrefetchProgress(progress));
    }

    fn on_error(&self, error: &NavigationError) {
        self.send(NavigationEvent::Error(error.clone()));
    }
}
