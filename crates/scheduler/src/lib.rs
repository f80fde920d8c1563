//! Frame Annotator Scheduler Library
//!
//! Fetch orchestration for the frame cache: a foreground controller that
//! keeps at most one navigation request in flight, and a background
//! prefetcher that fills the cache around the current frame or sweeps the
//! whole video.
//!
//! # Example
//!
//! ```
//! use frame_annotator_scheduler::{CancellationToken, PrefetchWindow};
//!
//! // Neighbours of frame 10 worth fetching, nearest first
//! let window = PrefetchWindow::new(2);
//! assert_eq!(window.candidates(10, 100), vec![11, 9, 12, 8]);
//!
//! // Superseded work is cancelled through shared tokens
//! let token = CancellationToken::new();
//! let in_flight = token.clone();
//! token.cancel();
//! assert!(in_flight.is_cancelled());
//! ```

mod cancel;
mod fetch;
mod prefetch;
mod source;
mod window;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// Re-export public API
pub use cancel::{CancellationRegistry, CancellationToken};
pub use fetch::{FetchController, FetchId};
pub use prefetch::{PrefetchProgress, PrefetchStats, Prefetcher, ProgressObserver};
pub use source::{fetch_with_token, FetchError, FrameSource};
pub use window::PrefetchWindow;
