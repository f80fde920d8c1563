//! Frame Annotator Core Library
//!
//! Navigation core for the video frame annotator. A [`NavigationController`]
//! serves frames from the cache when it can, fetches them from a
//! [`FrameSource`](frame_annotator_scheduler::FrameSource) when it cannot,
//! keeps the neighbourhood of the current frame prefetched and reports
//! everything to a [`NavigationObserver`].

pub mod http;
pub mod navigation;
pub mod observer;

pub use http::{parse_frame_response, HttpFrameSource};
pub use navigation::{NavigationController, NavigationError, NavigationOutcome, VideoInfo};
pub use observer::{ChannelObserver, NavigationEvent, NavigationObserver, NoopObserver};
