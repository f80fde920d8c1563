//! Frame Annotator Cache Library
//!
//! Frame store with bounded LRU or unbounded retention, plus the
//! configuration shared by the cache, prefetcher and backend client.

pub mod config;
pub mod payload;
pub mod store;

pub use config::{AnnotatorConfig, ConfigError};
pub use payload::{FrameIndex, FramePayload, PayloadDefect};
pub use store::{
    CacheLevel, CacheObserver, CacheStats, CacheStatus, FrameStore, RetentionPolicy, SetOutcome,
};
