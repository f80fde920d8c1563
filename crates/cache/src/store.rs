//! Frame store with bounded LRU or unbounded retention
//!
//! Maps frame indices to encoded payloads. In bounded mode the store never
//! holds more than `max_frames` entries and evicts exactly one least recently
//! used frame per overflowing insert. In unbounded mode nothing is evicted
//! until the store is cleared.

use crate::payload::{FrameIndex, FramePayload};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Retention policy for cached frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep at most `max_frames` frames, evicting the least recently used
    Bounded { max_frames: usize },

    /// Keep every frame until the store is cleared
    Unbounded,
}

impl RetentionPolicy {
    /// Maximum number of frames, or `None` when unbounded
    pub fn capacity(&self) -> Option<usize> {
        match self {
            RetentionPolicy::Bounded { max_frames } => Some(*max_frames),
            RetentionPolicy::Unbounded => None,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy::Bounded { max_frames: 50 }
    }
}

/// How full the store is, for a status display
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CacheLevel {
    /// Below 90% of capacity, or unbounded
    Normal,
    /// At least 90% of capacity
    NearCapacity,
    /// At capacity; the next new frame evicts one
    Full,
}

/// Snapshot of store occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatus {
    /// Number of frames currently held
    pub size: usize,

    /// Capacity, `None` when unbounded
    pub capacity: Option<usize>,
}

impl CacheStatus {
    pub fn level(&self) -> CacheLevel {
        match self.capacity {
            None => CacheLevel::Normal,
            Some(capacity) if self.size >= capacity => CacheLevel::Full,
            Some(capacity) if self.size * 10 >= capacity * 9 => CacheLevel::NearCapacity,
            Some(_) => CacheLevel::Normal,
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.capacity {
            Some(capacity) => write!(f, "{}/{} frames", self.size, capacity),
            None => write!(f, "{} frames", self.size),
        }
    }
}

/// Statistics about store usage
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of frames currently in the store
    pub frame_count: usize,

    /// Number of lookups that found a valid frame
    pub hits: u64,

    /// Number of lookups that found nothing usable
    pub misses: u64,

    /// Number of frames evicted to respect the capacity
    pub evictions: u64,

    /// Number of writes refused because the payload was empty
    pub rejected: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Result of a [`FrameStore::set`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// A new frame was added, possibly evicting another one first
    Inserted { evicted: Option<FrameIndex> },

    /// An existing frame was replaced and marked most recently used
    Updated,

    /// The payload was empty and nothing changed
    Rejected,

    /// A background write found no room without evicting the pinned frame;
    /// nothing changed
    Skipped,
}

/// Callback invoked with the new occupancy after every size-affecting change
pub type CacheObserver = Arc<dyn Fn(CacheStatus) + Send + Sync>;

struct StoreState {
    frames: HashMap<FrameIndex, FramePayload>,

    /// Recency order, least recently used at the front. Bounded mode only.
    lru_queue: VecDeque<FrameIndex>,

    policy: RetentionPolicy,

    /// Frame currently on screen; passed over by eviction while another
    /// candidate exists
    pinned: Option<FrameIndex>,

    stats: CacheStats,
}

impl StoreState {
    fn new(policy: RetentionPolicy) -> Self {
        Self {
            frames: HashMap::new(),
            lru_queue: VecDeque::new(),
            policy,
            pinned: None,
            stats: CacheStats::default(),
        }
    }

    fn is_bounded(&self) -> bool {
        matches!(self.policy, RetentionPolicy::Bounded { .. })
    }

    fn status(&self) -> CacheStatus {
        CacheStatus {
            size: self.frames.len(),
            capacity: self.policy.capacity(),
        }
    }

    /// Move a key to the back of the LRU queue (mark as most recently used)
    fn touch(&mut self, index: FrameIndex) {
        if !self.is_bounded() {
            return;
        }
        self.lru_queue.retain(|&k| k != index);
        self.lru_queue.push_back(index);
    }

    fn remove(&mut self, index: FrameIndex) -> Option<FramePayload> {
        let removed = self.frames.remove(&index);
        if removed.is_some() {
            self.lru_queue.retain(|&k| k != index);
            self.stats.frame_count = self.frames.len();
        }
        removed
    }

    /// Evict the least recently used frame other than the pinned one
    ///
    /// With `evict_pinned` the pinned frame goes when it is the only
    /// candidate; otherwise nothing is evicted in that case.
    fn evict_lru(&mut self, evict_pinned: bool) -> Option<FrameIndex> {
        let fallback = if evict_pinned && !self.lru_queue.is_empty() {
            Some(0)
        } else {
            None
        };
        let position = self
            .lru_queue
            .iter()
            .position(|&k| Some(k) != self.pinned)
            .or(fallback)?;
        let victim = self.lru_queue.remove(position)?;
        self.frames.remove(&victim);
        self.stats.frame_count = self.frames.len();
        self.stats.evictions += 1;
        Some(victim)
    }
}

/// Thread-safe frame cache
///
/// All operations take a single lock, so the check-size, evict, insert
/// sequence of a write is atomic with respect to every other operation.
///
/// # Example
///
/// ```
/// use frame_annotator_cache::{FramePayload, FrameStore};
///
/// let store = FrameStore::bounded(2);
/// store.set(1, FramePayload::from("data:image/jpeg;base64,AAAA"));
/// store.set(2, FramePayload::from("data:image/jpeg;base64,BBBB"));
/// store.get(1);
/// store.set(3, FramePayload::from("data:image/jpeg;base64,CCCC"));
///
/// assert!(store.has(1));
/// assert!(!store.has(2));
/// assert!(store.has(3));
/// ```
pub struct FrameStore {
    state: Mutex<StoreState>,
    observer: Mutex<Option<CacheObserver>>,
}

impl FrameStore {
    /// Create an empty store with the given retention policy
    ///
    /// A bounded policy with `max_frames == 0` is treated as a capacity of one.
    pub fn new(policy: RetentionPolicy) -> Self {
        let policy = match policy {
            RetentionPolicy::Bounded { max_frames } => RetentionPolicy::Bounded {
                max_frames: max_frames.max(1),
            },
            RetentionPolicy::Unbounded => RetentionPolicy::Unbounded,
        };
        Self {
            state: Mutex::new(StoreState::new(policy)),
            observer: Mutex::new(None),
        }
    }

    /// Create a bounded LRU store
    pub fn bounded(max_frames: usize) -> Self {
        Self::new(RetentionPolicy::Bounded { max_frames })
    }

    /// Create a store that never evicts
    pub fn unbounded() -> Self {
        Self::new(RetentionPolicy::Unbounded)
    }

    /// Register the occupancy observer, replacing any previous one
    pub fn set_observer(&self, observer: CacheObserver) {
        *self.observer.lock() = Some(observer);
    }

    fn notify(&self, status: CacheStatus) {
        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            observer(status);
        }
    }

    /// Whether a valid frame is cached for `index`
    ///
    /// Does not change recency.
    pub fn has(&self, index: FrameIndex) -> bool {
        let state = self.state.lock();
        state.frames.get(&index).is_some_and(|p| !p.is_empty())
    }

    /// Look up a frame, marking it most recently used
    ///
    /// An entry whose payload is empty is dropped and reported as absent.
    pub fn get(&self, index: FrameIndex) -> Option<FramePayload> {
        let mut state = self.state.lock();

        let Some(payload) = state.frames.get(&index).cloned() else {
            state.stats.misses += 1;
            return None;
        };

        if payload.is_empty() {
            tracing::warn!(frame = index, "dropping corrupt cache entry");
            state.remove(index);
            state.stats.misses += 1;
            let status = state.status();
            drop(state);
            self.notify(status);
            return None;
        }

        state.touch(index);
        state.stats.hits += 1;
        Some(payload)
    }

    /// Store a frame
    ///
    /// Empty payloads are refused. Inserting a new frame into a full bounded
    /// store evicts exactly one least recently used frame first. Replacing an
    /// existing frame never evicts and refreshes its recency.
    pub fn set(&self, index: FrameIndex, payload: FramePayload) -> SetOutcome {
        self.write(index, payload, true)
    }

    /// Store a frame on behalf of a background writer
    ///
    /// Same as [`set`](Self::set), except that the pinned frame is never the
    /// victim: when it is the only frame that could make room the write is
    /// dropped and [`SetOutcome::Skipped`] returned.
    pub fn set_background(&self, index: FrameIndex, payload: FramePayload) -> SetOutcome {
        self.write(index, payload, false)
    }

    fn write(&self, index: FrameIndex, payload: FramePayload, evict_pinned: bool) -> SetOutcome {
        let mut state = self.state.lock();

        if payload.is_empty() {
            state.stats.rejected += 1;
            tracing::debug!(frame = index, "refusing to cache empty payload");
            return SetOutcome::Rejected;
        }

        if state.frames.contains_key(&index) {
            state.frames.insert(index, payload);
            state.touch(index);
            let status = state.status();
            drop(state);
            self.notify(status);
            return SetOutcome::Updated;
        }

        let mut evicted = None;
        if let RetentionPolicy::Bounded { max_frames } = state.policy {
            if state.frames.len() >= max_frames {
                evicted = state.evict_lru(evict_pinned);
                match evicted {
                    Some(victim) => {
                        tracing::debug!(frame = victim, capacity = max_frames, "evicted frame");
                    }
                    None if !evict_pinned => {
                        tracing::trace!(frame = index, "no room beside the pinned frame");
                        return SetOutcome::Skipped;
                    }
                    None => {}
                }
            }
        }

        state.frames.insert(index, payload);
        state.touch(index);
        state.stats.frame_count = state.frames.len();
        let status = state.status();
        drop(state);

        self.notify(status);
        SetOutcome::Inserted { evicted }
    }

    /// Remove a single frame
    pub fn remove(&self, index: FrameIndex) -> Option<FramePayload> {
        let mut state = self.state.lock();
        let removed = state.remove(index);
        let status = state.status();
        drop(state);

        if removed.is_some() {
            self.notify(status);
        }
        removed
    }

    /// Remove every frame and report the new (empty) status to the observer
    ///
    /// Returns the number of frames that were dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.frames.len();
        state.frames.clear();
        state.lru_queue.clear();
        state.pinned = None;
        state.stats.frame_count = 0;
        let status = state.status();
        drop(state);

        if dropped > 0 {
            tracing::info!(frames = dropped, "frame cache cleared");
        }
        self.notify(status);
        dropped
    }

    /// Protect the frame on screen from eviction by background writes
    ///
    /// A foreground [`set`](Self::set) still evicts the pinned frame if it is
    /// the only entry left in a full store, so the capacity is never exceeded.
    pub fn pin(&self, index: FrameIndex) {
        self.state.lock().pinned = Some(index);
    }

    pub fn pinned(&self) -> Option<FrameIndex> {
        self.state.lock().pinned
    }

    /// Number of frames currently held
    pub fn size(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.state.lock().policy
    }

    /// Current occupancy
    pub fn status(&self) -> CacheStatus {
        self.state.lock().status()
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    /// Cached frame indices in ascending order
    pub fn cached_indices(&self) -> Vec<FrameIndex> {
        let state = self.state.lock();
        let mut indices: Vec<FrameIndex> = state.frames.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    #[cfg(test)]
    fn insert_unchecked(&self, index: FrameIndex, payload: FramePayload) {
        let mut state = self.state.lock();
        state.frames.insert(index, payload);
        state.touch(index);
    }

    #[cfg(test)]
    fn recency_order(&self) -> Vec<FrameIndex> {
        self.state.lock().lru_queue.iter().copied().collect()
    }
}

impl Default for FrameStore {
    /// Bounded store holding 50 frames
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}
