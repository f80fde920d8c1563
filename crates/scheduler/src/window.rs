//! Prefetch window around the current frame
//!
//! Decides which neighbours of the current frame are worth fetching ahead of
//! the user, and in which order. Frames closer to the current frame come
//! first; at equal distance the following frame wins over the preceding one,
//! because stepping forward is the common case while annotating.

use frame_annotator_cache::FrameIndex;

/// Symmetric window of neighbouring frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchWindow {
    /// Number of frames on each side of the center
    pub radius: u32,
}

impl PrefetchWindow {
    pub fn new(radius: u32) -> Self {
        Self { radius }
    }

    /// Neighbours of `center` inside `[0, total_frames)`, nearest first
    ///
    /// The center itself is never included.
    ///
    /// # Example
    ///
    /// ```
    /// use frame_annotator_scheduler::PrefetchWindow;
    ///
    /// let window = PrefetchWindow::new(2);
    /// assert_eq!(window.candidates(1, 10), vec![2, 0, 3]);
    /// ```
    pub fn candidates(&self, center: FrameIndex, total_frames: u32) -> Vec<FrameIndex> {
        let mut frames = Vec::with_capacity(self.radius as usize * 2);
        if center >= total_frames {
            return frames;
        }

        for distance in 1..=self.radius {
            if let Some(next) = center.checked_add(distance) {
                if next < total_frames {
                    frames.push(next);
                }
            }
            if let Some(previous) = center.checked_sub(distance) {
                frames.push(previous);
            }
        }
        frames
    }

    /// Whether `index` lies within the window around `center`
    pub fn contains(&self, center: FrameIndex, index: FrameIndex) -> bool {
        index != center && center.abs_diff(index) <= self.radius
    }
}

impl Default for PrefetchWindow {
    fn default() -> Self {
        Self::new(5)
    }
}
