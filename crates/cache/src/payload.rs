//! Encoded frame payloads
//!
//! A payload is the image for one frame exactly as the backend delivered it,
//! normally a `data:image/jpeg;base64,...` URI. The cache never decodes it.

use std::fmt;
use std::sync::Arc;

/// Zero-based index of a frame within the loaded video
pub type FrameIndex = u32;

const IMAGE_DATA_URI_PREFIX: &str = "data:image/";

/// Reason a payload cannot be cached or rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PayloadDefect {
    #[error("payload is empty")]
    Empty,
    #[error("payload is not an image data URI")]
    NotImageDataUri,
}

/// Immutable encoded image for a single frame
///
/// Cloning is cheap: the underlying string is shared.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FramePayload(Arc<str>);

impl FramePayload {
    /// Wrap an encoded image string
    pub fn new(data: impl Into<Arc<str>>) -> Self {
        Self(data.into())
    }

    /// The encoded image as delivered by the backend
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length of the encoded string in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check that the payload is something a display can actually show
    ///
    /// Empty strings are never valid. Anything that is not a `data:image/`
    /// URI is rejected as well, matching what the annotation backend sends.
    pub fn validate(&self) -> Result<(), PayloadDefect> {
        if self.0.trim().is_empty() {
            return Err(PayloadDefect::Empty);
        }
        if !self.0.starts_with(IMAGE_DATA_URI_PREFIX) {
            return Err(PayloadDefect::NotImageDataUri);
        }
        Ok(())
    }
}

impl From<String> for FramePayload {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for FramePayload {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// Payloads are often hundreds of kilobytes; keep log lines short.
impl fmt::Debug for FramePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head: String = self.0.chars().take(24).collect();
        f.debug_struct("FramePayload")
            .field("head", &head)
            .field("len", &self.0.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_image_data_uri() {
        let payload = FramePayload::from("data:image/jpeg;base64,/9j/4AAQ");
        assert_eq!(payload.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_empty_and_blank() {
        assert_eq!(FramePayload::from("").validate(), Err(PayloadDefect::Empty));
        assert_eq!(FramePayload::from("   ").validate(), Err(PayloadDefect::Empty));
    }

    #[test]
    fn test_validate_rejects_other_content() {
        let payload = FramePayload::from("{\"error\":\"Could not read frame\"}");
        assert_eq!(payload.validate(), Err(PayloadDefect::NotImageDataUri));
    }

    #[test]
    fn test_debug_is_truncated() {
        let long = format!("data:image/png;base64,{}", "A".repeat(10_000));
        let rendered = format!("{:?}", FramePayload::new(long));
        assert!(rendered.len() < 100);
        assert!(rendered.contains("10022"));
    }
}
