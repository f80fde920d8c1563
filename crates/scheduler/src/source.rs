//! Backend seam for fetching frame payloads

use crate::cancel::CancellationToken;
use async_trait::async_trait;
use frame_annotator_cache::{FrameIndex, FramePayload, PayloadDefect};

/// Failure of a single frame fetch
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The request was superseded or explicitly cancelled
    #[error("request aborted")]
    Aborted,

    #[error("frame {index} not found")]
    NotFound { index: FrameIndex },

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// The backend answered but the payload cannot be displayed
    #[error("invalid payload for frame {index}: {defect}")]
    InvalidPayload {
        index: FrameIndex,
        defect: PayloadDefect,
    },

    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    /// Aborts are never reported to the user
    pub fn is_aborted(&self) -> bool {
        matches!(self, FetchError::Aborted)
    }
}

/// Source of encoded frames, usually the annotation backend
#[async_trait]
pub trait FrameSource: Send + Sync + 'static {
    /// Fetch the encoded image for `index`
    async fn fetch_frame(&self, index: FrameIndex) -> Result<FramePayload, FetchError>;
}

/// Fetch a frame, racing it against `token`, and validate the result
///
/// A cancelled token always wins: if it fires before or while the backend
/// responds the outcome is [`FetchError::Aborted`], whatever the backend said.
pub async fn fetch_with_token<S>(
    source: &S,
    index: FrameIndex,
    token: &CancellationToken,
) -> Result<FramePayload, FetchError>
where
    S: FrameSource + ?Sized,
{
    if token.is_cancelled() {
        return Err(FetchError::Aborted);
    }

    let result = tokio::select! {
        biased;
        _ = token.cancelled() => Err(FetchError::Aborted),
        result = source.fetch_frame(index) => result,
    };

    if token.is_cancelled() {
        return Err(FetchError::Aborted);
    }

    let payload = result?;
    payload
        .validate()
        .map_err(|defect| FetchError::InvalidPayload { index, defect })?;
    Ok(payload)
}
