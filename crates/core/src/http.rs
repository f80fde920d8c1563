//! Frame source backed by the annotation server
//!
//! Frames come from `GET {server}/get_frame/{index}`, which answers with
//! `{"frame": "<data uri>", "frame_number": n, "time_seconds": t}` on success
//! and `{"error": "..."}` otherwise. Requests run on tokio's blocking pool;
//! an abandoned request keeps running there but its response is ignored.

use async_trait::async_trait;
use frame_annotator_cache::{FrameIndex, FramePayload, PayloadDefect};
use frame_annotator_scheduler::{FetchError, FrameSource};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct FrameResponse {
    #[serde(default)]
    frame: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for the frame endpoint
#[derive(Clone)]
pub struct HttpFrameSource {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpFrameSource {
    /// Client for the server at `base_url`, without a request timeout
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent: ureq::agent(),
        }
    }

    /// Client whose requests give up after `timeout`
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn frame_url(&self, index: FrameIndex) -> String {
        format!("{}/get_frame/{}", self.base_url, index)
    }

    fn fetch_blocking(&self, index: FrameIndex) -> Result<FramePayload, FetchError> {
        let url = self.frame_url(index);
        match self.agent.get(&url).call() {
            Ok(response) => {
                let status = response.status();
                let body = response
                    .into_string()
                    .map_err(|e| FetchError::Transport(e.to_string()))?;
                parse_frame_response(index, status, &body)
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                parse_frame_response(index, status, &body)
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(FetchError::Transport(transport.to_string()))
            }
        }
    }
}

impl std::fmt::Debug for HttpFrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFrameSource")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
impl FrameSource for HttpFrameSource {
    async fn fetch_frame(&self, index: FrameIndex) -> Result<FramePayload, FetchError> {
        let client = self.clone();
        tokio::task::spawn_blocking(move || client.fetch_blocking(index))
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?
    }
}

/// Map a `get_frame` response to a payload or a fetch error
pub fn parse_frame_response(
    index: FrameIndex,
    status: u16,
    body: &str,
) -> Result<FramePayload, FetchError> {
    let parsed = serde_json::from_str::<FrameResponse>(body);

    if status == 404 {
        return Err(FetchError::NotFound { index });
    }
    if !(200..300).contains(&status) {
        let message = match parsed {
            Ok(FrameResponse {
                error: Some(message),
                ..
            }) => message,
            _ => body.trim().to_string(),
        };
        return Err(FetchError::Server { status, message });
    }

    let response =
        parsed.map_err(|e| FetchError::Transport(format!("malformed frame response: {e}")))?;
    if let Some(message) = response.error {
        return Err(FetchError::Server { status, message });
    }
    match response.frame {
        Some(frame) => Ok(FramePayload::from(frame)),
        None => Err(FetchError::InvalidPayload {
            index,
            defect: PayloadDefect::Empty,
        }),
    }
}
