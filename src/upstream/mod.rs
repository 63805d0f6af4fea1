//! Clients for the third-party services behind the proxy endpoints.

mod imagekit;
mod output;
mod replicate;

pub use imagekit::{ImageKitClient, ImageKitError, ReferenceImage};
pub use output::extract_image_url;
pub use replicate::{check_token, FaceSwapBackend, FaceSwapInput, ReplicateClient};

use thiserror::Error;

/// Failure of a face-swap provider call.
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// The request never produced an HTTP response, or its body did not decode
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with a non-success status
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The prediction ran and ended in failure
    #[error("prediction {id} {status}: {message}")]
    PredictionFailed {
        id: String,
        status: String,
        message: String,
    },

    /// The prediction was still running when polling gave up
    #[error("prediction {id} still {status} after {polls} polls")]
    PollTimeout {
        id: String,
        status: String,
        polls: u32,
    },

    #[error("Replicate API returned empty output")]
    EmptyOutput,

    #[error("Unexpected API response format: {0}")]
    UnexpectedOutput(String),

    #[error("Invalid image URL returned from API: {0}")]
    InvalidOutputUrl(String),
}

impl UpstreamError {
    /// Whether repeating the call could plausibly succeed.
    ///
    /// Connection problems, timeouts, throttling and server errors are
    /// transient. Client errors and bad outputs are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            UpstreamError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
