use thiserror::Error;

/// Failure of a single API request.
///
/// `Clone` so that every caller joined on a coalesced request receives its own copy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("API Error: {status} {status_text}")]
    Status { status: u16, status_text: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode response body: {0}")]
    Decode(String),
    #[error("failed to encode request body: {0}")]
    Encode(String),
    #[error("invalid request url: {0}")]
    Url(String),
    #[error("request for `{key}` ended without a result")]
    Abandoned { key: String },
}

impl RequestError {
    pub fn status(status: u16, status_text: impl Into<String>) -> Self {
        Self::Status {
            status,
            status_text: status_text.into(),
        }
    }

    /// HTTP status of a rejected response, if that is what this error is.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
