/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum NotebookError {
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    /// Non-success HTTP status code with raw response body.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// The attempt did not complete before its deadline.
    #[error("request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,
    /// No connection to the remote service could be established.
    #[error("service unreachable: {0}")]
    Unreachable(String),
    /// A payload or setting value failed shape validation.
    #[error("validation error: {0}")]
    Validation(String),
    /// Response decoding or unexpected value shape.
    #[error("decode error: {0}")]
    Decode(String),
    /// Missing or malformed configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl NotebookError {
    /// HTTP status code carried by the failure, if a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    /// Returns `true` when the request could not even be built, e.g. an
    /// invalid header name. Sending it again can never succeed.
    pub fn is_malformed_request(&self) -> bool {
        matches!(self, Self::Transport(err) if err.is_builder())
    }

    /// Returns `true` when the failure happened before any response arrived.
    pub(crate) fn is_without_response(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Unreachable(_))
            && self.status().is_none()
            && !self.is_malformed_request()
    }
}
