use std::fmt;

use serde::Serialize;

use crate::{Connectivity, NotebookError};

/// Failure taxonomy that drives retry and propagation decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimit,
    Authentication,
    Authorization,
    ClientError,
    Validation,
    Internal,
    Server,
    Unknown,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 10] = [
        Self::Network,
        Self::Timeout,
        Self::RateLimit,
        Self::Authentication,
        Self::Authorization,
        Self::ClientError,
        Self::Validation,
        Self::Internal,
        Self::Server,
        Self::Unknown,
    ];

    /// Whether a failure of this kind may be attempted again.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            Self::Authentication | Self::Authorization | Self::Validation | Self::ClientError
        )
    }

    /// The sentence shown to end users for this kind of failure.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::Server => "The server is temporarily unavailable, please try again later.",
            Self::Network => "Network connection failed, please check your connection.",
            Self::Timeout => "The request timed out, please try again later.",
            Self::RateLimit => "Too many requests, please try again in a moment.",
            Self::Authentication => "Authentication failed, please sign in again.",
            Self::Authorization => "You do not have permission to perform this action.",
            Self::ClientError => "The request was invalid, please check your input.",
            Self::Validation => "Data validation failed, please check what you entered.",
            Self::Internal => "An internal data error occurred, please contact support.",
            Self::Unknown => "An unknown error occurred, please try again later.",
        }
    }

    /// Stable snake_case label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::ClientError => "client_error",
            Self::Validation => "validation",
            Self::Internal => "internal",
            Self::Server => "server",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps failures onto [`ErrorKind`], optionally aware of connectivity.
#[derive(Clone, Debug, Default)]
pub struct Classifier {
    connectivity: Option<Connectivity>,
}

impl Classifier {
    /// Classifier with no connectivity knowledge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifier that treats response-less failures as [`ErrorKind::Network`]
    /// while `connectivity` reports offline.
    pub fn with_connectivity(connectivity: Connectivity) -> Self {
        Self {
            connectivity: Some(connectivity),
        }
    }

    /// Classifies `error` using the current connectivity state.
    pub fn classify(&self, error: &NotebookError) -> ErrorKind {
        let online = self.connectivity.as_ref().map(Connectivity::is_online);
        classify(error, online)
    }
}

/// Classifies `error`. `online` is `None` when connectivity is unknown.
///
/// Status codes win over everything else; after that deadlines, then
/// connectivity, then validation and decoding faults.
pub fn classify(error: &NotebookError, online: Option<bool>) -> ErrorKind {
    if let Some(status) = error.status() {
        return match status {
            500..=u16::MAX => ErrorKind::Server,
            429 => ErrorKind::RateLimit,
            401 => ErrorKind::Authentication,
            403 => ErrorKind::Authorization,
            400..=499 => ErrorKind::ClientError,
            _ => ErrorKind::Unknown,
        };
    }

    match error {
        NotebookError::Timeout { .. } => ErrorKind::Timeout,
        NotebookError::Transport(err) if err.is_timeout() => ErrorKind::Timeout,
        NotebookError::Unreachable(_) => ErrorKind::Network,
        NotebookError::Transport(err) if err.is_connect() => ErrorKind::Network,
        NotebookError::Transport(err) if err.is_builder() => ErrorKind::Internal,
        err if err.is_without_response() && online == Some(false) => ErrorKind::Network,
        NotebookError::Validation(_) => ErrorKind::Validation,
        NotebookError::Decode(_) | NotebookError::Config(_) => ErrorKind::Internal,
        _ => ErrorKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::{classify, Classifier, ErrorKind};
    use crate::{Connectivity, NotebookError};

    fn http(status: u16) -> NotebookError {
        NotebookError::Http {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn status_codes_map_in_priority_order() {
        let cases = [
            (500, ErrorKind::Server),
            (503, ErrorKind::Server),
            (429, ErrorKind::RateLimit),
            (401, ErrorKind::Authentication),
            (403, ErrorKind::Authorization),
            (400, ErrorKind::ClientError),
            (404, ErrorKind::ClientError),
            (422, ErrorKind::ClientError),
            (302, ErrorKind::Unknown),
        ];
        for (status, expected) in cases {
            assert_eq!(classify(&http(status), None), expected, "status {status}");
        }
    }

    #[test]
    fn status_beats_connectivity() {
        assert_eq!(classify(&http(502), Some(false)), ErrorKind::Server);
    }

    #[test]
    fn non_status_failures() {
        assert_eq!(
            classify(&NotebookError::Timeout { timeout_ms: 10 }, Some(false)),
            ErrorKind::Timeout
        );
        assert_eq!(
            classify(&NotebookError::Unreachable("refused".to_owned()), None),
            ErrorKind::Network
        );
        assert_eq!(
            classify(&NotebookError::Validation("bad".to_owned()), None),
            ErrorKind::Validation
        );
        assert_eq!(
            classify(&NotebookError::Decode("shape".to_owned()), None),
            ErrorKind::Internal
        );
        assert_eq!(classify(&NotebookError::Cancelled, None), ErrorKind::Unknown);
    }

    #[test]
    fn malformed_request_is_internal_and_not_network() {
        let err = reqwest::Client::new()
            .get("https://notes.example")
            .header("bad header", "value")
            .build()
            .expect_err("header name with a space is rejected");
        assert!(err.is_builder());

        let kind = classify(&NotebookError::Transport(err), Some(false));
        assert_eq!(kind, ErrorKind::Internal);
    }

    #[test]
    fn classifier_follows_connectivity() {
        let connectivity = Connectivity::new(false);
        let classifier = Classifier::with_connectivity(connectivity.clone());
        let unreachable = NotebookError::Unreachable("dns".to_owned());
        assert_eq!(classifier.classify(&unreachable), ErrorKind::Network);

        connectivity.set_online(true);
        assert_eq!(classifier.classify(&http(401)), ErrorKind::Authentication);
    }

    #[test]
    fn retryable_split_matches_propagation_policy() {
        let fatal: Vec<ErrorKind> = ErrorKind::ALL
            .into_iter()
            .filter(|kind| !kind.is_retryable())
            .collect();
        assert_eq!(
            fatal,
            vec![
                ErrorKind::Authentication,
                ErrorKind::Authorization,
                ErrorKind::ClientError,
                ErrorKind::Validation,
            ]
        );
    }

    #[test]
    fn every_kind_has_a_distinct_sentence() {
        let mut messages: Vec<&str> = ErrorKind::ALL.iter().map(|k| k.user_message()).collect();
        messages.sort_unstable();
        messages.dedup();
        assert_eq!(messages.len(), ErrorKind::ALL.len());
    }
}
