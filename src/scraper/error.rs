use thiserror::Error;

/// Page-level failures. None of these cross the fetcher boundary: each one
/// collapses into an empty page after being logged.
#[derive(Error, Debug)]
pub enum FeedError {
    /// Connect, timeout or body-read failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status} from provider")]
    Status { status: u16 },

    #[error("malformed XML: {0}")]
    Malformed(String),

    #[error("DOCTYPE declarations are not accepted")]
    DoctypeRejected,

    /// The provider answered with an error envelope.
    #[error("provider error {code}: {message}")]
    Provider { code: String, message: String },

    #[error("invalid request URL: {0}")]
    Url(#[from] url::ParseError),
}

impl FeedError {
    /// Worth another attempt: connection trouble, throttling, 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FeedError::Status { status } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<quick_xml::Error> for FeedError {
    fn from(e: quick_xml::Error) -> Self {
        FeedError::Malformed(e.to_string())
    }
}
