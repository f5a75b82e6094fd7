/// Failure of a chain client operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Network level failure (timeout, connection refused).
    Transport(String),
    /// The upstream answered with a JSON-RPC error object.
    Upstream { code: i64, message: String },
    /// The upstream answered with something we could not interpret.
    InvalidResponse(String),
    /// Operation requires `start()` to have completed.
    NotStarted,
    /// The client has no canonical head yet.
    HeadUnavailable,
    /// Anything else, not worth retrying.
    Other(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport: {}", msg),
            Self::Upstream { code, message } => {
                write!(f, "upstream error {}: {}", code, message)
            }
            Self::InvalidResponse(msg) => write!(f, "invalid response: {}", msg),
            Self::NotStarted => write!(f, "chain client not started"),
            Self::HeadUnavailable => write!(f, "chain client has no head block yet"),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
