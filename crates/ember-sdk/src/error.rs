//! Error types shared across the loop boundary

/// Why a completion carries no value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    /// A worker job panicked; the message is the panic payload when printable
    #[error("worker job panicked: {0}")]
    Panicked(String),

    /// The collaborator reported a failure
    #[error("operation failed: {0}")]
    Failed(String),

    /// The operation was cancelled or the loop shut down before delivery
    #[error("operation was cancelled")]
    Cancelled,

    /// The payload did not hold the type the receiver expected
    #[error("completion payload is not a {expected}")]
    PayloadType {
        /// Name of the expected type
        expected: &'static str,
    },
}

/// Failure to post a completion into a loop
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PostError {
    /// The loop has shut down or been dropped
    #[error("event loop is no longer accepting completions")]
    Closed,
}

impl From<String> for CompletionError {
    fn from(s: String) -> Self {
        CompletionError::Failed(s)
    }
}

impl From<&str> for CompletionError {
    fn from(s: &str) -> Self {
        CompletionError::Failed(s.to_string())
    }
}
