//! Bus error type.

use thiserror::Error;

/// Errors reported by the streaming bus client.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream socket error: {0}")]
    Socket(#[from] std::io::Error),
    #[error("no stream named '{name}' found within {timeout_ms} ms")]
    ResolveTimeout { name: String, timeout_ms: u64 },
    #[error("pull on stream '{name}' timed out after {timeout_ms} ms")]
    PullTimeout { name: String, timeout_ms: u64 },
    #[error("stream '{name}' has {actual} channels, expected {expected}")]
    ChannelMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("malformed packet on stream '{name}': {reason}")]
    Malformed { name: String, reason: String },
    #[error("stream '{0}' is not running")]
    NotRunning(String),
}
