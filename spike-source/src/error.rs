//! Replayer error kinds.

use thiserror::Error;

/// Errors surfaced by the source replayer. All are fatal at startup.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("configuration error: {0}")]
    Config(#[from] spike_core::ConfigError),
    #[error("dataset I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported dataset extension '{0}' (expected .spike or .xdf)")]
    UnsupportedExtension(String),
    #[error("malformed dataset '{path}': {reason}")]
    Malformed { path: String, reason: String },
    #[error("recording container error: {0}")]
    Container(#[from] spike_core::xdf::XdfError),
    #[error("stream error: {0}")]
    Stream(#[from] spike_stream::StreamError),
}
