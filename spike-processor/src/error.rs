//! Processor error kinds and their exit-code mapping.

use thiserror::Error;

/// Errors surfaced by the processor. Startup errors are fatal; the exit
/// code distinguishes classifier-load failures from everything else.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("configuration error: {0}")]
    Config(#[from] spike_core::ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stream error: {0}")]
    Stream(#[from] spike_stream::StreamError),
    #[error("recording error: {0}")]
    Recording(#[from] spike_core::xdf::XdfError),
    #[error("classifier error: {0}")]
    Classifier(String),
    #[error("numeric error: {0}")]
    Numeric(String),
}

impl ProcessorError {
    /// CLI exit code for a startup failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            ProcessorError::Classifier(_) => 2,
            _ => 1,
        }
    }
}
