//! Shared plumbing for the spike streaming pipeline: the YAML configuration
//! model used by both binaries, and the recording-container chunk codec.

pub mod config;
pub mod xdf;

pub use config::{Config, ConfigError};
