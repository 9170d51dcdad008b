//! Source replayer: reads a recorded dataset and publishes it onto the bus
//! sample-by-sample at the configured rate, paced by a PD controller.

pub mod dataset;
pub mod error;
pub mod pacing;
pub mod replayer;

pub use dataset::Dataset;
pub use error::SourceError;
pub use pacing::PacingController;
pub use replayer::Replayer;
