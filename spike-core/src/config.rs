//! Pipeline configuration: YAML model, loader and validation.
//!
//! Both binaries read the same file; each one consumes the sections it
//! needs. Unknown top-level keys are ignored with a warning, missing
//! required keys fail with an error naming the key.

use std::fmt;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Default config path when no CLI argument is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.yaml";

/// Configuration errors. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Filter family selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterClass {
    Iir,
    Fir,
}

/// Filter response type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Bandpass,
    Lowpass,
    Highpass,
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterType::Bandpass => write!(f, "bandpass"),
            FilterType::Lowpass => write!(f, "lowpass"),
            FilterType::Highpass => write!(f, "highpass"),
        }
    }
}

/// Per-channel filter settings.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    /// Filter family: `iir` or `fir`
    pub class: FilterClass,
    /// Filter order (FIR: tap count)
    pub order: usize,
    /// Lower cutoff in Hz
    pub lowcut: f64,
    /// Upper cutoff in Hz
    pub highcut: f64,
    /// Response type: bandpass, lowpass or highpass
    #[serde(rename = "type")]
    pub filter_type: FilterType,
}

/// Spike detection settings. The whole section is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Threshold multiplier: fire when filtered < -k * stddev
    pub threshold_k: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self { threshold_k: 5.0 }
    }
}

/// Raw-data recording settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    /// Whether to record the raw input stream to disk
    pub do_record: bool,
    /// Recording length in seconds
    pub duration_s: u32,
    /// Output directory
    pub path: String,
    /// Output file name
    pub file_name: String,
}

/// Window buffer geometry.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    /// Number of completed windows kept in memory
    pub size: usize,
    /// Samples per window
    pub window_size: usize,
}

/// Classifier model settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Path to the pre-trained model file
    pub path: String,
    /// Waveform snippet length fed to the model
    pub input_size: usize,
}

/// Full pipeline configuration, immutable after load.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Electrode channel count
    pub n_channel: usize,
    /// Nominal sampling rate in Hz
    pub sampling_rate: u32,
    /// Name of the raw input stream on the bus
    pub stream_name: String,
    /// Dataset replayed by the source binary
    pub sim_data_path: String,
    /// Whether a channel layout mapping is in use (dashboard concern)
    pub use_layout: bool,
    /// Path to the channel layout mapping
    pub mapping_path: String,
    pub filter: FilterConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    pub recording: RecordingConfig,
    pub buffer: BufferConfig,
    pub model: ModelConfig,
}

/// Top-level keys the loader understands; anything else warns.
const KNOWN_KEYS: &[&str] = &[
    "n_channel",
    "sampling_rate",
    "stream_name",
    "sim_data_path",
    "use_layout",
    "mapping_path",
    "filter",
    "detection",
    "recording",
    "buffer",
    "model",
];

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(Path::new(path)).map_err(|source| {
            ConfigError::Read {
                path: path.to_string(),
                source,
            }
        })?;
        Self::from_yaml(&text)
    }

    /// Parse and validate a configuration document.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let doc: serde_yaml::Value = serde_yaml::from_str(text)?;
        if let serde_yaml::Value::Mapping(map) = &doc {
            for key in map.keys() {
                if let serde_yaml::Value::String(name) = key {
                    if !KNOWN_KEYS.contains(&name.as_str()) {
                        log::warn!("ignoring unknown config key `{}`", name);
                    }
                }
            }
        }
        let cfg: Config = serde_yaml::from_value(doc)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.into(),
            }
        }

        if self.n_channel < 1 {
            return Err(invalid("n_channel", "must be at least 1"));
        }
        if self.sampling_rate < 1 {
            return Err(invalid("sampling_rate", "must be at least 1 Hz"));
        }
        if self.filter.order < 1 {
            return Err(invalid("filter.order", "must be at least 1"));
        }
        let nyquist = self.sampling_rate as f64 / 2.0;
        let check_cut = |field: &'static str, value: f64| -> Result<(), ConfigError> {
            if value <= 0.0 || value >= nyquist {
                return Err(invalid(
                    field,
                    format!("{} Hz is outside (0, {} Hz)", value, nyquist),
                ));
            }
            Ok(())
        };
        match self.filter.filter_type {
            FilterType::Bandpass => {
                check_cut("filter.lowcut", self.filter.lowcut)?;
                check_cut("filter.highcut", self.filter.highcut)?;
                if self.filter.lowcut >= self.filter.highcut {
                    return Err(invalid("filter.lowcut", "must be below filter.highcut"));
                }
            }
            FilterType::Lowpass => check_cut("filter.lowcut", self.filter.lowcut)?,
            FilterType::Highpass => check_cut("filter.highcut", self.filter.highcut)?,
        }
        if self.detection.threshold_k <= 0.0 {
            return Err(invalid("detection.threshold_k", "must be positive"));
        }
        if self.buffer.size < 1 {
            return Err(invalid("buffer.size", "must be at least 1"));
        }
        if self.buffer.window_size < 1 {
            return Err(invalid("buffer.window_size", "must be at least 1"));
        }
        if self.model.input_size < 2 || self.model.input_size % 2 != 0 {
            return Err(invalid("model.input_size", "must be even and at least 2"));
        }
        if self.model.input_size > self.buffer.window_size {
            return Err(invalid(
                "model.input_size",
                "must not exceed buffer.window_size",
            ));
        }
        Ok(())
    }

    /// Echo the loaded configuration, one section per line.
    pub fn log_summary(&self) {
        log::info!(
            "config: {} channels @ {} Hz, stream '{}'",
            self.n_channel,
            self.sampling_rate,
            self.stream_name
        );
        log::info!(
            "filter: {:?} order {} {} {}-{} Hz",
            self.filter.class,
            self.filter.order,
            self.filter.filter_type,
            self.filter.lowcut,
            self.filter.highcut
        );
        log::info!(
            "buffer: {} windows x {} samples, detection threshold {}σ",
            self.buffer.size,
            self.buffer.window_size,
            self.detection.threshold_k
        );
        log::info!(
            "recording: enabled={} duration={}s -> {}/{}",
            self.recording.do_record,
            self.recording.duration_s,
            self.recording.path,
            self.recording.file_name
        );
        log::info!(
            "model: {} (input size {})",
            self.model.path,
            self.model.input_size
        );
    }

    /// Number of samples covered by the recording window.
    pub fn recording_limit(&self) -> u64 {
        self.recording.duration_s as u64 * self.sampling_rate as u64
    }
}
