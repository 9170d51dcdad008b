//! Per-channel threshold spike detection with refractory gating.

/// Samples to wait after an accepted event on the same channel. Crossings
/// closer than this are the same action potential seen twice.
pub const REFRACTORY_SAMPLES: u64 = 10;

/// Seconds of warm-up before detection starts, letting the running
/// standard deviation settle.
pub const WARMUP_SECONDS: u64 = 5;

/// Negative-threshold comparator over filtered samples.
///
/// Extracellular action potentials present as negative deflections, so only
/// downward crossings of `-k * stddev` fire. Detection itself never fails:
/// a zero stddev simply produces no events.
#[derive(Debug)]
pub struct SpikeDetector {
    threshold_k: f64,
    warmup_samples: u64,
    last_spike: Vec<u64>,
}

impl SpikeDetector {
    pub fn new(n_channel: usize, sampling_rate: u32, threshold_k: f64) -> Self {
        Self {
            threshold_k,
            warmup_samples: WARMUP_SECONDS * sampling_rate as u64,
            last_spike: vec![0; n_channel],
        }
    }

    /// Check one filtered value. Returns true when an event fires, in which
    /// case the channel's refractory mark advances to `sample_index`.
    #[inline]
    pub fn check(
        &mut self,
        channel: usize,
        sample_index: u64,
        filtered: f64,
        stddev: f64,
    ) -> bool {
        if sample_index <= self.warmup_samples || stddev <= 0.0 {
            return false;
        }
        if filtered >= -self.threshold_k * stddev {
            return false;
        }
        if sample_index <= self.last_spike[channel] + REFRACTORY_SAMPLES {
            return false;
        }
        self.last_spike[channel] = sample_index;
        true
    }
}
