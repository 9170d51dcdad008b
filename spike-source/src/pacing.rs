//! PD controller pacing the replay loop against wall-clock time.
//!
//! The loop measures the wall time of each update interval and nudges the
//! per-iteration sleep so the measured interval converges on the setpoint.
//! Only the sleep changes; emission order and counts are untouched.

/// Measurement points per second.
pub const SLEEP_UPDATE_RATE: u32 = 200;

/// Proportional gain.
pub const KP: f64 = 0.02;

/// Derivative gain.
pub const KD: f64 = 0.005;

/// Closed-loop sleep regulator.
#[derive(Debug)]
pub struct PacingController {
    expected_us: f64,
    sleep_us: f64,
    prev_error: f64,
}

impl PacingController {
    /// Start with a deliberate underestimate of the sleep; the controller
    /// trims it up within the first updates.
    pub fn new(sampling_rate: u32) -> Self {
        Self {
            expected_us: 1_000_000.0 / SLEEP_UPDATE_RATE as f64,
            sleep_us: 1.0 / sampling_rate as f64 * 1_000_000.0 * 0.85,
            prev_error: 0.0,
        }
    }

    /// Interval the controller drives the measurement toward, in µs.
    pub fn setpoint_us(&self) -> f64 {
        self.expected_us
    }

    /// Current sleep duration in µs.
    pub fn sleep_us(&self) -> f64 {
        self.sleep_us
    }

    /// Feed one measured update interval (µs) and adjust the sleep.
    pub fn on_interval(&mut self, measured_us: f64) {
        let error = self.expected_us - measured_us;
        let derivative = (error - self.prev_error) / self.expected_us;
        self.sleep_us += KP * error + KD * derivative;
        if self.sleep_us < 0.0 {
            self.sleep_us = 0.0;
        }
        self.prev_error = error;
    }

    /// Samples between controller updates.
    pub fn update_period(sampling_rate: u32) -> u64 {
        (sampling_rate as u64 / SLEEP_UPDATE_RATE as u64).max(1)
    }

    /// Samples between sleeps: every sample at low rates, batched above
    /// 10 kHz where a per-sample sleep is finer than the OS can deliver.
    pub fn sleep_period(sampling_rate: u32) -> u64 {
        if sampling_rate <= 10_000 {
            1
        } else {
            (sampling_rate as u64 / 1_000).max(1)
        }
    }
}
