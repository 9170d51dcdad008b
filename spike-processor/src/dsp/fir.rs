//! Windowed-sinc FIR filter: Hamming-windowed design at construction,
//! modular-index tap ring at run time.

use std::f64::consts::PI;

use spike_core::config::FilterType;
use spike_core::ConfigError;

use crate::error::ProcessorError;

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Design a windowed-sinc tap set. Cutoffs in Hz, `numtaps = order`.
/// The response is normalized at the band's reference frequency: DC for
/// lowpass, Nyquist for highpass, band center for bandpass.
pub fn design(
    numtaps: usize,
    sampling_rate: f64,
    filter_type: FilterType,
    lowcut: f64,
    highcut: f64,
) -> Result<Vec<f64>, ProcessorError> {
    if filter_type == FilterType::Highpass && numtaps % 2 == 0 {
        return Err(ProcessorError::Config(ConfigError::Invalid {
            field: "filter.order",
            reason: "highpass FIR needs an odd tap count (even-length \
                     filters have a forced null at Nyquist)"
                .into(),
        }));
    }

    // Band edges in cycles per sample.
    let (lo, hi) = match filter_type {
        FilterType::Lowpass => (0.0, lowcut / sampling_rate),
        FilterType::Highpass => (highcut / sampling_rate, 0.5),
        FilterType::Bandpass => (lowcut / sampling_rate, highcut / sampling_rate),
    };

    let m = (numtaps as f64 - 1.0) / 2.0;
    let mut taps = Vec::with_capacity(numtaps);
    for n in 0..numtaps {
        let t = n as f64 - m;
        let ideal = 2.0 * hi * sinc(2.0 * hi * t) - 2.0 * lo * sinc(2.0 * lo * t);
        let window = if numtaps == 1 {
            1.0
        } else {
            0.54 - 0.46 * (2.0 * PI * n as f64 / (numtaps as f64 - 1.0)).cos()
        };
        taps.push(ideal * window);
    }

    // Normalize at the reference frequency of the pass band.
    let f_ref = match filter_type {
        FilterType::Lowpass => 0.0,
        FilterType::Highpass => 0.5,
        FilterType::Bandpass => (lo + hi) / 2.0,
    };
    let scale: f64 = taps
        .iter()
        .enumerate()
        .map(|(n, h)| h * (2.0 * PI * f_ref * (n as f64 - m)).cos())
        .sum();
    for h in &mut taps {
        *h /= scale;
    }
    Ok(taps)
}

/// FIR filter state: coefficient vector plus a ring of past inputs.
#[derive(Debug, Clone)]
pub struct FirFilter {
    coefficients: Vec<f64>,
    taps: Vec<f64>,
    input_index: usize,
}

impl FirFilter {
    pub fn new(
        order: usize,
        sampling_rate: f64,
        filter_type: FilterType,
        lowcut: f64,
        highcut: f64,
    ) -> Result<Self, ProcessorError> {
        let coefficients = design(order, sampling_rate, filter_type, lowcut, highcut)?;
        Ok(Self {
            taps: vec![0.0; coefficients.len()],
            coefficients,
            input_index: 0,
        })
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Process one sample: dot product of the coefficients with the tap
    /// ring, newest first.
    #[inline]
    pub fn step(&mut self, input: f64) -> f64 {
        let len = self.taps.len();
        self.taps[self.input_index] = input;
        let mut acc = 0.0;
        for (i, c) in self.coefficients.iter().enumerate() {
            let idx = (self.input_index + len - i) % len;
            acc += c * self.taps[idx];
        }
        self.input_index = (self.input_index + 1) % len;
        acc
    }
}
