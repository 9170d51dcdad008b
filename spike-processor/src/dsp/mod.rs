//! Per-channel digital filtering and running statistics.

pub mod biquad;
pub mod fir;
pub mod iir;
pub mod stats;

pub use biquad::{Biquad, BUTTERWORTH_Q};
pub use fir::FirFilter;
pub use iir::IirFilter;
pub use stats::RunningStats;

use spike_core::config::{FilterClass, FilterConfig, FilterType};

use crate::error::ProcessorError;

/// One channel's filter, dispatched by tag. Order-2 IIR configurations get
/// the specialized biquad; everything else goes through the general paths.
#[derive(Debug, Clone)]
pub enum ChannelFilter {
    Biquad(Biquad),
    Fir(FirFilter),
    Iir(IirFilter),
}

impl ChannelFilter {
    /// Strictly causal single-sample update.
    #[inline]
    pub fn step(&mut self, input: f64) -> f64 {
        match self {
            ChannelFilter::Biquad(f) => f.step(input),
            ChannelFilter::Fir(f) => f.step(input),
            ChannelFilter::Iir(f) => f.step(input),
        }
    }
}

/// Build one filter from the configuration.
pub fn build_filter(
    cfg: &FilterConfig,
    sampling_rate: u32,
) -> Result<ChannelFilter, ProcessorError> {
    let rate = sampling_rate as f64;
    match cfg.class {
        FilterClass::Fir => Ok(ChannelFilter::Fir(FirFilter::new(
            cfg.order,
            rate,
            cfg.filter_type,
            cfg.lowcut,
            cfg.highcut,
        )?)),
        FilterClass::Iir if cfg.order == 2 => {
            let filter = match cfg.filter_type {
                FilterType::Bandpass => {
                    let center = (cfg.lowcut + cfg.highcut) / 2.0;
                    Biquad::bandpass(center, BUTTERWORTH_Q, rate)
                }
                FilterType::Lowpass => Biquad::lowpass(cfg.lowcut, rate),
                FilterType::Highpass => Biquad::highpass(cfg.highcut, rate),
            };
            Ok(ChannelFilter::Biquad(filter))
        }
        FilterClass::Iir => Ok(ChannelFilter::Iir(IirFilter::design(
            cfg.order,
            rate,
            cfg.filter_type,
            cfg.lowcut,
            cfg.highcut,
        )?)),
    }
}

/// Build the per-channel filter bank, one independent filter per channel.
pub fn build_bank(
    cfg: &FilterConfig,
    sampling_rate: u32,
    n_channel: usize,
) -> Result<Vec<ChannelFilter>, ProcessorError> {
    let mut bank = Vec::with_capacity(n_channel);
    for _ in 0..n_channel {
        bank.push(build_filter(cfg, sampling_rate)?);
    }
    Ok(bank)
}
