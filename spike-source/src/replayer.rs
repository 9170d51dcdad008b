//! The replay loop: emit, pace, wrap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use spike_core::Config;
use spike_stream::{Outlet, SampleFormat, StreamInfo};

use crate::dataset::Dataset;
use crate::error::SourceError;
use crate::pacing::PacingController;

/// Publishes a dataset onto the bus at the configured sampling rate.
///
/// When the dataset's native rate exceeds the configured rate, every
/// `native/configured`-th sample is emitted (integer downsampling); at end
/// of data the position wraps to the start and replay continues.
pub struct Replayer {
    cfg: Config,
    dataset: Dataset,
}

impl Replayer {
    pub fn new(cfg: Config, dataset: Dataset) -> Self {
        Self { cfg, dataset }
    }

    /// Dataset positions advanced per emitted sample.
    pub fn step_size(&self) -> u64 {
        let native = self.dataset.native_rate() as u64;
        let configured = self.cfg.sampling_rate as u64;
        if native > configured {
            (native / configured).max(1)
        } else {
            1
        }
    }

    /// Run until `shutdown` is raised. Never returns on its own.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), SourceError> {
        let mut outlet = Outlet::new(StreamInfo::new(
            self.cfg.stream_name.clone(),
            "EEG",
            self.cfg.n_channel,
            self.cfg.sampling_rate,
            SampleFormat::Double64,
            "spike-source",
        ))?;

        let rate = self.cfg.sampling_rate;
        let step_size = self.step_size();
        let update_period = PacingController::update_period(rate);
        let sleep_period = PacingController::sleep_period(rate);
        let mut pacer = PacingController::new(rate);
        log::info!(
            "replaying {} samples ({} ch @ {} Hz native) at {} Hz, step {}",
            self.dataset.len(),
            self.dataset.channel_count(),
            self.dataset.native_rate(),
            rate,
            step_size
        );

        let mut sample = vec![0.0f64; self.cfg.n_channel];
        let mut ts: u64 = 0;
        let mut emitted: u64 = 0;
        let mut second_started = Instant::now();
        let mut update_started = Instant::now();

        while !shutdown.load(Ordering::SeqCst) {
            self.dataset.fill_sample(ts, &mut sample);
            outlet.push_sample(&sample)?;
            ts += step_size;
            emitted += 1;

            if emitted % rate as u64 == 0 {
                let elapsed = second_started.elapsed();
                second_started = Instant::now();
                log::info!(
                    "{} s of dataset replayed (last second took {} us)",
                    emitted / rate as u64,
                    elapsed.as_micros()
                );
            }

            if emitted % update_period == 0 {
                let measured = update_started.elapsed();
                update_started = Instant::now();
                pacer.on_interval(measured.as_micros() as f64);
            }

            if emitted % sleep_period == 0 {
                let sleep = pacer.sleep_us();
                if sleep >= 1.0 {
                    std::thread::sleep(Duration::from_micros(sleep as u64));
                }
            }

            if ts >= self.dataset.len() {
                log::debug!("dataset wrapped at position {}", ts);
                ts = 0;
            }
        }
        log::info!("replay stopped after {} samples", emitted);
        Ok(())
    }
}
