//! The steady-state sample loop: filter, track statistics, detect, buffer,
//! extract, classify, record. Transport stays outside; the binary feeds raw
//! samples in and publishes what comes out.

use std::time::Instant;

use spike_core::Config;

use crate::detector::SpikeDetector;
use crate::dsp::{self, ChannelFilter, RunningStats};
use crate::error::ProcessorError;
use crate::extractor::{SpikeEvent, WaveformExtractor};
use crate::model::Classifier;
use crate::recording::{ChunkSink, Recorder};
use crate::window::WindowBuffer;

/// Per-sample processing core. All mutable state lives here and never
/// escapes; one `step` call per pulled sample keeps everything
/// single-threaded and allocation-free.
#[derive(Debug)]
pub struct Pipeline<C: Classifier, S: ChunkSink> {
    n_channel: usize,
    sampling_rate: u32,
    filters: Vec<ChannelFilter>,
    stats: Vec<RunningStats>,
    detector: SpikeDetector,
    windows: WindowBuffer,
    extractor: WaveformExtractor,
    classifier: C,
    recorder: Option<Recorder<S>>,
    sample_index: u64,
    filtered: Vec<f64>,
    interleaved: Vec<f64>,
    spike_vec: Vec<f64>,
    spikes_processed: u64,
    second_started: Instant,
    last_classifier_log: Option<Instant>,
}

impl<C: Classifier, S: ChunkSink> Pipeline<C, S> {
    pub fn new(
        cfg: &Config,
        classifier: C,
        recorder: Option<Recorder<S>>,
    ) -> Result<Self, ProcessorError> {
        if classifier.input_size() != cfg.model.input_size {
            return Err(ProcessorError::Classifier(format!(
                "classifier input size {} does not match configured {}",
                classifier.input_size(),
                cfg.model.input_size
            )));
        }
        Ok(Self {
            n_channel: cfg.n_channel,
            sampling_rate: cfg.sampling_rate,
            filters: dsp::build_bank(&cfg.filter, cfg.sampling_rate, cfg.n_channel)?,
            stats: vec![RunningStats::new(); cfg.n_channel],
            detector: SpikeDetector::new(
                cfg.n_channel,
                cfg.sampling_rate,
                cfg.detection.threshold_k,
            ),
            windows: WindowBuffer::new(cfg.buffer.window_size, cfg.buffer.size, cfg.n_channel),
            extractor: WaveformExtractor::new(cfg.buffer.window_size, cfg.model.input_size),
            classifier,
            recorder,
            sample_index: 0,
            filtered: vec![0.0; cfg.n_channel],
            interleaved: vec![0.0; 2 * cfg.n_channel],
            spike_vec: Vec::with_capacity(cfg.model.input_size + 1),
            spikes_processed: 0,
            second_started: Instant::now(),
            last_classifier_log: None,
        })
    }

    pub fn sample_index(&self) -> u64 {
        self.sample_index
    }

    pub fn spikes_processed(&self) -> u64 {
        self.spikes_processed
    }

    /// Process one pulled raw sample. Returns the interleaved
    /// `(raw, filtered)` output vector to publish; `publish_spike` is
    /// invoked with `[channel_id, w_0, .., w_{L-1}]` for every classified
    /// waveform extracted at a window boundary crossed by this sample.
    pub fn step<P>(&mut self, raw: &[f64], mut publish_spike: P) -> &[f64]
    where
        P: FnMut(&[f64]),
    {
        debug_assert_eq!(raw.len(), self.n_channel);
        let idx = self.sample_index;

        for channel in 0..self.n_channel {
            let y = self.filters[channel].step(raw[channel]);
            self.filtered[channel] = y;
            self.stats[channel].update(y);
            let stddev = self.stats[channel].stddev();
            if self.detector.check(channel, idx, y, stddev) {
                self.extractor.enqueue(SpikeEvent::new(channel, idx));
            }
        }

        self.windows.push(idx, &self.filtered);
        if self.windows.active_is_full() {
            self.drain_events(&mut publish_spike);
            self.windows.rotate();
        }

        for channel in 0..self.n_channel {
            self.interleaved[2 * channel] = raw[channel];
            self.interleaved[2 * channel + 1] = self.filtered[channel];
        }

        if let Some(recorder) = self.recorder.as_mut() {
            recorder.on_sample(idx, raw);
        }

        self.sample_index += 1;
        if self.sample_index % self.sampling_rate as u64 == 0 {
            let elapsed = self.second_started.elapsed();
            self.second_started = Instant::now();
            log::info!(
                "{} s of stream processed (last second took {} us, {} spikes so far)",
                self.sample_index / self.sampling_rate as u64,
                elapsed.as_micros(),
                self.spikes_processed
            );
        }

        &self.interleaved
    }

    /// Classify and hand out everything extractable at a window boundary.
    fn drain_events<P>(&mut self, publish_spike: &mut P)
    where
        P: FnMut(&[f64]),
    {
        let extractor = &mut self.extractor;
        let windows = &self.windows;
        let classifier = &mut self.classifier;
        let spike_vec = &mut self.spike_vec;
        let spikes_processed = &mut self.spikes_processed;
        let last_classifier_log = &mut self.last_classifier_log;

        extractor.drain_boundary(windows, |channel, waveform| {
            match classifier.classify(waveform) {
                Ok(label) => {
                    spike_vec.clear();
                    spike_vec.push(channel as f64);
                    spike_vec.extend_from_slice(waveform);
                    publish_spike(spike_vec);
                    *spikes_processed += 1;
                    log::debug!(
                        "spike on channel {} classified as {} (score {:.3})",
                        channel,
                        label.class,
                        label.score
                    );
                }
                Err(e) => {
                    // Inference failures skip the spike; report at most one
                    // line per second.
                    let due = last_classifier_log
                        .map(|t: Instant| t.elapsed().as_secs() >= 1)
                        .unwrap_or(true);
                    if due {
                        log::warn!("classifier failed, spike skipped: {}", e);
                        *last_classifier_log = Some(Instant::now());
                    }
                }
            }
        });
    }

    /// Clean-shutdown hook: flush queued events against the partial active
    /// window and seal the recording if one is open.
    pub fn shutdown<P>(&mut self, mut publish_spike: P)
    where
        P: FnMut(&[f64]),
    {
        log::info!(
            "flushing pipeline: {} samples in the active window, {} queued events",
            self.windows.active().len(),
            self.extractor.queue_len()
        );
        self.drain_events(&mut publish_spike);
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.finalize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SpikeLabel;
    use spike_core::xdf::XdfWriter;

    /// Classifier double: counts calls, optionally fails.
    #[derive(Debug)]
    struct MockClassifier {
        input_size: usize,
        calls: usize,
        fail: bool,
    }

    impl MockClassifier {
        fn new(input_size: usize) -> Self {
            Self {
                input_size,
                calls: 0,
                fail: false,
            }
        }
    }

    impl Classifier for MockClassifier {
        fn input_size(&self) -> usize {
            self.input_size
        }

        fn classify(&mut self, waveform: &[f64]) -> Result<SpikeLabel, ProcessorError> {
            self.calls += 1;
            assert_eq!(waveform.len(), self.input_size);
            if self.fail {
                return Err(ProcessorError::Classifier("mock failure".into()));
            }
            Ok(SpikeLabel {
                class: 1,
                score: 0.9,
            })
        }
    }

    type TestPipeline = Pipeline<MockClassifier, XdfWriter<Vec<u8>>>;

    fn test_config() -> Config {
        Config::from_yaml(
            r#"
n_channel: 1
sampling_rate: 100
stream_name: PipeTest
sim_data_path: data/test.spike
use_layout: false
mapping_path: config/mapping.json
filter:
  class: iir
  order: 2
  lowcut: 2.0
  highcut: 20.0
  type: bandpass
recording:
  do_record: false
  duration_s: 1
  path: data
  file_name: out.xdf
buffer:
  size: 3
  window_size: 100
model:
  path: model/sorter.onnx
  input_size: 8
"#,
        )
        .unwrap()
    }

    fn feed_background(pipeline: &mut TestPipeline, count: usize, published: &mut Vec<Vec<f64>>) {
        // In-band sine keeps the running stddev well above zero.
        for n in 0..count {
            let x = (n as f64 * 2.0 * std::f64::consts::PI * 8.0 / 100.0).sin() * 0.1;
            let out = pipeline.step(&[x], |s| published.push(s.to_vec()));
            assert_eq!(out.len(), 2);
        }
    }

    #[test]
    fn detects_and_publishes_a_spike() {
        let cfg = test_config();
        let mut pipeline: TestPipeline =
            Pipeline::new(&cfg, MockClassifier::new(8), None).unwrap();
        let mut published = Vec::new();

        // Warm-up covers 5 s * 100 Hz = 500 samples; go to 750 (mid-window),
        // then inject a strong negative deflection.
        feed_background(&mut pipeline, 750, &mut published);
        assert!(published.is_empty());
        for _ in 0..3 {
            pipeline.step(&[-50.0], |s| published.push(s.to_vec()));
        }
        // Run past the next boundary so extraction and classification fire.
        let mut tail = Vec::new();
        feed_background(&mut pipeline, 100, &mut tail);
        published.extend(tail);

        assert!(!published.is_empty(), "no spike published");
        let spike = &published[0];
        assert_eq!(spike.len(), 9, "spike vector is [channel, w_0..w_7]");
        assert_eq!(spike[0], 0.0, "channel id");
        assert_eq!(pipeline.spikes_processed(), published.len() as u64);
    }

    #[test]
    fn interleaved_output_carries_raw_and_filtered() {
        let cfg = test_config();
        let mut pipeline: TestPipeline =
            Pipeline::new(&cfg, MockClassifier::new(8), None).unwrap();
        let out = pipeline.step(&[3.5], |_| {});
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], 3.5);
        // Bandpass output of the very first sample is attenuated input.
        assert!(out[1].abs() < 3.5);
    }

    #[test]
    fn classifier_failure_skips_the_spike() {
        let cfg = test_config();
        let mut classifier = MockClassifier::new(8);
        classifier.fail = true;
        let mut pipeline: TestPipeline = Pipeline::new(&cfg, classifier, None).unwrap();
        let mut published = Vec::new();

        feed_background(&mut pipeline, 750, &mut published);
        for _ in 0..3 {
            pipeline.step(&[-50.0], |s| published.push(s.to_vec()));
        }
        feed_background(&mut pipeline, 100, &mut published);

        assert!(published.is_empty());
        assert_eq!(pipeline.spikes_processed(), 0);
        assert!(pipeline.classifier.calls > 0, "classifier was consulted");
    }

    #[test]
    fn input_size_mismatch_is_rejected() {
        let cfg = test_config();
        let err = Pipeline::<_, XdfWriter<Vec<u8>>>::new(&cfg, MockClassifier::new(16), None)
            .unwrap_err();
        assert!(matches!(err, ProcessorError::Classifier(_)));
    }

    #[test]
    fn sample_index_is_contiguous() {
        let cfg = test_config();
        let mut pipeline: TestPipeline =
            Pipeline::new(&cfg, MockClassifier::new(8), None).unwrap();
        for expected in 0..1000u64 {
            assert_eq!(pipeline.sample_index(), expected);
            pipeline.step(&[0.0], |_| {});
        }
    }

    #[test]
    fn shutdown_flushes_queued_events() {
        let cfg = test_config();
        let mut pipeline: TestPipeline =
            Pipeline::new(&cfg, MockClassifier::new(8), None).unwrap();
        let mut published = Vec::new();

        // Stop mid-window with an event queued behind the last boundary.
        feed_background(&mut pipeline, 750, &mut published);
        pipeline.step(&[-50.0], |s| published.push(s.to_vec()));
        feed_background(&mut pipeline, 20, &mut published);
        assert!(published.is_empty());

        pipeline.shutdown(|s| published.push(s.to_vec()));
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].len(), 9);
    }
}
