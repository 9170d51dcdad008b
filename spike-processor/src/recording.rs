//! Raw-stream recording: chunk-sink contract, XML framing and the
//! per-sample recorder state machine.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use spike_core::xdf::{XdfError, XdfWriter};
use spike_core::Config;

/// Recording-container contract. The pipeline only ever emits this chunk
/// sequence: one stream header, data chunks, one boundary, one footer.
pub trait ChunkSink {
    fn write_stream_header(&mut self, stream_id: u32, xml: &str) -> Result<(), XdfError>;
    fn write_data_chunk(
        &mut self,
        stream_id: u32,
        timestamps: &[f64],
        samples: &[f64],
        channel_count: usize,
    ) -> Result<(), XdfError>;
    fn write_boundary_chunk(&mut self) -> Result<(), XdfError>;
    fn write_stream_footer(&mut self, stream_id: u32, xml: &str) -> Result<(), XdfError>;
}

impl<W: std::io::Write> ChunkSink for XdfWriter<W> {
    fn write_stream_header(&mut self, stream_id: u32, xml: &str) -> Result<(), XdfError> {
        XdfWriter::write_stream_header(self, stream_id, xml)
    }

    fn write_data_chunk(
        &mut self,
        stream_id: u32,
        timestamps: &[f64],
        samples: &[f64],
        channel_count: usize,
    ) -> Result<(), XdfError> {
        XdfWriter::write_data_chunk(self, stream_id, timestamps, samples, channel_count)
    }

    fn write_boundary_chunk(&mut self) -> Result<(), XdfError> {
        XdfWriter::write_boundary_chunk(self)
    }

    fn write_stream_footer(&mut self, stream_id: u32, xml: &str) -> Result<(), XdfError> {
        XdfWriter::write_stream_footer(self, stream_id, xml)
    }
}

/// Stream-header XML for a recording of the raw input.
pub fn header_xml(cfg: &Config) -> String {
    let created_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    format!(
        "<?xml version=\"1.0\"?><info><name>{}</name><type>EEG</type>\
         <channel_count>{}</channel_count><nominal_srate>{}</nominal_srate>\
         <channel_format>double64</channel_format><created_at>{}</created_at></info>",
        cfg.stream_name, cfg.n_channel, cfg.sampling_rate, created_at
    )
}

/// Stream-footer XML: full-recording bounds plus a single zero clock offset.
pub fn footer_xml(cfg: &Config) -> String {
    format!(
        "<?xml version=\"1.0\"?><info><first_timestamp>0.0</first_timestamp>\
         <last_timestamp>{}</last_timestamp><sample_count>{}</sample_count>\
         <clock_offsets><offset><time>0</time><value>0</value></offset>\
         </clock_offsets></info>",
        cfg.recording.duration_s,
        cfg.recording_limit()
    )
}

/// Writes the raw stream for the configured duration, then seals the file.
///
/// Chunk timestamps are seconds (`sample_index / sampling_rate`). A write
/// failure mid-run disables recording and the pipeline carries on; failure
/// reports are throttled to one line per second.
#[derive(Debug)]
pub struct Recorder<S: ChunkSink> {
    sink: S,
    limit: u64,
    sampling_rate: u32,
    active: bool,
    finalized: bool,
    footer: String,
    last_failure_log: Option<Instant>,
}

impl<S: ChunkSink> Recorder<S> {
    /// Write the stream header and arm the recorder.
    pub fn start(mut sink: S, cfg: &Config) -> Result<Self, XdfError> {
        sink.write_stream_header(0, &header_xml(cfg))?;
        Ok(Self {
            sink,
            limit: cfg.recording_limit(),
            sampling_rate: cfg.sampling_rate,
            active: true,
            finalized: false,
            footer: footer_xml(cfg),
            last_failure_log: None,
        })
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Feed one raw sample. Data chunks cover `sample_index < limit`; at
    /// exactly `limit` the boundary and footer go out and recording stops.
    pub fn on_sample(&mut self, sample_index: u64, raw: &[f64]) {
        if !self.active {
            return;
        }
        if sample_index < self.limit {
            let ts = sample_index as f64 / self.sampling_rate as f64;
            if let Err(e) = self.sink.write_data_chunk(0, &[ts], raw, raw.len()) {
                self.disable_on_failure(e);
            }
        } else if sample_index == self.limit {
            log::info!("recording complete at {} samples", self.limit);
            self.finalize();
        }
    }

    /// Seal the file if it is still open. Safe to call more than once.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.active = false;
        self.finalized = true;
        if let Err(e) = self
            .sink
            .write_boundary_chunk()
            .and_then(|_| self.sink.write_stream_footer(0, &self.footer))
        {
            log::error!("failed to seal recording: {}", e);
        }
    }

    /// Tear down the recorder and hand back its sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    fn disable_on_failure(&mut self, error: XdfError) {
        self.active = false;
        let due = self
            .last_failure_log
            .map(|t| t.elapsed().as_secs() >= 1)
            .unwrap_or(true);
        if due {
            log::error!("recorder write failed, recording disabled: {}", error);
            self.last_failure_log = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(n_channel: usize, sampling_rate: u32, duration_s: u32) -> Config {
        let yaml = format!(
            r#"
n_channel: {}
sampling_rate: {}
stream_name: RecTest
sim_data_path: data/test.spike
use_layout: false
mapping_path: config/mapping.json
filter:
  class: iir
  order: 2
  lowcut: 300.0
  highcut: 3000.0
  type: bandpass
recording:
  do_record: true
  duration_s: {}
  path: data
  file_name: out.xdf
buffer:
  size: 5
  window_size: 1000
model:
  path: model/sorter.onnx
  input_size: 32
"#,
            n_channel, sampling_rate, duration_s
        );
        Config::from_yaml(&yaml).unwrap()
    }

    /// Counting sink used to verify the chunk sequence.
    #[derive(Default)]
    struct CountingSink {
        headers: Vec<String>,
        data_chunks: u64,
        boundaries: u64,
        footers: Vec<String>,
        /// Order tokens: 'h', 'd' (collapsed), 'b', 'f'.
        order: Vec<char>,
        fail_data: bool,
    }

    impl ChunkSink for CountingSink {
        fn write_stream_header(&mut self, _id: u32, xml: &str) -> Result<(), XdfError> {
            self.headers.push(xml.to_string());
            self.order.push('h');
            Ok(())
        }

        fn write_data_chunk(
            &mut self,
            _id: u32,
            _ts: &[f64],
            _samples: &[f64],
            _channels: usize,
        ) -> Result<(), XdfError> {
            if self.fail_data {
                return Err(XdfError::Malformed("forced failure".into()));
            }
            self.data_chunks += 1;
            if self.order.last() != Some(&'d') {
                self.order.push('d');
            }
            Ok(())
        }

        fn write_boundary_chunk(&mut self) -> Result<(), XdfError> {
            self.boundaries += 1;
            self.order.push('b');
            Ok(())
        }

        fn write_stream_footer(&mut self, _id: u32, xml: &str) -> Result<(), XdfError> {
            self.footers.push(xml.to_string());
            self.order.push('f');
            Ok(())
        }
    }

    #[test]
    fn framing_sequence_and_chunk_count() {
        // duration 20 s at 30 kHz: exactly 600_000 data chunks, then one
        // boundary, then one footer.
        let cfg = test_config(4, 30_000, 20);
        let mut recorder = Recorder::start(CountingSink::default(), &cfg).unwrap();
        let raw = [0.0; 4];
        for idx in 0..=600_100u64 {
            recorder.on_sample(idx, &raw);
        }
        let sink = &recorder.sink;
        assert_eq!(sink.data_chunks, 600_000);
        assert_eq!(sink.boundaries, 1);
        assert_eq!(sink.footers.len(), 1);
        assert_eq!(sink.headers.len(), 1);
        assert_eq!(sink.order, vec!['h', 'd', 'b', 'f']);
        assert!(!recorder.is_active());
    }

    #[test]
    fn header_carries_channel_count() {
        let cfg = test_config(96, 30_000, 20);
        let xml = header_xml(&cfg);
        assert!(xml.contains("<channel_count>96</channel_count>"));
        assert!(xml.contains("<channel_format>double64</channel_format>"));
        assert!(xml.contains("<nominal_srate>30000</nominal_srate>"));
    }

    #[test]
    fn footer_carries_bounds() {
        let cfg = test_config(4, 30_000, 20);
        let xml = footer_xml(&cfg);
        assert!(xml.contains("<last_timestamp>20</last_timestamp>"));
        assert!(xml.contains("<sample_count>600000</sample_count>"));
        assert!(xml.contains("<offset><time>0</time><value>0</value></offset>"));
    }

    #[test]
    fn write_failure_disables_recording() {
        let cfg = test_config(2, 1000, 1);
        let mut sink = CountingSink::default();
        sink.fail_data = true;
        let mut recorder = Recorder::start(sink, &cfg).unwrap();
        recorder.on_sample(0, &[0.0, 0.0]);
        assert!(!recorder.is_active());
        // Later samples are ignored without touching the sink again.
        recorder.on_sample(1, &[0.0, 0.0]);
        assert_eq!(recorder.sink.data_chunks, 0);
    }

    #[test]
    fn recording_reads_back_verbatim() {
        // A replay of the recording must see exactly the raw samples that
        // went in, at second-based timestamps.
        let cfg = test_config(2, 1000, 1);
        let writer = XdfWriter::new(Vec::new()).unwrap();
        let mut recorder = Recorder::start(writer, &cfg).unwrap();
        for idx in 0..=1000u64 {
            let raw = [idx as f64, -(idx as f64)];
            recorder.on_sample(idx, &raw);
        }
        assert!(!recorder.is_active());

        let bytes = recorder.into_sink().into_inner();
        let streams = spike_core::xdf::read_streams(&bytes[..]).unwrap();
        assert_eq!(streams.len(), 1);
        let s = &streams[0];
        assert_eq!(s.channel_count, 2);
        assert_eq!(s.nominal_srate, 1000.0);
        assert_eq!(s.len(), 1000);
        assert_eq!(s.samples[0..2], [0.0, 0.0]);
        assert_eq!(s.samples[2..4], [1.0, -1.0]);
        assert_eq!(s.samples[1998..2000], [999.0, -999.0]);
        assert!((s.timestamps[999] - 0.999).abs() < 1e-12);
    }

    #[test]
    fn early_finalize_seals_once() {
        let cfg = test_config(2, 1000, 10);
        let mut recorder = Recorder::start(CountingSink::default(), &cfg).unwrap();
        recorder.on_sample(0, &[1.0, 2.0]);
        recorder.finalize();
        recorder.finalize();
        assert_eq!(recorder.sink.boundaries, 1);
        assert_eq!(recorder.sink.footers.len(), 1);
    }
}
