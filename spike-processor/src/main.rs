//! Stream processor binary: pulls the raw stream off the bus, runs the
//! pipeline and republishes filtered samples and classified spikes.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spike_core::config::DEFAULT_CONFIG_PATH;
use spike_core::xdf::XdfWriter;
use spike_core::Config;
use spike_stream::{resolve, Inlet, Outlet, SampleFormat, StreamInfo};

use spike_processor::model::OnnxClassifier;
use spike_processor::recording::Recorder;
use spike_processor::{Pipeline, ProcessorError};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let code = match run() {
        Ok(()) => 0,
        Err(e) => {
            log::error!("{}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<(), ProcessorError> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    log::info!("using config {}", config_path);
    let cfg = Config::load(&config_path)?;
    cfg.log_summary();

    let classifier = OnnxClassifier::load(&cfg.model.path, cfg.model.input_size)?;

    let recorder = if cfg.recording.do_record {
        let path = Path::new(&cfg.recording.path).join(&cfg.recording.file_name);
        log::info!("recording raw stream to {}", path.display());
        let writer = XdfWriter::create(&path)?;
        Some(Recorder::start(writer, &cfg)?)
    } else {
        None
    };

    // Connect to the raw stream, then open the two derived outlets.
    let info = resolve(&cfg.stream_name, spike_stream::RESOLVE_TIMEOUT)?;
    if info.channel_count != cfg.n_channel {
        return Err(spike_stream::StreamError::ChannelMismatch {
            name: info.name.clone(),
            expected: cfg.n_channel,
            actual: info.channel_count,
        }
        .into());
    }
    let mut inlet = Inlet::connect(&info)?;

    let mut filtered_outlet = Outlet::new(StreamInfo::new(
        format!("{}_filtered", cfg.stream_name),
        "EEG",
        2 * cfg.n_channel,
        cfg.sampling_rate,
        SampleFormat::Int16,
        format!("{}-filtered", cfg.stream_name),
    ))?;
    let mut spike_outlet = Outlet::new(StreamInfo::new(
        "spikes",
        "EEG",
        cfg.model.input_size + 1,
        0,
        SampleFormat::Int16,
        format!("{}-spikes", cfg.stream_name),
    ))?;

    let mut pipeline = Pipeline::new(&cfg, classifier, recorder)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| ProcessorError::Io(std::io::Error::other(e)))?;

    let mut raw = vec![0.0f64; cfg.n_channel];
    let result = loop {
        if shutdown.load(Ordering::SeqCst) {
            log::info!("shutdown requested");
            break Ok(());
        }
        if let Err(e) = inlet.pull_sample(&mut raw) {
            break Err(ProcessorError::from(e));
        }
        let out = pipeline.step(&raw, |spike| {
            if let Err(e) = spike_outlet.push_sample(spike) {
                log::warn!("spike publish failed: {}", e);
            }
        });
        if let Err(e) = filtered_outlet.push_sample(out) {
            log::warn!("filtered publish failed: {}", e);
        }
    };

    pipeline.shutdown(|spike| {
        if let Err(e) = spike_outlet.push_sample(spike) {
            log::warn!("spike publish failed: {}", e);
        }
    });
    let stats = inlet.stats();
    log::info!(
        "processed {} samples, {} spikes ({} packets pulled, {} dropped, {} gaps)",
        pipeline.sample_index(),
        pipeline.spikes_processed(),
        stats.packets_received,
        stats.frames_dropped,
        stats.gaps_detected
    );
    result
}
