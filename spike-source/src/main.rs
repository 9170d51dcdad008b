//! Source replayer binary: streams a recorded dataset onto the bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spike_core::config::DEFAULT_CONFIG_PATH;
use spike_core::Config;

use spike_source::{Dataset, Replayer, SourceError};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let code = match run() {
        Ok(()) => 0,
        Err(e) => {
            log::error!("{}", e);
            1
        }
    };
    std::process::exit(code);
}

fn run() -> Result<(), SourceError> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    log::info!("using config {}", config_path);
    let cfg = Config::load(&config_path)?;
    cfg.log_summary();

    let dataset = Dataset::open(&cfg.sim_data_path)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| SourceError::Io {
        path: "signal handler".into(),
        source: std::io::Error::other(e),
    })?;

    let mut replayer = Replayer::new(cfg, dataset);
    replayer.run(&shutdown)
}
