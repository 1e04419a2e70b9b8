// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Carrier monitor: detects, tracks and extracts carriers from an IQ stream.
//!
//! ```bash
//! carrier-monitor --source demo --duration-secs 10
//! carrier-monitor --source wav --path capture.wav --center-frequency 145.5e6
//! carrier-monitor --source file --path capture.cf32 --sample-rate 2.4e6 --json
//! ```

mod config;
mod report;
mod source;

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use carrier_dsp::{CarrierEvent, CarrierMonitor, WindowKind};
use clap::Parser;
use tokio::sync::broadcast::{self, error::TryRecvError};

use config::AppConfig;
use report::Report;
use source::SourceKind;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const DRAIN_POLL: Duration = Duration::from_millis(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect and extract carriers from IQ streams", long_about = None)]
struct Args {
    /// Source type
    #[arg(long, value_enum)]
    source: Option<SourceKind>,

    /// Input file (required for file and wav sources)
    #[arg(long)]
    path: Option<PathBuf>,

    /// FFT size in bins
    #[arg(long)]
    fft_size: Option<usize>,

    /// Frames overlapping each sample (frame step is fft-size / overlap)
    #[arg(long)]
    overlap: Option<usize>,

    /// Peak threshold in dB above the local floor
    #[arg(long, allow_hyphen_values = true)]
    threshold_db: Option<f32>,

    /// Frames averaged per PSD evaluation
    #[arg(long)]
    psd_average: Option<usize>,

    /// Window: hamming, vonhann, blackman or flattop
    #[arg(long)]
    window: Option<WindowKind>,

    /// Sample rate in Hz (WAV files carry their own)
    #[arg(long)]
    sample_rate: Option<f64>,

    /// Tuned center frequency in Hz
    #[arg(long)]
    center_frequency: Option<f64>,

    /// Samples per block handed to the monitor
    #[arg(long)]
    block_size: Option<usize>,

    /// Blocks queued ahead of the detector before input waits
    #[arg(long)]
    queue_limit: Option<usize>,

    /// Interval between status reports in milliseconds
    #[arg(long)]
    report_interval_ms: Option<u64>,

    /// Length of the demo signal in seconds
    #[arg(long)]
    duration_secs: Option<f64>,

    /// Detect and track only, without baseband extraction
    #[arg(long, default_value_t = false)]
    no_extract: bool,

    /// Write the merged configuration back to the config file
    #[arg(long, default_value_t = false)]
    save_config: bool,

    /// Print reports as JSON lines on stdout
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl Args {
    /// Overlay command-line flags on the stored configuration.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(source) = self.source {
            config.source = source;
        }
        if let Some(v) = self.block_size {
            config.block_size = v;
        }
        if let Some(v) = self.queue_limit {
            config.queue_limit = v;
        }
        if let Some(v) = self.report_interval_ms {
            config.report_interval_ms = v;
        }
        if let Some(v) = self.duration_secs {
            config.duration_secs = v;
        }

        let detector = &mut config.detector;
        if let Some(v) = self.fft_size {
            detector.fft_size = v;
        }
        if let Some(v) = self.overlap {
            detector.overlap_inverse = v;
        }
        if let Some(v) = self.threshold_db {
            detector.threshold_db = v;
        }
        if let Some(v) = self.psd_average {
            detector.psd_average = v;
        }
        if let Some(v) = self.window {
            detector.window = v;
        }
        if let Some(v) = self.sample_rate {
            detector.sample_rate = v;
        }
        if let Some(v) = self.center_frequency {
            detector.center_freq = v;
        }
        if self.no_extract {
            detector.extract = false;
        }
    }
}

fn load_config() -> AppConfig {
    match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("Failed to load configuration, using defaults: {e}");
            AppConfig::default()
        }
    }
}

fn log_events(events: &mut broadcast::Receiver<CarrierEvent>) {
    loop {
        match events.try_recv() {
            Ok(CarrierEvent::Added(id)) => log::info!("New carrier {id}"),
            Ok(CarrierEvent::Removed(id)) => log::info!("Carrier {id} timed out"),
            Ok(CarrierEvent::NearMiss(id)) => log::debug!("Near miss against carrier {id}"),
            Ok(CarrierEvent::Updated(_)) => {}
            Err(TryRecvError::Lagged(n)) => log::debug!("Skipped {n} carrier events"),
            Err(_) => break,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = load_config();
    args.apply(&mut config);

    if args.save_config {
        config.save().context("Failed to save configuration")?;
        if let Ok(path) = AppConfig::get_config_path() {
            log::info!("Configuration saved to {}", path.display());
        }
    }

    let mut source = source::open(
        config.source,
        args.path.as_deref(),
        config.detector.sample_rate,
        config.duration_secs,
    )?;
    if args.sample_rate.is_none() {
        if let Some(rate) = source.sample_rate() {
            config.detector.sample_rate = rate;
        }
    }

    let mut monitor = CarrierMonitor::new(config.detector_config()).context("Invalid detector configuration")?;
    let mut events = monitor.subscribe();
    let queue = monitor.queue();
    monitor.start()?;

    log::info!(
        "Monitoring {:?} source at {:.3} MHz, {} S/s, FFT {} / overlap {} (started {})",
        config.source,
        config.detector.center_freq / 1e6,
        config.detector.sample_rate,
        config.detector.fft_size,
        config.detector.overlap_inverse,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    let report_interval = Duration::from_millis(config.report_interval_ms.max(1));
    let mut next_report = Instant::now() + report_interval;
    let block_size = config.block_size.max(1);

    while let Some(block) = source.read_block(block_size)? {
        if !queue.push(block, true) {
            log::warn!("Monitor queue aborted, stopping input");
            break;
        }
        log_events(&mut events);
        if Instant::now() >= next_report {
            Report::collect(&monitor).emit(args.json)?;
            next_report += report_interval;
        }
    }

    log::info!("Input exhausted, draining {} queued blocks", queue.len());
    while !queue.is_empty() && monitor.is_running() {
        thread::sleep(DRAIN_POLL);
    }
    monitor.stop()?;

    log_events(&mut events);
    Report::collect(&monitor).emit(args.json)?;
    Ok(())
}
