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

//! Periodic status reports, logged or printed as JSON lines.

use carrier_dsp::{CarrierInfo, CarrierMonitor, Peak};
use serde::Serialize;

/// One carrier as shown in a report; samples are reduced to a count.
#[derive(Debug, Clone, Serialize)]
pub struct CarrierSummary {
    pub id: u64,
    pub origin_freq: f64,
    pub offset_freq: f64,
    pub bandwidth: f64,
    pub samp_rate: f64,
    pub detections: u64,
    pub buffered_samples: usize,
    pub start_time: String,
}

impl CarrierSummary {
    fn new(carrier: &CarrierInfo, sample_rate: f64) -> Self {
        Self {
            id: carrier.id,
            origin_freq: carrier.origin_freq,
            offset_freq: carrier.offset_freq(sample_rate),
            bandwidth: carrier.bandwidth,
            samp_rate: carrier.samp_rate,
            detections: carrier.detections,
            buffered_samples: carrier.buffered_samples,
            start_time: carrier.start_time.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub frames: u64,
    pub queued_blocks: usize,
    pub dropped_blocks: u64,
    pub near_misses: u64,
    pub peaks: Vec<Peak>,
    pub carriers: Vec<CarrierSummary>,
}

impl Report {
    #[must_use]
    pub fn collect(monitor: &CarrierMonitor) -> Self {
        let sample_rate = monitor.config().sample_rate;
        Self {
            frames: monitor.frames_processed(),
            queued_blocks: monitor.queue().len(),
            dropped_blocks: monitor.dropped_blocks(),
            near_misses: monitor.near_misses(),
            peaks: monitor.get_peaks(),
            carriers: monitor
                .get_carrier_infos()
                .iter()
                .map(|c| CarrierSummary::new(c, sample_rate))
                .collect(),
        }
    }

    /// Print as one JSON line, or log a human summary.
    pub fn emit(&self, json: bool) -> anyhow::Result<()> {
        if json {
            println!("{}", serde_json::to_string(self)?);
            return Ok(());
        }

        log::info!(
            "{} frames, {} peaks, {} carriers, {} near misses, {} queued, {} dropped",
            self.frames,
            self.peaks.len(),
            self.carriers.len(),
            self.near_misses,
            self.queued_blocks,
            self.dropped_blocks
        );
        for carrier in &self.carriers {
            log::info!(
                "  carrier {:>3}: {:.3} MHz ({:+.1} kHz), bw {:.1} kHz, {} detections, {} samples @ {:.0} Hz",
                carrier.id,
                carrier.origin_freq / 1e6,
                carrier.offset_freq / 1e3,
                carrier.bandwidth / 1e3,
                carrier.detections,
                carrier.buffered_samples,
                carrier.samp_rate
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carrier_dsp::{DetectorConfig, Sample};
    use std::time::{Duration, Instant};

    #[test]
    fn test_report_of_idle_monitor() {
        let monitor = CarrierMonitor::new(DetectorConfig::default()).unwrap();
        let report = Report::collect(&monitor);
        assert_eq!(report.frames, 0);
        assert!(report.carriers.is_empty());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["frames"], 0);
        assert!(json["peaks"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_report_counts_buffered_samples() {
        let mut monitor = CarrierMonitor::new(DetectorConfig {
            fft_size: 256,
            psd_average: 2,
            sample_rate: 256_000.0,
            ..DetectorConfig::default()
        })
        .unwrap();
        let tone: Vec<Sample> = (0..1024)
            .map(|t| Sample::from_polar(1.0, std::f32::consts::TAU * ((40 * t) % 256) as f32 / 256.0))
            .collect();
        monitor.start().unwrap();
        assert!(monitor.data_in(tone));
        let deadline = Instant::now() + Duration::from_secs(10);
        while monitor.frames_processed() < 13 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        monitor.stop().unwrap();

        let report = Report::collect(&monitor);
        let carriers = monitor.get_carriers();
        assert_eq!(report.carriers.len(), carriers.len());
        let tone_carrier = report.carriers.iter().find(|c| (c.offset_freq - 40_000.0).abs() < 1.0).unwrap();
        let full = carriers.iter().find(|c| c.id == tone_carrier.id).unwrap();
        assert_eq!(tone_carrier.buffered_samples, full.samples.len());
        assert!(tone_carrier.buffered_samples > 0);
    }
}
