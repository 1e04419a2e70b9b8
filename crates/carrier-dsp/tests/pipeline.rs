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

//! End-to-end run of the threaded carrier monitor on a synthetic stream.

use std::f64::consts::PI;
use std::thread;
use std::time::{Duration, Instant};

use carrier_dsp::{Block, CarrierEvent, CarrierMonitor, DetectorConfig, Sample};
use tokio::sync::broadcast::error::TryRecvError;

const FFT_SIZE: usize = 1024;
const SAMPLE_RATE: f64 = 1_024_000.0;
const CENTER_FREQ: f64 = 145_000_000.0;
const TOTAL_SAMPLES: usize = FFT_SIZE * 64;
const BLOCK_LEN: usize = 4096;

/// Two bin-centred tones plus low-level deterministic noise.
fn synthetic_stream() -> Vec<Sample> {
    let mut state = 0x2545_f491_u32;
    let mut noise = move || {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        (f64::from(state >> 8) / f64::from(1u32 << 24) - 0.5) * 0.02
    };

    (0..TOTAL_SAMPLES)
        .map(|t| {
            let a = 2.0 * PI * ((100 * t) % FFT_SIZE) as f64 / FFT_SIZE as f64;
            let b = 2.0 * PI * ((700 * t) % FFT_SIZE) as f64 / FFT_SIZE as f64;
            let re = a.cos() + 0.5 * b.cos() + noise();
            let im = a.sin() + 0.5 * b.sin() + noise();
            Sample::new(re as f32, im as f32)
        })
        .collect()
}

fn expected_frames() -> u64 {
    ((TOTAL_SAMPLES - FFT_SIZE) / (FFT_SIZE / 4) + 1) as u64
}

#[test]
fn test_monitor_detects_and_extracts_tones() {
    let mut monitor = CarrierMonitor::new(DetectorConfig {
        fft_size: FFT_SIZE,
        overlap_inverse: 4,
        psd_average: 8,
        threshold_db: 12.0,
        sample_rate: SAMPLE_RATE,
        center_freq: CENTER_FREQ,
        ..DetectorConfig::default()
    })
    .unwrap();
    let mut events = monitor.subscribe();
    monitor.start().unwrap();

    for block in synthetic_stream().chunks(BLOCK_LEN) {
        let block: Block = block.to_vec();
        assert!(monitor.data_in(block));
    }

    let deadline = Instant::now() + Duration::from_secs(30);
    while monitor.frames_processed() < expected_frames() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    monitor.stop().unwrap();
    assert_eq!(monitor.frames_processed(), expected_frames());
    assert_eq!(monitor.dropped_blocks(), 0);

    let peaks = monitor.get_peaks();
    assert!(peaks.iter().any(|p| p.center() == 100));
    assert!(peaks.iter().any(|p| p.center() == 700));

    let carriers = monitor.get_carriers();
    let strong = carriers
        .iter()
        .filter(|c| c.rel_freq == 100.0 / FFT_SIZE as f64)
        .max_by_key(|c| c.samples.len())
        .expect("carrier at bin 100");
    assert!((strong.origin_freq - (CENTER_FREQ + 100_000.0)).abs() < 1.0);
    assert!(strong.detections > 100);
    assert!(!strong.samples.is_empty());

    // Extracted baseband is the tone brought to DC at its own amplitude
    let mean_level = strong.samples.iter().map(|s| s.norm()).sum::<f32>() / strong.samples.len() as f32;
    assert!((mean_level - 1.0).abs() < 0.05, "mean level {mean_level}");

    let weak = carriers
        .iter()
        .find(|c| c.rel_freq == 700.0 / FFT_SIZE as f64)
        .expect("carrier at bin 700");
    assert!((weak.origin_freq - (CENTER_FREQ - 324_000.0)).abs() < 1.0);

    let taken = monitor.take_samples(strong.id).unwrap();
    assert_eq!(taken.len(), strong.samples.len());
    assert!(monitor.get_carrier(strong.id).unwrap().samples.is_empty());

    let mut updated = false;
    loop {
        match events.try_recv() {
            Ok(CarrierEvent::Updated(id)) if id == strong.id => updated = true,
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
    assert!(updated);
}

#[test]
fn test_monitor_resumes_after_restart() {
    let mut monitor = CarrierMonitor::new(DetectorConfig {
        fft_size: FFT_SIZE,
        sample_rate: SAMPLE_RATE,
        extract: false,
        ..DetectorConfig::default()
    })
    .unwrap();

    let stream = synthetic_stream();
    let (first, second) = stream.split_at(TOTAL_SAMPLES / 2);

    monitor.start().unwrap();
    for block in first.chunks(BLOCK_LEN) {
        assert!(monitor.data_in(block.to_vec()));
    }
    monitor.stop().unwrap();

    for block in second.chunks(BLOCK_LEN) {
        assert!(monitor.data_in(block.to_vec()));
    }
    monitor.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(30);
    while monitor.frames_processed() < expected_frames() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    monitor.stop().unwrap();

    assert_eq!(monitor.frames_processed(), expected_frames());
    assert!(monitor.carrier_count() >= 2);
}
