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

//! Carrier detection pipeline and its threaded front end.
//!
//! [`CarrierDetector`] is the per-frame step: window, transform, Welch PSD
//! over `psd_average` frames, peak search, then identification and
//! extraction of every current peak in every frame. [`CarrierMonitor`] runs
//! it on a worker thread behind a block queue and exposes snapshot reads of
//! the shared [`DetectionState`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use log::{debug, info, warn};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::carrier::{
    Carrier, CarrierEvent, CarrierId, CarrierInfo, CarrierTracker, Detection, ExtractionConfig,
    Extractor, RetentionConfig,
};
use crate::error::{DspError, Result};
use crate::fft::Fft;
use crate::peaks::{Peak, PeakDetector, DEFAULT_THRESHOLD_DB};
use crate::processor::{FrameProcessor, FramedProcessor, ThreadedProcessor};
use crate::psd::{to_db, Psd};
use crate::queue::{BoundedQueue, DEFAULT_MAX_LIMIT};
use crate::window::{Window, WindowKind};
use crate::{Block, Sample};

/// Configuration of the carrier detection pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Frame and transform length.
    pub fft_size: usize,
    /// Frames overlapping each sample; frames start `fft_size / overlap_inverse` apart.
    pub overlap_inverse: usize,
    /// Frames averaged into one PSD before peaks are searched.
    pub psd_average: usize,
    pub threshold_db: f32,
    pub peak_step: usize,
    /// Strongest peaks kept per evaluation (0 for all).
    pub max_peaks: usize,
    pub window: WindowKind,
    /// Cut each carrier's baseband stream out of the spectrum.
    pub extract: bool,
    /// Input sample rate in Hz.
    pub sample_rate: f64,
    /// Tuned center frequency in Hz.
    pub center_freq: f64,
    pub extraction: ExtractionConfig,
    pub retention: RetentionConfig,
    /// Queue capacity in blocks.
    pub queue_limit: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            fft_size: 1024,
            overlap_inverse: 4,
            psd_average: 8,
            threshold_db: DEFAULT_THRESHOLD_DB,
            peak_step: 1,
            max_peaks: 32,
            window: WindowKind::VonHann,
            extract: true,
            sample_rate: 2_400_000.0,
            center_freq: 0.0,
            extraction: ExtractionConfig::default(),
            retention: RetentionConfig::default(),
            queue_limit: DEFAULT_MAX_LIMIT,
        }
    }
}

impl DetectorConfig {
    /// Samples between the starts of consecutive frames.
    #[must_use]
    pub fn overlap_step(&self) -> usize {
        self.fft_size / self.overlap_inverse.max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fft_size < 2 {
            return Err(DspError::InvalidLength { len: self.fft_size });
        }
        if self.overlap_inverse == 0 || self.fft_size % self.overlap_inverse != 0 {
            return Err(DspError::invalid_argument(format!(
                "overlap inverse {} must divide the FFT size {}",
                self.overlap_inverse, self.fft_size
            )));
        }
        if self.extract && !(self.fft_size.is_power_of_two() && self.overlap_inverse.is_power_of_two()) {
            return Err(DspError::invalid_argument(format!(
                "extraction needs power-of-two FFT size and overlap inverse, got {} and {}",
                self.fft_size, self.overlap_inverse
            )));
        }
        if self.psd_average == 0 {
            return Err(DspError::invalid_argument("PSD average must be at least 1 frame"));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(DspError::invalid_argument(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        Ok(())
    }
}

/// State shared between the detector thread and readers.
#[derive(Debug, Default)]
pub struct DetectionState {
    tracker: CarrierTracker,
    peaks: Vec<Peak>,
    psd_db: Vec<f32>,
    frames: u64,
    evaluations: u64,
}

impl DetectionState {
    fn new(config: &DetectorConfig) -> Self {
        Self {
            tracker: CarrierTracker::new(config.sample_rate, config.center_freq, config.retention),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &CarrierTracker {
        &self.tracker
    }

    /// Peaks of the latest PSD evaluation.
    #[must_use]
    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    /// Latest averaged PSD in dB.
    #[must_use]
    pub fn psd_db(&self) -> &[f32] {
        &self.psd_db
    }

    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Number of PSD evaluations (peak searches) so far.
    #[must_use]
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }
}

/// Per-frame carrier detection step.
pub struct CarrierDetector {
    config: DetectorConfig,
    window: Window,
    windowed: Vec<Sample>,
    psd: Psd,
    psd_sum: Vec<f32>,
    psd_frames: usize,
    peak_detector: PeakDetector,
    current_peaks: Vec<Peak>,
    fft: Fft,
    spectrum: Vec<Sample>,
    extractor: Option<Extractor>,
    frame_index: u64,
    state: Arc<RwLock<DetectionState>>,
}

impl std::fmt::Debug for CarrierDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarrierDetector")
            .field("fft_size", &self.config.fft_size)
            .field("window", &self.config.window)
            .field("frame_index", &self.frame_index)
            .field("current_peaks", &self.current_peaks.len())
            .finish_non_exhaustive()
    }
}

impl CarrierDetector {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;

        let state = Arc::new(RwLock::new(DetectionState::new(&config)));
        let extractor = if config.extract {
            Some(Extractor::new(config.overlap_inverse, config.extraction)?)
        } else {
            None
        };
        let peak_detector = PeakDetector::new()
            .threshold_db(config.threshold_db)
            .step(config.peak_step)
            .max_peaks(config.max_peaks);

        Ok(Self {
            window: Window::new(),
            windowed: vec![Complex32::default(); config.fft_size],
            psd: Psd::new(config.fft_size)?,
            psd_sum: Vec::new(),
            psd_frames: 0,
            peak_detector,
            current_peaks: Vec::new(),
            fft: Fft::new(config.fft_size)?,
            spectrum: vec![Complex32::default(); config.fft_size],
            extractor,
            frame_index: 0,
            state,
            config,
        })
    }

    /// Handle to the shared state this detector publishes into.
    #[must_use]
    pub fn state(&self) -> Arc<RwLock<DetectionState>> {
        Arc::clone(&self.state)
    }

    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    fn analyze(&mut self, frame: &[Sample]) -> Result<()> {
        let frame_start = self.frame_index * self.config.overlap_step() as u64;

        self.window.apply_to(self.config.window, frame, &mut self.windowed)?;
        self.psd.add(&self.windowed, &mut self.psd_sum)?;
        self.psd_frames += 1;

        let mut evaluated = None;
        if self.psd_frames >= self.config.psd_average {
            let count = self.psd_frames as f32;
            let mut psd_db: Vec<f32> = self.psd_sum.iter().map(|p| p / count).collect();
            to_db(&mut psd_db);
            self.current_peaks = self.peak_detector.detect(&psd_db);
            debug!(
                "Frame {}: {} peaks above {} dB",
                self.frame_index,
                self.current_peaks.len(),
                self.config.threshold_db
            );
            self.psd_sum.fill(0.0);
            self.psd_frames = 0;
            evaluated = Some(psd_db);
        }

        let mut detections = Vec::with_capacity(self.current_peaks.len());
        if let Some(extractor) = self.extractor.as_mut() {
            if !self.current_peaks.is_empty() {
                self.fft.fft(frame, &mut self.spectrum)?;
            }
            for peak in &self.current_peaks {
                let detection = Detection::from_peak(peak, self.config.fft_size);
                match extractor.extract(&self.spectrum, peak, frame_start) {
                    Ok(extraction) => detections.push(detection.with_extraction(extraction)),
                    Err(e) => {
                        debug!("Peak {}..{} tracked without samples: {e}", peak.left, peak.right);
                        detections.push(detection);
                    }
                }
            }
        } else {
            detections.extend(
                self.current_peaks
                    .iter()
                    .map(|peak| Detection::from_peak(peak, self.config.fft_size)),
            );
        }

        let Ok(mut state) = self.state.write() else {
            warn!("Detection state lock poisoned, frame {} not published", self.frame_index);
            return Ok(());
        };
        state.frames = self.frame_index + 1;
        if let Some(psd_db) = evaluated {
            state.peaks.clone_from(&self.current_peaks);
            state.psd_db = psd_db;
            state.evaluations += 1;
        }
        for detection in detections {
            state.tracker.identify(detection, self.frame_index);
        }
        state.tracker.cleanup_stale(self.frame_index);
        Ok(())
    }
}

impl FrameProcessor for CarrierDetector {
    fn process_frame(&mut self, frame: &[Sample]) {
        if let Err(e) = self.analyze(frame) {
            warn!("Skipping frame {}: {e}", self.frame_index);
        }
        self.frame_index += 1;
    }
}

/// Carrier detector running on its own worker thread.
pub struct CarrierMonitor {
    processor: ThreadedProcessor<FramedProcessor<CarrierDetector>>,
    state: Arc<RwLock<DetectionState>>,
    config: DetectorConfig,
    dropped_blocks: AtomicU64,
}

impl std::fmt::Debug for CarrierMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarrierMonitor")
            .field("processor", &self.processor)
            .field("dropped_blocks", &self.dropped_blocks())
            .finish_non_exhaustive()
    }
}

impl CarrierMonitor {
    /// Build the pipeline. The worker is not started yet.
    pub fn new(config: DetectorConfig) -> Result<Self> {
        let detector = CarrierDetector::new(config.clone())?;
        let state = detector.state();
        let framed = FramedProcessor::new(detector, config.fft_size, config.overlap_step())?;
        let processor = ThreadedProcessor::with_queue_limit("carrier-detector", framed, config.queue_limit);

        info!(
            "Carrier monitor: FFT {} / overlap 1/{} / PSD avg {} / threshold {} dB / window {}",
            config.fft_size, config.overlap_inverse, config.psd_average, config.threshold_db, config.window
        );

        Ok(Self {
            processor,
            state,
            config,
            dropped_blocks: AtomicU64::new(0),
        })
    }

    pub fn start(&mut self) -> Result<()> {
        self.processor.start()
    }

    pub fn stop(&mut self) -> Result<()> {
        self.processor.stop()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.processor.is_running()
    }

    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Queue one block of samples without blocking.
    ///
    /// A full queue drops the block; the drop is counted.
    pub fn data_in(&self, block: Block) -> bool {
        let queued = self.processor.push(block);
        if !queued {
            let dropped = self.dropped_blocks.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("Input block dropped ({dropped} so far)");
        }
        queued
    }

    /// Shared queue handle for producers that prefer blocking pushes.
    #[must_use]
    pub fn queue(&self) -> Arc<BoundedQueue<Sample>> {
        self.processor.queue()
    }

    /// Peaks of the latest PSD evaluation.
    #[must_use]
    pub fn get_peaks(&self) -> Vec<Peak> {
        self.state
            .read()
            .map(|s| s.peaks.clone())
            .unwrap_or_default()
    }

    /// Copies of all tracked carriers, samples included.
    #[must_use]
    pub fn get_carriers(&self) -> Vec<Carrier> {
        self.state
            .read()
            .map(|s| s.tracker.carriers().to_vec())
            .unwrap_or_default()
    }

    /// Carrier metadata with sample counts, without copying any samples.
    #[must_use]
    pub fn get_carrier_infos(&self) -> Vec<CarrierInfo> {
        self.state
            .read()
            .map(|s| s.tracker.carriers().iter().map(Carrier::info).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn get_carrier(&self, id: CarrierId) -> Option<Carrier> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.tracker.get(id).cloned())
    }

    /// Move a carrier's buffered samples out of the tracker.
    pub fn take_samples(&self, id: CarrierId) -> Result<Vec<Sample>> {
        self.state
            .write()
            .map_err(|_poisoned| DspError::runtime("detection state lock poisoned"))?
            .tracker
            .take_samples(id)
    }

    /// Latest averaged PSD in dB.
    #[must_use]
    pub fn latest_psd(&self) -> Vec<f32> {
        self.state
            .read()
            .map(|s| s.psd_db.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn carrier_count(&self) -> usize {
        self.state.read().map(|s| s.tracker.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn frames_processed(&self) -> u64 {
        self.state.read().map(|s| s.frames).unwrap_or(0)
    }

    #[must_use]
    pub fn near_misses(&self) -> u64 {
        self.state.read().map(|s| s.tracker.near_misses()).unwrap_or(0)
    }

    #[must_use]
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks.load(Ordering::Relaxed)
    }

    /// Subscribe to carrier events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CarrierEvent> {
        self.state
            .read()
            .map(|s| s.tracker.subscribe())
            .unwrap_or_else(|_| {
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                rx
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::BlockProcessor;
    use std::f64::consts::PI;

    fn tone(len: usize, bin: usize, fft_size: usize, amp: f32) -> Vec<Sample> {
        (0..len)
            .map(|t| {
                #[allow(clippy::cast_possible_truncation, reason = "test signal")]
                let phase = (2.0 * PI * ((bin * t) % fft_size) as f64 / fft_size as f64) as f32;
                Complex32::from_polar(amp, phase)
            })
            .collect()
    }

    fn small_config() -> DetectorConfig {
        DetectorConfig {
            fft_size: 256,
            overlap_inverse: 4,
            psd_average: 2,
            sample_rate: 256_000.0,
            center_freq: 100e6,
            ..DetectorConfig::default()
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(DetectorConfig::default().validate().is_ok());
        assert_eq!(DetectorConfig::default().overlap_step(), 256);

        let bad_len = DetectorConfig {
            fft_size: 1,
            ..DetectorConfig::default()
        };
        assert_eq!(bad_len.validate(), Err(DspError::InvalidLength { len: 1 }));

        let bad_overlap = DetectorConfig {
            overlap_inverse: 3,
            ..DetectorConfig::default()
        };
        assert!(bad_overlap.validate().is_err());

        let not_pow2 = DetectorConfig {
            fft_size: 1000,
            overlap_inverse: 4,
            ..DetectorConfig::default()
        };
        assert!(not_pow2.validate().is_err());
        let no_extract = DetectorConfig {
            extract: false,
            ..not_pow2
        };
        assert!(no_extract.validate().is_ok());

        let no_average = DetectorConfig {
            psd_average: 0,
            ..DetectorConfig::default()
        };
        assert!(no_average.validate().is_err());
    }

    #[test]
    fn test_detector_tracks_and_extracts_tone() {
        let config = small_config();
        let detector = CarrierDetector::new(config.clone()).unwrap();
        let state = detector.state();
        let mut framed = FramedProcessor::new(detector, config.fft_size, config.overlap_step()).unwrap();

        framed.process(tone(1024, 40, 256, 1.0));
        assert_eq!(framed.frames(), 13);

        let state = state.read().unwrap();
        assert_eq!(state.frames(), 13);
        assert_eq!(state.evaluations(), 6);
        assert_eq!(state.psd_db().len(), 256);
        assert_eq!(state.peaks()[0].center(), 40);

        let carrier = state
            .tracker()
            .carriers()
            .iter()
            .find(|c| (c.rel_freq - 40.0 / 256.0).abs() < 1e-9)
            .unwrap();
        assert_eq!(carrier.detections, 12);
        assert!((carrier.origin_freq - (100e6 + 40_000.0)).abs() < 1e-3);
        assert!((carrier.samp_rate - 16_000.0).abs() < 1e-6);
        assert_eq!(carrier.samples.len(), 12 * 4);
        for s in &carrier.samples {
            assert!((s.norm() - 1.0).abs() < 1e-3, "{s}");
            assert!((s - carrier.samples[0]).norm() < 1e-3);
        }
    }

    #[test]
    fn test_detector_without_extraction() {
        let config = DetectorConfig {
            extract: false,
            ..small_config()
        };
        let detector = CarrierDetector::new(config.clone()).unwrap();
        let state = detector.state();
        let mut framed = FramedProcessor::new(detector, config.fft_size, config.overlap_step()).unwrap();
        framed.process(tone(512, 100, 256, 0.5));

        let state = state.read().unwrap();
        let carrier = state
            .tracker()
            .carriers()
            .iter()
            .find(|c| (c.rel_freq - 100.0 / 256.0).abs() < 1e-9)
            .unwrap();
        assert!(carrier.samples.is_empty());
        assert!(carrier.detections >= 1);
    }

    #[test]
    fn test_monitor_snapshots_before_start() {
        let monitor = CarrierMonitor::new(small_config()).unwrap();
        assert!(!monitor.is_running());
        assert!(monitor.get_peaks().is_empty());
        assert!(monitor.get_carriers().is_empty());
        assert_eq!(monitor.frames_processed(), 0);
        assert!(monitor.data_in(tone(64, 1, 256, 1.0)));
        assert_eq!(monitor.queue().len(), 1);
    }

    #[test]
    fn test_monitor_carrier_infos_match_carriers() {
        let mut monitor = CarrierMonitor::new(small_config()).unwrap();
        monitor.start().unwrap();
        assert!(monitor.data_in(tone(1024, 40, 256, 1.0)));

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        while monitor.frames_processed() < 13 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        monitor.stop().unwrap();

        let carriers = monitor.get_carriers();
        let infos = monitor.get_carrier_infos();
        assert!(!infos.is_empty());
        assert_eq!(infos.len(), carriers.len());
        for (info, carrier) in infos.iter().zip(&carriers) {
            assert_eq!(info.id, carrier.id);
            assert_eq!(info.buffered_samples, carrier.samples.len());
            assert_eq!(info.detections, carrier.detections);
        }
        assert!(infos.iter().any(|i| i.buffered_samples == 48));
    }

    #[test]
    fn test_monitor_counts_dropped_blocks() {
        let monitor = CarrierMonitor::new(DetectorConfig {
            queue_limit: 1,
            ..small_config()
        })
        .unwrap();
        assert!(monitor.data_in(tone(16, 1, 256, 1.0)));
        assert!(!monitor.data_in(tone(16, 1, 256, 1.0)));
        assert_eq!(monitor.dropped_blocks(), 1);
    }
}
