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

//! Carrier identification, tracking and baseband extraction.
//!
//! Every peak found in a frame is turned into a [`Detection`]: its position
//! and width relative to the transform length, plus (optionally) the
//! baseband samples cut out of the frame's spectrum by the [`Extractor`].
//! The [`CarrierTracker`] then decides whether the detection continues a
//! known carrier, is a suspicious near miss, or starts a new one, and emits
//! [`CarrierEvent`]s on changes.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{DspError, Result};
use crate::fft::Fft;
use crate::filter::LowPassFilter;
use crate::peaks::Peak;
use crate::tools::next_pow2;
use crate::Sample;

/// Relative bandwidth/frequency tolerance for a repeat detection.
const MATCH_TOLERANCE: f64 = 0.1;
/// Frequency tolerance (relative to bandwidth) inside which a non-matching
/// detection is reported as a near miss.
const NEAR_MISS_TOLERANCE: f64 = 0.5;
/// Extraction band relative to the peak width (1.25 margin on both sides).
const EXTRACTION_OVERSIZE: f64 = 1.25 * 2.0;
const EVENT_CHANNEL_CAPACITY: usize = 256;

pub type CarrierId = u64;

/// A tracked carrier and its extracted baseband stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Carrier {
    pub id: CarrierId,
    /// Absolute center frequency in Hz.
    pub origin_freq: f64,
    /// Center bin over transform length, in `[0, 1)`.
    pub rel_freq: f64,
    /// Sample rate of the extracted baseband stream in Hz.
    pub samp_rate: f64,
    /// Bandwidth in Hz.
    pub bandwidth: f64,
    /// Peak width over transform length.
    pub rel_bandwidth: f64,
    pub start_time: DateTime<Utc>,
    /// Frame index of the latest matching detection.
    pub last_seen_frame: u64,
    /// Number of detections merged into this carrier.
    pub detections: u64,
    #[serde(skip)]
    pub samples: Vec<Sample>,
}

impl Carrier {
    /// Offset from the tuned center in Hz.
    #[must_use]
    pub fn offset_freq(&self, sample_rate: f64) -> f64 {
        signed_rel_freq(self.rel_freq) * sample_rate
    }

    /// Everything but the samples, which are only counted.
    #[must_use]
    pub fn info(&self) -> CarrierInfo {
        CarrierInfo {
            id: self.id,
            origin_freq: self.origin_freq,
            rel_freq: self.rel_freq,
            samp_rate: self.samp_rate,
            bandwidth: self.bandwidth,
            rel_bandwidth: self.rel_bandwidth,
            start_time: self.start_time,
            last_seen_frame: self.last_seen_frame,
            detections: self.detections,
            buffered_samples: self.samples.len(),
        }
    }
}

/// Carrier metadata without the baseband buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierInfo {
    pub id: CarrierId,
    pub origin_freq: f64,
    pub rel_freq: f64,
    pub samp_rate: f64,
    pub bandwidth: f64,
    pub rel_bandwidth: f64,
    pub start_time: DateTime<Utc>,
    pub last_seen_frame: u64,
    pub detections: u64,
    pub buffered_samples: usize,
}

impl CarrierInfo {
    /// Offset from the tuned center in Hz.
    #[must_use]
    pub fn offset_freq(&self, sample_rate: f64) -> f64 {
        signed_rel_freq(self.rel_freq) * sample_rate
    }
}

/// One peak of one frame, normalized to the transform length.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub rel_freq: f64,
    pub rel_bandwidth: f64,
    /// Sample rate of `samples` relative to the input rate.
    pub rel_samp_rate: f64,
    pub samples: Vec<Sample>,
}

impl Detection {
    /// Describe `peak` in a spectrum of `fft_len` bins, without samples.
    #[must_use]
    pub fn from_peak(peak: &Peak, fft_len: usize) -> Self {
        let n = fft_len.max(1) as f64;
        Self {
            rel_freq: peak.center() as f64 / n,
            rel_bandwidth: peak.width() as f64 / n,
            rel_samp_rate: 0.0,
            samples: Vec::new(),
        }
    }

    /// Attach an extracted baseband block.
    #[must_use]
    pub fn with_extraction(mut self, extraction: Extraction) -> Self {
        self.rel_samp_rate = extraction.rel_samp_rate;
        self.samples = extraction.samples;
        self
    }
}

/// Outcome of comparing a detection with the tracked carriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMatch {
    /// Same carrier as the given one.
    Match(CarrierId),
    /// Close to the given carrier but outside the match tolerance.
    NearMiss(CarrierId),
    New,
}

/// Events emitted by the tracker when carrier state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CarrierEvent {
    Added(CarrierId),
    Updated(CarrierId),
    /// A detection fell near this carrier without matching it.
    NearMiss(CarrierId),
    Removed(CarrierId),
}

/// Bounds on how much carrier state is kept in memory.
///
/// A value of 0 disables the respective limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Maximum baseband samples kept per carrier; oldest are dropped first.
    pub max_carrier_samples: usize,
    /// Frames without a matching detection before a carrier is evicted.
    pub carrier_timeout_frames: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_carrier_samples: 1 << 20,
            carrier_timeout_frames: 512,
        }
    }
}

/// Map a `[0, 1)` bin fraction onto `[-0.5, 0.5)`.
#[must_use]
pub fn signed_rel_freq(rel_freq: f64) -> f64 {
    if rel_freq >= 0.5 {
        rel_freq - 1.0
    } else {
        rel_freq
    }
}

/// Keeps the arena of carriers and merges repeat detections into them.
pub struct CarrierTracker {
    carriers: Vec<Carrier>,
    next_id: CarrierId,
    near_misses: u64,
    /// Carriers already warned about; later near misses log at debug.
    near_miss_warned: HashSet<CarrierId>,
    sample_rate: f64,
    center_freq: f64,
    retention: RetentionConfig,
    event_tx: broadcast::Sender<CarrierEvent>,
}

impl std::fmt::Debug for CarrierTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarrierTracker")
            .field("carrier_count", &self.carriers.len())
            .field("near_misses", &self.near_misses)
            .field("sample_rate", &self.sample_rate)
            .field("center_freq", &self.center_freq)
            .finish_non_exhaustive()
    }
}

impl Default for CarrierTracker {
    fn default() -> Self {
        Self::new(1.0, 0.0, RetentionConfig::default())
    }
}

impl CarrierTracker {
    /// Create a tracker for a stream at `sample_rate` Hz tuned to
    /// `center_freq` Hz.
    #[must_use]
    pub fn new(sample_rate: f64, center_freq: f64, retention: RetentionConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            carriers: Vec::new(),
            next_id: 1,
            near_misses: 0,
            near_miss_warned: HashSet::new(),
            sample_rate,
            center_freq,
            retention,
            event_tx,
        }
    }

    /// Compare a detection with every tracked carrier.
    ///
    /// The first carrier (in creation order) within tolerance wins. A near
    /// miss is only reported when nothing matches.
    #[must_use]
    pub fn classify(&self, rel_freq: f64, rel_bandwidth: f64) -> IdentityMatch {
        let mut near_miss = None;
        for carrier in &self.carriers {
            let bw = carrier.rel_bandwidth;
            if (rel_bandwidth - bw).abs() > MATCH_TOLERANCE * bw {
                continue;
            }
            let df = (rel_freq - carrier.rel_freq).abs();
            if df <= MATCH_TOLERANCE * bw {
                return IdentityMatch::Match(carrier.id);
            }
            if df <= NEAR_MISS_TOLERANCE * bw && near_miss.is_none() {
                near_miss = Some(carrier.id);
            }
        }
        near_miss.map_or(IdentityMatch::New, IdentityMatch::NearMiss)
    }

    /// Merge `detection` into the tracked state as seen in frame `frame`.
    pub fn identify(&mut self, detection: Detection, frame: u64) -> IdentityMatch {
        let result = self.classify(detection.rel_freq, detection.rel_bandwidth);
        match result {
            IdentityMatch::Match(id) => {
                let max_samples = self.retention.max_carrier_samples;
                if let Some(carrier) = self.carriers.iter_mut().find(|c| c.id == id) {
                    carrier.samples.extend(detection.samples);
                    if max_samples > 0 && carrier.samples.len() > max_samples {
                        let excess = carrier.samples.len() - max_samples;
                        carrier.samples.drain(..excess);
                    }
                    if carrier.samp_rate <= 0.0 && detection.rel_samp_rate > 0.0 {
                        carrier.samp_rate = self.sample_rate * detection.rel_samp_rate;
                    }
                    carrier.last_seen_frame = frame;
                    carrier.detections += 1;
                }
                let _ = self.event_tx.send(CarrierEvent::Updated(id));
            }
            IdentityMatch::NearMiss(id) => {
                self.near_misses += 1;
                if self.near_miss_warned.insert(id) {
                    warn!(
                        "Detection at rel. freq {:.5} (bw {:.5}) is close to carrier {} but does not match it",
                        detection.rel_freq, detection.rel_bandwidth, id
                    );
                } else {
                    debug!("Repeated near miss against carrier {id}");
                }
                let _ = self.event_tx.send(CarrierEvent::NearMiss(id));
            }
            IdentityMatch::New => {
                let id = self.next_id;
                self.next_id += 1;

                let mut samples = detection.samples;
                let max_samples = self.retention.max_carrier_samples;
                if max_samples > 0 && samples.len() > max_samples {
                    samples.drain(..samples.len() - max_samples);
                }

                let carrier = Carrier {
                    id,
                    origin_freq: self.center_freq + signed_rel_freq(detection.rel_freq) * self.sample_rate,
                    rel_freq: detection.rel_freq,
                    samp_rate: self.sample_rate * detection.rel_samp_rate,
                    bandwidth: detection.rel_bandwidth * self.sample_rate,
                    rel_bandwidth: detection.rel_bandwidth,
                    start_time: Utc::now(),
                    last_seen_frame: frame,
                    detections: 1,
                    samples,
                };
                info!(
                    "New carrier {} at {:.3} kHz, bandwidth {:.3} kHz",
                    id,
                    carrier.origin_freq / 1e3,
                    carrier.bandwidth / 1e3
                );
                self.carriers.push(carrier);
                let _ = self.event_tx.send(CarrierEvent::Added(id));
                return IdentityMatch::New;
            }
        }
        result
    }

    /// Drop carriers not matched within the configured timeout.
    ///
    /// Returns the evicted ids.
    pub fn cleanup_stale(&mut self, current_frame: u64) -> Vec<CarrierId> {
        let timeout = self.retention.carrier_timeout_frames;
        if timeout == 0 {
            return Vec::new();
        }

        let mut removed = Vec::new();
        self.carriers.retain(|c| {
            let stale = current_frame.saturating_sub(c.last_seen_frame) >= timeout;
            if stale {
                removed.push(c.id);
            }
            !stale
        });

        for &id in &removed {
            self.near_miss_warned.remove(&id);
            info!("Carrier {id} timed out and was removed");
            let _ = self.event_tx.send(CarrierEvent::Removed(id));
        }
        removed
    }

    #[must_use]
    pub fn carriers(&self) -> &[Carrier] {
        &self.carriers
    }

    #[must_use]
    pub fn get(&self, id: CarrierId) -> Option<&Carrier> {
        self.carriers.iter().find(|c| c.id == id)
    }

    /// Take the buffered baseband samples of a carrier, leaving it empty.
    pub fn take_samples(&mut self, id: CarrierId) -> Result<Vec<Sample>> {
        self.carriers
            .iter_mut()
            .find(|c| c.id == id)
            .map(|c| std::mem::take(&mut c.samples))
            .ok_or_else(|| DspError::invalid_argument(format!("unknown carrier id {id}")))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.carriers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.carriers.is_empty()
    }

    /// Number of detections reported as near misses so far.
    #[must_use]
    pub fn near_misses(&self) -> u64 {
        self.near_misses
    }

    #[must_use]
    pub fn retention(&self) -> RetentionConfig {
        self.retention
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CarrierEvent> {
        self.event_tx.subscribe()
    }
}

/// Length of the sub-transform used to extract a peak `width_bins` wide
/// from a `frame_len`-point spectrum.
///
/// Starts at the next power of two covering 2.5 times the peak width and
/// doubles until the length divides `frame_len` and is itself divisible by
/// `overlap_inverse`. Fails when no such length fits in the frame.
pub fn extraction_length(frame_len: usize, width_bins: usize, overlap_inverse: usize) -> Result<usize> {
    if overlap_inverse == 0 {
        return Err(DspError::invalid_argument("overlap inverse must be at least 1"));
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "non-negative bin count well inside usize"
    )]
    let min_bins = (width_bins as f64 * EXTRACTION_OVERSIZE).ceil() as usize;

    let mut len = next_pow2(min_bins.max(2));
    while len <= frame_len {
        if frame_len % len == 0 && len % overlap_inverse == 0 {
            return Ok(len);
        }
        len *= 2;
    }
    Err(DspError::invalid_argument(format!(
        "no extraction length for a {width_bins}-bin peak fits a {frame_len}-point frame with overlap 1/{overlap_inverse}"
    )))
}

/// Parameters of the extraction low-pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Stopband gain in dB.
    pub stop_attenuation_db: f64,
    /// Transition width as a fraction of one sideband.
    pub rel_transition: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            stop_attenuation_db: -60.0,
            rel_transition: 0.1,
        }
    }
}

/// Baseband samples cut out of one frame.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub samples: Vec<Sample>,
    /// Sub-transform length.
    pub extract_len: usize,
    /// Output sample rate over input sample rate.
    pub rel_samp_rate: f64,
}

/// Cuts carriers out of frame spectra and brings them to baseband.
///
/// Transforms and filters are cached per extraction length and peak width.
#[derive(Debug)]
pub struct Extractor {
    overlap_inverse: usize,
    config: ExtractionConfig,
    ffts: HashMap<usize, Fft>,
    filters: HashMap<(usize, usize), LowPassFilter>,
}

impl Extractor {
    /// `overlap_inverse` is the number of frames overlapping each sample;
    /// only the central `1/overlap_inverse` of each sub-frame is kept.
    pub fn new(overlap_inverse: usize, config: ExtractionConfig) -> Result<Self> {
        if overlap_inverse == 0 {
            return Err(DspError::invalid_argument("overlap inverse must be at least 1"));
        }
        if config.stop_attenuation_db >= 1.0 {
            return Err(DspError::invalid_argument(format!(
                "stop attenuation must be below 1 dB, got {}",
                config.stop_attenuation_db
            )));
        }
        Ok(Self {
            overlap_inverse,
            config,
            ffts: HashMap::new(),
            filters: HashMap::new(),
        })
    }

    #[must_use]
    pub fn overlap_inverse(&self) -> usize {
        self.overlap_inverse
    }

    /// Extract `peak` from `spectrum`, the unwindowed forward transform of
    /// the frame starting at absolute sample index `frame_start`.
    pub fn extract(&mut self, spectrum: &[Sample], peak: &Peak, frame_start: u64) -> Result<Extraction> {
        let n = spectrum.len();
        if peak.right >= n {
            return Err(DspError::invalid_argument(format!(
                "peak [{}, {}] outside a {n}-bin spectrum",
                peak.left, peak.right
            )));
        }
        let width = peak.width();
        let m = extraction_length(n, width, self.overlap_inverse)?;
        let center = peak.center();

        // Bins around the carrier, wrapped so the carrier sits at DC
        let half = m / 2;
        let mut sub: Vec<Sample> = (0..m)
            .map(|j| {
                let k = if j < half {
                    (center + j) % n
                } else {
                    (center + n - (m - j)) % n
                };
                spectrum[k]
            })
            .collect();

        let filter = match self.filters.entry((m, width)) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let rel_passband = (width as f64 / m as f64).min(1.0);
                debug!("Building {m}-bin extraction filter, passband {rel_passband:.3}");
                e.insert(LowPassFilter::new(
                    m,
                    self.config.stop_attenuation_db,
                    rel_passband,
                    self.config.rel_transition,
                )?)
            }
        };
        filter.apply(&mut sub)?;

        let fft = match self.ffts.entry(m) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(Fft::new(m)?),
        };
        fft.ifft_in_place(&mut sub)?;

        // Undo the 1/n of the full-length transform and the carrier's phase
        // advance since the stream start
        let n_u64 = n as u64;
        let turns = (center as u64 * (frame_start % n_u64)) % n_u64;
        let phase = -2.0 * PI * turns as f64 / n as f64;
        #[allow(clippy::cast_possible_truncation, reason = "unit rotation and gain fit f32")]
        let correction = Complex32::from_polar((m as f64 / n as f64) as f32, phase as f32);

        let hop = m / self.overlap_inverse;
        let start = (m - hop) / 2;
        let samples = sub[start..start + hop].iter().map(|&x| x * correction).collect();

        Ok(Extraction {
            samples,
            extract_len: m,
            rel_samp_rate: m as f64 / n as f64,
        })
    }
}
