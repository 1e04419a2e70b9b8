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

//! Streaming DSP engine for carrier detection in IQ sample streams.
//!
//! The crate turns a live stream of complex baseband samples into power
//! spectra, detects narrow-band carriers, tracks them over time and cuts
//! each carrier's band-limited signal out of the stream. It is organized in
//! layers that can be used on their own or composed:
//!
//! - **Primitives**: [`Fft`], [`Window`], [`Psd`], [`MovingAverage`],
//!   [`LowPassFilter`], [`XCorr`] / [`PowerNeutralXcorr`] and the helpers in
//!   [`tools`]
//! - **Detection**: [`find_peaks`], [`CarrierTracker`] and [`Extractor`]
//! - **Threading**: [`BoundedQueue`] and [`ThreadedProcessor`], which runs a
//!   [`BlockProcessor`] on a worker thread
//! - **Pipelines**: [`CarrierMonitor`] and [`SpectrumMonitor`]
//!
//! # Quick Start
//!
//! ```no_run
//! use carrier_dsp::{CarrierMonitor, DetectorConfig};
//!
//! let mut monitor = CarrierMonitor::new(DetectorConfig {
//!     fft_size: 2048,
//!     sample_rate: 2_048_000.0,
//!     center_freq: 433_920_000.0,
//!     ..Default::default()
//! })
//! .expect("valid configuration");
//! monitor.start().expect("worker started");
//!
//! // Feed blocks of IQ samples from a receiver
//! let block = vec![num_complex::Complex32::new(0.0, 0.0); 16_384];
//! monitor.data_in(block);
//!
//! for carrier in monitor.get_carriers() {
//!     println!("{}: {:.0} Hz, {} samples", carrier.id, carrier.origin_freq, carrier.samples.len());
//! }
//! monitor.stop().expect("worker stopped");
//! ```
//!
//! # Peak Detection Only
//!
//! ```
//! use carrier_dsp::find_peaks;
//!
//! let mut spectrum = vec![-80.0f32; 128];
//! spectrum[40] = -55.0;
//!
//! let peaks = find_peaks(&spectrum, 12.0, 1);
//! assert_eq!(peaks.len(), 1);
//! assert_eq!(peaks[0].center(), 40);
//! ```

pub mod average;
pub mod carrier;
pub mod detector;
pub mod error;
pub mod fft;
pub mod filter;
pub mod peaks;
pub mod processor;
pub mod psd;
pub mod queue;
pub mod spectrum;
pub mod tools;
pub mod window;
pub mod xcorr;

/// One complex IQ measurement.
pub type Sample = num_complex::Complex32;

/// Ordered run of samples; the unit moved through queues.
pub type Block = Vec<Sample>;

pub use average::MovingAverage;
pub use carrier::{
    extraction_length, Carrier, CarrierEvent, CarrierId, CarrierInfo, CarrierTracker, Detection,
    Extraction, ExtractionConfig, Extractor, IdentityMatch, RetentionConfig,
};
pub use detector::{CarrierDetector, CarrierMonitor, DetectionState, DetectorConfig};
pub use error::{DspError, Result};
pub use fft::Fft;
pub use filter::LowPassFilter;
pub use peaks::{find_peaks, Peak, PeakDetector};
pub use processor::{BlockProcessor, FrameProcessor, FramedProcessor, ThreadedProcessor};
pub use psd::{to_db, Psd};
pub use queue::BoundedQueue;
pub use spectrum::{SpectrumAnalyzer, SpectrumConfig, SpectrumMonitor};
pub use window::{Window, WindowKind};
pub use xcorr::{cross_correlate, PowerNeutralXcorr, XCorr};
