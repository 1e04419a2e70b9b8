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

//! Smoothed log-magnitude spectrum lines for display sinks.

use std::sync::{Arc, RwLock};

use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::average::MovingAverage;
use crate::error::{DspError, Result};
use crate::fft::Fft;
use crate::processor::{FrameProcessor, FramedProcessor, ThreadedProcessor};
use crate::psd::power_to_db;
use crate::queue::DEFAULT_MAX_LIMIT;
use crate::tools::fft_shift;
use crate::window::{Window, WindowKind};
use crate::{Block, Sample};

const MAX_FFT_EXP: u32 = 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    /// Transform length as a power of two.
    pub fft_exp: u32,
    /// Lines in the moving average.
    pub average: usize,
    /// Analysis window; `None` for rectangular.
    pub window: Option<WindowKind>,
    pub queue_limit: usize,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            fft_exp: 10,
            average: 5,
            window: Some(WindowKind::VonHann),
            queue_limit: DEFAULT_MAX_LIMIT,
        }
    }
}

impl SpectrumConfig {
    #[must_use]
    pub fn fft_size(&self) -> usize {
        1 << self.fft_exp.min(MAX_FFT_EXP)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_FFT_EXP).contains(&self.fft_exp) {
            return Err(DspError::invalid_argument(format!(
                "FFT exponent must be in 1..={MAX_FFT_EXP}, got {}",
                self.fft_exp
            )));
        }
        Ok(())
    }
}

/// Computes centered, averaged dB spectra frame by frame.
pub struct SpectrumAnalyzer {
    fft: Fft,
    window: Window,
    kind: Option<WindowKind>,
    buffer: Vec<Sample>,
    line: Vec<f32>,
    average: MovingAverage<f32>,
    latest: Arc<RwLock<Vec<f32>>>,
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("fft_size", &self.fft.len())
            .field("window", &self.kind)
            .field("average", &self.average.len())
            .finish_non_exhaustive()
    }
}

impl SpectrumAnalyzer {
    pub fn new(config: &SpectrumConfig) -> Result<Self> {
        config.validate()?;
        let len = config.fft_size();
        Ok(Self {
            fft: Fft::new(len)?,
            window: Window::new(),
            kind: config.window,
            buffer: vec![Complex32::default(); len],
            line: vec![0.0; len],
            average: MovingAverage::new(config.average),
            latest: Arc::new(RwLock::new(Vec::new())),
        })
    }

    /// Handle to the most recent averaged line.
    #[must_use]
    pub fn latest(&self) -> Arc<RwLock<Vec<f32>>> {
        Arc::clone(&self.latest)
    }

    pub fn set_average(&mut self, lines: usize) {
        self.average.set_len(lines);
    }

    /// Compute one averaged line from `frame` and publish it.
    pub fn analyze(&mut self, frame: &[Sample]) -> Result<Vec<f32>> {
        match self.kind {
            Some(kind) => self.window.apply_to(kind, frame, &mut self.buffer)?,
            None => {
                DspError::check_len(self.buffer.len(), frame.len())?;
                self.buffer.copy_from_slice(frame);
            }
        }
        self.fft.fft_in_place(&mut self.buffer)?;

        for (dst, x) in self.line.iter_mut().zip(&self.buffer) {
            *dst = power_to_db(x.norm());
        }
        fft_shift(&mut self.line);

        self.average.push(&self.line);
        let averaged = self.average.get_average();
        if let Ok(mut latest) = self.latest.write() {
            latest.clone_from(&averaged);
        }
        Ok(averaged)
    }
}

impl FrameProcessor for SpectrumAnalyzer {
    fn process_frame(&mut self, frame: &[Sample]) {
        if let Err(e) = self.analyze(frame) {
            log::warn!("Spectrum frame skipped: {e}");
        }
    }
}

/// [`SpectrumAnalyzer`] on a worker thread, fed with quarter-frame overlap.
pub struct SpectrumMonitor {
    processor: ThreadedProcessor<FramedProcessor<SpectrumAnalyzer>>,
    latest: Arc<RwLock<Vec<f32>>>,
    fft_size: usize,
}

impl std::fmt::Debug for SpectrumMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumMonitor")
            .field("processor", &self.processor)
            .field("fft_size", &self.fft_size)
            .finish_non_exhaustive()
    }
}

impl SpectrumMonitor {
    pub fn new(config: &SpectrumConfig) -> Result<Self> {
        let analyzer = SpectrumAnalyzer::new(config)?;
        let latest = analyzer.latest();
        let fft_size = config.fft_size();
        let framed = FramedProcessor::new(analyzer, fft_size, (fft_size / 4).max(1))?;
        Ok(Self {
            processor: ThreadedProcessor::with_queue_limit("spectrum", framed, config.queue_limit),
            latest,
            fft_size,
        })
    }

    pub fn start(&mut self) -> Result<()> {
        self.processor.start()
    }

    pub fn stop(&mut self) -> Result<()> {
        self.processor.stop()
    }

    #[must_use]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Queue a block without blocking; `false` if it was dropped.
    pub fn data_in(&self, block: Block) -> bool {
        self.processor.push(block)
    }

    /// Copy of the latest averaged line, DC in the middle.
    #[must_use]
    pub fn latest_spectrum(&self) -> Vec<f32> {
        self.latest.read().map(|l| l.clone()).unwrap_or_default()
    }
}
