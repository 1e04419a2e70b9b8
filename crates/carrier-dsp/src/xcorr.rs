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

//! FFT-based cross-correlation against a fixed reference sequence.

use num_complex::Complex32;

use crate::error::{DspError, Result};
use crate::fft::Fft;
use crate::Sample;

/// Circular cross-correlation of two equal-length vectors:
/// `r[k] = sum_n a[n + k] * conj(b[n])`.
pub fn cross_correlate(a: &[Sample], b: &[Sample]) -> Result<Vec<Sample>> {
    DspError::check_len(a.len(), b.len())?;
    let mut fft = Fft::new(a.len())?;

    let mut a_fft = a.to_vec();
    let mut b_fft = b.to_vec();
    fft.fft_in_place(&mut a_fft)?;
    fft.fft_in_place(&mut b_fft)?;

    for (x, y) in a_fft.iter_mut().zip(&b_fft) {
        *x *= y.conj();
    }
    fft.ifft_in_place(&mut a_fft)?;
    Ok(a_fft)
}

/// Correlator with a cached reference transform.
#[derive(Debug, Default)]
pub struct XCorr {
    fft: Option<Fft>,
    sequence_fft: Vec<Sample>,
    work: Vec<Sample>,
}

impl XCorr {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Correlator for `sequence`, zero-padded or truncated to `len`.
    pub fn with_sequence(sequence: &[Sample], len: usize) -> Result<Self> {
        let mut xcorr = Self::new();
        xcorr.set_sequence(sequence, len)?;
        Ok(xcorr)
    }

    /// Correlation length, 0 before a sequence is set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fft.as_ref().map_or(0, Fft::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sequence_fft.is_empty()
    }

    /// Set the reference sequence and the correlation length.
    ///
    /// On error the previous sequence stays active.
    pub fn set_sequence(&mut self, sequence: &[Sample], len: usize) -> Result<()> {
        if sequence.is_empty() {
            return Err(DspError::invalid_argument("correlation sequence is empty"));
        }
        if len < 2 {
            return Err(DspError::InvalidLength { len });
        }

        let mut fft = match self.fft.take() {
            Some(mut fft) => {
                fft.set_length(len)?;
                fft
            }
            None => Fft::new(len)?,
        };

        let mut padded = sequence.to_vec();
        padded.resize(len, Complex32::default());
        fft.fft_in_place(&mut padded)?;

        self.sequence_fft = padded;
        self.work.resize(len, Complex32::default());
        self.fft = Some(fft);
        Ok(())
    }

    /// Correlate `input` against the reference into `output`.
    ///
    /// Both slices must have the correlation length.
    pub fn correlate(&mut self, input: &[Sample], output: &mut [Sample]) -> Result<()> {
        let Some(fft) = self.fft.as_mut().filter(|_| !self.sequence_fft.is_empty()) else {
            return Err(DspError::runtime("correlation attempted before a sequence was set"));
        };
        DspError::check_len(fft.len(), output.len())?;

        fft.fft(input, &mut self.work)?;
        for (x, s) in self.work.iter_mut().zip(&self.sequence_fft) {
            *x *= s.conj();
        }
        fft.ifft(&self.work, output)
    }
}

/// Cross-correlation normalized by the local signal power.
///
/// Runs three correlations (raw samples, magnitudes and squared magnitudes)
/// and combines them per lag as `xcorr * abs_xcorr / (norm_xcorr + L)`,
/// `L` being the reference length. Lags where the squared-magnitude
/// correlation or the denominator is exactly zero yield 0.
#[derive(Debug, Default)]
pub struct PowerNeutralXcorr {
    xcorr: XCorr,
    xcorr_abs: XCorr,
    xcorr_norm: XCorr,
    sequence_len: usize,
    raw: Vec<Sample>,
    abs: Vec<Sample>,
    norm: Vec<Sample>,
    scratch: Vec<Sample>,
}

impl PowerNeutralXcorr {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sequence(sequence: &[Sample], len: usize) -> Result<Self> {
        let mut xcorr = Self::new();
        xcorr.set_sequence(sequence, len)?;
        Ok(xcorr)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.xcorr.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.xcorr.is_empty()
    }

    pub fn set_sequence(&mut self, sequence: &[Sample], len: usize) -> Result<()> {
        let magnitudes: Vec<Sample> = sequence.iter().map(|s| Complex32::new(s.norm(), 0.0)).collect();
        let powers: Vec<Sample> = sequence.iter().map(|s| Complex32::new(s.norm_sqr(), 0.0)).collect();

        // Validate on a scratch correlator first so a failure leaves state untouched
        let mut xcorr = XCorr::new();
        xcorr.set_sequence(sequence, len)?;
        let mut xcorr_abs = XCorr::new();
        xcorr_abs.set_sequence(&magnitudes, len)?;
        let mut xcorr_norm = XCorr::new();
        xcorr_norm.set_sequence(&powers, len)?;

        self.xcorr = xcorr;
        self.xcorr_abs = xcorr_abs;
        self.xcorr_norm = xcorr_norm;
        self.sequence_len = sequence.len().min(len);
        for buffer in [&mut self.raw, &mut self.abs, &mut self.norm, &mut self.scratch] {
            buffer.clear();
            buffer.resize(len, Complex32::default());
        }
        Ok(())
    }

    pub fn correlate(&mut self, input: &[Sample], output: &mut [Sample]) -> Result<()> {
        if self.xcorr.is_empty() {
            return Err(DspError::runtime("correlation attempted before a sequence was set"));
        }
        DspError::check_len(self.len(), input.len())?;
        DspError::check_len(self.len(), output.len())?;

        self.xcorr.correlate(input, &mut self.raw)?;

        for (dst, x) in self.scratch.iter_mut().zip(input) {
            *dst = Complex32::new(x.norm(), 0.0);
        }
        self.xcorr_abs.correlate(&self.scratch, &mut self.abs)?;

        for (dst, x) in self.scratch.iter_mut().zip(input) {
            *dst = Complex32::new(x.norm_sqr(), 0.0);
        }
        self.xcorr_norm.correlate(&self.scratch, &mut self.norm)?;

        let sequence_len = self.sequence_len as f32;
        for (((out, &raw), &abs), &norm) in output.iter_mut().zip(&self.raw).zip(&self.abs).zip(&self.norm) {
            let denominator = norm + sequence_len;
            *out = if norm == Complex32::default() || denominator == Complex32::default() {
                Complex32::default()
            } else {
                raw * abs / denominator
            };
        }
        Ok(())
    }
}
