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

//! Power spectral density, single shot or accumulated.

use num_complex::Complex32;

use crate::error::{DspError, Result};
use crate::fft::Fft;
use crate::tools::DB_FLOOR;
use crate::Sample;

/// Convert linear power values to `10·log10` in place.
///
/// Zero (or negative) power maps to [`DB_FLOOR`] instead of `-inf`.
pub fn to_db(values: &mut [f32]) {
    for v in values {
        *v = power_to_db(*v);
    }
}

#[inline]
pub(crate) fn power_to_db(power: f32) -> f32 {
    if power > 0.0 {
        (10.0 * power.log10()).max(DB_FLOOR)
    } else {
        DB_FLOOR
    }
}

/// `|FFT(x)|^2` per bin for frames of one fixed length.
///
/// [`Psd::add`] sums successive spectra into a caller-owned accumulator,
/// which gives a Welch average once divided by the number of calls.
#[derive(Debug)]
pub struct Psd {
    fft: Fft,
    spectrum: Vec<Complex32>,
}

impl Psd {
    pub fn new(len: usize) -> Result<Self> {
        Ok(Self {
            fft: Fft::new(len)?,
            spectrum: vec![Complex32::default(); len],
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fft.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fft.is_empty()
    }

    pub fn set_length(&mut self, len: usize) -> Result<()> {
        self.fft.set_length(len)?;
        self.spectrum.resize(len, Complex32::default());
        Ok(())
    }

    /// Single-shot spectrum of `input`, optionally in dB.
    pub fn get(&mut self, input: &[Sample], log_scale: bool) -> Result<Vec<f32>> {
        self.transform(input)?;
        let mut power: Vec<f32> = self.spectrum.iter().map(Complex32::norm_sqr).collect();
        if log_scale {
            to_db(&mut power);
        }
        Ok(power)
    }

    /// Add the power spectrum of `input` into `accumulator`.
    ///
    /// An accumulator of the wrong size is reset to zeros of the right size
    /// first.
    pub fn add(&mut self, input: &[Sample], accumulator: &mut Vec<f32>) -> Result<()> {
        self.transform(input)?;
        if accumulator.len() != self.spectrum.len() {
            accumulator.clear();
            accumulator.resize(self.spectrum.len(), 0.0);
        }
        for (acc, x) in accumulator.iter_mut().zip(&self.spectrum) {
            *acc += x.norm_sqr();
        }
        Ok(())
    }

    fn transform(&mut self, input: &[Sample]) -> Result<()> {
        DspError::check_len(self.fft.len(), input.len())?;
        self.fft.fft(input, &mut self.spectrum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(n: usize, bin: usize, amp: f32) -> Vec<Sample> {
        (0..n)
            .map(|i| Complex32::from_polar(amp, 2.0 * PI * (bin * i) as f32 / n as f32))
            .collect()
    }

    #[test]
    fn test_get_linear_power() {
        let mut psd = Psd::new(32).unwrap();
        let power = psd.get(&tone(32, 3, 1.0), false).unwrap();
        assert!((power[3] - 1024.0).abs() < 1e-2);
        assert!(power[4] < 1e-6);
    }

    #[test]
    fn test_log_floor() {
        let mut psd = Psd::new(16).unwrap();
        let power = psd.get(&vec![Complex32::default(); 16], true).unwrap();
        assert!(power.iter().all(|&p| (p - DB_FLOOR).abs() < f32::EPSILON));

        let power = psd.get(&tone(16, 1, 1.0), true).unwrap();
        assert!((power[1] - 10.0 * 256f32.log10()).abs() < 1e-3);
    }

    #[test]
    fn test_length_mismatch() {
        let mut psd = Psd::new(16).unwrap();
        assert_eq!(
            psd.get(&tone(8, 1, 1.0), false).unwrap_err(),
            DspError::LengthMismatch { expected: 16, actual: 8 }
        );
    }

    #[test]
    fn test_accumulator_sums_and_resets() {
        let mut psd = Psd::new(16).unwrap();
        let mut acc = vec![5.0; 3];

        psd.add(&tone(16, 2, 1.0), &mut acc).unwrap();
        assert_eq!(acc.len(), 16);
        assert!((acc[2] - 256.0).abs() < 1e-2);

        psd.add(&tone(16, 2, 1.0), &mut acc).unwrap();
        assert!((acc[2] - 512.0).abs() < 1e-2);
        assert!(acc[0] < 1e-6);
    }

    #[test]
    fn test_to_db() {
        let mut values = vec![100.0, 0.0, 1.0];
        to_db(&mut values);
        assert!((values[0] - 20.0).abs() < 1e-5);
        assert!((values[1] - DB_FLOOR).abs() < f32::EPSILON);
        assert!(values[2].abs() < 1e-6);
    }
}
