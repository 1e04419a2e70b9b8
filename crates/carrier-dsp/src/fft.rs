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

//! Fixed-length forward/inverse complex transform.
//!
//! Wraps `rustfft` plans for one transform size. The forward transform is
//! unscaled; the inverse is always scaled by `1/n` so that
//! `ifft(fft(x)) == x` up to rounding.

use std::sync::Arc;

use num_complex::Complex32;
use rustfft::{Fft as RustFft, FftPlanner};

use crate::error::{DspError, Result};
use crate::Sample;

/// Reusable transform of one fixed length.
pub struct Fft {
    len: usize,
    forward: Arc<dyn RustFft<f32>>,
    inverse: Arc<dyn RustFft<f32>>,
    scratch: Vec<Complex32>,
}

impl std::fmt::Debug for Fft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fft").field("len", &self.len).finish_non_exhaustive()
    }
}

impl Fft {
    /// Plan a transform of length `len` (at least 2).
    pub fn new(len: usize) -> Result<Self> {
        let (forward, inverse, scratch) = plan(len)?;
        Ok(Self {
            len,
            forward,
            inverse,
            scratch,
        })
    }

    /// Transform length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always `false`: a planned transform has at least two points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Re-plan for a new length. On error the current plan is kept.
    pub fn set_length(&mut self, len: usize) -> Result<()> {
        if len == self.len {
            return Ok(());
        }
        let (forward, inverse, scratch) = plan(len)?;
        self.len = len;
        self.forward = forward;
        self.inverse = inverse;
        self.scratch = scratch;
        Ok(())
    }

    /// Unscaled forward transform of `input` into `output`.
    pub fn fft(&mut self, input: &[Sample], output: &mut [Sample]) -> Result<()> {
        DspError::check_len(self.len, input.len())?;
        DspError::check_len(self.len, output.len())?;
        output.copy_from_slice(input);
        self.forward.process_with_scratch(output, &mut self.scratch);
        Ok(())
    }

    /// Inverse transform of `input` into `output`, scaled by `1/n`.
    pub fn ifft(&mut self, input: &[Sample], output: &mut [Sample]) -> Result<()> {
        DspError::check_len(self.len, input.len())?;
        DspError::check_len(self.len, output.len())?;
        output.copy_from_slice(input);
        self.inverse_scaled(output);
        Ok(())
    }

    pub fn fft_in_place(&mut self, data: &mut [Sample]) -> Result<()> {
        DspError::check_len(self.len, data.len())?;
        self.forward.process_with_scratch(data, &mut self.scratch);
        Ok(())
    }

    pub fn ifft_in_place(&mut self, data: &mut [Sample]) -> Result<()> {
        DspError::check_len(self.len, data.len())?;
        self.inverse_scaled(data);
        Ok(())
    }

    /// Forward transform of a real signal.
    ///
    /// `output` receives the `n/2 + 1` non-redundant bins.
    pub fn fft_real(&mut self, input: &[f32], output: &mut [Sample]) -> Result<()> {
        DspError::check_len(self.len, input.len())?;
        DspError::check_len(self.len / 2 + 1, output.len())?;

        let mut buffer: Vec<Complex32> = input.iter().map(|&x| Complex32::new(x, 0.0)).collect();
        self.forward.process_with_scratch(&mut buffer, &mut self.scratch);
        output.copy_from_slice(&buffer[..output.len()]);
        Ok(())
    }

    fn inverse_scaled(&mut self, data: &mut [Sample]) {
        self.inverse.process_with_scratch(data, &mut self.scratch);
        let scale = 1.0 / self.len as f32;
        for x in data.iter_mut() {
            *x *= scale;
        }
    }
}

type Plan = (Arc<dyn RustFft<f32>>, Arc<dyn RustFft<f32>>, Vec<Complex32>);

fn plan(len: usize) -> Result<Plan> {
    if len < 2 {
        return Err(DspError::InvalidLength { len });
    }
    let mut planner = FftPlanner::new();
    let forward = planner.plan_fft_forward(len);
    let inverse = planner.plan_fft_inverse(len);
    let scratch_len = forward
        .get_inplace_scratch_len()
        .max(inverse.get_inplace_scratch_len());
    Ok((forward, inverse, vec![Complex32::default(); scratch_len]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn close(a: Sample, b: Sample, eps: f32) -> bool {
        (a - b).norm() < eps
    }

    #[test]
    fn test_invalid_length() {
        assert_eq!(Fft::new(1).unwrap_err(), DspError::InvalidLength { len: 1 });
        assert_eq!(Fft::new(0).unwrap_err(), DspError::InvalidLength { len: 0 });
    }

    #[test]
    fn test_set_length_keeps_state_on_error() {
        let mut fft = Fft::new(8).unwrap();
        assert!(fft.set_length(1).is_err());
        assert_eq!(fft.len(), 8);
        fft.set_length(16).unwrap();
        assert_eq!(fft.len(), 16);
    }

    #[test]
    fn test_round_trip() {
        let n = 24;
        let mut fft = Fft::new(n).unwrap();
        let input: Vec<Sample> = (0..n)
            .map(|i| Complex32::new((i as f32 * 0.3).sin(), (i as f32 * 0.7).cos() - 0.2))
            .collect();
        let mut spectrum = vec![Complex32::default(); n];
        let mut back = vec![Complex32::default(); n];

        fft.fft(&input, &mut spectrum).unwrap();
        fft.ifft(&spectrum, &mut back).unwrap();

        for (a, b) in input.iter().zip(&back) {
            assert!(close(*a, *b, 1e-5));
        }
    }

    #[test]
    fn test_tone_lands_in_bin() {
        let n = 64;
        let bin = 5;
        let mut fft = Fft::new(n).unwrap();
        let mut data: Vec<Sample> = (0..n)
            .map(|i| Complex32::from_polar(1.0, 2.0 * PI * (bin * i) as f32 / n as f32))
            .collect();
        fft.fft_in_place(&mut data).unwrap();

        assert!((data[bin].norm() - n as f32).abs() < 1e-3);
        for (i, x) in data.iter().enumerate() {
            if i != bin {
                assert!(x.norm() < 1e-3);
            }
        }
    }

    #[test]
    fn test_length_mismatch() {
        let mut fft = Fft::new(8).unwrap();
        let input = vec![Complex32::default(); 4];
        let mut output = vec![Complex32::default(); 8];
        assert_eq!(
            fft.fft(&input, &mut output).unwrap_err(),
            DspError::LengthMismatch { expected: 8, actual: 4 }
        );
    }

    #[test]
    fn test_fft_real() {
        let n = 8;
        let mut fft = Fft::new(n).unwrap();
        let input = vec![1.0f32; n];
        let mut output = vec![Complex32::default(); n / 2 + 1];
        fft.fft_real(&input, &mut output).unwrap();
        assert!(close(output[0], Complex32::new(8.0, 0.0), 1e-5));
        assert!(output[1..].iter().all(|x| x.norm() < 1e-5));
    }
}
