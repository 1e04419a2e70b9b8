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

//! Small numeric helpers shared by the DSP stages.

use num_complex::Complex32;

use crate::Sample;

/// Floor applied when converting a zero power to decibels.
pub const DB_FLOOR: f32 = -120.0;

/// Smallest power of two that is `>= n` (1 for `n == 0`).
#[must_use]
pub fn next_pow2(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

/// Rotate a spectrum so bin 0 (DC) lands in the middle.
///
/// Odd lengths follow the usual `fftshift` convention.
pub fn fft_shift<T>(data: &mut [T]) {
    let half = data.len().div_ceil(2);
    data.rotate_left(half);
}

/// Copy of `data` with DC moved to the center.
#[must_use]
pub fn center<T: Clone>(data: &[T]) -> Vec<T> {
    let mut out = data.to_vec();
    fft_shift(&mut out);
    out
}

/// Mean power `|x|^2` of a block. Empty input yields 0.
#[must_use]
pub fn variance(data: &[Sample]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().map(Complex32::norm_sqr).sum::<f32>() / data.len() as f32
}

/// Mean magnitude `|x|` of a block. Empty input yields 0.
#[must_use]
pub fn mean_magnitude(data: &[Sample]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().map(|s| s.norm()).sum::<f32>() / data.len() as f32
}

/// Linear interpolation between `a` and `b` at fraction `t`.
#[must_use]
pub fn interpolate_linear(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Refine a peak position to sub-bin accuracy with a parabola through the
/// peak bin and its two neighbours.
///
/// The offset is clamped to one bin. Edge bins and flat neighbourhoods
/// return the integer position.
#[must_use]
pub fn interpolate_peak_position(data: &[f32], pos: usize) -> f32 {
    let fallback = pos as f32;
    if pos == 0 || pos + 1 >= data.len() {
        return fallback;
    }

    let (left, mid, right) = (data[pos - 1], data[pos], data[pos + 1]);
    let denom = left - 2.0 * mid + right;
    if denom.abs() < f32::EPSILON || !denom.is_finite() {
        return fallback;
    }

    let offset = (0.5 * (left - right) / denom).clamp(-1.0, 1.0);
    fallback + offset
}

/// `|x|` per sample.
#[must_use]
pub fn magnitudes(data: &[Sample]) -> Vec<f32> {
    data.iter().map(|s| s.norm()).collect()
}

/// `|x|^2` per sample.
#[must_use]
pub fn norms(data: &[Sample]) -> Vec<f32> {
    data.iter().map(Complex32::norm_sqr).collect()
}

/// Convert interleaved signed 16-bit I/Q pairs into samples in `[-1, 1)`.
///
/// A trailing unpaired value is ignored.
#[must_use]
pub fn iq_from_i16(raw: &[i16]) -> Vec<Sample> {
    raw.chunks_exact(2)
        .map(|pair| {
            Complex32::new(
                f32::from(pair[0]) / 32768.0,
                f32::from(pair[1]) / 32768.0,
            )
        })
        .collect()
}

/// Convert interleaved unsigned 8-bit I/Q pairs (RTL-SDR style, offset
/// binary) into samples in `[-1, 1]`.
#[must_use]
pub fn iq_from_u8(raw: &[u8]) -> Vec<Sample> {
    raw.chunks_exact(2)
        .map(|pair| {
            Complex32::new(
                (f32::from(pair[0]) - 127.5) / 127.5,
                (f32::from(pair[1]) - 127.5) / 127.5,
            )
        })
        .collect()
}
