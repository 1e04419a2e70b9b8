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

//! Frequency-domain low-pass window used when extracting a carrier.

use std::f64::consts::PI;

use crate::error::{DspError, Result};
use crate::Sample;

/// Symmetric low-pass gain table for an FFT-ordered spectrum.
///
/// The table has a flat passband around DC, a raised-cosine transition and
/// a constant stopband, mirrored so that bin `k` and bin `len - 1 - k` get
/// the same gain.
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    window: Vec<f32>,
}

impl LowPassFilter {
    /// Build a filter for spectra of length `len`.
    ///
    /// `rel_passband` and `rel_transition` are fractions of one sideband
    /// (`len / 2` bins). `stop_attenuation_db` must be below 1 (typically
    /// around -60). A transition of 0 gives a brick-wall edge.
    pub fn new(
        len: usize,
        stop_attenuation_db: f64,
        rel_passband: f64,
        rel_transition: f64,
    ) -> Result<Self> {
        if len <= 1 {
            return Err(DspError::invalid_argument(format!(
                "low-pass length must be greater than 1, got {len}"
            )));
        }
        if stop_attenuation_db >= 1.0 {
            return Err(DspError::invalid_argument(format!(
                "stop attenuation must be below 1 dB, got {stop_attenuation_db}"
            )));
        }

        let transition = rel_transition.abs().clamp(1e-6, 0.99);
        let stop_factor = 10f64.powf(stop_attenuation_db / 10.0);
        let half = len / 2;
        let span = (half.max(2) - 1) as f64;

        let mut sideband = vec![1.0f64; half];
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "clamped to a non-negative bin index"
        )]
        let first = (rel_passband * half as f64).ceil().max(0.0) as usize;
        for (i, gain) in sideband.iter_mut().enumerate().skip(first) {
            let x = i as f64 / span - rel_passband;
            *gain = if x > transition {
                stop_factor
            } else {
                (0.5 + 0.5 * (PI * x / transition).cos()) * (1.0 - stop_factor) + stop_factor
            };
        }

        let mut window: Vec<f32> = sideband.iter().copied().map(gain_f32).collect();
        if len % 2 == 1 {
            window.push(window[half - 1]);
        }
        window.extend(sideband.iter().rev().copied().map(gain_f32));

        Ok(Self { window })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.window.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Gain per bin.
    #[must_use]
    pub fn gains(&self) -> &[f32] {
        &self.window
    }

    /// Multiply an FFT-ordered spectrum by the filter gains.
    pub fn apply(&self, spectrum: &mut [Sample]) -> Result<()> {
        DspError::check_len(self.window.len(), spectrum.len())?;
        for (x, &g) in spectrum.iter_mut().zip(&self.window) {
            *x *= g;
        }
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation, reason = "gains lie in (0, 1]")]
fn gain_f32(gain: f64) -> f32 {
    gain as f32
}
