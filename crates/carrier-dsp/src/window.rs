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

//! Analysis windows with per-kind coefficient caches.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DspError, Result};
use crate::Sample;

/// Supported analysis window shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Hamming,
    #[default]
    VonHann,
    Blackman,
    FlatTop,
}

impl WindowKind {
    /// Every window kind, in selection order.
    pub const ALL: [Self; 4] = [Self::Hamming, Self::VonHann, Self::Blackman, Self::FlatTop];

    /// Lowercase name used in configuration files and on the command line.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Hamming => "hamming",
            Self::VonHann => "vonhann",
            Self::Blackman => "blackman",
            Self::FlatTop => "flattop",
        }
    }

    /// Coefficient `w` of a window of length `len` (`len >= 2`).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, reason = "coefficients fit f32")]
    pub fn coefficient(self, w: usize, len: usize) -> f32 {
        let x = 2.0 * PI * w as f64 / (len - 1) as f64;
        let value = match self {
            Self::Hamming => 0.54 - 0.46 * x.cos(),
            Self::VonHann => 0.5 - 0.5 * x.cos(),
            Self::Blackman => 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos(),
            Self::FlatTop => {
                1.0 - 1.93 * x.cos() + 1.29 * (2.0 * x).cos() - 0.388 * (3.0 * x).cos()
                    + 0.028 * (4.0 * x).cos()
            }
        };
        value as f32
    }

    fn index(self) -> usize {
        match self {
            Self::Hamming => 0,
            Self::VonHann => 1,
            Self::Blackman => 2,
            Self::FlatTop => 3,
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WindowKind {
    type Err = DspError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DspError::invalid_argument(format!("unknown window '{s}'")))
    }
}

/// Lazily built coefficient tables, one per [`WindowKind`].
///
/// A table is rebuilt only when a different length is requested for that
/// kind; the other kinds keep their tables.
#[derive(Debug, Default, Clone)]
pub struct Window {
    tables: [Vec<f32>; 4],
}

impl Window {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Coefficients for `kind` at length `len`, building them on a miss.
    pub fn coefficients(&mut self, kind: WindowKind, len: usize) -> Result<&[f32]> {
        if len < 2 {
            return Err(DspError::InvalidLength { len });
        }
        let table = &mut self.tables[kind.index()];
        if table.len() != len {
            log::debug!("Building {kind} window table for length {len}");
            table.clear();
            table.extend((0..len).map(|w| kind.coefficient(w, len)));
        }
        Ok(table.as_slice())
    }

    /// Length of the cached table for `kind` (0 when never built).
    #[must_use]
    pub fn cached_len(&self, kind: WindowKind) -> usize {
        self.tables[kind.index()].len()
    }

    /// Multiply `data` by the window in place.
    pub fn apply(&mut self, kind: WindowKind, data: &mut [Sample]) -> Result<()> {
        let table = self.coefficients(kind, data.len())?;
        for (x, &c) in data.iter_mut().zip(table) {
            *x *= c;
        }
        Ok(())
    }

    /// Write the windowed `input` into `output`.
    pub fn apply_to(&mut self, kind: WindowKind, input: &[Sample], output: &mut [Sample]) -> Result<()> {
        DspError::check_len(input.len(), output.len())?;
        let table = self.coefficients(kind, input.len())?;
        for ((out, &x), &c) in output.iter_mut().zip(input).zip(table) {
            *out = x * c;
        }
        Ok(())
    }

    /// Windowed copy of `input`.
    pub fn windowed(&mut self, kind: WindowKind, input: &[Sample]) -> Result<Vec<Sample>> {
        let mut output = input.to_vec();
        self.apply(kind, &mut output)?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex32;

    #[test]
    fn test_window_end_and_center_values() {
        let mut window = Window::new();
        let len = 65;

        let hamming = window.coefficients(WindowKind::Hamming, len).unwrap().to_vec();
        assert!((hamming[0] - 0.08).abs() < 1e-6);
        assert!((hamming[32] - 1.0).abs() < 1e-6);
        assert!((hamming[64] - 0.08).abs() < 1e-6);

        let hann = window.coefficients(WindowKind::VonHann, len).unwrap().to_vec();
        assert!(hann[0].abs() < 1e-6);
        assert!((hann[32] - 1.0).abs() < 1e-6);

        let blackman = window.coefficients(WindowKind::Blackman, len).unwrap().to_vec();
        assert!(blackman[0].abs() < 1e-6);
        assert!((blackman[32] - 1.0).abs() < 1e-6);

        let flattop = window.coefficients(WindowKind::FlatTop, len).unwrap().to_vec();
        assert!((flattop[32] - 4.636).abs() < 1e-3);
        assert!(flattop[0].abs() < 1e-3);
    }

    #[test]
    fn test_windows_are_symmetric() {
        let mut window = Window::new();
        for kind in WindowKind::ALL {
            let table = window.coefficients(kind, 32).unwrap().to_vec();
            for i in 0..16 {
                assert!((table[i] - table[31 - i]).abs() < 1e-5, "{kind} asymmetric at {i}");
            }
        }
    }

    #[test]
    fn test_cache_rebuilds_only_affected_kind() {
        let mut window = Window::new();
        window.coefficients(WindowKind::Hamming, 8).unwrap();
        window.coefficients(WindowKind::VonHann, 8).unwrap();
        window.coefficients(WindowKind::Hamming, 16).unwrap();

        assert_eq!(window.cached_len(WindowKind::Hamming), 16);
        assert_eq!(window.cached_len(WindowKind::VonHann), 8);
        assert_eq!(window.cached_len(WindowKind::Blackman), 0);
    }

    #[test]
    fn test_invalid_length() {
        let mut window = Window::new();
        let mut data = vec![Complex32::new(1.0, 0.0)];
        assert_eq!(
            window.apply(WindowKind::Hamming, &mut data),
            Err(DspError::InvalidLength { len: 1 })
        );
    }

    #[test]
    fn test_apply_in_place_matches_out_of_place() {
        let mut window = Window::new();
        let input: Vec<Sample> = (0..16).map(|i| Complex32::new(1.0, i as f32)).collect();
        let mut output = vec![Complex32::default(); 16];
        window.apply_to(WindowKind::Blackman, &input, &mut output).unwrap();

        let mut in_place = input.clone();
        window.apply(WindowKind::Blackman, &mut in_place).unwrap();
        assert_eq!(in_place, output);
        assert_eq!(window.windowed(WindowKind::Blackman, &input).unwrap(), output);
    }

    #[test]
    fn test_kind_names() {
        for kind in WindowKind::ALL {
            assert_eq!(kind.name().parse::<WindowKind>().unwrap(), kind);
        }
        assert_eq!("FlatTop".parse::<WindowKind>().unwrap(), WindowKind::FlatTop);
        assert!("kaiser".parse::<WindowKind>().is_err());
    }
}
