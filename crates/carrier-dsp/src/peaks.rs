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

//! Peak detection over power spectra.
//!
//! Candidates are visited from the strongest bin down. Each one grows
//! symmetrically until the level on either side has dropped by more than the
//! threshold; the resulting interval is claimed so weaker candidates cannot
//! overlap it.

use serde::{Deserialize, Serialize};

/// Default drop (in dB) between a peak and its edges.
pub const DEFAULT_THRESHOLD_DB: f32 = 12.0;

/// A detected peak as an inclusive bin interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub left: usize,
    pub right: usize,
    /// Level of the center bin.
    pub magnitude: f32,
}

impl Peak {
    /// Center bin.
    #[must_use]
    pub fn center(&self) -> usize {
        (self.left + self.right) / 2
    }

    /// Distance between the edge bins.
    #[must_use]
    pub fn width(&self) -> usize {
        self.right - self.left
    }

    #[must_use]
    pub fn contains(&self, bin: usize) -> bool {
        (self.left..=self.right).contains(&bin)
    }

    #[must_use]
    pub fn overlaps(&self, other: &Peak) -> bool {
        self.left <= other.right && other.left <= self.right
    }
}

/// Find disjoint peaks in `input` (typically a dB spectrum).
///
/// A peak is emitted when the center level exceeds the level `w` bins to
/// the left or right by more than `threshold_db`, with `w` growing in
/// `step` increments (0 is treated as 1). Peaks come out strongest first.
#[must_use]
pub fn find_peaks(input: &[f32], threshold_db: f32, step: usize) -> Vec<Peak> {
    PeakDetector::new()
        .threshold_db(threshold_db)
        .step(step)
        .detect(input)
}

/// Configurable peak finder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakDetector {
    threshold_db: f32,
    step: usize,
    max_peaks: usize,
}

impl Default for PeakDetector {
    fn default() -> Self {
        Self {
            threshold_db: DEFAULT_THRESHOLD_DB,
            step: 1,
            max_peaks: 0,
        }
    }
}

impl PeakDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn threshold_db(mut self, threshold_db: f32) -> Self {
        self.threshold_db = threshold_db;
        self
    }

    #[must_use]
    pub fn step(mut self, step: usize) -> Self {
        self.step = step.max(1);
        self
    }

    /// Stop after this many peaks (0 for no limit).
    #[must_use]
    pub fn max_peaks(mut self, max_peaks: usize) -> Self {
        self.max_peaks = max_peaks;
        self
    }

    #[must_use]
    pub fn detect(&self, input: &[f32]) -> Vec<Peak> {
        let len = input.len();
        let step = self.step.max(1);

        let mut order: Vec<usize> = (0..len).filter(|&i| !input[i].is_nan()).collect();
        order.sort_by(|&a, &b| input[b].total_cmp(&input[a]));

        let mut claimed = vec![false; len];
        let mut peaks = Vec::new();

        for pos in order {
            if self.max_peaks > 0 && peaks.len() >= self.max_peaks {
                break;
            }
            if claimed[pos] {
                continue;
            }

            if let Some(peak) = self.grow(input, &claimed, pos, step) {
                claimed[peak.left..=peak.right].fill(true);
                peaks.push(peak);
            }
        }

        peaks
    }

    fn grow(&self, input: &[f32], claimed: &[bool], pos: usize, step: usize) -> Option<Peak> {
        let len = input.len();
        let bound = (len / 2).min(pos).min(len - pos);
        let center = input[pos];

        let mut covered = 0;
        let mut w = 0;
        while w < bound {
            // Bins newly spanned since the last step must all be free
            let fresh_left = pos - w..pos - covered;
            let fresh_right = pos + covered + 1..=pos + w;
            if claimed[fresh_left].iter().any(|&c| c) || claimed[fresh_right].iter().any(|&c| c) {
                return None;
            }
            covered = w;

            if center - input[pos + w] > self.threshold_db || center - input[pos - w] > self.threshold_db {
                return Some(Peak {
                    left: pos - w,
                    right: pos + w,
                    magnitude: center,
                });
            }
            w += step;
        }
        None
    }
}
