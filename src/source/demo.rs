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

//! Synthetic IQ source for running without hardware or recordings.

use std::f64::consts::TAU;

use anyhow::Result;
use carrier_dsp::{Block, Sample};

use super::IqSource;

const NOISE_AMPLITUDE: f64 = 0.01;

/// A continuous tone relative to the tuned center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemoTone {
    pub offset_hz: f64,
    pub amplitude: f64,
}

/// Sum of tones plus uniform noise, for a fixed number of samples.
#[derive(Debug)]
pub struct DemoSource {
    sample_rate: f64,
    tones: Vec<DemoTone>,
    phases: Vec<f64>,
    remaining: usize,
    noise_state: u32,
}

impl DemoSource {
    #[must_use]
    pub fn new(sample_rate: f64, duration_secs: f64, tones: Vec<DemoTone>) -> Self {
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "duration and rate are validated positive"
        )]
        let remaining = (sample_rate * duration_secs.max(0.0)).round() as usize;
        Self {
            sample_rate,
            phases: vec![0.0; tones.len()],
            tones,
            remaining,
            noise_state: 0x1234_5678,
        }
    }

    /// Three carriers spread over the band at different levels.
    #[must_use]
    pub fn default_tones() -> Vec<DemoTone> {
        vec![
            DemoTone { offset_hz: 100_000.0, amplitude: 1.0 },
            DemoTone { offset_hz: -250_000.0, amplitude: 0.5 },
            DemoTone { offset_hz: 420_000.0, amplitude: 0.25 },
        ]
    }

    fn noise(&mut self) -> f64 {
        let mut x = self.noise_state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.noise_state = x;
        (f64::from(x) / f64::from(u32::MAX) - 0.5) * 2.0 * NOISE_AMPLITUDE
    }
}

impl IqSource for DemoSource {
    fn read_block(&mut self, max_len: usize) -> Result<Option<Block>> {
        let len = max_len.min(self.remaining);
        if len == 0 {
            return Ok(None);
        }

        let mut block = Block::with_capacity(len);
        for _ in 0..len {
            let mut re = self.noise();
            let mut im = self.noise();
            for (tone, phase) in self.tones.iter().zip(self.phases.iter_mut()) {
                re += tone.amplitude * phase.cos();
                im += tone.amplitude * phase.sin();
                *phase = (*phase + TAU * tone.offset_hz / self.sample_rate).rem_euclid(TAU);
            }
            #[allow(clippy::cast_possible_truncation, reason = "samples are stored as f32")]
            block.push(Sample::new(re as f32, im as f32));
        }
        self.remaining -= len;
        Ok(Some(block))
    }

    fn sample_rate(&self) -> Option<f64> {
        Some(self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_runs_for_duration() {
        let mut source = DemoSource::new(1000.0, 2.5, DemoSource::default_tones());
        let mut total = 0;
        while let Some(block) = source.read_block(256).unwrap() {
            assert!(block.len() <= 256);
            total += block.len();
        }
        assert_eq!(total, 2500);
        assert!(source.read_block(256).unwrap().is_none());
    }

    #[test]
    fn test_demo_tone_rotates_at_offset() {
        let tone = DemoTone { offset_hz: 250.0, amplitude: 1.0 };
        let mut source = DemoSource::new(1000.0, 1.0, vec![tone]);
        let block = source.read_block(4).unwrap().unwrap();

        // Quarter turn per sample, noise is far below the tolerance
        assert!((block[0].re - 1.0).abs() < 0.05);
        assert!((block[1].im - 1.0).abs() < 0.05);
        assert!((block[2].re + 1.0).abs() < 0.05);
        assert!((block[3].im + 1.0).abs() < 0.05);
    }
}
