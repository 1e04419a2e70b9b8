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

//! WAV recording source.
//!
//! Reads 16-bit stereo WAV files: left channel = I, right channel = Q.
//! Samples are normalized from int16 to [-1, 1).

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{bail, Context, Result};
use carrier_dsp::tools::iq_from_i16;
use carrier_dsp::Block;
use hound::{WavIntoSamples, WavReader};

use super::IqSource;

pub struct WavSource {
    samples: WavIntoSamples<BufReader<File>, i16>,
    sample_rate: u32,
    finished: bool,
}

impl std::fmt::Debug for WavSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavSource")
            .field("sample_rate", &self.sample_rate)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl WavSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let reader = WavReader::open(path.as_ref()).context("Failed to open WAV file")?;
        let spec = reader.spec();

        if spec.channels != 2 {
            bail!("WAV file must be stereo (2 channels), found {} channels", spec.channels);
        }
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            bail!(
                "WAV file must be 16-bit integer, found {} bits per sample",
                spec.bits_per_sample
            );
        }

        log::info!(
            "Opened WAV file: {} Hz, {:.2} seconds",
            spec.sample_rate,
            f64::from(reader.duration()) / f64::from(spec.sample_rate)
        );

        Ok(Self {
            samples: reader.into_samples::<i16>(),
            sample_rate: spec.sample_rate,
            finished: false,
        })
    }
}

impl IqSource for WavSource {
    fn read_block(&mut self, max_len: usize) -> Result<Option<Block>> {
        if self.finished {
            return Ok(None);
        }

        let mut interleaved = Vec::with_capacity(max_len * 2);
        while interleaved.len() < max_len * 2 {
            match self.samples.next() {
                Some(sample) => interleaved.push(sample.context("Failed to read WAV sample")?),
                None => {
                    self.finished = true;
                    break;
                }
            }
        }

        // A dangling I without its Q is dropped
        interleaved.truncate(interleaved.len() - interleaved.len() % 2);
        if interleaved.is_empty() {
            return Ok(None);
        }
        Ok(Some(iq_from_i16(&interleaved)))
    }

    fn sample_rate(&self) -> Option<f64> {
        Some(f64::from(self.sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::path::PathBuf;

    fn temp_wav(name: &str, channels: u16, frames: &[(i16, i16)]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("carrier-monitor-{}-{name}.wav", std::process::id()));
        let spec = WavSpec {
            channels,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for &(i, q) in frames {
            writer.write_sample(i).unwrap();
            if channels == 2 {
                writer.write_sample(q).unwrap();
            }
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn test_reads_stereo_as_iq() {
        let path = temp_wav("stereo", 2, &[(16384, -16384), (0, 32767), (-32768, 0)]);
        let mut source = WavSource::open(&path).unwrap();
        assert_eq!(source.sample_rate(), Some(48_000.0));

        let block = source.read_block(2).unwrap().unwrap();
        assert_eq!(block.len(), 2);
        assert!((block[0].re - 0.5).abs() < 1e-6);
        assert!((block[0].im + 0.5).abs() < 1e-6);
        assert!(block[1].re.abs() < 1e-6);

        let rest = source.read_block(2).unwrap().unwrap();
        assert_eq!(rest.len(), 1);
        assert!((rest[0].re + 1.0).abs() < 1e-6);
        assert!(source.read_block(2).unwrap().is_none());

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_rejects_mono() {
        let path = temp_wav("mono", 1, &[(1, 0), (2, 0)]);
        assert!(WavSource::open(&path).is_err());
        let _ = std::fs::remove_file(path);
    }
}
