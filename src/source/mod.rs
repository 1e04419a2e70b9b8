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

//! IQ sample sources feeding the monitor.
//!
//! Every source yields blocks of normalized complex samples until it is
//! exhausted. Sources that know their own sample rate (WAV) report it so the
//! detector can be configured from the recording.

mod demo;
mod file_source;
mod wav_source;

pub use demo::DemoSource;
pub use file_source::FileSource;
pub use wav_source::WavSource;

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use carrier_dsp::Block;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Source of IQ data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Synthetic tones in noise
    #[default]
    Demo,
    /// Raw interleaved little-endian complex float32 (cf32)
    File,
    /// 16-bit stereo WAV, left = I, right = Q
    Wav,
}

/// A finite or endless producer of IQ blocks.
pub trait IqSource: Send {
    /// Read up to `max_len` samples. `Ok(None)` marks the end of the stream.
    fn read_block(&mut self, max_len: usize) -> Result<Option<Block>>;

    /// Sample rate carried by the source itself, if any.
    fn sample_rate(&self) -> Option<f64> {
        None
    }
}

/// Open the source selected on the command line.
pub fn open(
    kind: SourceKind,
    path: Option<&Path>,
    sample_rate: f64,
    duration_secs: f64,
) -> Result<Box<dyn IqSource>> {
    let require_path = |path: Option<&Path>| -> Result<PathBuf> {
        match path {
            Some(p) => Ok(p.to_path_buf()),
            None => bail!("--path is required for the {kind:?} source"),
        }
    };

    Ok(match kind {
        SourceKind::Demo => Box::new(DemoSource::new(sample_rate, duration_secs, DemoSource::default_tones())),
        SourceKind::File => Box::new(FileSource::open(require_path(path)?)?),
        SourceKind::Wav => Box::new(WavSource::open(require_path(path)?)?),
    })
}
