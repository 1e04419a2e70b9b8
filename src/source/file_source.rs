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

//! Raw cf32 recording source: interleaved little-endian float32 I/Q pairs.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use anyhow::{Context, Result};
use carrier_dsp::{Block, Sample};

use super::IqSource;

const BYTES_PER_SAMPLE: usize = 8;

pub struct FileSource {
    reader: Box<dyn Read + Send>,
    bytes: Vec<u8>,
    finished: bool,
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open IQ file {}", path.display()))?;
        if let Ok(meta) = file.metadata() {
            log::info!(
                "Opened IQ file {} ({} samples)",
                path.display(),
                meta.len() / BYTES_PER_SAMPLE as u64
            );
        }
        Ok(Self::from_reader(BufReader::new(file)))
    }

    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            bytes: Vec::new(),
            finished: false,
        }
    }

    /// Fill `bytes` as far as the reader allows, returning the count read.
    fn fill(&mut self, len: usize) -> Result<usize> {
        self.bytes.resize(len, 0);
        let mut filled = 0;
        while filled < len {
            match self.reader.read(&mut self.bytes[filled..]) {
                Ok(0) => {
                    self.finished = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e).context("Failed to read IQ file"),
            }
        }
        Ok(filled)
    }
}

impl IqSource for FileSource {
    fn read_block(&mut self, max_len: usize) -> Result<Option<Block>> {
        if self.finished || max_len == 0 {
            return Ok(None);
        }

        let filled = self.fill(max_len * BYTES_PER_SAMPLE)?;
        let whole = filled / BYTES_PER_SAMPLE;
        if filled % BYTES_PER_SAMPLE != 0 {
            log::warn!("IQ file ends with {} stray bytes", filled % BYTES_PER_SAMPLE);
        }
        if whole == 0 {
            return Ok(None);
        }

        let block: Block = self.bytes[..whole * BYTES_PER_SAMPLE]
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| {
                let re = f32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]);
                let im = f32::from_le_bytes([pair[4], pair[5], pair[6], pair[7]]);
                Sample::new(re, im)
            })
            .collect();
        Ok(Some(block))
    }
}
