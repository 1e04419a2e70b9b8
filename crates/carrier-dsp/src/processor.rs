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

//! Worker thread that drains a block queue into a processing step.
//!
//! A [`ThreadedProcessor`] owns a [`BoundedQueue`] and, while running, one
//! worker thread that pops blocks and hands them to a [`BlockProcessor`].
//! [`FramedProcessor`] adapts a per-frame [`FrameProcessor`] to the block
//! interface by buffering samples and cutting overlapping frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info};

use crate::error::{DspError, Result};
use crate::queue::{BoundedQueue, DEFAULT_MAX_LIMIT};
use crate::{Block, Sample};

/// How long the worker waits for a block before re-checking the run flag.
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const PROGRESS_LOG_BLOCKS: u64 = 4096;

/// Processing step run on the worker thread for every popped block.
pub trait BlockProcessor: Send + 'static {
    fn process(&mut self, block: Block);
}

/// Processing step run for every complete frame.
pub trait FrameProcessor: Send + 'static {
    fn process_frame(&mut self, frame: &[Sample]);
}

/// Buffers incoming blocks and feeds overlapping frames to `F`.
///
/// Frames are `frame_len` samples long and start `overlap_step` samples
/// apart. Consumed samples are discarded once no later frame needs them.
pub struct FramedProcessor<F> {
    inner: F,
    buffer: Vec<Sample>,
    frame_len: usize,
    overlap_step: usize,
    frames: u64,
}

impl<F> std::fmt::Debug for FramedProcessor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedProcessor")
            .field("frame_len", &self.frame_len)
            .field("overlap_step", &self.overlap_step)
            .field("buffered", &self.buffer.len())
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

impl<F: FrameProcessor> FramedProcessor<F> {
    /// `overlap_step` must lie in `1..=frame_len`.
    pub fn new(inner: F, frame_len: usize, overlap_step: usize) -> Result<Self> {
        if frame_len == 0 {
            return Err(DspError::invalid_argument("frame length must be positive"));
        }
        if overlap_step == 0 || overlap_step > frame_len {
            return Err(DspError::invalid_argument(format!(
                "overlap step {overlap_step} outside 1..={frame_len}"
            )));
        }
        Ok(Self {
            inner,
            buffer: Vec::new(),
            frame_len,
            overlap_step,
            frames: 0,
        })
    }

    #[must_use]
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    #[must_use]
    pub fn overlap_step(&self) -> usize {
        self.overlap_step
    }

    /// Samples waiting for a complete frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Frames handed to the inner step so far.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    #[must_use]
    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut F {
        &mut self.inner
    }

    pub fn into_inner(self) -> F {
        self.inner
    }
}

impl<F: FrameProcessor> BlockProcessor for FramedProcessor<F> {
    fn process(&mut self, block: Block) {
        if self.buffer.is_empty() {
            self.buffer = block;
        } else {
            self.buffer.extend_from_slice(&block);
        }

        let mut consumed = 0;
        while self.buffer.len() - consumed >= self.frame_len {
            self.inner
                .process_frame(&self.buffer[consumed..consumed + self.frame_len]);
            self.frames += 1;
            consumed += self.overlap_step;
        }
        self.buffer.drain(..consumed);
    }
}

/// Two-state (stopped/running) owner of a queue and its worker thread.
///
/// The processing step moves into the worker on [`start`](Self::start) and
/// comes back on [`stop`](Self::stop), so its state survives a restart. The
/// queue is left intact by `stop`; blocks pushed meanwhile are processed
/// after the next `start`.
pub struct ThreadedProcessor<P: BlockProcessor> {
    name: String,
    queue: Arc<BoundedQueue<Sample>>,
    running: Arc<AtomicBool>,
    step: Option<P>,
    worker: Option<JoinHandle<P>>,
}

impl<P: BlockProcessor> std::fmt::Debug for ThreadedProcessor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadedProcessor")
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl<P: BlockProcessor> ThreadedProcessor<P> {
    /// Processor with a queue of the default capacity.
    pub fn new(name: impl Into<String>, step: P) -> Self {
        Self::with_queue_limit(name, step, DEFAULT_MAX_LIMIT)
    }

    pub fn with_queue_limit(name: impl Into<String>, step: P, max_blocks: usize) -> Self {
        Self {
            name: name.into(),
            queue: Arc::new(BoundedQueue::new(max_blocks)),
            running: Arc::new(AtomicBool::new(false)),
            step: Some(step),
            worker: None,
        }
    }

    /// Shared handle for producers.
    #[must_use]
    pub fn queue(&self) -> Arc<BoundedQueue<Sample>> {
        Arc::clone(&self.queue)
    }

    /// Whether a worker is alive. A worker that died on a panic counts as stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// The processing step, available while stopped.
    #[must_use]
    pub fn step(&self) -> Option<&P> {
        self.step.as_ref()
    }

    pub fn step_mut(&mut self) -> Option<&mut P> {
        self.step.as_mut()
    }

    /// Queue a block without blocking. Returns `false` if it was dropped.
    pub fn push(&self, block: Block) -> bool {
        self.queue.push(block, false)
    }

    /// Queue a block, waiting for space. Returns `false` once aborted.
    pub fn push_blocking(&self, block: Block) -> bool {
        self.queue.push(block, true)
    }

    /// Spawn the worker thread.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(DspError::runtime(format!("{} is already running", self.name)));
        }
        if self.queue.is_aborted() {
            return Err(DspError::QueueAborted);
        }
        let Some(mut step) = self.step.take() else {
            return Err(DspError::runtime(format!(
                "{} lost its processing step in a failed worker",
                self.name
            )));
        };

        self.running.store(true, Ordering::Release);
        let queue = Arc::clone(&self.queue);
        let running = Arc::clone(&self.running);
        let name = self.name.clone();

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let mut block = Vec::new();
                let mut blocks = 0u64;
                while running.load(Ordering::Acquire) {
                    if queue.pop_timeout(&mut block, POLL_INTERVAL) {
                        step.process(std::mem::take(&mut block));
                        blocks += 1;
                        if blocks % PROGRESS_LOG_BLOCKS == 0 {
                            debug!("{name}: {blocks} blocks processed, {} queued", queue.len());
                        }
                    } else if queue.is_aborted() {
                        debug!("{name}: queue aborted, worker exiting");
                        break;
                    }
                }
                step
            })
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                DspError::runtime(format!("failed to spawn {} worker: {e}", self.name))
            })?;

        self.worker = Some(handle);
        info!("{} started", self.name);
        Ok(())
    }

    /// Ask the worker to finish its current block and join it.
    ///
    /// A no-op when already stopped.
    pub fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };

        match handle.join() {
            Ok(step) => {
                self.step = Some(step);
                info!("{} stopped", self.name);
                Ok(())
            }
            Err(_) => {
                error!("{} worker panicked", self.name);
                Err(DspError::runtime(format!("{} worker panicked", self.name)))
            }
        }
    }
}

impl<P: BlockProcessor> Drop for ThreadedProcessor<P> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.queue.abort();
            let _ = self.stop();
        }
    }
}
