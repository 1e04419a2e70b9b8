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

//! Bounded blocking queue of sample blocks.
//!
//! The queue moves variable-length blocks from one producer to one consumer.
//! Pushes and pops can block (waiting on not-full / not-empty conditions) or
//! fail fast. Once [`BoundedQueue::abort`] is called the queue rejects all
//! further traffic and every waiter is released.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Default capacity in blocks.
pub const DEFAULT_MAX_LIMIT: usize = 64 * 1024 * 1024;

/// Grace period a pop waits for data after finding the queue empty.
const POP_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// FIFO of blocks protected by a mutex and two condition variables.
pub struct BoundedQueue<T> {
    max_limit: usize,
    blocks: Mutex<VecDeque<Vec<T>>>,
    not_empty: Condvar,
    not_full: Condvar,
    reject_input: AtomicBool,
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("len", &self.len())
            .field("max_limit", &self.max_limit)
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

impl<T> Default for BoundedQueue<T> {
    fn default() -> Self {
        Self::with_default_limit()
    }
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `max_limit` blocks (at least one).
    #[must_use]
    pub fn new(max_limit: usize) -> Self {
        Self {
            max_limit: max_limit.max(1),
            blocks: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            reject_input: AtomicBool::new(false),
        }
    }

    /// Queue holding up to [`DEFAULT_MAX_LIMIT`] blocks.
    #[must_use]
    pub fn with_default_limit() -> Self {
        Self::new(DEFAULT_MAX_LIMIT)
    }

    /// Capacity in blocks.
    #[must_use]
    pub fn max_limit(&self) -> usize {
        self.max_limit
    }

    // The guarded deque has no invariant a panicking holder could break.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Vec<T>>> {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of queued blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether [`abort`](Self::abort) has been called.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.reject_input.load(Ordering::Acquire)
    }

    /// Reject all further traffic and discard queued blocks.
    ///
    /// There is no way back: an aborted queue never accepts or yields data
    /// again. Every thread blocked in `push` or `try_pop` is woken and fails.
    pub fn abort(&self) {
        {
            let mut blocks = self.lock();
            self.reject_input.store(true, Ordering::Release);
            blocks.clear();
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Discard all queued blocks without aborting.
    pub fn clear(&self) {
        self.lock().clear();
        self.not_full.notify_all();
    }

    /// Append a block to the tail.
    ///
    /// With `blocking` the call waits while the queue is full; otherwise a
    /// full queue rejects the block. Returns `false` when the block was not
    /// queued (full in non-blocking mode, or aborted).
    pub fn push(&self, block: Vec<T>, blocking: bool) -> bool {
        let mut blocks = self.lock();
        if self.is_aborted() {
            return false;
        }

        if blocking {
            while blocks.len() >= self.max_limit {
                blocks = self
                    .not_full
                    .wait(blocks)
                    .unwrap_or_else(PoisonError::into_inner);
                if self.is_aborted() {
                    return false;
                }
            }
        } else if blocks.len() >= self.max_limit {
            return false;
        }

        blocks.push_back(block);
        drop(blocks);
        self.not_empty.notify_one();
        true
    }

    /// Take the front block into `output`.
    ///
    /// An empty `output` receives the block itself (no copy); a non-empty
    /// one gets the block's samples appended. With `blocking` the call waits
    /// until data arrives or the queue is aborted. Exactly one block is
    /// consumed per successful call.
    pub fn try_pop(&self, output: &mut Vec<T>, blocking: bool) -> bool {
        let mut blocks = self.lock();
        if blocking {
            while blocks.is_empty() {
                if self.is_aborted() {
                    return false;
                }
                blocks = self
                    .not_empty
                    .wait(blocks)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        self.take_front(blocks, output, POP_POLL_INTERVAL)
    }

    /// Like a non-blocking [`try_pop`](Self::try_pop) but waits up to
    /// `timeout` for a block to arrive.
    pub fn pop_timeout(&self, output: &mut Vec<T>, timeout: Duration) -> bool {
        let blocks = self.lock();
        self.take_front(blocks, output, timeout)
    }

    fn take_front(
        &self,
        mut blocks: MutexGuard<'_, VecDeque<Vec<T>>>,
        output: &mut Vec<T>,
        wait: Duration,
    ) -> bool {
        if self.is_aborted() {
            return false;
        }
        if blocks.is_empty() {
            blocks = self
                .not_empty
                .wait_timeout_while(blocks, wait, |b| b.is_empty() && !self.is_aborted())
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            if self.is_aborted() {
                return false;
            }
        }

        let Some(mut front) = blocks.pop_front() else {
            return false;
        };
        drop(blocks);
        self.not_full.notify_one();

        if output.is_empty() {
            std::mem::swap(output, &mut front);
        } else {
            output.append(&mut front);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order_and_losslessness() {
        let queue = Arc::new(BoundedQueue::<u32>::new(4));
        let producer_queue = Arc::clone(&queue);

        let producer = thread::spawn(move || {
            let mut pushed = Vec::new();
            for i in 0..200u32 {
                let block: Vec<u32> = (0..(i % 7 + 1)).map(|j| i * 10 + j).collect();
                assert!(producer_queue.push(block.clone(), true));
                pushed.extend(block);
            }
            pushed
        });

        let mut popped = Vec::new();
        let mut blocks = 0;
        while blocks < 200 {
            let mut block = Vec::new();
            if queue.try_pop(&mut block, true) {
                popped.extend(block);
                blocks += 1;
            }
        }

        let pushed = producer.join().unwrap();
        assert_eq!(popped, pushed);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_moves_block_into_empty_output() {
        let queue = BoundedQueue::new(2);
        let block = vec![1.0f32, 2.0, 3.0];
        let ptr = block.as_ptr();
        assert!(queue.push(block, false));

        let mut output = Vec::new();
        assert!(queue.try_pop(&mut output, false));
        assert_eq!(output.as_ptr(), ptr);
        assert_eq!(output, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_pop_appends_to_non_empty_output() {
        let queue = BoundedQueue::new(2);
        assert!(queue.push(vec![3, 4], false));

        let mut output = vec![1, 2];
        assert!(queue.try_pop(&mut output, false));
        assert_eq!(output, vec![1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_non_blocking_push_fails_when_full() {
        let queue = BoundedQueue::new(2);
        assert!(queue.push(vec![1], false));
        assert!(queue.push(vec![2], false));
        assert!(!queue.push(vec![3], false));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_non_blocking_pop_on_empty_queue() {
        let queue = BoundedQueue::<i32>::new(2);
        let mut output = Vec::new();
        assert!(!queue.try_pop(&mut output, false));
        assert!(!queue.pop_timeout(&mut output, Duration::from_millis(5)));
        assert!(output.is_empty());
    }

    #[test]
    fn test_abort_is_final() {
        let queue = BoundedQueue::new(4);
        assert!(queue.push(vec![1, 2], true));
        queue.abort();

        assert!(queue.is_aborted());
        assert!(queue.is_empty());
        assert!(!queue.push(vec![3], true));
        assert!(!queue.push(vec![3], false));

        let mut output = Vec::new();
        assert!(!queue.try_pop(&mut output, true));
        assert!(!queue.try_pop(&mut output, false));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_abort_releases_blocked_producer() {
        let queue = Arc::new(BoundedQueue::new(1));
        assert!(queue.push(vec![0u8], true));

        let producer_queue = Arc::clone(&queue);
        let producer = thread::spawn(move || producer_queue.push(vec![1u8], true));

        thread::sleep(Duration::from_millis(20));
        queue.abort();
        assert!(!producer.join().unwrap());
    }

    #[test]
    fn test_abort_releases_blocked_consumer() {
        let queue = Arc::new(BoundedQueue::<u8>::new(1));
        let consumer_queue = Arc::clone(&queue);
        let consumer = thread::spawn(move || {
            let mut output = Vec::new();
            consumer_queue.try_pop(&mut output, true)
        });

        thread::sleep(Duration::from_millis(20));
        queue.abort();
        assert!(!consumer.join().unwrap());
    }

    #[test]
    fn test_blocking_push_waits_for_space() {
        let queue = Arc::new(BoundedQueue::new(1));
        assert!(queue.push(vec![1], true));

        let producer_queue = Arc::clone(&queue);
        let producer = thread::spawn(move || producer_queue.push(vec![2], true));

        thread::sleep(Duration::from_millis(20));
        let mut output = Vec::new();
        assert!(queue.try_pop(&mut output, true));
        assert_eq!(output, vec![1]);

        assert!(producer.join().unwrap());
        output.clear();
        assert!(queue.try_pop(&mut output, true));
        assert_eq!(output, vec![2]);
    }

    #[test]
    fn test_clear_keeps_queue_usable() {
        let queue = BoundedQueue::new(3);
        queue.push(vec![1], false);
        queue.push(vec![2], false);
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.push(vec![3], false));
        assert_eq!(queue.len(), 1);
    }
}
