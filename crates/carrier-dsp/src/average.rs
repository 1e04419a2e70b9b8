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

//! Sliding-window average over vectors.

use std::collections::VecDeque;
use std::ops::{AddAssign, Div, SubAssign};

/// Running mean of the last `len` pushed vectors.
///
/// All pushed vectors are expected to share one shape. A vector of a
/// different length restarts the average with the new shape.
#[derive(Debug, Clone)]
pub struct MovingAverage<T> {
    len: usize,
    history: VecDeque<Vec<T>>,
    sum: Vec<T>,
}

impl<T> MovingAverage<T>
where
    T: Copy + Default + AddAssign + SubAssign + Div<f32, Output = T>,
{
    /// Average over `len` vectors. A length of 0 is treated as 1.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            len: len.max(1),
            history: VecDeque::new(),
            sum: Vec::new(),
        }
    }

    /// Window length in vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Number of vectors currently averaged (at most [`len`](Self::len)).
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Change the window length, dropping the oldest vectors if it shrinks.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.max(1);
        self.trim();
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.sum.clear();
    }

    pub fn push(&mut self, values: &[T]) {
        if values.len() != self.sum.len() {
            if !self.history.is_empty() {
                log::debug!(
                    "Moving average shape changed from {} to {}, resetting",
                    self.sum.len(),
                    values.len()
                );
            }
            self.history.clear();
            self.sum.clear();
            self.sum.resize(values.len(), T::default());
        }

        for (sum, &v) in self.sum.iter_mut().zip(values) {
            *sum += v;
        }
        self.history.push_back(values.to_vec());
        self.trim();
    }

    /// Mean of the stored vectors; empty before the first push.
    #[must_use]
    pub fn get_average(&self) -> Vec<T> {
        if self.history.is_empty() {
            return Vec::new();
        }
        let count = self.history.len() as f32;
        self.sum.iter().map(|&s| s / count).collect()
    }

    fn trim(&mut self) {
        while self.history.len() > self.len {
            if let Some(oldest) = self.history.pop_front() {
                for (sum, v) in self.sum.iter_mut().zip(oldest) {
                    *sum -= v;
                }
            }
        }
    }
}
