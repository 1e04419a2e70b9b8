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

//! Error types shared by the DSP engine.

use thiserror::Error;

/// Errors raised by the DSP primitives and the threaded processor.
///
/// Configuration errors are returned synchronously from the call that
/// introduced them and leave the previous state of the callee untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DspError {
    /// A transform or window length below the minimum of 2.
    #[error("invalid length {len}: transform and window lengths must be at least 2")]
    InvalidLength { len: usize },

    /// A block or buffer whose size differs from the configured length.
    #[error("length mismatch: expected {expected} samples, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Lifecycle failures: worker not joinable, correlation without sequence.
    #[error("runtime failure: {0}")]
    RuntimeFailure(String),

    #[error("queue has been aborted")]
    QueueAborted,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DspError>;

impl DspError {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn runtime(msg: impl Into<String>) -> Self {
        Self::RuntimeFailure(msg.into())
    }

    /// Check `actual == expected`, producing [`DspError::LengthMismatch`] otherwise.
    pub(crate) fn check_len(expected: usize, actual: usize) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::LengthMismatch { expected, actual })
        }
    }
}
