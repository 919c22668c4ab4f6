// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A constant-delay backoff policy.
//!
//! Fixed backoff suits polling loops where the expected execution time of the
//! operation is known in advance. It implements both the [BackoffPolicy] and
//! [PollingBackoffPolicy] traits.
//!
//! [BackoffPolicy]: crate::backoff_policy::BackoffPolicy
//! [PollingBackoffPolicy]: crate::polling_backoff_policy::PollingBackoffPolicy

use std::time::Duration;

/// The error type for fixed backoff creation.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("the delay ({0:?}) should be greater than zero")]
    InvalidDelay(Duration),
}

/// Implements a constant delay between attempts.
///
/// # Example
/// ```
/// # use cloudpoll_gax::fixed_backoff::{Error, FixedBackoff};
/// use std::time::Duration;
/// let policy = FixedBackoff::new(Duration::from_secs(2))?;
/// # Ok::<(), Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    /// Creates a new fixed backoff policy.
    ///
    /// The delay must be greater than zero, a zero delay would turn the retry
    /// and polling loops into busy waits.
    pub fn new(delay: Duration) -> Result<Self, Error> {
        if delay.is_zero() {
            return Err(Error::InvalidDelay(delay));
        }
        Ok(Self { delay })
    }

    /// The configured delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl crate::backoff_policy::BackoffPolicy for FixedBackoff {
    fn on_failure(
        &self,
        _loop_start: std::time::Instant,
        _attempt_count: u32,
    ) -> std::time::Duration {
        self.delay
    }
}

impl crate::polling_backoff_policy::PollingBackoffPolicy for FixedBackoff {
    fn wait_period(
        &self,
        _loop_start: std::time::Instant,
        _attempt_count: u32,
    ) -> std::time::Duration {
        self.delay
    }
}
