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

//! The retry loops used for individual requests.
//!
//! Both loops call an inner function until it succeeds, the retry policy
//! classifies an error as permanent, or the policy is exhausted. In between
//! attempts the loops wait the server-supplied delay when the failed response
//! carries one, and the delay prescribed by the backoff policy otherwise.
//!
//! When a loop gives up it returns the last error unchanged, with the errors
//! from earlier attempts attached as
//! [attempt_history][crate::error::Error::attempt_history].

use super::Result;
use super::backoff_policy::BackoffPolicy;
use super::error::Error;
use super::headers::DelayHeaders;
use super::retry_policy::RetryPolicy;
use super::retry_result::RetryResult;
use std::sync::Arc;
use std::time::Duration;

enum RetryLoopAttempt {
    // The first attempt
    Initial,
    // (Attempt count, backoff delay, previous error)
    Retry(u32, Duration, Error),
}

impl RetryLoopAttempt {
    fn count(&self) -> u32 {
        match self {
            RetryLoopAttempt::Initial => 0,
            RetryLoopAttempt::Retry(count, _, _) => *count,
        }
    }
}

/// Runs the retry loop for a given function.
///
/// This function calls an inner function as long as (1) the retry policy has
/// not expired, and (2) the inner function has not returned a successful
/// result.
///
/// In between calls the function waits the server-supplied delay from the
/// failed response when present, otherwise the amount of time prescribed by
/// the backoff policy, using `sleep` to implement any sleep.
pub async fn retry_loop<F, S, Response>(
    mut inner: F,
    sleep: S,
    retry_policy: Arc<dyn RetryPolicy>,
    backoff_policy: Arc<dyn BackoffPolicy>,
    delay_headers: &DelayHeaders,
) -> Result<Response>
where
    F: AsyncFnMut(Option<Duration>) -> Result<Response> + Send,
    S: AsyncFn(Duration) -> () + Send,
{
    let loop_start = std::time::Instant::now();
    let mut history = Vec::new();
    let mut attempt_state = RetryLoopAttempt::Initial;
    loop {
        let mut attempt_count = attempt_state.count();
        let remaining_time = retry_policy.remaining_time(loop_start, attempt_count);

        if let RetryLoopAttempt::Retry(_, delay, prev_error) = attempt_state {
            if remaining_time.is_some_and(|remaining| remaining < delay) {
                return Err(prev_error.with_attempt_history(history));
            }
            sleep(delay).await;
            history.push(prev_error);
        }
        attempt_count += 1;
        match inner(remaining_time).await {
            Ok(r) => return Ok(r),
            Err(e) => {
                match retry_policy.on_error(loop_start, attempt_count, e) {
                    RetryResult::Permanent(e) | RetryResult::Exhausted(e) => {
                        return Err(e.with_attempt_history(history));
                    }
                    RetryResult::Continue(e) => {
                        let delay = next_delay(
                            &e,
                            delay_headers,
                            backoff_policy.as_ref(),
                            loop_start,
                            attempt_count,
                        );
                        attempt_state = RetryLoopAttempt::Retry(attempt_count, delay, e);
                    }
                }
            }
        };
    }
}

/// Runs the blocking retry loop for a given function.
///
/// The blocking twin of [retry_loop], with the same semantics.
pub fn retry_loop_blocking<F, S, Response>(
    mut inner: F,
    sleep: S,
    retry_policy: Arc<dyn RetryPolicy>,
    backoff_policy: Arc<dyn BackoffPolicy>,
    delay_headers: &DelayHeaders,
) -> Result<Response>
where
    F: FnMut(Option<Duration>) -> Result<Response>,
    S: Fn(Duration),
{
    let loop_start = std::time::Instant::now();
    let mut history = Vec::new();
    let mut attempt_state = RetryLoopAttempt::Initial;
    loop {
        let mut attempt_count = attempt_state.count();
        let remaining_time = retry_policy.remaining_time(loop_start, attempt_count);

        if let RetryLoopAttempt::Retry(_, delay, prev_error) = attempt_state {
            if remaining_time.is_some_and(|remaining| remaining < delay) {
                return Err(prev_error.with_attempt_history(history));
            }
            sleep(delay);
            history.push(prev_error);
        }
        attempt_count += 1;
        match inner(remaining_time) {
            Ok(r) => return Ok(r),
            Err(e) => match retry_policy.on_error(loop_start, attempt_count, e) {
                RetryResult::Permanent(e) | RetryResult::Exhausted(e) => {
                    return Err(e.with_attempt_history(history));
                }
                RetryResult::Continue(e) => {
                    let delay = next_delay(
                        &e,
                        delay_headers,
                        backoff_policy.as_ref(),
                        loop_start,
                        attempt_count,
                    );
                    attempt_state = RetryLoopAttempt::Retry(attempt_count, delay, e);
                }
            },
        };
    }
}

// The server-supplied delay is authoritative when present.
fn next_delay(
    error: &Error,
    delay_headers: &DelayHeaders,
    backoff_policy: &dyn BackoffPolicy,
    loop_start: std::time::Instant,
    attempt_count: u32,
) -> Duration {
    error
        .http_headers()
        .and_then(|headers| delay_headers.delay_override(headers))
        .unwrap_or_else(|| backoff_policy.on_failure(loop_start, attempt_count))
}
