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

//! Defines traits for retry policies and some common implementations.
//!
//! # Example
//! ```
//! # use cloudpoll_gax::retry_policy::*;
//! use std::time::Duration;
//! // Retry for at most 15 seconds or at most 5 attempts: whichever limit is
//! // reached first stops the retry loop.
//! let policy = TransientErrors
//!     .with_time_limit(Duration::from_secs(15))
//!     .with_attempt_limit(5);
//! ```
//!
//! The retry loop distinguishes transient from permanent errors through a
//! retry policy, and the policy also limits how long the loop may run. The
//! [TransientErrors] policy implements the default classification. Callers
//! with service-specific knowledge can replace it wholesale with [retry_if].

use crate::error::Error;
use crate::retry_result::RetryResult;
use std::sync::Arc;

/// Determines how errors are handled in the retry loop.
///
/// Implementations of this trait determine if failed requests may resolve in
/// future attempts, and for how long the retry loop may continue.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// Query the retry policy after an error.
    ///
    /// # Parameters
    /// * `loop_start` - when the retry loop started.
    /// * `attempt_count` - the number of attempts. This includes the initial
    ///   attempt, it is always non-zero.
    /// * `error` - the last error when attempting the request.
    fn on_error(
        &self,
        loop_start: std::time::Instant,
        attempt_count: u32,
        error: Error,
    ) -> RetryResult;

    /// The remaining time in the retry policy.
    ///
    /// For policies based on time, this returns the remaining time in the
    /// policy. The retry loop uses this value to avoid sleeping past the
    /// policy deadline. For policies that are not time based this returns
    /// `None`.
    fn remaining_time(
        &self,
        _loop_start: std::time::Instant,
        _attempt_count: u32,
    ) -> Option<std::time::Duration> {
        None
    }
}

/// A helper type to use [RetryPolicy] in builder options.
#[derive(Clone)]
pub struct RetryPolicyArg(Arc<dyn RetryPolicy>);

impl RetryPolicyArg {
    pub fn into_inner(self) -> Arc<dyn RetryPolicy> {
        self.0
    }
}

impl<T: RetryPolicy + 'static> std::convert::From<T> for RetryPolicyArg {
    fn from(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl std::convert::From<Arc<dyn RetryPolicy>> for RetryPolicyArg {
    fn from(value: Arc<dyn RetryPolicy>) -> Self {
        Self(value)
    }
}

/// Extension trait for [RetryPolicy].
pub trait RetryPolicyExt: RetryPolicy + Sized {
    /// Decorate a [RetryPolicy] to limit the total elapsed time in the retry
    /// loop.
    ///
    /// While the time spent in the retry loop (including time in backoff) is
    /// less than the prescribed duration the `on_error()` method returns the
    /// results of the inner policy. After that time it returns
    /// [Exhausted][RetryResult::Exhausted] if the inner policy returns
    /// [Continue][RetryResult::Continue].
    ///
    /// # Example
    /// ```
    /// # use cloudpoll_gax::retry_policy::*;
    /// use std::time::{Duration, Instant};
    /// let policy = TransientErrors.with_time_limit(Duration::from_secs(10));
    /// let loop_start = Instant::now() - Duration::from_secs(20);
    /// assert!(policy.on_error(loop_start, 1, transient_error()).is_exhausted());
    ///
    /// use cloudpoll_gax::error::Error;
    /// fn transient_error() -> Error {
    ///     Error::http(503, http::HeaderMap::new(), bytes::Bytes::new())
    /// }
    /// ```
    fn with_time_limit(self, maximum_duration: std::time::Duration) -> LimitedElapsedTime<Self> {
        LimitedElapsedTime::custom(self, maximum_duration)
    }

    /// Decorate a [RetryPolicy] to limit the number of attempts.
    ///
    /// The policy passes through the results from the inner policy as long as
    /// `attempt_count < maximum_attempts`. Once the maximum number of attempts
    /// is reached, the policy returns [Exhausted][RetryResult::Exhausted] if
    /// the inner policy returns [Continue][RetryResult::Continue], and passes
    /// the inner policy result otherwise.
    ///
    /// # Example
    /// ```
    /// # use cloudpoll_gax::retry_policy::*;
    /// use std::time::Instant;
    /// let policy = TransientErrors.with_attempt_limit(3);
    /// assert!(policy.on_error(Instant::now(), 1, transient_error()).is_continue());
    /// assert!(policy.on_error(Instant::now(), 2, transient_error()).is_continue());
    /// assert!(policy.on_error(Instant::now(), 3, transient_error()).is_exhausted());
    ///
    /// use cloudpoll_gax::error::Error;
    /// fn transient_error() -> Error {
    ///     Error::http(503, http::HeaderMap::new(), bytes::Bytes::new())
    /// }
    /// ```
    fn with_attempt_limit(self, maximum_attempts: u32) -> LimitedAttemptCount<Self> {
        LimitedAttemptCount::custom(self, maximum_attempts)
    }
}

impl<T: RetryPolicy> RetryPolicyExt for T {}

/// The default transient-error classification.
///
/// Continues the retry loop on errors where the request may not have been
/// processed, or where the service reports a condition expected to clear:
/// transport errors without a full HTTP response, and responses with a 408,
/// 500, 502, 503, or 504 status code. All other errors are permanent.
///
/// This policy should be decorated to limit the number of attempts or the
/// duration of the retry loop.
///
/// # Example
/// ```
/// # use cloudpoll_gax::retry_policy::*;
/// use std::time::Instant;
/// let policy = TransientErrors;
/// assert!(policy.on_error(Instant::now(), 1, io_error()).is_continue());
///
/// use cloudpoll_gax::error::Error;
/// fn io_error() -> Error { Error::io("simulated connection reset") }
/// ```
#[derive(Clone, Debug)]
pub struct TransientErrors;

const TRANSIENT_STATUS_CODES: [u16; 5] = [408, 500, 502, 503, 504];

impl RetryPolicy for TransientErrors {
    fn on_error(
        &self,
        _loop_start: std::time::Instant,
        _attempt_count: u32,
        error: Error,
    ) -> RetryResult {
        if error.is_io() {
            return RetryResult::Continue(error);
        }
        match error.http_status_code() {
            Some(code) if error.is_transport() && TRANSIENT_STATUS_CODES.contains(&code) => {
                RetryResult::Continue(error)
            }
            _ => RetryResult::Permanent(error),
        }
    }
}

/// Creates a retry policy from a custom classification predicate.
///
/// The predicate fully replaces the default classification: errors for which
/// it returns `true` continue the loop, all others are permanent. Decorate the
/// result to limit the number of attempts or the elapsed time.
///
/// # Example
/// ```
/// # use cloudpoll_gax::retry_policy::*;
/// use std::time::Instant;
/// // Also retry throttling responses.
/// let policy = retry_if(|e| e.is_io() || e.http_status_code() == Some(429));
/// assert!(policy.on_error(Instant::now(), 1, throttled()).is_continue());
///
/// use cloudpoll_gax::error::Error;
/// fn throttled() -> Error {
///     Error::http(429, http::HeaderMap::new(), bytes::Bytes::new())
/// }
/// ```
pub fn retry_if<F>(predicate: F) -> RetryIf<F>
where
    F: Fn(&Error) -> bool + Send + Sync,
{
    RetryIf { predicate }
}

/// A retry policy defined by a predicate, see [retry_if].
#[derive(Clone)]
pub struct RetryIf<F> {
    predicate: F,
}

impl<F> std::fmt::Debug for RetryIf<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryIf").finish()
    }
}

impl<F> RetryPolicy for RetryIf<F>
where
    F: Fn(&Error) -> bool + Send + Sync,
{
    fn on_error(
        &self,
        _loop_start: std::time::Instant,
        _attempt_count: u32,
        error: Error,
    ) -> RetryResult {
        if (self.predicate)(&error) {
            RetryResult::Continue(error)
        } else {
            RetryResult::Permanent(error)
        }
    }
}

/// A retry policy decorator that limits the total time in the retry loop.
///
/// While the time spent in the retry loop (including time in backoff) is less
/// than the prescribed duration the `on_error()` method returns the results of
/// the inner policy. After that time it returns
/// [Exhausted][RetryResult::Exhausted] if the inner policy returns
/// [Continue][RetryResult::Continue].
///
/// The `remaining_time()` function returns the remaining time. This is always
/// [Duration::ZERO][std::time::Duration::ZERO] once or after the policy's
/// deadline is reached.
///
/// # Parameters
/// * `P` - the inner retry policy, defaults to [TransientErrors].
#[derive(Clone, Debug)]
pub struct LimitedElapsedTime<P = TransientErrors>
where
    P: RetryPolicy,
{
    inner: P,
    maximum_duration: std::time::Duration,
}

impl LimitedElapsedTime {
    /// Creates a new instance, with the default inner policy.
    ///
    /// # Example
    /// ```
    /// # use cloudpoll_gax::retry_policy::*;
    /// use std::time::{Duration, Instant};
    /// let policy = LimitedElapsedTime::new(Duration::from_secs(10));
    /// let loop_start = Instant::now() - Duration::from_secs(20);
    /// assert!(policy.on_error(loop_start, 1, transient_error()).is_exhausted());
    ///
    /// use cloudpoll_gax::error::Error;
    /// fn transient_error() -> Error {
    ///     Error::http(503, http::HeaderMap::new(), bytes::Bytes::new())
    /// }
    /// ```
    pub fn new(maximum_duration: std::time::Duration) -> Self {
        Self {
            inner: TransientErrors,
            maximum_duration,
        }
    }
}

impl<P> LimitedElapsedTime<P>
where
    P: RetryPolicy,
{
    /// Creates a new instance with a custom inner policy.
    pub fn custom(inner: P, maximum_duration: std::time::Duration) -> Self {
        Self {
            inner,
            maximum_duration,
        }
    }
}

impl<P> RetryPolicy for LimitedElapsedTime<P>
where
    P: RetryPolicy,
{
    fn on_error(
        &self,
        loop_start: std::time::Instant,
        attempt_count: u32,
        error: Error,
    ) -> RetryResult {
        match self.inner.on_error(loop_start, attempt_count, error) {
            RetryResult::Continue(e)
                if std::time::Instant::now() >= loop_start + self.maximum_duration =>
            {
                RetryResult::Exhausted(e)
            }
            other => other,
        }
    }

    fn remaining_time(
        &self,
        loop_start: std::time::Instant,
        attempt_count: u32,
    ) -> Option<std::time::Duration> {
        let deadline = loop_start + self.maximum_duration;
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if let Some(inner) = self.inner.remaining_time(loop_start, attempt_count) {
            return Some(std::cmp::min(remaining, inner));
        }
        Some(remaining)
    }
}

/// A retry policy decorator that limits the number of attempts.
///
/// The policy passes through the results from the inner policy as long as
/// `attempt_count < maximum_attempts`. Once the maximum number of attempts is
/// reached, the policy returns [Exhausted][RetryResult::Exhausted] if the
/// inner policy returns [Continue][RetryResult::Continue], and passes the
/// inner policy result otherwise.
///
/// # Parameters
/// * `P` - the inner retry policy, defaults to [TransientErrors].
#[derive(Clone, Debug)]
pub struct LimitedAttemptCount<P = TransientErrors>
where
    P: RetryPolicy,
{
    inner: P,
    maximum_attempts: u32,
}

impl LimitedAttemptCount {
    /// Creates a new instance, with the default inner policy.
    ///
    /// # Example
    /// ```
    /// # use cloudpoll_gax::retry_policy::*;
    /// use std::time::Instant;
    /// let policy = LimitedAttemptCount::new(2);
    /// assert!(policy.on_error(Instant::now(), 1, transient_error()).is_continue());
    /// assert!(policy.on_error(Instant::now(), 2, transient_error()).is_exhausted());
    ///
    /// use cloudpoll_gax::error::Error;
    /// fn transient_error() -> Error {
    ///     Error::http(503, http::HeaderMap::new(), bytes::Bytes::new())
    /// }
    /// ```
    pub fn new(maximum_attempts: u32) -> Self {
        Self {
            inner: TransientErrors,
            maximum_attempts,
        }
    }
}

impl<P> LimitedAttemptCount<P>
where
    P: RetryPolicy,
{
    /// Creates a new instance with a custom inner policy.
    pub fn custom(inner: P, maximum_attempts: u32) -> Self {
        Self {
            inner,
            maximum_attempts,
        }
    }
}

impl<P> RetryPolicy for LimitedAttemptCount<P>
where
    P: RetryPolicy,
{
    fn on_error(
        &self,
        loop_start: std::time::Instant,
        attempt_count: u32,
        error: Error,
    ) -> RetryResult {
        match self.inner.on_error(loop_start, attempt_count, error) {
            RetryResult::Continue(e) if attempt_count >= self.maximum_attempts => {
                RetryResult::Exhausted(e)
            }
            other => other,
        }
    }

    fn remaining_time(
        &self,
        loop_start: std::time::Instant,
        attempt_count: u32,
    ) -> Option<std::time::Duration> {
        self.inner.remaining_time(loop_start, attempt_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use test_case::test_case;

    fn http_error(code: u16) -> Error {
        Error::http(code, http::HeaderMap::new(), bytes::Bytes::new())
    }

    fn io_error() -> Error {
        Error::io("simulated connection reset")
    }

    fn operation_error() -> Error {
        let url = url::Url::parse("https://service.example.com/operations/op-1").unwrap();
        Error::operation("Failed", url, Some(200), None)
    }

    #[test_case(408, true)]
    #[test_case(500, true)]
    #[test_case(502, true)]
    #[test_case(503, true)]
    #[test_case(504, true)]
    #[test_case(400, false)]
    #[test_case(403, false)]
    #[test_case(404, false)]
    #[test_case(409, false)]
    #[test_case(429, false)]
    #[test_case(501, false)]
    fn transient_errors_status_codes(code: u16, retryable: bool) {
        let p = TransientErrors;
        let flow = p.on_error(Instant::now(), 1, http_error(code));
        assert_eq!(flow.is_continue(), retryable, "{flow:?}");
    }

    #[test]
    fn transient_errors_io() {
        let p = TransientErrors;
        assert!(p.on_error(Instant::now(), 1, io_error()).is_continue());
    }

    #[test]
    fn transient_errors_non_http() {
        let p = TransientErrors;
        assert!(
            p.on_error(Instant::now(), 1, operation_error())
                .is_permanent()
        );
        assert!(
            p.on_error(Instant::now(), 1, Error::protocol("bad poll"))
                .is_permanent()
        );
        assert!(p.on_error(Instant::now(), 1, Error::canceled()).is_permanent());
        assert!(p.remaining_time(Instant::now(), 1).is_none());
    }

    #[test]
    fn retry_if_predicate() {
        let p = retry_if(|e| e.http_status_code() == Some(429));
        assert!(p.on_error(Instant::now(), 1, http_error(429)).is_continue());
        assert!(p.on_error(Instant::now(), 1, http_error(503)).is_permanent());
        assert!(p.on_error(Instant::now(), 1, io_error()).is_permanent());
        assert!(p.remaining_time(Instant::now(), 1).is_none());
    }

    #[test]
    fn limited_attempt_count() {
        let p = LimitedAttemptCount::new(3);
        assert!(p.on_error(Instant::now(), 1, http_error(503)).is_continue());
        assert!(p.on_error(Instant::now(), 2, http_error(503)).is_continue());
        assert!(p.on_error(Instant::now(), 3, http_error(503)).is_exhausted());
        assert!(p.on_error(Instant::now(), 4, http_error(503)).is_exhausted());
        // Permanent errors pass through, even over the limit.
        assert!(p.on_error(Instant::now(), 5, http_error(403)).is_permanent());
        assert!(p.remaining_time(Instant::now(), 1).is_none());
    }

    #[test]
    fn limited_attempt_count_custom() {
        let p = retry_if(|e| e.is_io()).with_attempt_limit(2);
        assert!(p.on_error(Instant::now(), 1, io_error()).is_continue());
        assert!(p.on_error(Instant::now(), 2, io_error()).is_exhausted());
        assert!(p.on_error(Instant::now(), 1, http_error(503)).is_permanent());
    }

    #[test]
    fn limited_elapsed_time() {
        let p = LimitedElapsedTime::new(Duration::from_secs(60));
        let loop_start = Instant::now();
        assert!(p.on_error(loop_start, 1, http_error(503)).is_continue());

        let expired = Instant::now() - Duration::from_secs(120);
        assert!(p.on_error(expired, 2, http_error(503)).is_exhausted());
        // Permanent errors pass through, even past the deadline.
        assert!(p.on_error(expired, 3, http_error(403)).is_permanent());
    }

    #[test]
    fn limited_elapsed_time_remaining() {
        let p = LimitedElapsedTime::new(Duration::from_secs(60));
        let remaining = p.remaining_time(Instant::now(), 1).unwrap();
        assert!(remaining <= Duration::from_secs(60), "{remaining:?}");
        assert!(remaining > Duration::from_secs(50), "{remaining:?}");

        let expired = Instant::now() - Duration::from_secs(120);
        assert_eq!(p.remaining_time(expired, 1), Some(Duration::ZERO));
    }

    #[test]
    fn limited_elapsed_time_remaining_uses_inner() {
        let mut inner = MockPolicy::new();
        inner
            .expect_remaining_time()
            .once()
            .return_const(Some(Duration::from_secs(5)));
        let p = LimitedElapsedTime::custom(inner, Duration::from_secs(60));
        let remaining = p.remaining_time(Instant::now(), 1).unwrap();
        assert_eq!(remaining, Duration::from_secs(5));
    }

    #[test]
    fn stacked_decorators() {
        let p = TransientErrors
            .with_time_limit(Duration::from_secs(60))
            .with_attempt_limit(2);
        assert!(p.on_error(Instant::now(), 1, http_error(503)).is_continue());
        assert!(p.on_error(Instant::now(), 2, http_error(503)).is_exhausted());
        assert!(p.remaining_time(Instant::now(), 1).is_some());
    }

    mockall::mock! {
        #[derive(Debug)]
        Policy {}
        impl RetryPolicy for Policy {
            fn on_error(&self, loop_start: std::time::Instant, attempt_count: u32, error: Error) -> RetryResult;
            fn remaining_time(&self, loop_start: std::time::Instant, attempt_count: u32) -> Option<std::time::Duration>;
        }
    }
}
