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

//! The polling engines.
//!
//! A [Poller] drives one long-running operation to a terminal state. Each
//! individual request, the initiating request included, runs inside a retry
//! loop governed by the configured retry and backoff policies. The waits
//! between polls come from the strategy, which folds server-suggested delays
//! with the polling backoff policy.
//!
//! Polls for one operation are strictly sequential. Different poller
//! instances are independent and may run concurrently.
//!
//! The cancellation token is consulted before every wait, while waiting, and
//! while a request is in flight. Cancellation stops the loop with
//! [Error::canceled]; it does not stop the operation on the service side.

use crate::strategy::PollStrategy;
use gax::Result;
use gax::backoff_policy::{BackoffPolicy, BackoffPolicyArg};
use gax::cancellation::CancellationToken;
use gax::error::Error;
use gax::exponential_backoff::ExponentialBackoff;
use gax::headers::DelayHeaders;
use gax::http::{BlockingTransport, Request, Response, Transport};
use gax::polling_backoff_policy::{PollingBackoffPolicy, PollingBackoffPolicyArg};
use gax::retry_loop::{retry_loop, retry_loop_blocking};
use gax::retry_policy::{RetryPolicy, RetryPolicyArg, RetryPolicyExt, TransientErrors};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_ATTEMPT_LIMIT: u32 = 5;

#[derive(Clone)]
struct Options {
    retry_policy: Arc<dyn RetryPolicy>,
    backoff_policy: Arc<dyn BackoffPolicy>,
    polling_backoff_policy: Arc<dyn PollingBackoffPolicy>,
    delay_headers: DelayHeaders,
    cancellation: CancellationToken,
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("delay_headers", &self.delay_headers)
            .field("cancellation", &self.cancellation)
            .finish()
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            retry_policy: Arc::new(TransientErrors.with_attempt_limit(DEFAULT_ATTEMPT_LIMIT)),
            backoff_policy: Arc::new(ExponentialBackoff::default()),
            polling_backoff_policy: Arc::new(ExponentialBackoff::default()),
            delay_headers: DelayHeaders::default(),
            cancellation: CancellationToken::new(),
        }
    }
}

/// Configures and starts a [Poller].
///
/// # Example
/// ```no_run
/// # use cloudpoll_lro::poller::PollerBuilder;
/// # use gax::http::{Request, Transport};
/// # use std::sync::Arc;
/// # async fn sample(transport: Arc<dyn Transport>, request: Request) -> gax::Result<()> {
/// use gax::retry_policy::{RetryPolicyExt, TransientErrors};
/// let poller = PollerBuilder::new(transport)
///     .with_retry_policy(TransientErrors.with_attempt_limit(3))
///     .start(request)
///     .await?;
/// let response = poller.until_done().await?;
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct PollerBuilder {
    transport: Arc<dyn Transport>,
    options: Options,
}

impl PollerBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            options: Options::default(),
        }
    }

    /// The retry policy for individual requests.
    pub fn with_retry_policy<V: Into<RetryPolicyArg>>(mut self, v: V) -> Self {
        self.options.retry_policy = v.into().into_inner();
        self
    }

    /// The backoff policy for retried requests.
    pub fn with_backoff_policy<V: Into<BackoffPolicyArg>>(mut self, v: V) -> Self {
        self.options.backoff_policy = v.into().into_inner();
        self
    }

    /// The minimum wait between polls.
    pub fn with_polling_backoff_policy<V: Into<PollingBackoffPolicyArg>>(mut self, v: V) -> Self {
        self.options.polling_backoff_policy = v.into().into_inner();
        self
    }

    /// The headers treated as authoritative delay overrides.
    pub fn with_delay_headers(mut self, v: DelayHeaders) -> Self {
        self.options.delay_headers = v;
        self
    }

    /// The token that stops the polling loop.
    pub fn with_cancellation(mut self, v: CancellationToken) -> Self {
        self.options.cancellation = v;
        self
    }

    /// Sends the initiating request and starts tracking the operation.
    pub async fn start(self, request: Request) -> Result<Poller> {
        let Self { transport, options } = self;
        if options.cancellation.is_cancelled() {
            return Err(Error::canceled());
        }
        let response = tokio::select! {
            r = execute_with_retry(transport.as_ref(), &request, &options) => r?,
            _ = options.cancellation.cancelled() => return Err(Error::canceled()),
        };
        Self::resume_impl(transport, options, &request, response)
    }

    /// Starts tracking an operation from a response obtained elsewhere.
    pub fn resume(self, request: &Request, response: Response) -> Result<Poller> {
        Self::resume_impl(self.transport, self.options, request, response)
    }

    fn resume_impl(
        transport: Arc<dyn Transport>,
        options: Options,
        request: &Request,
        response: Response,
    ) -> Result<Poller> {
        let strategy = PollStrategy::select(request, response, &options.delay_headers)?;
        Ok(Poller {
            transport,
            options,
            strategy,
        })
    }
}

/// Drives one long-running operation to completion.
#[derive(Debug)]
pub struct Poller {
    transport: Arc<dyn Transport>,
    options: Options,
    strategy: PollStrategy,
}

impl Poller {
    /// A token that cancels this poller.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.options.cancellation.clone()
    }

    /// Polls until the operation reaches a terminal state.
    ///
    /// Returns the final resource representation, or the first terminal
    /// error: the service reporting the operation failed, a protocol
    /// violation, an exhausted retry policy, or cancellation.
    pub async fn until_done(mut self) -> Result<Response> {
        let loop_start = Instant::now();
        let mut poll_count: u32 = 0;
        loop {
            if self.strategy.is_done() {
                return Ok(self.strategy.into_final_response());
            }
            if self.options.cancellation.is_cancelled() {
                return Err(Error::canceled());
            }
            let delay = self.next_delay(loop_start, poll_count);
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.options.cancellation.cancelled() => return Err(Error::canceled()),
                }
            }
            poll_count += 1;
            let request = self.strategy.poll_request();
            let response = tokio::select! {
                r = execute_with_retry(self.transport.as_ref(), &request, &self.options) => r?,
                _ = self.options.cancellation.cancelled() => return Err(Error::canceled()),
            };
            let floor = self
                .options
                .polling_backoff_policy
                .wait_period(loop_start, poll_count);
            self.strategy
                .consume_response(response, floor, &self.options.delay_headers)?;
        }
    }

    fn next_delay(&self, loop_start: Instant, poll_count: u32) -> Duration {
        let delay = self.strategy.delay();
        if poll_count == 0 {
            // The initiating response only seeds a server-suggested delay.
            // Fold it with the policy floor here, later polls fold in
            // `consume_response`.
            return delay.max(
                self.options
                    .polling_backoff_policy
                    .wait_period(loop_start, 1),
            );
        }
        delay
    }
}

async fn execute_with_retry(
    transport: &dyn Transport,
    request: &Request,
    options: &Options,
) -> Result<Response> {
    let inner = async move |_remaining: Option<Duration>| {
        transport.execute(request.clone()).await?.checked()
    };
    let sleep = async |d: Duration| tokio::time::sleep(d).await;
    retry_loop(
        inner,
        sleep,
        options.retry_policy.clone(),
        options.backoff_policy.clone(),
        &options.delay_headers,
    )
    .await
}

/// Configures and starts a [BlockingPoller].
#[derive(Debug)]
pub struct BlockingPollerBuilder {
    transport: Arc<dyn BlockingTransport>,
    options: Options,
}

impl BlockingPollerBuilder {
    pub fn new(transport: Arc<dyn BlockingTransport>) -> Self {
        Self {
            transport,
            options: Options::default(),
        }
    }

    /// The retry policy for individual requests.
    pub fn with_retry_policy<V: Into<RetryPolicyArg>>(mut self, v: V) -> Self {
        self.options.retry_policy = v.into().into_inner();
        self
    }

    /// The backoff policy for retried requests.
    pub fn with_backoff_policy<V: Into<BackoffPolicyArg>>(mut self, v: V) -> Self {
        self.options.backoff_policy = v.into().into_inner();
        self
    }

    /// The minimum wait between polls.
    pub fn with_polling_backoff_policy<V: Into<PollingBackoffPolicyArg>>(mut self, v: V) -> Self {
        self.options.polling_backoff_policy = v.into().into_inner();
        self
    }

    /// The headers treated as authoritative delay overrides.
    pub fn with_delay_headers(mut self, v: DelayHeaders) -> Self {
        self.options.delay_headers = v;
        self
    }

    /// The token that stops the polling loop.
    pub fn with_cancellation(mut self, v: CancellationToken) -> Self {
        self.options.cancellation = v;
        self
    }

    /// Sends the initiating request and starts tracking the operation.
    pub fn start(self, request: Request) -> Result<BlockingPoller> {
        let Self { transport, options } = self;
        let response = execute_with_retry_blocking(transport.as_ref(), &request, &options)?;
        Self::resume_impl(transport, options, &request, response)
    }

    /// Starts tracking an operation from a response obtained elsewhere.
    pub fn resume(self, request: &Request, response: Response) -> Result<BlockingPoller> {
        Self::resume_impl(self.transport, self.options, request, response)
    }

    fn resume_impl(
        transport: Arc<dyn BlockingTransport>,
        options: Options,
        request: &Request,
        response: Response,
    ) -> Result<BlockingPoller> {
        let strategy = PollStrategy::select(request, response, &options.delay_headers)?;
        Ok(BlockingPoller {
            transport,
            options,
            strategy,
        })
    }
}

/// The blocking twin of [Poller].
///
/// Waits park the calling thread. Cancellation from another thread wakes the
/// waits promptly; a cancellation raised while a request is in flight takes
/// effect before the next attempt.
#[derive(Debug)]
pub struct BlockingPoller {
    transport: Arc<dyn BlockingTransport>,
    options: Options,
    strategy: PollStrategy,
}

impl BlockingPoller {
    /// A token that cancels this poller.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.options.cancellation.clone()
    }

    /// Polls until the operation reaches a terminal state.
    pub fn until_done(mut self) -> Result<Response> {
        let loop_start = Instant::now();
        let mut poll_count: u32 = 0;
        loop {
            if self.strategy.is_done() {
                return Ok(self.strategy.into_final_response());
            }
            if self.options.cancellation.is_cancelled() {
                return Err(Error::canceled());
            }
            let delay = self.next_delay(loop_start, poll_count);
            if !delay.is_zero() && self.options.cancellation.wait_timeout(delay) {
                return Err(Error::canceled());
            }
            poll_count += 1;
            let request = self.strategy.poll_request();
            let response =
                execute_with_retry_blocking(self.transport.as_ref(), &request, &self.options)?;
            let floor = self
                .options
                .polling_backoff_policy
                .wait_period(loop_start, poll_count);
            self.strategy
                .consume_response(response, floor, &self.options.delay_headers)?;
        }
    }

    fn next_delay(&self, loop_start: Instant, poll_count: u32) -> Duration {
        let delay = self.strategy.delay();
        if poll_count == 0 {
            return delay.max(
                self.options
                    .polling_backoff_policy
                    .wait_period(loop_start, 1),
            );
        }
        delay
    }
}

fn execute_with_retry_blocking(
    transport: &dyn BlockingTransport,
    request: &Request,
    options: &Options,
) -> Result<Response> {
    let cancellation = &options.cancellation;
    let inner = |_remaining: Option<Duration>| {
        if cancellation.is_cancelled() {
            return Err(Error::canceled());
        }
        transport.execute(request.clone())?.checked()
    };
    // Sleeping on the token wakes the retry backoff on cancellation. The
    // next attempt then observes the flag and stops.
    let sleep = |d: Duration| {
        cancellation.wait_timeout(d);
    };
    retry_loop_blocking(
        inner,
        sleep,
        options.retry_policy.clone(),
        options.backoff_policy.clone(),
        &options.delay_headers,
    )
}
