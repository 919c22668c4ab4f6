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

//! Polling engines for service-side long-running operations.
//!
//! Some service operations outlive the HTTP request that starts them: the
//! service answers right away with a way to track progress, and the client
//! polls until the operation reaches a terminal state. This crate discovers
//! the tracking convention from the initiating response, polls at the pace
//! the service and the configured policies prescribe, and hands back the
//! final resource representation.
//!
//! The entry points are [poller::PollerBuilder] for asynchronous code and
//! [poller::BlockingPollerBuilder] for blocking code. Both drive the same
//! state machine, [strategy::PollStrategy].
//!
//! # Example
//! ```no_run
//! # use std::sync::Arc;
//! # async fn sample(transport: Arc<dyn gax::http::Transport>) -> gax::Result<()> {
//! use cloudpoll_lro::poller::PollerBuilder;
//! use gax::http::Request;
//!
//! let url = url::Url::parse("https://service.example.com/resources/r1").unwrap();
//! let response = PollerBuilder::new(transport)
//!     .start(Request::get(url))
//!     .await?
//!     .until_done()
//!     .await?;
//! println!("operation finished with {} bytes", response.body.len());
//! # Ok(()) }
//! ```
//!
//! Deserializing the final body is the caller's business, the engines only
//! parse the handful of fields the polling contract needs.

/// The polling engines.
pub mod poller;

/// Strategy selection and the per-operation state machines.
pub mod strategy;

/// Operation status tokens and minimal body parsing.
pub mod status;

pub use poller::{BlockingPoller, BlockingPollerBuilder, Poller, PollerBuilder};
pub use status::OperationStatus;

/// Examines an initiating response and returns the matching strategy.
///
/// Most applications use [poller::PollerBuilder] instead. This entry point
/// serves callers that drive the state machine themselves, for example to
/// interleave polls with other work.
pub fn begin(
    request: &gax::http::Request,
    response: gax::http::Response,
) -> gax::Result<strategy::PollStrategy> {
    strategy::PollStrategy::select(request, response, &gax::headers::DelayHeaders::default())
}

#[cfg(test)]
mod tests {
    use gax::http::{Request, Response};

    #[test]
    fn begin_selects_a_strategy() {
        let url = url::Url::parse("https://service.example.com/resources/r1").unwrap();
        let mut headers = http::HeaderMap::new();
        headers.insert(
            "location",
            http::HeaderValue::from_static("https://service.example.com/monitor/op-001"),
        );
        let response = Response {
            status: http::StatusCode::ACCEPTED,
            headers,
            body: bytes::Bytes::new(),
        };
        let strategy = super::begin(&Request::get(url), response).unwrap();
        assert!(!strategy.is_done(), "{strategy:?}");
    }
}
