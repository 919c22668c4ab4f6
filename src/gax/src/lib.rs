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

//! Foundations for the long-running operation client.
//!
//! This crate contains the request-level machinery shared by the polling
//! engines: the error type, the retry and backoff policies, the retry loops,
//! server-supplied delay parsing, cooperative cancellation, and a small HTTP
//! transport abstraction.
//!
//! Most applications interact with these types only to configure a poller.
//! The traits in [retry_policy], [backoff_policy], and
//! [polling_backoff_policy] are the extension points for custom behavior.

/// An alias of [std::result::Result] where the error is always [crate::error::Error].
///
/// This is the result type used by all functions wrapping network requests.
pub type Result<T> = std::result::Result<T, crate::error::Error>;

/// The backoff policy trait used by the retry loops.
pub mod backoff_policy;

/// Cooperative cancellation for retry and polling loops.
pub mod cancellation;

/// The core error types.
pub mod error;

/// A truncated exponential backoff policy, with jitter.
pub mod exponential_backoff;

/// A constant-delay backoff policy.
pub mod fixed_backoff;

/// Header names and parsers for server-supplied delays.
pub mod headers;

/// A minimal HTTP request, response, and transport abstraction.
pub mod http;

/// The backoff policy trait used by the polling loops.
pub mod polling_backoff_policy;

/// The retry loops used for individual requests.
pub mod retry_loop;

/// The retry policy trait and its common implementations.
pub mod retry_policy;

/// Retry loop control types.
pub mod retry_result;

#[cfg(test)]
pub(crate) mod mock_rng;
