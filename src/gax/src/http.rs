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

//! Minimal request and response types and the transport traits.
//!
//! The polling and retry loops only need a narrow view of HTTP: a method, a
//! URL, headers, and a fully buffered body. Implementations of [Transport] and
//! [BlockingTransport] adapt a real HTTP client to this view. The crate ships
//! adapters for [reqwest] behind the `reqwest` feature.

use crate::Result;
use crate::error::Error;

/// An HTTP request as seen by the polling and retry loops.
#[derive(Clone, Debug)]
pub struct Request {
    pub method: http::Method,
    pub url: url::Url,
    pub headers: http::HeaderMap,
}

impl Request {
    /// Creates a GET request with no headers.
    pub fn get(url: url::Url) -> Self {
        Self {
            method: http::Method::GET,
            url,
            headers: http::HeaderMap::new(),
        }
    }
}

/// A fully buffered HTTP response.
///
/// Transports must consume the response body before returning. A partially
/// read body would leak the underlying connection when the response is
/// discarded, for example when a poll is retried.
#[derive(Clone, Debug)]
pub struct Response {
    pub status: http::StatusCode,
    pub headers: http::HeaderMap,
    pub body: bytes::Bytes,
}

impl Response {
    /// Converts responses with an error status code into [Error].
    ///
    /// The status code, headers, and body are moved into the error, so the
    /// retry machinery can honor server-supplied delay headers and surface the
    /// error payload.
    ///
    /// # Example
    /// ```
    /// use cloudpoll_gax::http::Response;
    /// let response = Response {
    ///     status: http::StatusCode::SERVICE_UNAVAILABLE,
    ///     headers: http::HeaderMap::new(),
    ///     body: bytes::Bytes::from_static(b"try later"),
    /// };
    /// let error = response.checked().unwrap_err();
    /// assert_eq!(error.http_status_code(), Some(503));
    /// ```
    pub fn checked(self) -> Result<Response> {
        if self.status.as_u16() >= 400 {
            return Err(Error::http(self.status.as_u16(), self.headers, self.body));
        }
        Ok(self)
    }
}

/// Sends requests on behalf of the asynchronous polling and retry loops.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Executes a request, returning the fully buffered response.
    ///
    /// Implementations return [Error::io] when no full HTTP response is
    /// available. Responses with an error status code are returned as `Ok`,
    /// the loops classify them via [Response::checked].
    async fn execute(&self, request: Request) -> Result<Response>;
}

/// Sends requests on behalf of the blocking polling and retry loops.
pub trait BlockingTransport: Send + Sync + std::fmt::Debug {
    /// Executes a request, returning the fully buffered response.
    fn execute(&self, request: Request) -> Result<Response>;
}

/// A [Transport] implementation over [reqwest::Client].
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

#[cfg(feature = "reqwest")]
impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "reqwest")]
#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: Request) -> Result<Response> {
        let response = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .send()
            .await
            .map_err(Error::io)?;
        let status = response.status();
        let headers = response.headers().clone();
        // Fully drain the body so the connection can be reused.
        let body = response.bytes().await.map_err(Error::io)?;
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

/// A [BlockingTransport] implementation over [reqwest::blocking::Client].
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestBlockingTransport {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "reqwest")]
impl ReqwestBlockingTransport {
    pub fn new(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "reqwest")]
impl BlockingTransport for ReqwestBlockingTransport {
    fn execute(&self, request: Request) -> Result<Response> {
        let response = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .send()
            .map_err(Error::io)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().map_err(Error::io)?;
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
