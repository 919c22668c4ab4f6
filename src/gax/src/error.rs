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

//! The error type used throughout the polling and retry machinery.

use http::HeaderMap;
use std::error::Error as StdError;

type BoxError = Box<dyn StdError + Send + Sync>;

/// The core error returned by the polling and retry loops.
///
/// Failures come from multiple sources. The transport may be unable to send a
/// request or may lose the connection mid-response, the service may reject a
/// poll with an HTTP error, the operation itself may finish in a `Failed` or
/// `Canceled` state, the service may violate the polling protocol, or the
/// caller may abandon the operation.
///
/// Most applications just return or log the error. Applications that need to
/// distinguish the failure source can use the `is_*()` predicates, and query
/// the most common details with the accessors. Deeper information is available
/// through the error [source][std::error::Error::source].
///
/// # Example
/// ```
/// use cloudpoll_gax::error::Error;
/// fn handle(e: Error) {
///     if e.is_operation() {
///         println!("the service completed the operation as {:?}", e.operation_status());
///     } else if e.is_canceled() {
///         println!("abandoned by the caller");
///     } else {
///         println!("some other error {e}");
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<BoxError>,
    attempt_history: Vec<Error>,
}

impl Error {
    /// Creates an error from an HTTP response with an error status code.
    ///
    /// # Example
    /// ```
    /// use cloudpoll_gax::error::Error;
    /// let error = Error::http(503, http::HeaderMap::new(), bytes::Bytes::from_static(b"try later"));
    /// assert_eq!(error.http_status_code(), Some(503));
    /// ```
    pub fn http(status_code: u16, headers: HeaderMap, payload: bytes::Bytes) -> Self {
        let details = TransportDetails {
            status_code: Some(status_code),
            headers: Some(headers),
            payload: Some(payload),
        };
        Self {
            kind: ErrorKind::Transport(Box::new(details)),
            source: None,
            attempt_history: Vec::new(),
        }
    }

    /// Creates an error for a transport problem without a full HTTP response.
    ///
    /// Examples include connection failures, and connections broken before the
    /// full response is received.
    ///
    /// # Example
    /// ```
    /// use cloudpoll_gax::error::Error;
    /// let error = Error::io("simulated connection reset");
    /// assert!(error.is_io());
    /// ```
    pub fn io<T: Into<BoxError>>(source: T) -> Self {
        let details = TransportDetails {
            status_code: None,
            headers: None,
            payload: None,
        };
        Self {
            kind: ErrorKind::Transport(Box::new(details)),
            source: Some(source.into()),
            attempt_history: Vec::new(),
        }
    }

    /// A problem in the transport layer.
    ///
    /// This covers both I/O errors without a response and HTTP responses with
    /// an error status code. Use [is_io][Error::is_io] to distinguish them.
    pub fn is_transport(&self) -> bool {
        matches!(&self.kind, ErrorKind::Transport { .. })
    }

    /// A problem in the transport layer without a full HTTP response.
    ///
    /// The request may or may not have reached the service, and the operation
    /// may or may not be running. These errors are always retryable with
    /// respect to the poll or request that failed.
    pub fn is_io(&self) -> bool {
        matches!(
        &self.kind,
        ErrorKind::Transport(d) if matches!(**d, TransportDetails {
            status_code: None,
            headers: None,
            payload: None,
            ..
        }))
    }

    /// Creates an error for an operation the service completed unsuccessfully.
    ///
    /// # Example
    /// ```
    /// use cloudpoll_gax::error::Error;
    /// let url = url::Url::parse("https://service.example.com/operations/op1").unwrap();
    /// let error = Error::operation("Failed", url, Some(200), None);
    /// assert!(error.is_operation());
    /// assert_eq!(error.operation_status(), Some("Failed"));
    /// ```
    pub fn operation<S: Into<String>>(
        status: S,
        final_poll_url: url::Url,
        status_code: Option<u16>,
        payload: Option<bytes::Bytes>,
    ) -> Self {
        let details = OperationDetails {
            status: status.into(),
            final_poll_url,
            status_code,
            payload,
        };
        Self {
            kind: ErrorKind::Operation(Box::new(details)),
            source: None,
            attempt_history: Vec::new(),
        }
    }

    /// The service reported that the operation finished unsuccessfully.
    ///
    /// The polling machinery worked, and the service provided a definite
    /// answer: the operation reached a `Failed` or `Canceled` terminal state.
    /// Retrying the poll will not change the answer.
    pub fn is_operation(&self) -> bool {
        matches!(&self.kind, ErrorKind::Operation { .. })
    }

    /// Creates an error for a response that violates the polling contract.
    ///
    /// # Example
    /// ```
    /// use cloudpoll_gax::error::Error;
    /// let error = Error::protocol("202 response without a polling side channel");
    /// assert!(error.is_protocol());
    /// ```
    pub fn protocol<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Protocol,
            source: Some(source.into()),
            attempt_history: Vec::new(),
        }
    }

    /// The service responded in a way the polling contract does not allow.
    ///
    /// Examples include a 202 response with no way to locate the operation,
    /// and a status document without a status field. The true state of the
    /// operation is unknown.
    pub fn is_protocol(&self) -> bool {
        matches!(&self.kind, ErrorKind::Protocol)
    }

    /// Creates an error representing caller-requested cancellation.
    ///
    /// # Example
    /// ```
    /// use cloudpoll_gax::error::Error;
    /// let error = Error::canceled();
    /// assert!(error.is_canceled());
    /// ```
    pub fn canceled() -> Self {
        Self {
            kind: ErrorKind::Canceled,
            source: None,
            attempt_history: Vec::new(),
        }
    }

    /// The caller abandoned the operation.
    ///
    /// Cancellation stops the polling loop, it does not stop the operation on
    /// the service side. The operation may still complete.
    pub fn is_canceled(&self) -> bool {
        matches!(&self.kind, ErrorKind::Canceled)
    }

    /// Creates an error representing a deserialization problem.
    ///
    /// # Example
    /// ```
    /// use cloudpoll_gax::error::Error;
    /// let error = Error::deser("simulated problem");
    /// assert!(error.is_deserialization());
    /// ```
    pub fn deser<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Deserialization,
            source: Some(source.into()),
            attempt_history: Vec::new(),
        }
    }

    /// The response body could not be deserialized.
    pub fn is_deserialization(&self) -> bool {
        matches!(&self.kind, ErrorKind::Deserialization)
    }

    /// Creates an unclassified error.
    pub fn other<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Other,
            source: Some(source.into()),
            attempt_history: Vec::new(),
        }
    }

    /// The HTTP status code, if any, associated with this error.
    ///
    /// # Example
    /// ```
    /// use cloudpoll_gax::error::Error;
    /// let error = Error::http(503, http::HeaderMap::new(), bytes::Bytes::new());
    /// assert_eq!(error.http_status_code(), Some(503));
    /// ```
    pub fn http_status_code(&self) -> Option<u16> {
        match &self.kind {
            ErrorKind::Transport(d) => d.as_ref().status_code,
            ErrorKind::Operation(d) => d.as_ref().status_code,
            _ => None,
        }
    }

    /// The headers, if any, associated with this error.
    ///
    /// The retry machinery uses these to honor server-supplied delays, for
    /// example a `retry-after` header on a 503 response.
    pub fn http_headers(&self) -> Option<&http::HeaderMap> {
        match &self.kind {
            ErrorKind::Transport(d) => d.as_ref().headers.as_ref(),
            _ => None,
        }
    }

    /// The response payload, if any, associated with this error.
    pub fn http_payload(&self) -> Option<&bytes::Bytes> {
        match &self.kind {
            ErrorKind::Transport(d) => d.payload.as_ref(),
            ErrorKind::Operation(d) => d.payload.as_ref(),
            _ => None,
        }
    }

    /// The terminal status token reported by the service, if any.
    pub fn operation_status(&self) -> Option<&str> {
        match &self.kind {
            ErrorKind::Operation(d) => Some(d.status.as_str()),
            _ => None,
        }
    }

    /// The URL of the poll that observed the terminal state, if any.
    pub fn final_poll_url(&self) -> Option<&url::Url> {
        match &self.kind {
            ErrorKind::Operation(d) => Some(&d.final_poll_url),
            _ => None,
        }
    }

    /// Attaches the errors from earlier attempts of a retry loop.
    ///
    /// When a retry loop gives up it returns the last error unchanged, with
    /// the errors from prior attempts attached for troubleshooting.
    pub fn with_attempt_history<I>(mut self, history: I) -> Self
    where
        I: IntoIterator<Item = Error>,
    {
        self.attempt_history = history.into_iter().collect();
        self
    }

    /// The errors observed in earlier attempts of a retry loop.
    ///
    /// Empty unless the error terminated a retry loop that made more than one
    /// attempt.
    pub fn attempt_history(&self) -> &[Error] {
        &self.attempt_history
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.kind, &self.source) {
            (ErrorKind::Transport(details), _) => details.display(self.source(), f),
            (ErrorKind::Operation(d), _) => {
                write!(
                    f,
                    "the service reports the operation finished as [{}], last polled at {}",
                    d.status, d.final_poll_url
                )
            }
            (ErrorKind::Protocol, Some(e)) => {
                write!(f, "the service violated the polling contract: {e}")
            }
            (ErrorKind::Canceled, _) => {
                write!(f, "the operation was abandoned at the caller's request")
            }
            (ErrorKind::Deserialization, Some(e)) => {
                write!(f, "cannot deserialize the response {e}")
            }
            (ErrorKind::Other, Some(e)) => {
                write!(f, "an unclassified problem making a request: {e}")
            }
            (_, None) => unreachable!("no constructor allows this"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error))
    }
}

/// The type of error held by an [Error] instance.
#[derive(Debug)]
enum ErrorKind {
    Transport(Box<TransportDetails>),
    Operation(Box<OperationDetails>),
    Protocol,
    Canceled,
    Deserialization,
    /// An uncategorized error.
    Other,
}

#[derive(Debug)]
struct TransportDetails {
    status_code: Option<u16>,
    headers: Option<HeaderMap>,
    payload: Option<bytes::Bytes>,
}

impl TransportDetails {
    fn display(
        &self,
        source: Option<&(dyn StdError + 'static)>,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match (source, &self) {
            (
                _,
                TransportDetails {
                    status_code: Some(code),
                    payload: Some(p),
                    ..
                },
            ) => {
                if let Ok(message) = std::str::from_utf8(p.as_ref()) {
                    write!(f, "the HTTP transport reports a [{code}] error: {message}")
                } else {
                    write!(f, "the HTTP transport reports a [{code}] error: {p:?}")
                }
            }
            (Some(source), _) => {
                write!(f, "the transport reports an error: {source}")
            }
            (None, _) => unreachable!("no Error constructor allows this"),
        }
    }
}

#[derive(Debug)]
struct OperationDetails {
    status: String,
    final_poll_url: url::Url,
    status_code: Option<u16>,
    payload: Option<bytes::Bytes>,
}
