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

//! Header names and parsers for server-supplied delays.
//!
//! Services direct the pace of retries and polls through response headers.
//! The standard `retry-after` header carries either a delay in seconds or an
//! HTTP-date. Some services also send millisecond-precision variants, which
//! take precedence over the standard header when present.

use http::HeaderMap;
use std::time::Duration;

/// The header naming the URL to poll for operation progress.
pub const LOCATION: &str = "location";

/// The header naming the URL of the operation status document.
pub const AZURE_ASYNC_OPERATION: &str = "azure-asyncoperation";

/// The standard delay header, in seconds or as an HTTP-date.
pub const RETRY_AFTER: &str = "retry-after";

/// A vendor delay header, in milliseconds.
pub const RETRY_AFTER_MS: &str = "retry-after-ms";

/// A vendor delay header, in milliseconds.
pub const X_MS_RETRY_AFTER_MS: &str = "x-ms-retry-after-ms";

/// Parses the standard `retry-after` header.
///
/// The value is either a non-negative integer number of seconds, or an
/// HTTP-date. Dates in the past yield [Duration::ZERO]. Returns `None` when
/// the header is absent or unparsable; a malformed delay hint is ignored, not
/// an error.
///
/// # Example
/// ```
/// use cloudpoll_gax::headers::retry_after;
/// use std::time::Duration;
/// let mut headers = http::HeaderMap::new();
/// headers.insert("retry-after", http::HeaderValue::from_static("5"));
/// assert_eq!(retry_after(&headers), Some(Duration::from_secs(5)));
/// ```
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = time::OffsetDateTime::parse(value, &time::format_description::well_known::Rfc2822)
        .ok()?;
    let delta = date - time::OffsetDateTime::now_utc();
    // Dates in the past mean "no delay required".
    Some(delta.try_into().unwrap_or(Duration::ZERO))
}

/// The ordered list of authoritative delay-override headers.
///
/// The retry and polling loops consult these headers, in order, before
/// falling back to the standard `retry-after` header, and only then to the
/// backoff policy. The default list holds the millisecond-precision vendor
/// headers. Callers talking to services with different conventions can
/// replace the list.
#[derive(Clone, Debug)]
pub struct DelayHeaders {
    millis_headers: Vec<http::HeaderName>,
}

impl DelayHeaders {
    /// Creates a delay-override list from millisecond-valued header names.
    pub fn new<I>(millis_headers: I) -> Self
    where
        I: IntoIterator<Item = http::HeaderName>,
    {
        Self {
            millis_headers: millis_headers.into_iter().collect(),
        }
    }

    /// The server-supplied delay, if any.
    ///
    /// Checks the millisecond headers in order, then the standard
    /// `retry-after` header.
    ///
    /// # Example
    /// ```
    /// use cloudpoll_gax::headers::DelayHeaders;
    /// use std::time::Duration;
    /// let mut headers = http::HeaderMap::new();
    /// headers.insert("retry-after-ms", http::HeaderValue::from_static("250"));
    /// headers.insert("retry-after", http::HeaderValue::from_static("5"));
    /// let delay = DelayHeaders::default().delay_override(&headers);
    /// assert_eq!(delay, Some(Duration::from_millis(250)));
    /// ```
    pub fn delay_override(&self, headers: &HeaderMap) -> Option<Duration> {
        for name in &self.millis_headers {
            let Some(value) = headers.get(name) else {
                continue;
            };
            if let Some(millis) = value.to_str().ok().and_then(|v| v.trim().parse::<u64>().ok()) {
                return Some(Duration::from_millis(millis));
            }
        }
        retry_after(headers)
    }
}

impl Default for DelayHeaders {
    fn default() -> Self {
        Self::new([
            http::HeaderName::from_static(RETRY_AFTER_MS),
            http::HeaderName::from_static(X_MS_RETRY_AFTER_MS),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                http::HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test_case(&[], None; "absent")]
    #[test_case(&[("retry-after", "0")], Some(Duration::ZERO); "zero seconds")]
    #[test_case(&[("retry-after", "5")], Some(Duration::from_secs(5)); "seconds")]
    #[test_case(&[("retry-after", "  7 ")], Some(Duration::from_secs(7)); "padded seconds")]
    #[test_case(&[("retry-after", "not-a-delay")], None; "unparsable")]
    #[test_case(&[("retry-after", "-3")], None; "negative seconds")]
    fn retry_after_seconds(pairs: &[(&str, &str)], want: Option<Duration>) {
        assert_eq!(retry_after(&headers(pairs)), want);
    }

    #[test]
    fn retry_after_http_date_future() {
        let date = time::OffsetDateTime::now_utc() + time::Duration::seconds(60);
        let value = date
            .format(&time::format_description::well_known::Rfc2822)
            .unwrap();
        let got = retry_after(&headers(&[("retry-after", &value)])).unwrap();
        assert!(got <= Duration::from_secs(60), "{got:?}");
        assert!(got >= Duration::from_secs(55), "{got:?}");
    }

    #[test]
    fn retry_after_http_date_past() {
        let got = retry_after(&headers(&[(
            "retry-after",
            "Sun, 06 Nov 1994 08:49:37 GMT",
        )]));
        assert_eq!(got, Some(Duration::ZERO));
    }

    #[test]
    fn delay_override_prefers_millis() {
        let got = DelayHeaders::default().delay_override(&headers(&[
            ("retry-after-ms", "250"),
            ("x-ms-retry-after-ms", "900"),
            ("retry-after", "5"),
        ]));
        assert_eq!(got, Some(Duration::from_millis(250)));
    }

    #[test]
    fn delay_override_second_millis_header() {
        let got = DelayHeaders::default()
            .delay_override(&headers(&[("x-ms-retry-after-ms", "900"), ("retry-after", "5")]));
        assert_eq!(got, Some(Duration::from_millis(900)));
    }

    #[test]
    fn delay_override_falls_back_to_retry_after() {
        let got = DelayHeaders::default().delay_override(&headers(&[("retry-after", "5")]));
        assert_eq!(got, Some(Duration::from_secs(5)));
    }

    #[test]
    fn delay_override_ignores_malformed_millis() {
        let got = DelayHeaders::default()
            .delay_override(&headers(&[("retry-after-ms", "soon"), ("retry-after", "5")]));
        assert_eq!(got, Some(Duration::from_secs(5)));
    }

    #[test]
    fn delay_override_absent() {
        let got = DelayHeaders::default().delay_override(&HeaderMap::new());
        assert_eq!(got, None);
    }

    #[test]
    fn custom_list() {
        let custom = DelayHeaders::new([http::HeaderName::from_static("x-delay-ms")]);
        let got = custom.delay_override(&headers(&[
            ("x-delay-ms", "10"),
            ("retry-after-ms", "250"),
        ]));
        assert_eq!(got, Some(Duration::from_millis(10)));
    }
}
