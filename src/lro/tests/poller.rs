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

//! End-to-end tests for the polling engines, with a scripted transport.

use cloudpoll_lro::poller::{BlockingPollerBuilder, PollerBuilder};
use gax::fixed_backoff::FixedBackoff;
use gax::http::{Request, Response};
use gax::retry_policy::{LimitedAttemptCount, TransientErrors};
use std::sync::Arc;
use std::time::Duration;

const RESOURCE: &str = "https://service.example.com/resources/r1";
const MONITOR: &str = "https://service.example.com/monitor/op-001";
const STATUS_DOC: &str = "https://service.example.com/operations/op-001";

mockall::mock! {
    #[derive(Debug)]
    Transport {}
    #[async_trait::async_trait]
    impl gax::http::Transport for Transport {
        async fn execute(&self, request: Request) -> gax::Result<Response>;
    }
}

mockall::mock! {
    #[derive(Debug)]
    BlockingTransport {}
    impl gax::http::BlockingTransport for BlockingTransport {
        fn execute(&self, request: Request) -> gax::Result<Response>;
    }
}

fn url(s: &str) -> url::Url {
    url::Url::parse(s).unwrap()
}

fn response(status: u16, pairs: &[(&str, &str)], body: &str) -> Response {
    let mut headers = http::HeaderMap::new();
    for (name, value) in pairs {
        headers.insert(
            http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
            http::HeaderValue::from_str(value).unwrap(),
        );
    }
    Response {
        status: http::StatusCode::from_u16(status).unwrap(),
        headers,
        body: bytes::Bytes::from(body.to_string()),
    }
}

fn fast_backoff() -> FixedBackoff {
    FixedBackoff::new(Duration::from_millis(1)).unwrap()
}

#[tokio::test]
async fn location_poll_sequence() -> anyhow::Result<()> {
    // The monitor answers 202 twice and then delivers the result. The
    // operation is done exactly after the third poll.
    let mut seq = mockall::Sequence::new();
    let mut transport = MockTransport::new();
    transport
        .expect_execute()
        .once()
        .in_sequence(&mut seq)
        .withf(|r| r.url.as_str() == RESOURCE)
        .returning(|_| {
            Ok(response(
                202,
                &[("location", MONITOR), ("retry-after-ms", "1")],
                "",
            ))
        });
    for _ in 0..2 {
        transport
            .expect_execute()
            .once()
            .in_sequence(&mut seq)
            .withf(|r| r.method == http::Method::GET && r.url.as_str() == MONITOR)
            .returning(|_| Ok(response(202, &[("retry-after-ms", "1")], "")));
    }
    transport
        .expect_execute()
        .once()
        .in_sequence(&mut seq)
        .withf(|r| r.url.as_str() == MONITOR)
        .returning(|_| Ok(response(200, &[], r#"{"name": "r1"}"#)));

    let got = PollerBuilder::new(Arc::new(transport))
        .with_polling_backoff_policy(fast_backoff())
        .start(Request::get(url(RESOURCE)))
        .await?
        .until_done()
        .await?;
    assert_eq!(got.status, http::StatusCode::OK);
    assert_eq!(got.body.as_ref(), br#"{"name": "r1"}"#);
    Ok(())
}

#[tokio::test]
async fn async_operation_with_resource_fetch() -> anyhow::Result<()> {
    // The status document reports success without an `id`, so the engine
    // makes exactly one extra request for the resource itself.
    let mut seq = mockall::Sequence::new();
    let mut transport = MockTransport::new();
    transport
        .expect_execute()
        .once()
        .in_sequence(&mut seq)
        .withf(|r| r.url.as_str() == RESOURCE)
        .returning(|_| {
            Ok(response(
                202,
                &[
                    ("azure-asyncoperation", STATUS_DOC),
                    ("retry-after-ms", "1"),
                ],
                "",
            ))
        });
    transport
        .expect_execute()
        .once()
        .in_sequence(&mut seq)
        .withf(|r| r.url.as_str() == STATUS_DOC)
        .returning(|_| {
            Ok(response(
                200,
                &[("retry-after-ms", "1")],
                r#"{"status": "InProgress"}"#,
            ))
        });
    transport
        .expect_execute()
        .once()
        .in_sequence(&mut seq)
        .withf(|r| r.url.as_str() == STATUS_DOC)
        .returning(|_| Ok(response(200, &[], r#"{"status": "Succeeded"}"#)));
    transport
        .expect_execute()
        .once()
        .in_sequence(&mut seq)
        .withf(|r| r.url.as_str() == RESOURCE)
        .returning(|_| Ok(response(200, &[], r#"{"name": "r1", "size": 42}"#)));

    let got = PollerBuilder::new(Arc::new(transport))
        .with_polling_backoff_policy(fast_backoff())
        .start(Request::get(url(RESOURCE)))
        .await?
        .until_done()
        .await?;
    assert_eq!(got.body.as_ref(), br#"{"name": "r1", "size": 42}"#);
    Ok(())
}

#[tokio::test]
async fn operation_failure_is_authoritative() -> anyhow::Result<()> {
    let mut seq = mockall::Sequence::new();
    let mut transport = MockTransport::new();
    transport
        .expect_execute()
        .once()
        .in_sequence(&mut seq)
        .returning(|_| {
            Ok(response(
                202,
                &[
                    ("azure-asyncoperation", STATUS_DOC),
                    ("retry-after-ms", "1"),
                ],
                "",
            ))
        });
    transport
        .expect_execute()
        .once()
        .in_sequence(&mut seq)
        .returning(|_| {
            Ok(response(
                200,
                &[],
                r#"{"status": "Failed", "error": {"code": "QuotaExceeded"}}"#,
            ))
        });

    let err = PollerBuilder::new(Arc::new(transport))
        .with_polling_backoff_policy(fast_backoff())
        .start(Request::get(url(RESOURCE)))
        .await?
        .until_done()
        .await
        .unwrap_err();
    assert!(err.is_operation(), "{err:?}");
    assert_eq!(err.operation_status(), Some("Failed"));
    assert_eq!(err.final_poll_url().map(|u| u.as_str()), Some(STATUS_DOC));
    Ok(())
}

#[tokio::test]
async fn transient_error_then_success() -> anyhow::Result<()> {
    // A 503 on the initiating request is retried, then the operation
    // completes immediately.
    let mut seq = mockall::Sequence::new();
    let mut transport = MockTransport::new();
    transport
        .expect_execute()
        .once()
        .in_sequence(&mut seq)
        .returning(|_| Ok(response(503, &[], "")));
    transport
        .expect_execute()
        .once()
        .in_sequence(&mut seq)
        .returning(|_| Ok(response(200, &[], r#"{"name": "r1"}"#)));

    let got = PollerBuilder::new(Arc::new(transport))
        .with_backoff_policy(fast_backoff())
        .start(Request::get(url(RESOURCE)))
        .await?
        .until_done()
        .await?;
    assert_eq!(got.status, http::StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn permanent_error_is_not_retried() {
    let mut transport = MockTransport::new();
    transport
        .expect_execute()
        .once()
        .returning(|_| Ok(response(404, &[], "no such resource")));

    let err = PollerBuilder::new(Arc::new(transport))
        .with_backoff_policy(fast_backoff())
        .start(Request::get(url(RESOURCE)))
        .await
        .unwrap_err();
    assert_eq!(err.http_status_code(), Some(404));
    assert!(err.attempt_history().is_empty(), "{err:?}");
}

#[tokio::test]
async fn retry_ceiling_preserves_last_error_and_history() -> anyhow::Result<()> {
    const CEILING: u32 = 3;
    let mut transport = MockTransport::new();
    transport
        .expect_execute()
        .times(CEILING as usize)
        .returning(|_| Ok(response(500, &[], "boom")));

    let err = PollerBuilder::new(Arc::new(transport))
        .with_retry_policy(LimitedAttemptCount::custom(TransientErrors, CEILING))
        .with_backoff_policy(fast_backoff())
        .start(Request::get(url(RESOURCE)))
        .await
        .unwrap_err();
    // The last failure comes back unchanged, with the earlier attempts
    // attached for auditing.
    assert_eq!(err.http_status_code(), Some(500));
    assert_eq!(err.http_payload().map(|p| p.as_ref()), Some(&b"boom"[..]));
    let history = err.attempt_history();
    assert_eq!(history.len(), (CEILING - 1) as usize);
    assert!(history.iter().all(|e| e.http_status_code() == Some(500)));
    Ok(())
}

#[tokio::test]
async fn cancellation_during_delay() -> anyhow::Result<()> {
    // The service asks for an hour-long delay. Cancellation must take
    // effect promptly and without another poll.
    let transport = MockTransport::new();
    let request = Request::get(url(RESOURCE));
    let initiating = response(202, &[("location", MONITOR), ("retry-after", "3600")], "");

    let poller = PollerBuilder::new(Arc::new(transport)).resume(&request, initiating)?;
    let token = poller.cancellation_token();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
    });
    let err = poller.until_done().await.unwrap_err();
    assert!(err.is_canceled(), "{err:?}");
    canceller.await?;
    Ok(())
}

#[tokio::test]
async fn cancellation_before_start() {
    let transport = MockTransport::new();
    let builder = PollerBuilder::new(Arc::new(transport));
    let token = gax::cancellation::CancellationToken::new();
    token.cancel();
    let err = builder
        .with_cancellation(token)
        .start(Request::get(url(RESOURCE)))
        .await
        .unwrap_err();
    assert!(err.is_canceled(), "{err:?}");
}

#[tokio::test]
async fn provisioning_state_sequence() -> anyhow::Result<()> {
    let mut seq = mockall::Sequence::new();
    let mut transport = MockTransport::new();
    transport
        .expect_execute()
        .once()
        .in_sequence(&mut seq)
        .returning(|_| {
            Ok(response(
                201,
                &[("retry-after-ms", "1")],
                r#"{"properties": {"provisioningState": "Creating"}}"#,
            ))
        });
    transport
        .expect_execute()
        .once()
        .in_sequence(&mut seq)
        .withf(|r| r.url.as_str() == RESOURCE)
        .returning(|_| {
            Ok(response(
                200,
                &[("retry-after-ms", "1")],
                r#"{"properties": {"provisioningState": "Creating"}}"#,
            ))
        });
    transport
        .expect_execute()
        .once()
        .in_sequence(&mut seq)
        .withf(|r| r.url.as_str() == RESOURCE)
        .returning(|_| {
            Ok(response(
                200,
                &[],
                r#"{"name": "r1", "properties": {"provisioningState": "Succeeded"}}"#,
            ))
        });

    let got = PollerBuilder::new(Arc::new(transport))
        .with_polling_backoff_policy(fast_backoff())
        .start(Request::get(url(RESOURCE)))
        .await?
        .until_done()
        .await?;
    assert_eq!(got.status, http::StatusCode::OK);
    Ok(())
}

#[test]
fn blocking_location_sequence() -> anyhow::Result<()> {
    let mut seq = mockall::Sequence::new();
    let mut transport = MockBlockingTransport::new();
    transport
        .expect_execute()
        .once()
        .in_sequence(&mut seq)
        .withf(|r| r.url.as_str() == RESOURCE)
        .returning(|_| {
            Ok(response(
                202,
                &[("location", MONITOR), ("retry-after-ms", "1")],
                "",
            ))
        });
    transport
        .expect_execute()
        .once()
        .in_sequence(&mut seq)
        .withf(|r| r.url.as_str() == MONITOR)
        .returning(|_| Ok(response(202, &[("retry-after-ms", "1")], "")));
    transport
        .expect_execute()
        .once()
        .in_sequence(&mut seq)
        .withf(|r| r.url.as_str() == MONITOR)
        .returning(|_| Ok(response(200, &[], r#"{"name": "r1"}"#)));

    let got = BlockingPollerBuilder::new(Arc::new(transport))
        .with_polling_backoff_policy(fast_backoff())
        .start(Request::get(url(RESOURCE)))?
        .until_done()?;
    assert_eq!(got.status, http::StatusCode::OK);
    assert_eq!(got.body.as_ref(), br#"{"name": "r1"}"#);
    Ok(())
}

#[test]
fn blocking_cancellation_during_delay() -> anyhow::Result<()> {
    let transport = MockBlockingTransport::new();
    let request = Request::get(url(RESOURCE));
    let initiating = response(202, &[("location", MONITOR), ("retry-after", "3600")], "");

    let poller = BlockingPollerBuilder::new(Arc::new(transport)).resume(&request, initiating)?;
    let token = poller.cancellation_token();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(10));
        token.cancel();
    });
    let err = poller.until_done().unwrap_err();
    assert!(err.is_canceled(), "{err:?}");
    canceller.join().expect("canceller thread");
    Ok(())
}

#[test]
fn blocking_retry_ceiling() -> anyhow::Result<()> {
    const CEILING: u32 = 2;
    let mut transport = MockBlockingTransport::new();
    transport
        .expect_execute()
        .times(CEILING as usize)
        .returning(|_| Ok(response(502, &[], "bad gateway")));

    let err = BlockingPollerBuilder::new(Arc::new(transport))
        .with_retry_policy(LimitedAttemptCount::custom(TransientErrors, CEILING))
        .with_backoff_policy(fast_backoff())
        .start(Request::get(url(RESOURCE)))
        .unwrap_err();
    assert_eq!(err.http_status_code(), Some(502));
    assert_eq!(err.attempt_history().len(), (CEILING - 1) as usize);
    Ok(())
}
