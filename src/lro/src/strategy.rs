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

//! Polling strategy selection and the per-operation state machines.
//!
//! Services advertise how to track a long-running operation through the
//! initiating response. [PollStrategy::select] examines that response once
//! and returns the state machine matching the service's convention. The
//! polling engines then drive the state machine to a terminal state.

use crate::status::{OperationStatus, StatusBody};
use gax::Result;
use gax::error::Error;
use gax::headers::{self, DelayHeaders};
use gax::http::{Request, Response};
use std::time::Duration;

/// The state of one in-flight long-running operation.
///
/// Selection picks one of four conventions:
///
/// * `Completed`: the initiating response already carries the final result.
/// * `Location`: a `location` header points at a resource that answers 202
///   while the operation runs.
/// * `AsyncOperation`: an `azure-asyncoperation` header points at a status
///   document; on success the original resource is fetched separately.
/// * `ProvisioningState`: the resource itself reports progress through a
///   `properties.provisioningState` field.
#[derive(Debug)]
pub enum PollStrategy {
    Completed(Completed),
    Location(LocationPolling),
    AsyncOperation(AsyncOperationPolling),
    ProvisioningState(StatePolling),
}

impl PollStrategy {
    /// Examines the initiating request and response and picks a strategy.
    ///
    /// The operation status headers take priority over the response body,
    /// and the `azure-asyncoperation` header takes priority over `location`.
    /// A 202 response that offers no way to track the operation is a
    /// protocol error. Responses with an error status code never start a
    /// polling loop.
    ///
    /// A delay header on the initiating response seeds the wait before the
    /// first poll.
    pub fn select(
        request: &Request,
        response: Response,
        delay_headers: &DelayHeaders,
    ) -> Result<PollStrategy> {
        let response = response.checked()?;
        let seed = delay_headers
            .delay_override(&response.headers)
            .unwrap_or(Duration::ZERO);
        if let Some(status_url) = header_url(&response.headers, headers::AZURE_ASYNC_OPERATION)? {
            return Ok(PollStrategy::AsyncOperation(AsyncOperationPolling {
                status_url,
                resource_url: request.url.clone(),
                phase: Phase::Polling,
                delay: seed,
            }));
        }
        if let Some(poll_url) = header_url(&response.headers, headers::LOCATION)? {
            return Ok(PollStrategy::Location(LocationPolling {
                poll_url,
                delay: seed,
                done: None,
            }));
        }
        let body = StatusBody::from_payload_lenient(&response.body);
        if let Some(state) = body.provisioning_state() {
            return match OperationStatus::from_token(state) {
                OperationStatus::InProgress => {
                    Ok(PollStrategy::ProvisioningState(StatePolling {
                        poll_url: request.url.clone(),
                        delay: seed,
                        done: None,
                    }))
                }
                OperationStatus::Succeeded => Ok(PollStrategy::Completed(Completed { response })),
                OperationStatus::Failed | OperationStatus::Canceled => Err(Error::operation(
                    state,
                    request.url.clone(),
                    Some(response.status.as_u16()),
                    Some(response.body.clone()),
                )),
            };
        }
        if response.status == http::StatusCode::ACCEPTED {
            return Err(Error::protocol(
                "a 202 response carried no operation status header, no location header, \
                 and no provisioning state",
            ));
        }
        Ok(PollStrategy::Completed(Completed { response }))
    }

    /// True only in a terminal state.
    pub fn is_done(&self) -> bool {
        match self {
            Self::Completed(_) => true,
            Self::Location(s) => s.done.is_some(),
            Self::AsyncOperation(s) => matches!(s.phase, Phase::Done(_)),
            Self::ProvisioningState(s) => s.done.is_some(),
        }
    }

    /// The wait before the next poll.
    ///
    /// Zero means the next request should be issued immediately, for example
    /// the resource fetch after a status document reports success.
    pub fn delay(&self) -> Duration {
        match self {
            Self::Completed(_) => Duration::ZERO,
            Self::Location(s) => s.delay,
            Self::AsyncOperation(s) => s.delay,
            Self::ProvisioningState(s) => s.delay,
        }
    }

    /// Builds the next poll request.
    pub fn poll_request(&self) -> Request {
        match self {
            Self::Completed(_) => unreachable!("no poll request after the operation completed"),
            Self::Location(s) => Request::get(s.poll_url.clone()),
            Self::AsyncOperation(s) => match &s.phase {
                Phase::Polling => Request::get(s.status_url.clone()),
                Phase::FetchingResource => Request::get(s.resource_url.clone()),
                Phase::Done(_) => {
                    unreachable!("no poll request after the operation completed")
                }
            },
            Self::ProvisioningState(s) => Request::get(s.poll_url.clone()),
        }
    }

    /// Updates the state machine from a poll response.
    ///
    /// `floor` is the smallest acceptable wait before the next poll. A
    /// server-suggested delay below the floor is raised to it; a longer
    /// server-requested delay is honored as-is.
    pub fn consume_response(
        &mut self,
        response: Response,
        floor: Duration,
        delay_headers: &DelayHeaders,
    ) -> Result<()> {
        match self {
            Self::Completed(_) => unreachable!("no poll response after the operation completed"),
            Self::Location(s) => s.consume(response, floor, delay_headers),
            Self::AsyncOperation(s) => s.consume(response, floor, delay_headers),
            Self::ProvisioningState(s) => s.consume(response, floor, delay_headers),
        }
    }

    /// The final resource representation.
    pub fn into_final_response(self) -> Response {
        match self {
            Self::Completed(s) => s.response,
            Self::Location(s) => s.done.expect("the operation has not completed"),
            Self::AsyncOperation(s) => match s.phase {
                Phase::Done(response) => response,
                _ => panic!("the operation has not completed"),
            },
            Self::ProvisioningState(s) => s.done.expect("the operation has not completed"),
        }
    }
}

/// The initiating response was already terminal.
#[derive(Debug)]
pub struct Completed {
    response: Response,
}

/// Polls a `location` URL until it stops answering 202.
#[derive(Debug)]
pub struct LocationPolling {
    poll_url: url::Url,
    delay: Duration,
    done: Option<Response>,
}

impl LocationPolling {
    fn consume(
        &mut self,
        response: Response,
        floor: Duration,
        delay_headers: &DelayHeaders,
    ) -> Result<()> {
        let response = response.checked()?;
        if response.status == http::StatusCode::ACCEPTED {
            // A refreshed location header redirects the remaining polls.
            if let Some(url) = header_url(&response.headers, headers::LOCATION)? {
                self.poll_url = url;
            }
            self.delay = folded_delay(&response, floor, delay_headers);
            return Ok(());
        }
        self.delay = Duration::ZERO;
        self.done = Some(response);
        Ok(())
    }
}

#[derive(Debug)]
enum Phase {
    Polling,
    FetchingResource,
    Done(Response),
}

/// Polls an operation status document, then fetches the resource.
#[derive(Debug)]
pub struct AsyncOperationPolling {
    status_url: url::Url,
    resource_url: url::Url,
    phase: Phase,
    delay: Duration,
}

impl AsyncOperationPolling {
    fn consume(
        &mut self,
        response: Response,
        floor: Duration,
        delay_headers: &DelayHeaders,
    ) -> Result<()> {
        match &self.phase {
            Phase::Polling => self.consume_status(response, floor, delay_headers),
            Phase::FetchingResource => {
                let response = response.checked()?;
                self.delay = Duration::ZERO;
                self.phase = Phase::Done(response);
                Ok(())
            }
            Phase::Done(_) => unreachable!("no poll response after the operation completed"),
        }
    }

    fn consume_status(
        &mut self,
        response: Response,
        floor: Duration,
        delay_headers: &DelayHeaders,
    ) -> Result<()> {
        let response = response.checked()?;
        let doc = StatusBody::from_payload(&response.body).map_err(Error::protocol)?;
        let Some(token) = doc.status() else {
            return Err(Error::protocol(
                "the operation status document has no status field",
            ));
        };
        match OperationStatus::from_token(token) {
            OperationStatus::InProgress => {
                // The service may move the status document between polls.
                if let Some(url) = header_url(&response.headers, headers::AZURE_ASYNC_OPERATION)? {
                    self.status_url = url;
                }
                self.delay = folded_delay(&response, floor, delay_headers);
                Ok(())
            }
            OperationStatus::Succeeded => {
                self.delay = Duration::ZERO;
                if doc.id().is_some() {
                    // The status document embeds the result, skip the fetch.
                    self.phase = Phase::Done(response);
                } else {
                    self.phase = Phase::FetchingResource;
                }
                Ok(())
            }
            OperationStatus::Failed | OperationStatus::Canceled => Err(Error::operation(
                token,
                self.status_url.clone(),
                Some(response.status.as_u16()),
                Some(response.body.clone()),
            )),
        }
    }
}

/// Polls the resource itself, watching `properties.provisioningState`.
#[derive(Debug)]
pub struct StatePolling {
    poll_url: url::Url,
    delay: Duration,
    done: Option<Response>,
}

impl StatePolling {
    fn consume(
        &mut self,
        response: Response,
        floor: Duration,
        delay_headers: &DelayHeaders,
    ) -> Result<()> {
        let response = response.checked()?;
        if response.status == http::StatusCode::ACCEPTED {
            self.delay = folded_delay(&response, floor, delay_headers);
            return Ok(());
        }
        let body = StatusBody::from_payload_lenient(&response.body);
        match body.provisioning_state().map(OperationStatus::from_token) {
            Some(OperationStatus::InProgress) => {
                self.delay = folded_delay(&response, floor, delay_headers);
                Ok(())
            }
            // A resource that no longer reports a provisioning state is done.
            Some(OperationStatus::Succeeded) | None => {
                self.delay = Duration::ZERO;
                self.done = Some(response);
                Ok(())
            }
            Some(OperationStatus::Failed) | Some(OperationStatus::Canceled) => {
                let token = body.provisioning_state().unwrap_or_default();
                Err(Error::operation(
                    token,
                    self.poll_url.clone(),
                    Some(response.status.as_u16()),
                    Some(response.body.clone()),
                ))
            }
        }
    }
}

fn folded_delay(response: &Response, floor: Duration, delay_headers: &DelayHeaders) -> Duration {
    delay_headers
        .delay_override(&response.headers)
        .unwrap_or(Duration::ZERO)
        .max(floor)
}

fn header_url(headers: &http::HeaderMap, name: &str) -> Result<Option<url::Url>> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|e| Error::protocol(format!("the {name} header is not valid text: {e}")))?;
    let url = url::Url::parse(value)
        .map_err(|e| Error::protocol(format!("the {name} header is not an absolute URL: {e}")))?;
    Ok(Some(url))
}
