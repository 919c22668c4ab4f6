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

//! Minimal parsing of operation status documents.
//!
//! The polling strategies only need a handful of fields from the bodies they
//! see: a `status` token, a `properties.provisioningState` token, and a
//! resource `id`. Everything else in the body is the caller's business and is
//! handed back verbatim.

use serde::Deserialize;

/// The progress of an operation, as reported by the service.
///
/// The service vocabulary is open ended. `Succeeded`, `Failed`, and
/// `Canceled` are terminal, compared ignoring ASCII case. Any other token
/// means the operation is still running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationStatus {
    InProgress,
    Succeeded,
    Failed,
    Canceled,
}

impl OperationStatus {
    pub fn from_token(token: &str) -> Self {
        if token.eq_ignore_ascii_case("Succeeded") {
            Self::Succeeded
        } else if token.eq_ignore_ascii_case("Failed") {
            Self::Failed
        } else if token.eq_ignore_ascii_case("Canceled") {
            Self::Canceled
        } else {
            Self::InProgress
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// The fields the polling strategies extract from a response body.
#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct StatusBody {
    status: Option<String>,
    id: Option<String>,
    properties: Option<Properties>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Properties {
    provisioning_state: Option<String>,
}

impl StatusBody {
    /// Parses a status document body.
    ///
    /// The caller classifies a parse failure. For a status document the
    /// polling contract requires, a failure is a protocol violation rather
    /// than a plain deserialization problem.
    pub(crate) fn from_payload(payload: &bytes::Bytes) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Like [from_payload][Self::from_payload], but a malformed body yields
    /// an empty document. Used when probing the initiating response, where a
    /// non-JSON body simply means "no provisioning state".
    pub(crate) fn from_payload_lenient(payload: &bytes::Bytes) -> Self {
        serde_json::from_slice(payload).unwrap_or_default()
    }

    pub(crate) fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub(crate) fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub(crate) fn provisioning_state(&self) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|p| p.provisioning_state.as_deref())
    }
}
