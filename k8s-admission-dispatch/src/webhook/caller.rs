// Copyright 2024 The Kubernetes Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Calling a single webhook.

use super::client::{ClientError, ClientManager};
use super::HookConfig;
use crate::api::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, ConversionError, Registry};
use crate::api::meta::Status;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("failed to call webhook: {0}")]
    Client(#[from] ClientError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("received invalid webhook response: {0}")]
    InvalidResponse(String),

    #[error("none of the admission review versions {versions:?} is supported")]
    Negotiation { versions: Vec<String> },
}

/// WebhookCaller sends one admission request to one hook.
#[async_trait]
pub trait WebhookCaller: Send + Sync {
    async fn call(&self, hook: &HookConfig, request: &AdmissionRequest) -> Result<AdmissionResponse, WebhookError>;
}

/// Calls hooks over HTTPS, negotiating the review version per hook.
pub struct HttpWebhookCaller {
    clients: Arc<ClientManager>,
    registry: Arc<Registry>,
}

impl HttpWebhookCaller {
    pub fn new(clients: Arc<ClientManager>, registry: Arc<Registry>) -> Self {
        Self { clients, registry }
    }

    pub fn client_manager(&self) -> &Arc<ClientManager> {
        &self.clients
    }
}

#[async_trait]
impl WebhookCaller for HttpWebhookCaller {
    async fn call(&self, hook: &HookConfig, request: &AdmissionRequest) -> Result<AdmissionResponse, WebhookError> {
        let conversions = self
            .registry
            .negotiate(&hook.admission_review_versions)
            .ok_or_else(|| WebhookError::Negotiation {
                versions: hook.admission_review_versions.clone(),
            })?;
        let body = (conversions.encode_review)(&AdmissionReview::for_request(request.clone()))?;
        let client = self.clients.client_for(hook)?;

        debug!(
            hook = %hook.name,
            uid = %request.uid,
            version = conversions.version,
            url = %client.url(),
            "calling webhook"
        );
        let raw = client.post(body, hook.timeout).await?;

        let review = (conversions.decode_review)(&raw)?;
        let response = review
            .response
            .ok_or_else(|| WebhookError::InvalidResponse("webhook response was absent".to_string()))?;
        if response.uid != request.uid {
            return Err(WebhookError::InvalidResponse(format!(
                "expected response.uid={:?}, got {:?}",
                request.uid, response.uid
            )));
        }
        Ok(response)
    }
}

#[derive(Debug, Clone)]
enum MockReply {
    Respond(AdmissionResponse),
    Patch(json_patch::Patch),
    Fail(String),
}

/// MockWebhookCaller answers from canned replies keyed by hook name and
/// records every call. Hooks without a reply are allowed.
#[derive(Debug, Default)]
pub struct MockWebhookCaller {
    replies: Mutex<HashMap<String, MockReply>>,
    calls: Mutex<Vec<(String, AdmissionRequest)>>,
}

impl MockWebhookCaller {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, hook: &str, reply: MockReply) {
        self.replies.lock().insert(hook.to_string(), reply);
    }

    pub fn set_allowed(&self, hook: &str) {
        self.set(hook, MockReply::Respond(AdmissionResponse::allowed("")));
    }

    pub fn set_denied(&self, hook: &str, status: Status) {
        self.set(hook, MockReply::Respond(AdmissionResponse::denied("", status)));
    }

    pub fn set_response(&self, hook: &str, response: AdmissionResponse) {
        self.set(hook, MockReply::Respond(response));
    }

    pub fn set_patch(&self, hook: &str, patch: json_patch::Patch) {
        self.set(hook, MockReply::Patch(patch));
    }

    /// Makes calls to `hook` fail as if the backend were unreachable.
    pub fn set_call_error(&self, hook: &str, message: &str) {
        self.set(hook, MockReply::Fail(message.to_string()));
    }

    /// Names of the called hooks, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn requests(&self) -> Vec<AdmissionRequest> {
        self.calls.lock().iter().map(|(_, req)| req.clone()).collect()
    }

    pub fn call_count(&self, hook: &str) -> usize {
        self.calls.lock().iter().filter(|(name, _)| name == hook).count()
    }
}

#[async_trait]
impl WebhookCaller for MockWebhookCaller {
    async fn call(&self, hook: &HookConfig, request: &AdmissionRequest) -> Result<AdmissionResponse, WebhookError> {
        self.calls.lock().push((hook.name.clone(), request.clone()));
        let reply = self.replies.lock().get(&hook.name).cloned();
        let mut response = match reply {
            None => AdmissionResponse::allowed(""),
            Some(MockReply::Respond(response)) => response,
            Some(MockReply::Patch(patch)) => AdmissionResponse::allowed("")
                .with_patch(&patch)
                .map_err(|e| WebhookError::InvalidResponse(e.to_string()))?,
            Some(MockReply::Fail(message)) => return Err(ClientError::Transport(message).into()),
        };
        response.uid = request.uid.clone();
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::attributes::{GroupVersionKind, GroupVersionResource};
    use crate::admission::{AttributesRecord, Operation};
    use crate::api::admissionregistration::WebhookClientConfig;
    use crate::webhook::client::{AnonymousAuthInfoResolver, DefaultServiceResolver};
    use serde_json::json;

    fn request() -> AdmissionRequest {
        let attr = AttributesRecord::new(
            "pod",
            "default",
            GroupVersionResource::new("", "v1", "pods"),
            "",
            Operation::Create,
            Some(json!({"metadata": {"name": "pod"}})),
            None,
            GroupVersionKind::new("", "v1", "Pod"),
            false,
        );
        AdmissionRequest::from_attributes("uid-1", &attr)
    }

    fn http_caller() -> HttpWebhookCaller {
        HttpWebhookCaller::new(
            Arc::new(ClientManager::new(
                Arc::new(AnonymousAuthInfoResolver),
                Arc::new(DefaultServiceResolver),
            )),
            Arc::new(Registry::standard()),
        )
    }

    #[tokio::test]
    async fn test_unknown_review_versions_fail_before_calling() {
        let hook = HookConfig::validating("hook.example.com", WebhookClientConfig::url("https://127.0.0.1:1/"))
            .with_admission_review_versions(&["v2", "v3"]);
        let err = http_caller().call(&hook, &request()).await.unwrap_err();
        assert!(matches!(err, WebhookError::Negotiation { .. }));
    }

    #[tokio::test]
    async fn test_mock_caller() {
        let mock = MockWebhookCaller::new();
        let hook = HookConfig::validating("a.example.com", WebhookClientConfig::url("https://a.example.com"));
        mock.set_denied("a.example.com", Status::with_message("no"));

        let response = mock.call(&hook, &request()).await.unwrap();
        assert!(!response.allowed);
        assert_eq!(response.uid, "uid-1");

        mock.set_call_error("a.example.com", "connection refused");
        let err = mock.call(&hook, &request()).await.unwrap_err();
        assert_eq!(err.to_string(), "failed to call webhook: connection refused");
        assert_eq!(mock.call_count("a.example.com"), 2);
    }
}
