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

//! admission.k8s.io AdmissionReview types.
//!
//! The structs in this module are the version-independent hub the
//! dispatcher works with. Each served wire version lives in its own module
//! and converts to and from the hub field by field; the [`Registry`] maps a
//! version tag to those conversions.

pub mod registry;
pub mod v1;
pub mod v1alpha1;
pub mod v1beta1;

pub use registry::{ConversionError, Conversions, Registry};

use crate::admission::attributes::{GroupVersionKind, GroupVersionResource, UserInfo};
use crate::admission::{Attributes, Operation};
use crate::api::meta::Status;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const GROUP_NAME: &str = "admission.k8s.io";

/// Kind of every AdmissionReview envelope.
pub const KIND: &str = "AdmissionReview";

/// Review versions a webhook may list in `admissionReviewVersions`.
pub const SUPPORTED_REVIEW_VERSIONS: &[&str] = &["v1", "v1beta1", "v1alpha1"];

/// PatchType is the type of patch returned by a mutating webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchType {
    #[serde(rename = "JSONPatch")]
    JsonPatch,
}

/// AdmissionRequest describes the attributes of one admission call.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionRequest {
    pub uid: String,
    pub kind: GroupVersionKind,
    pub resource: GroupVersionResource,
    pub sub_resource: String,
    pub request_kind: Option<GroupVersionKind>,
    pub request_resource: Option<GroupVersionResource>,
    pub request_sub_resource: String,
    pub name: String,
    pub namespace: String,
    pub operation: Operation,
    pub user_info: UserInfo,
    pub object: Option<Value>,
    pub old_object: Option<Value>,
    pub dry_run: Option<bool>,
    pub options: Option<Value>,
}

impl AdmissionRequest {
    /// Builds the request sent to a webhook from the current attributes.
    pub fn from_attributes(uid: &str, attr: &dyn Attributes) -> Self {
        Self {
            uid: uid.to_string(),
            kind: attr.get_kind().clone(),
            resource: attr.get_resource().clone(),
            sub_resource: attr.get_subresource().to_string(),
            request_kind: Some(attr.get_kind().clone()),
            request_resource: Some(attr.get_resource().clone()),
            request_sub_resource: attr.get_subresource().to_string(),
            name: attr.get_name().to_string(),
            namespace: attr.get_namespace().to_string(),
            operation: attr.get_operation(),
            user_info: attr.get_user_info().clone(),
            object: attr.get_object().cloned(),
            old_object: attr.get_old_object().cloned(),
            dry_run: Some(attr.is_dry_run()),
            options: attr.get_operation_options().cloned(),
        }
    }
}

/// AdmissionResponse describes a webhook's verdict.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    pub result: Option<Status>,
    pub patch: Vec<u8>,
    pub patch_type: Option<PatchType>,
    pub audit_annotations: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

impl AdmissionResponse {
    pub fn allowed(uid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            allowed: true,
            ..Default::default()
        }
    }

    pub fn denied(uid: &str, status: Status) -> Self {
        Self {
            uid: uid.to_string(),
            allowed: false,
            result: Some(status),
            ..Default::default()
        }
    }

    /// Attaches a JSON patch to the response.
    pub fn with_patch(mut self, patch: &json_patch::Patch) -> Result<Self, serde_json::Error> {
        self.patch = serde_json::to_vec(patch)?;
        self.patch_type = Some(PatchType::JsonPatch);
        Ok(self)
    }
}

/// AdmissionReview carries a request and, once answered, a response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdmissionReview {
    pub request: Option<AdmissionRequest>,
    pub response: Option<AdmissionResponse>,
}

impl AdmissionReview {
    pub fn for_request(request: AdmissionRequest) -> Self {
        Self {
            request: Some(request),
            response: None,
        }
    }

    pub fn for_response(response: AdmissionResponse) -> Self {
        Self {
            request: None,
            response: Some(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AttributesRecord;
    use serde_json::json;

    #[test]
    fn test_request_from_attributes() {
        let attr = AttributesRecord::new(
            "web",
            "default",
            GroupVersionResource::new("apps", "v1", "deployments"),
            "scale",
            Operation::Update,
            Some(json!({"spec": {"replicas": 3}})),
            Some(json!({"spec": {"replicas": 1}})),
            GroupVersionKind::new("autoscaling", "v1", "Scale"),
            true,
        )
        .with_options(json!({"kind": "UpdateOptions"}));

        let request = AdmissionRequest::from_attributes("uid-1", &attr);
        assert_eq!(request.uid, "uid-1");
        assert_eq!(request.sub_resource, "scale");
        assert_eq!(request.request_sub_resource, "scale");
        assert_eq!(request.operation, Operation::Update);
        assert_eq!(request.dry_run, Some(true));
        assert_eq!(request.object, Some(json!({"spec": {"replicas": 3}})));
        assert_eq!(request.options, Some(json!({"kind": "UpdateOptions"})));
    }

    #[test]
    fn test_response_with_patch() {
        let patch: json_patch::Patch =
            serde_json::from_value(json!([{"op": "add", "path": "/metadata/labels/a", "value": "b"}]))
                .unwrap();
        let response = AdmissionResponse::allowed("uid-1").with_patch(&patch).unwrap();
        assert_eq!(response.patch_type, Some(PatchType::JsonPatch));
        let decoded: Value = serde_json::from_slice(&response.patch).unwrap();
        assert_eq!(decoded[0]["op"], "add");
    }
}
