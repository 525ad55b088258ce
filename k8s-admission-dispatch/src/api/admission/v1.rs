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

//! admission.k8s.io/v1 wire format.

use super::registry::{ConversionError, Conversions};
use super::{AdmissionRequest as HubRequest, AdmissionResponse as HubResponse};
use super::{AdmissionReview as HubReview, PatchType, KIND};
use crate::admission::attributes::{GroupVersionKind, GroupVersionResource, UserInfo};
use crate::admission::Operation;
use crate::api::meta::Status;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const VERSION: &str = "v1";
pub const API_VERSION: &str = "admission.k8s.io/v1";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdmissionReview {
    api_version: String,
    #[serde(default)]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request: Option<AdmissionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response: Option<AdmissionResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdmissionRequest {
    uid: String,
    kind: GroupVersionKind,
    resource: GroupVersionResource,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    sub_resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_kind: Option<GroupVersionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_resource: Option<GroupVersionResource>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    request_sub_resource: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    namespace: String,
    operation: Operation,
    #[serde(default)]
    user_info: UserInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    object: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    old_object: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dry_run: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    options: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdmissionResponse {
    uid: String,
    allowed: bool,
    #[serde(rename = "status", default, skip_serializing_if = "Option::is_none")]
    result: Option<Status>,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        with = "crate::api::base64_bytes"
    )]
    patch: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    patch_type: Option<PatchType>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    audit_annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
}

fn request_to_wire(request: &HubRequest) -> AdmissionRequest {
    AdmissionRequest {
        uid: request.uid.clone(),
        kind: request.kind.clone(),
        resource: request.resource.clone(),
        sub_resource: request.sub_resource.clone(),
        request_kind: request.request_kind.clone(),
        request_resource: request.request_resource.clone(),
        request_sub_resource: request.request_sub_resource.clone(),
        name: request.name.clone(),
        namespace: request.namespace.clone(),
        operation: request.operation,
        user_info: request.user_info.clone(),
        object: request.object.clone(),
        old_object: request.old_object.clone(),
        dry_run: request.dry_run,
        options: request.options.clone(),
    }
}

fn request_from_wire(request: AdmissionRequest) -> HubRequest {
    HubRequest {
        uid: request.uid,
        kind: request.kind,
        resource: request.resource,
        sub_resource: request.sub_resource,
        request_kind: request.request_kind,
        request_resource: request.request_resource,
        request_sub_resource: request.request_sub_resource,
        name: request.name,
        namespace: request.namespace,
        operation: request.operation,
        user_info: request.user_info,
        object: request.object,
        old_object: request.old_object,
        dry_run: request.dry_run,
        options: request.options,
    }
}

fn response_to_wire(response: &HubResponse) -> AdmissionResponse {
    AdmissionResponse {
        uid: response.uid.clone(),
        allowed: response.allowed,
        result: response.result.clone(),
        patch: response.patch.clone(),
        patch_type: response.patch_type,
        audit_annotations: response.audit_annotations.clone(),
        warnings: response.warnings.clone(),
    }
}

fn response_from_wire(response: AdmissionResponse) -> HubResponse {
    HubResponse {
        uid: response.uid,
        allowed: response.allowed,
        result: response.result,
        patch: response.patch,
        patch_type: response.patch_type,
        audit_annotations: response.audit_annotations,
        warnings: response.warnings,
    }
}

pub fn encode_review(review: &HubReview) -> Result<Vec<u8>, ConversionError> {
    let wire = AdmissionReview {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        request: review.request.as_ref().map(request_to_wire),
        response: review.response.as_ref().map(response_to_wire),
    };
    serde_json::to_vec(&wire).map_err(|source| ConversionError::Encode {
        version: VERSION,
        source,
    })
}

pub fn decode_review(data: &[u8]) -> Result<HubReview, ConversionError> {
    let wire: AdmissionReview =
        serde_json::from_slice(data).map_err(|source| ConversionError::Decode {
            version: VERSION,
            source,
        })?;
    if wire.api_version != API_VERSION {
        return Err(ConversionError::VersionMismatch {
            expected: API_VERSION,
            actual: wire.api_version,
        });
    }
    Ok(HubReview {
        request: wire.request.map(request_from_wire),
        response: wire.response.map(response_from_wire),
    })
}

pub fn conversions() -> Conversions {
    Conversions {
        version: VERSION,
        api_version: API_VERSION,
        encode_review,
        decode_review,
    }
}
