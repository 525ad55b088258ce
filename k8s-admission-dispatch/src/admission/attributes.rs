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

//! Admission attributes that describe an admission request.

use super::errors::{AdmissionError, AdmissionResult};
use super::interfaces::Operation;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// GroupVersionResource identifies a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionResource {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl GroupVersionResource {
    pub fn new(group: &str, version: &str, resource: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
        }
    }

    /// Returns just the group and resource portion.
    pub fn group_resource(&self) -> GroupResource {
        GroupResource {
            group: self.group.clone(),
            resource: self.resource.clone(),
        }
    }
}

/// GroupResource identifies a resource without version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GroupResource {
    pub group: String,
    pub resource: String,
}

impl GroupResource {
    pub fn new(group: &str, resource: &str) -> Self {
        Self {
            group: group.to_string(),
            resource: resource.to_string(),
        }
    }
}

/// GroupVersionKind identifies a kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }
}

/// UserInfo describes the user that issued the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, Vec<String>>,
}

impl UserInfo {
    pub fn new(username: &str, groups: &[&str]) -> Self {
        Self {
            username: username.to_string(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
            ..Default::default()
        }
    }
}

/// Attributes is an interface used by AdmissionController to get information about a request
/// that is used to make an admission decision.
///
/// Annotations and warnings are recorded through `&self` so that validating
/// plugins, which only see a shared reference, can still report them.
pub trait Attributes: Send + Sync {
    /// Returns the name of the object as presented in the request.
    fn get_name(&self) -> &str;

    /// Returns the namespace associated with the request (if any).
    fn get_namespace(&self) -> &str;

    /// Returns the resource being requested.
    fn get_resource(&self) -> &GroupVersionResource;

    /// Returns the name of the subresource being requested.
    fn get_subresource(&self) -> &str;

    /// Returns the operation being performed.
    fn get_operation(&self) -> Operation;

    /// Returns the options of the operation (CreateOptions, UpdateOptions, ...).
    fn get_operation_options(&self) -> Option<&Value>;

    /// Returns the object from the incoming request.
    fn get_object(&self) -> Option<&Value>;

    /// Returns the object as a mutable reference.
    fn get_object_mut(&mut self) -> Option<&mut Value>;

    /// Replaces the object, used after mutation.
    fn set_object(&mut self, object: Value);

    /// Returns the existing object (only populated for UPDATE and DELETE requests).
    fn get_old_object(&self) -> Option<&Value>;

    /// Returns the kind of object being manipulated.
    fn get_kind(&self) -> &GroupVersionKind;

    /// Check if this request is a dry run.
    fn is_dry_run(&self) -> bool;

    /// Returns the requesting user.
    fn get_user_info(&self) -> &UserInfo;

    /// Records an audit annotation. Overwriting a key with a different value
    /// is an error.
    fn add_annotation(&self, key: &str, value: &str) -> AdmissionResult<()>;

    /// Appends a warning for the client.
    fn add_warning(&self, warning: &str);

    /// Returns a snapshot of the audit annotations.
    fn annotations(&self) -> BTreeMap<String, String>;

    /// Returns a snapshot of the warnings.
    fn warnings(&self) -> Vec<String>;
}

/// AttributesRecord is a concrete implementation of Attributes.
#[derive(Debug)]
pub struct AttributesRecord {
    pub name: String,
    pub namespace: String,
    pub resource: GroupVersionResource,
    pub subresource: String,
    pub operation: Operation,
    pub options: Option<Value>,
    pub object: Option<Value>,
    pub old_object: Option<Value>,
    pub kind: GroupVersionKind,
    pub dry_run: bool,
    pub user_info: UserInfo,
    annotations: Mutex<BTreeMap<String, String>>,
    warnings: Mutex<Vec<String>>,
}

impl AttributesRecord {
    /// Create a new AttributesRecord for testing or general use.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        namespace: &str,
        resource: GroupVersionResource,
        subresource: &str,
        operation: Operation,
        object: Option<Value>,
        old_object: Option<Value>,
        kind: GroupVersionKind,
        dry_run: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            resource,
            subresource: subresource.to_string(),
            operation,
            options: None,
            object,
            old_object,
            kind,
            dry_run,
            user_info: UserInfo::default(),
            annotations: Mutex::new(BTreeMap::new()),
            warnings: Mutex::new(Vec::new()),
        }
    }

    pub fn with_user_info(mut self, user_info: UserInfo) -> Self {
        self.user_info = user_info;
        self
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }
}

impl Attributes for AttributesRecord {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn get_namespace(&self) -> &str {
        &self.namespace
    }

    fn get_resource(&self) -> &GroupVersionResource {
        &self.resource
    }

    fn get_subresource(&self) -> &str {
        &self.subresource
    }

    fn get_operation(&self) -> Operation {
        self.operation
    }

    fn get_operation_options(&self) -> Option<&Value> {
        self.options.as_ref()
    }

    fn get_object(&self) -> Option<&Value> {
        self.object.as_ref()
    }

    fn get_object_mut(&mut self) -> Option<&mut Value> {
        self.object.as_mut()
    }

    fn set_object(&mut self, object: Value) {
        self.object = Some(object);
    }

    fn get_old_object(&self) -> Option<&Value> {
        self.old_object.as_ref()
    }

    fn get_kind(&self) -> &GroupVersionKind {
        &self.kind
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn get_user_info(&self) -> &UserInfo {
        &self.user_info
    }

    fn add_annotation(&self, key: &str, value: &str) -> AdmissionResult<()> {
        if key.is_empty() {
            return Err(AdmissionError::bad_request("admission annotation key must not be empty"));
        }
        let mut annotations = self.annotations.lock();
        match annotations.get(key) {
            Some(existing) if existing != value => Err(AdmissionError::bad_request(format!(
                "admission annotations are not allowed to be overwritten, key: {:?}, old value: {:?}, current value: {:?}",
                key, existing, value
            ))),
            Some(_) => Ok(()),
            None => {
                annotations.insert(key.to_string(), value.to_string());
                Ok(())
            }
        }
    }

    fn add_warning(&self, warning: &str) {
        self.warnings.lock().push(warning.to_string());
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        self.annotations.lock().clone()
    }

    fn warnings(&self) -> Vec<String> {
        self.warnings.lock().clone()
    }
}
