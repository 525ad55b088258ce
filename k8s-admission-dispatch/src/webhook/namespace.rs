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

//! Namespace labels for namespace selectors.

use crate::admission::{AdmissionError, AdmissionResult, Attributes, Operation};
use crate::api::core::{Namespace, NAMESPACES_RESOURCE};
use crate::api::meta::{object_labels, LabelSelector};
use crate::informer::{Informer, Store};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// NamespaceLister looks namespaces up by name.
pub trait NamespaceLister: Send + Sync {
    fn get(&self, name: &str) -> Option<Namespace>;
}

impl NamespaceLister for Store<Namespace> {
    fn get(&self, name: &str) -> Option<Namespace> {
        self.get_by_name(name)
    }
}

impl NamespaceLister for Informer<Namespace> {
    fn get(&self, name: &str) -> Option<Namespace> {
        self.store().get_by_name(name)
    }
}

/// A fixed set of namespaces.
#[derive(Debug, Default)]
pub struct StaticNamespaceLister {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl StaticNamespaceLister {
    pub fn new(namespaces: Vec<Namespace>) -> Self {
        let lister = Self::default();
        for ns in namespaces {
            lister.insert(ns);
        }
        lister
    }

    pub fn insert(&self, namespace: Namespace) {
        self.namespaces
            .write()
            .insert(namespace.metadata.name.clone(), namespace);
    }

    pub fn remove(&self, name: &str) {
        self.namespaces.write().remove(name);
    }
}

impl NamespaceLister for StaticNamespaceLister {
    fn get(&self, name: &str) -> Option<Namespace> {
        self.namespaces.read().get(name).cloned()
    }
}

/// NamespaceMatcher decides whether the namespace of a request satisfies a
/// namespace selector.
#[derive(Clone)]
pub struct NamespaceMatcher {
    lister: Arc<dyn NamespaceLister>,
}

impl NamespaceMatcher {
    pub fn new(lister: Arc<dyn NamespaceLister>) -> Self {
        Self { lister }
    }

    /// Returns the labels of the namespace a request is about, or `None`
    /// for cluster-scoped resources other than namespaces.
    pub fn namespace_labels(&self, attr: &dyn Attributes) -> AdmissionResult<Option<HashMap<String, String>>> {
        let is_namespace = attr.get_resource().group.is_empty()
            && attr.get_resource().resource == NAMESPACES_RESOURCE;

        if is_namespace
            && attr.get_subresource().is_empty()
            && matches!(attr.get_operation(), Operation::Create | Operation::Update)
        {
            return Ok(Some(attr.get_object().map(object_labels).unwrap_or_default()));
        }

        let name = match (attr.get_namespace(), is_namespace) {
            ("", false) => return Ok(None),
            ("", true) => attr.get_name(),
            (namespace, _) => namespace,
        };
        match self.lister.get(name) {
            Some(namespace) => Ok(Some(namespace.metadata.labels)),
            None => Err(AdmissionError::not_found(NAMESPACES_RESOURCE, name)),
        }
    }

    /// Evaluates `selector` against the request's namespace. An empty
    /// selector matches without a lookup.
    pub fn matches_namespace_selector(
        &self,
        selector: &LabelSelector,
        attr: &dyn Attributes,
    ) -> AdmissionResult<bool> {
        if selector.is_empty() {
            return Ok(true);
        }
        match self.namespace_labels(attr)? {
            Some(labels) => Ok(selector.matches(&labels)),
            None => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::attributes::{GroupVersionKind, GroupVersionResource};
    use crate::admission::AttributesRecord;
    use serde_json::json;

    fn matcher() -> NamespaceMatcher {
        NamespaceMatcher::new(Arc::new(StaticNamespaceLister::new(vec![
            Namespace::new("prod", &[("env", "prod")]),
            Namespace::new("dev", &[("env", "dev")]),
        ])))
    }

    fn pod_in(namespace: &str) -> AttributesRecord {
        AttributesRecord::new(
            "pod",
            namespace,
            GroupVersionResource::new("", "v1", "pods"),
            "",
            Operation::Create,
            Some(json!({"metadata": {"name": "pod"}})),
            None,
            GroupVersionKind::new("", "v1", "Pod"),
            false,
        )
    }

    fn namespace_request(name: &str, op: Operation, labels: serde_json::Value) -> AttributesRecord {
        AttributesRecord::new(
            name,
            "",
            GroupVersionResource::new("", "v1", "namespaces"),
            "",
            op,
            Some(json!({"metadata": {"name": name, "labels": labels}})),
            None,
            GroupVersionKind::new("", "v1", "Namespace"),
            false,
        )
    }

    #[test]
    fn test_namespaced_request_uses_lister() {
        let selector = LabelSelector::with_match_labels(&[("env", "prod")]);
        let m = matcher();
        assert!(m.matches_namespace_selector(&selector, &pod_in("prod")).unwrap());
        assert!(!m.matches_namespace_selector(&selector, &pod_in("dev")).unwrap());
    }

    #[test]
    fn test_unknown_namespace_is_not_found() {
        let selector = LabelSelector::with_match_labels(&[("env", "prod")]);
        let err = matcher()
            .matches_namespace_selector(&selector, &pod_in("missing"))
            .unwrap_err();
        assert!(matches!(err, AdmissionError::NotFound { .. }));
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_empty_selector_skips_lookup() {
        let m = matcher();
        assert!(m
            .matches_namespace_selector(&LabelSelector::default(), &pod_in("missing"))
            .unwrap());
    }

    #[test]
    fn test_namespace_create_uses_object_labels() {
        let selector = LabelSelector::with_match_labels(&[("env", "staging")]);
        let m = matcher();
        let create = namespace_request("staging", Operation::Create, json!({"env": "staging"}));
        assert!(m.matches_namespace_selector(&selector, &create).unwrap());

        // Delete reads the stored namespace, which does not exist here.
        let delete = namespace_request("staging", Operation::Delete, json!({"env": "staging"}));
        assert!(m.matches_namespace_selector(&selector, &delete).is_err());
    }

    #[test]
    fn test_cluster_scoped_resource_not_excluded() {
        let selector = LabelSelector::with_match_labels(&[("env", "prod")]);
        let node = AttributesRecord::new(
            "node-1",
            "",
            GroupVersionResource::new("", "v1", "nodes"),
            "",
            Operation::Create,
            None,
            None,
            GroupVersionKind::new("", "v1", "Node"),
            false,
        );
        let m = matcher();
        assert_eq!(m.namespace_labels(&node).unwrap(), None);
        assert!(m.matches_namespace_selector(&selector, &node).unwrap());
    }
}
