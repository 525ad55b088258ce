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


//! Object metadata, label selectors and status (meta/v1).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Status value reported by a successful operation.
pub const STATUS_SUCCESS: &str = "Success";

/// Status value reported by a failed operation.
pub const STATUS_FAILURE: &str = "Failure";

/// ObjectMeta is the subset of object metadata the dispatch core relies on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

impl ObjectMeta {
    /// Metadata for a cluster-scoped object.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Metadata for a namespaced object.
    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    pub fn with_labels(mut self, labels: &[(&str, &str)]) -> Self {
        self.labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }
}

/// NamespacedName identifies an object. Cluster-scoped objects have an
/// empty namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Key of a cluster-scoped object.
    pub fn cluster(name: &str) -> Self {
        Self::new("", name)
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Returns `metadata.labels` of a raw object. Missing or malformed labels
/// yield an empty set.
pub fn object_labels(object: &Value) -> HashMap<String, String> {
    object
        .get("metadata")
        .and_then(|m| m.get("labels"))
        .and_then(Value::as_object)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// Label Selectors
// ============================================================================

/// LabelSelectorOperator is the set of operators usable in a selector requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelSelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// LabelSelectorRequirement is a selector that contains values, a key, and
/// an operator that relates the key and values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: LabelSelectorOperator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl LabelSelectorRequirement {
    pub fn new(key: &str, operator: LabelSelectorOperator, values: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            operator,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn matches(&self, labels: &HashMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            LabelSelectorOperator::In => value.is_some_and(|v| self.values.contains(v)),
            LabelSelectorOperator::NotIn => value.map_or(true, |v| !self.values.contains(v)),
            LabelSelectorOperator::Exists => value.is_some(),
            LabelSelectorOperator::DoesNotExist => value.is_none(),
        }
    }
}

/// LabelSelector is a label query over a set of resources. The result of
/// match_labels and match_expressions are ANDed. An empty selector matches
/// all objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub match_labels: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    /// A selector that matches every label set.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn with_match_labels(labels: &[(&str, &str)]) -> Self {
        Self {
            match_labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            match_expressions: Vec::new(),
        }
    }

    pub fn with_expressions(expressions: Vec<LabelSelectorRequirement>) -> Self {
        Self {
            match_labels: HashMap::new(),
            match_expressions: expressions,
        }
    }

    /// Check if the selector matches the given labels.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        let labels_match = self
            .match_labels
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value));

        labels_match && self.match_expressions.iter().all(|req| req.matches(labels))
    }

    /// Check if the selector is empty (matches everything).
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Reports the first structural problem with the selector.
    pub fn validate(&self) -> Result<(), String> {
        for key in self.match_labels.keys() {
            if key.is_empty() {
                return Err("matchLabels: label key must be non-empty".to_string());
            }
        }
        for (i, req) in self.match_expressions.iter().enumerate() {
            if req.key.is_empty() {
                return Err(format!("matchExpressions[{}].key: must be non-empty", i));
            }
            match req.operator {
                LabelSelectorOperator::In | LabelSelectorOperator::NotIn => {
                    if req.values.is_empty() {
                        return Err(format!(
                            "matchExpressions[{}].values: must be specified when `operator` is 'In' or 'NotIn'",
                            i
                        ));
                    }
                }
                LabelSelectorOperator::Exists | LabelSelectorOperator::DoesNotExist => {
                    if !req.values.is_empty() {
                        return Err(format!(
                            "matchExpressions[{}].values: may not be specified when `operator` is 'Exists' or 'DoesNotExist'",
                            i
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Status
// ============================================================================

/// Status is a return value for calls that don't return other objects. On
/// the admission path it carries the details of a denial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub code: i32,
}

fn is_zero(code: &i32) -> bool {
    *code == 0
}

impl Status {
    pub fn failure(code: i32, reason: &str, message: &str) -> Self {
        Self {
            status: STATUS_FAILURE.to_string(),
            message: message.to_string(),
            reason: reason.to_string(),
            code,
        }
    }

    pub fn with_message(message: &str) -> Self {
        Self {
            message: message.to_string(),
            ..Default::default()
        }
    }

    pub fn with_reason(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_label_selector_matches() {
        let selector = LabelSelector::with_match_labels(&[("app", "web")]);
        assert!(selector.matches(&labels(&[("app", "web"), ("tier", "frontend")])));
        assert!(!selector.matches(&labels(&[("app", "db")])));
        assert!(!selector.matches(&HashMap::new()));
    }

    #[test]
    fn test_label_selector_expressions() {
        let selector = LabelSelector::with_expressions(vec![
            LabelSelectorRequirement::new("runlevel", LabelSelectorOperator::NotIn, &["0", "1"]),
            LabelSelectorRequirement::new("env", LabelSelectorOperator::Exists, &[]),
        ]);
        assert!(selector.matches(&labels(&[("runlevel", "2"), ("env", "prod")])));
        assert!(selector.matches(&labels(&[("env", "prod")])));
        assert!(!selector.matches(&labels(&[("runlevel", "1"), ("env", "prod")])));
        assert!(!selector.matches(&labels(&[("runlevel", "2")])));

        let in_selector = LabelSelector::with_expressions(vec![LabelSelectorRequirement::new(
            "runlevel",
            LabelSelectorOperator::In,
            &["1"],
        )]);
        assert!(in_selector.matches(&labels(&[("runlevel", "1")])));
        assert!(!in_selector.matches(&HashMap::new()));

        let absent = LabelSelector::with_expressions(vec![LabelSelectorRequirement::new(
            "skip",
            LabelSelectorOperator::DoesNotExist,
            &[],
        )]);
        assert!(absent.matches(&HashMap::new()));
        assert!(!absent.matches(&labels(&[("skip", "")])));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = LabelSelector::everything();
        assert!(selector.is_empty());
        assert!(selector.matches(&labels(&[("a", "b")])));
        assert!(selector.validate().is_ok());
    }

    #[test]
    fn test_label_selector_validate() {
        let missing_values = LabelSelector::with_expressions(vec![LabelSelectorRequirement::new(
            "a",
            LabelSelectorOperator::In,
            &[],
        )]);
        assert!(missing_values.validate().is_err());

        let extra_values = LabelSelector::with_expressions(vec![LabelSelectorRequirement::new(
            "a",
            LabelSelectorOperator::Exists,
            &["x"],
        )]);
        assert!(extra_values.validate().is_err());
    }

    #[test]
    fn test_label_selector_serde() {
        let selector: LabelSelector = serde_json::from_value(json!({
            "matchLabels": {"app": "web"},
            "matchExpressions": [{"key": "runlevel", "operator": "NotIn", "values": ["0"]}]
        }))
        .unwrap();
        assert_eq!(selector.match_labels.get("app").map(String::as_str), Some("web"));
        assert_eq!(
            selector.match_expressions[0].operator,
            LabelSelectorOperator::NotIn
        );
    }

    #[test]
    fn test_object_labels() {
        let object = json!({"metadata": {"name": "p", "labels": {"app": "web"}}});
        assert_eq!(object_labels(&object), labels(&[("app", "web")]));
        assert!(object_labels(&json!({"metadata": {}})).is_empty());
        assert!(object_labels(&Value::Null).is_empty());
    }

    #[test]
    fn test_namespaced_name_display() {
        assert_eq!(NamespacedName::cluster("policy1").to_string(), "policy1");
        assert_eq!(NamespacedName::new("ns", "b").to_string(), "ns/b");
    }
}
