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

//! Deciding whether a hook applies to a request.

use super::namespace::{NamespaceLister, NamespaceMatcher};
use super::HookConfig;
use crate::admission::{AdmissionError, Attributes};
use crate::api::admissionregistration::{MatchCondition, RuleWithOperations, ScopeType};
use crate::api::core::NAMESPACES_RESOURCE;
use crate::api::meta::{object_labels, LabelSelector};
use crate::evaluator::{Activation, Evaluator};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MatchError {
    /// The namespace of the request could not be looked up.
    #[error("{0}")]
    Namespace(Box<AdmissionError>),

    #[error("invalid {field}: {reason}")]
    Selector { field: &'static str, reason: String },

    /// No condition returned false but at least one failed to evaluate.
    #[error("failed to evaluate match conditions: {}", .errors.join(", "))]
    Evaluation { errors: Vec<String> },
}

impl MatchError {
    /// Whether the error is subject to the hook's failure policy rather than
    /// being reported as is.
    pub fn is_inconclusive(&self) -> bool {
        matches!(self, MatchError::Evaluation { .. })
    }

    /// Converts the error to the error returned for a failing-closed hook.
    pub fn into_admission_error(self, hook: &str) -> AdmissionError {
        match self {
            MatchError::Namespace(err) => *err,
            MatchError::Selector { .. } => AdmissionError::internal_error(self.to_string()),
            MatchError::Evaluation { .. } => AdmissionError::calling_hook(hook, self.to_string()),
        }
    }
}

impl From<AdmissionError> for MatchError {
    fn from(err: AdmissionError) -> Self {
        MatchError::Namespace(Box::new(err))
    }
}

/// Splits `res/sub` into its parts. A bare resource has no subresource.
fn split_resource(resource: &str) -> (&str, &str) {
    resource.split_once('/').unwrap_or((resource, ""))
}

fn exact_or_wildcard(items: &[String], requested: &str) -> bool {
    items.iter().any(|item| item == "*" || item == requested)
}

/// RuleMatcher checks one rule against a request.
pub struct RuleMatcher<'a> {
    pub rule: &'a RuleWithOperations,
    pub attr: &'a dyn Attributes,
}

impl RuleMatcher<'_> {
    pub fn matches(&self) -> bool {
        self.scope() && self.operation() && self.group() && self.version() && self.resource()
    }

    fn scope(&self) -> bool {
        let is_namespace = self.attr.get_resource().group.is_empty()
            && self.attr.get_resource().resource == NAMESPACES_RESOURCE;
        match self.rule.rule.scope {
            None | Some(ScopeType::All) => true,
            Some(ScopeType::Namespaced) => !is_namespace && !self.attr.get_namespace().is_empty(),
            Some(ScopeType::Cluster) => is_namespace || self.attr.get_namespace().is_empty(),
        }
    }

    fn operation(&self) -> bool {
        let op = self.attr.get_operation();
        self.rule.operations.iter().any(|o| o.matches(op))
    }

    fn group(&self) -> bool {
        exact_or_wildcard(&self.rule.rule.api_groups, &self.attr.get_resource().group)
    }

    fn version(&self) -> bool {
        exact_or_wildcard(&self.rule.rule.api_versions, &self.attr.get_resource().version)
    }

    fn resource(&self) -> bool {
        let requested = &self.attr.get_resource().resource;
        let requested_sub = self.attr.get_subresource();
        self.rule.rule.resources.iter().any(|r| {
            let (res, sub) = split_resource(r);
            (res == "*" || res == requested) && (sub == "*" || sub == requested_sub)
        })
    }
}

/// Reports whether any of `rules` matches the request.
pub fn matches_rules(rules: &[RuleWithOperations], attr: &dyn Attributes) -> bool {
    rules.iter().any(|rule| RuleMatcher { rule, attr }.matches())
}

fn matches_object(object: Option<&Value>, selector: &LabelSelector) -> bool {
    object.is_some_and(|obj| selector.matches(&object_labels(obj)))
}

/// Evaluates an object selector against the new and the old object. Either
/// matching is enough.
pub fn matches_object_selector(selector: &LabelSelector, attr: &dyn Attributes) -> Result<bool, MatchError> {
    selector.validate().map_err(|reason| MatchError::Selector {
        field: "objectSelector",
        reason,
    })?;
    if selector.is_empty() {
        return Ok(true);
    }
    Ok(matches_object(attr.get_object(), selector) || matches_object(attr.get_old_object(), selector))
}

/// Evaluates match conditions. Any `false` wins over evaluation errors;
/// errors with no `false` make the result inconclusive.
pub fn evaluate_match_conditions(
    conditions: &[MatchCondition],
    evaluator: &dyn Evaluator,
    activation: &Activation,
) -> Result<bool, MatchError> {
    let mut errors = Vec::new();
    for condition in conditions {
        match evaluator.evaluate_bool(&condition.expression, activation) {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(err) => errors.push(format!("{}: {}", condition.name, err)),
        }
    }
    if errors.is_empty() {
        Ok(true)
    } else {
        Err(MatchError::Evaluation { errors })
    }
}

/// Matcher applies rules, selectors and match conditions of a hook.
#[derive(Clone)]
pub struct Matcher {
    namespace_matcher: NamespaceMatcher,
    evaluator: Arc<dyn Evaluator>,
}

impl Matcher {
    pub fn new(namespace_lister: Arc<dyn NamespaceLister>, evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            namespace_matcher: NamespaceMatcher::new(namespace_lister),
            evaluator,
        }
    }

    pub fn namespace_matcher(&self) -> &NamespaceMatcher {
        &self.namespace_matcher
    }

    pub fn evaluator(&self) -> &Arc<dyn Evaluator> {
        &self.evaluator
    }

    /// Checks both selectors. A definite mismatch of either one wins over
    /// an error of the other.
    pub fn matches_selectors(
        &self,
        namespace_selector: &LabelSelector,
        object_selector: &LabelSelector,
        attr: &dyn Attributes,
    ) -> Result<bool, MatchError> {
        let namespace = namespace_selector
            .validate()
            .map_err(|reason| MatchError::Selector {
                field: "namespaceSelector",
                reason,
            })
            .and_then(|_| {
                self.namespace_matcher
                    .matches_namespace_selector(namespace_selector, attr)
                    .map_err(MatchError::from)
            });
        if let Ok(false) = namespace {
            return Ok(false);
        }
        let object = matches_object_selector(object_selector, attr);
        if let Ok(false) = object {
            return Ok(false);
        }
        Ok(namespace? && object?)
    }

    pub fn matches(&self, hook: &HookConfig, attr: &dyn Attributes) -> Result<bool, MatchError> {
        if !matches_rules(&hook.rules, attr) {
            debug!(hook = %hook.name, "hook rules do not match request");
            return Ok(false);
        }
        if !self.matches_selectors(&hook.namespace_selector, &hook.object_selector, attr)? {
            debug!(hook = %hook.name, "hook selectors do not match request");
            return Ok(false);
        }
        if hook.match_conditions.is_empty() {
            return Ok(true);
        }
        let activation = Activation::from_attributes(attr);
        let matched = evaluate_match_conditions(&hook.match_conditions, self.evaluator.as_ref(), &activation)?;
        if !matched {
            debug!(hook = %hook.name, "hook match conditions excluded request");
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::attributes::{GroupVersionKind, GroupVersionResource};
    use crate::admission::{AttributesRecord, Operation};
    use crate::api::admissionregistration::{OperationType, WebhookClientConfig};
    use crate::api::core::Namespace;
    use crate::evaluator::SimpleEvaluator;
    use crate::webhook::namespace::StaticNamespaceLister;
    use serde_json::json;

    fn attrs(namespace: &str, resource: &str, subresource: &str, op: Operation) -> AttributesRecord {
        AttributesRecord::new(
            "obj",
            namespace,
            GroupVersionResource::new("apps", "v1", resource),
            subresource,
            op,
            Some(json!({"metadata": {"name": "obj", "labels": {"app": "web"}}})),
            None,
            GroupVersionKind::new("apps", "v1", "Deployment"),
            false,
        )
    }

    fn rule(resources: &[&str]) -> RuleWithOperations {
        RuleWithOperations::new(vec![OperationType::Create], &["apps"], &["v1"], resources)
    }

    fn matcher() -> Matcher {
        Matcher::new(
            Arc::new(StaticNamespaceLister::new(vec![Namespace::new("default", &[("env", "test")])])),
            Arc::new(SimpleEvaluator),
        )
    }

    fn hook() -> HookConfig {
        HookConfig::validating("hook.example.com", WebhookClientConfig::url("https://hook.example.com"))
    }

    #[test]
    fn test_resource_wildcards() {
        let main = attrs("default", "deployments", "", Operation::Create);
        let scale = attrs("default", "deployments", "scale", Operation::Create);

        assert!(matches_rules(&[rule(&["*"])], &main));
        assert!(!matches_rules(&[rule(&["*"])], &scale));
        assert!(matches_rules(&[rule(&["*/*"])], &scale));
        assert!(matches_rules(&[rule(&["deployments/*"])], &scale));
        assert!(!matches_rules(&[rule(&["deployments/*"])], &main));
        assert!(matches_rules(&[rule(&["*/scale"])], &scale));
        assert!(!matches_rules(&[rule(&["replicasets/scale"])], &scale));
    }

    #[test]
    fn test_operation_group_version() {
        let update = attrs("default", "deployments", "", Operation::Update);
        assert!(!matches_rules(&[rule(&["deployments"])], &update));

        let any_op = RuleWithOperations::new(vec![OperationType::All], &["*"], &["*"], &["deployments"]);
        assert!(matches_rules(&[any_op], &update));

        let wrong_group = RuleWithOperations::new(vec![OperationType::All], &["batch"], &["*"], &["*"]);
        assert!(!matches_rules(&[wrong_group], &update));
    }

    #[test]
    fn test_scope() {
        let namespaced = attrs("default", "deployments", "", Operation::Create);
        let cluster = attrs("", "deployments", "", Operation::Create);
        let ns_rule = rule(&["*"]).with_scope(ScopeType::Namespaced);
        let cluster_rule = rule(&["*"]).with_scope(ScopeType::Cluster);

        assert!(matches_rules(&[ns_rule.clone()], &namespaced));
        assert!(!matches_rules(&[ns_rule], &cluster));
        assert!(matches_rules(&[cluster_rule.clone()], &cluster));
        assert!(!matches_rules(&[cluster_rule], &namespaced));
    }

    #[test]
    fn test_object_selector_matches_old_or_new() {
        let selector = LabelSelector::with_match_labels(&[("app", "db")]);
        let mut attr = attrs("default", "deployments", "", Operation::Update);
        assert!(!matches_object_selector(&selector, &attr).unwrap());

        attr.old_object = Some(json!({"metadata": {"labels": {"app": "db"}}}));
        assert!(matches_object_selector(&selector, &attr).unwrap());

        attr.object = None;
        attr.old_object = None;
        assert!(!matches_object_selector(&selector, &attr).unwrap());
        assert!(matches_object_selector(&LabelSelector::default(), &attr).unwrap());
    }

    #[test]
    fn test_match_conditions_false_dominates_errors() {
        let activation = Activation::default();
        let conditions = |exprs: &[&str]| -> Vec<MatchCondition> {
            exprs
                .iter()
                .enumerate()
                .map(|(i, e)| MatchCondition::new(&format!("c{}", i), e))
                .collect()
        };

        assert!(evaluate_match_conditions(&conditions(&["true", "true"]), &SimpleEvaluator, &activation).unwrap());
        assert!(!evaluate_match_conditions(&conditions(&["true", "false"]), &SimpleEvaluator, &activation).unwrap());
        assert!(!evaluate_match_conditions(
            &conditions(&["object.missing == 'x'", "false"]),
            &SimpleEvaluator,
            &activation
        )
        .unwrap());

        let err = evaluate_match_conditions(
            &conditions(&["true", "object.missing == 'x'"]),
            &SimpleEvaluator,
            &activation,
        )
        .unwrap_err();
        assert!(err.is_inconclusive());
        assert!(err.to_string().starts_with("failed to evaluate match conditions: c1"));
    }

    #[test]
    fn test_match_conditions_every_outcome_mix() {
        let activation = Activation::default();
        let exprs = ["true", "false", "object.missing == 'x'"];
        for n in 0..=4u32 {
            for mut combo in 0..3usize.pow(n) {
                let mut outcomes = Vec::new();
                for _ in 0..n {
                    outcomes.push(combo % 3);
                    combo /= 3;
                }
                let conditions: Vec<MatchCondition> = outcomes
                    .iter()
                    .enumerate()
                    .map(|(i, o)| MatchCondition::new(&format!("c{}", i), exprs[*o]))
                    .collect();
                let result = evaluate_match_conditions(&conditions, &SimpleEvaluator, &activation);

                let erroring: Vec<String> = outcomes
                    .iter()
                    .enumerate()
                    .filter(|(_, o)| **o == 2)
                    .map(|(i, _)| format!("c{}", i))
                    .collect();
                if outcomes.contains(&1) {
                    assert!(!result.unwrap(), "{:?}", outcomes);
                } else if !erroring.is_empty() {
                    match result {
                        Err(MatchError::Evaluation { errors }) => {
                            let names: Vec<&str> =
                                errors.iter().filter_map(|e| e.split(':').next()).collect();
                            assert_eq!(names, erroring, "{:?}", outcomes);
                        }
                        other => panic!("{:?}: expected evaluation error, got {:?}", outcomes, other),
                    }
                } else {
                    assert!(result.unwrap(), "{:?}", outcomes);
                }
            }
        }
    }

    #[test]
    fn test_matcher_full() {
        let m = matcher();
        let attr = attrs("default", "deployments", "", Operation::Create);

        assert!(m.matches(&hook(), &attr).unwrap());

        let excluded = hook().with_namespace_selector(LabelSelector::with_match_labels(&[("env", "prod")]));
        assert!(!m.matches(&excluded, &attr).unwrap());

        let by_object = hook().with_object_selector(LabelSelector::with_match_labels(&[("app", "web")]));
        assert!(m.matches(&by_object, &attr).unwrap());

        let by_condition = hook().with_match_conditions(vec![MatchCondition::new(
            "only-create",
            "request.operation == 'UPDATE'",
        )]);
        assert!(!m.matches(&by_condition, &attr).unwrap());
    }

    #[test]
    fn test_selector_mismatch_wins_over_lookup_error() {
        let m = matcher();
        let attr = attrs("missing", "deployments", "", Operation::Create);
        let hook = hook()
            .with_namespace_selector(LabelSelector::with_match_labels(&[("env", "test")]))
            .with_object_selector(LabelSelector::with_match_labels(&[("app", "db")]));
        assert!(!m.matches(&hook, &attr).unwrap());

        let hook = hook.with_object_selector(LabelSelector::default());
        let err = m.matches(&hook, &attr).unwrap_err();
        assert!(matches!(
            err.into_admission_error("hook.example.com"),
            AdmissionError::NotFound { .. }
        ));
    }
}
