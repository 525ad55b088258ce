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

//! Matching requests against policy constraints and binding resources.

use crate::admission::Attributes;
use crate::api::admissionregistration::{MatchResources, NamedRuleWithOperations};
use crate::webhook::matcher::{matches_rules, MatchError, Matcher};
use std::slice;

fn matches_named_rule(rule: &NamedRuleWithOperations, attr: &dyn Attributes) -> bool {
    matches_rules(slice::from_ref(&rule.rule), attr)
        && (rule.resource_names.is_empty() || rule.resource_names.iter().any(|n| n == attr.get_name()))
}

/// Reports whether any rule matches, honouring `resourceNames`.
pub fn matches_named_rules(rules: &[NamedRuleWithOperations], attr: &dyn Attributes) -> bool {
    rules.iter().any(|rule| matches_named_rule(rule, attr))
}

/// Evaluates `resources` against a request. Exclusions win over inclusions.
/// Empty resource rules match everything when `empty_rules_match` is set
/// and nothing otherwise.
pub fn matches_resources(
    resources: &MatchResources,
    empty_rules_match: bool,
    matcher: &Matcher,
    attr: &dyn Attributes,
) -> Result<bool, MatchError> {
    if matches_named_rules(&resources.exclude_resource_rules, attr) {
        return Ok(false);
    }
    let included = if resources.resource_rules.is_empty() {
        empty_rules_match
    } else {
        matches_named_rules(&resources.resource_rules, attr)
    };
    if !included {
        return Ok(false);
    }
    matcher.matches_selectors(
        resources.namespace_selector.as_ref().unwrap_or(&Default::default()),
        resources.object_selector.as_ref().unwrap_or(&Default::default()),
        attr,
    )
}

/// Matches the constraints of a policy. A policy without constraints
/// applies to every request.
pub fn policy_matches(
    constraints: Option<&MatchResources>,
    matcher: &Matcher,
    attr: &dyn Attributes,
) -> Result<bool, MatchError> {
    match constraints {
        Some(resources) => matches_resources(resources, false, matcher, attr),
        None => Ok(true),
    }
}

/// Matches the resources of a binding, which narrow what the policy
/// already matched. A binding without resources or rules narrows nothing.
pub fn binding_matches(
    resources: Option<&MatchResources>,
    matcher: &Matcher,
    attr: &dyn Attributes,
) -> Result<bool, MatchError> {
    match resources {
        Some(resources) => matches_resources(resources, true, matcher, attr),
        None => Ok(true),
    }
}
