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

//! Evaluating bound policies against a request.

use super::matching::{binding_matches, policy_matches};
use super::source::PolicySource;
use super::{BindingAccessor, PolicyAccessor, PolicyDecision, PolicyValidator};
use crate::admission::{AdmissionError, AdmissionResult, Attributes};
use crate::api::admissionregistration::{FailurePolicy, ParamKind, ParamRef, ValidationAction};
use crate::evaluator::Activation;
use crate::webhook::matcher::Matcher;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Audit annotation listing the failed validations of non-denying bindings.
pub const VALIDATION_FAILURE_ANNOTATION: &str = "validation.policy.admission.k8s.io/validation_failure";

/// ParamResolver fetches the parameter object a binding refers to.
pub trait ParamResolver: Send + Sync {
    /// Returns `Ok(None)` when the object does not exist.
    fn resolve(&self, kind: &ParamKind, param_ref: &ParamRef) -> Result<Option<Value>, String>;
}

/// Serves parameter objects from memory.
#[derive(Debug, Default)]
pub struct StaticParamResolver {
    params: RwLock<HashMap<(String, String, String), Value>>,
}

impl StaticParamResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, kind: &str, namespace: &str, name: &str, object: Value) {
        self.params
            .write()
            .insert((kind.to_string(), namespace.to_string(), name.to_string()), object);
    }
}

impl ParamResolver for StaticParamResolver {
    fn resolve(&self, kind: &ParamKind, param_ref: &ParamRef) -> Result<Option<Value>, String> {
        let key = (kind.kind.clone(), param_ref.namespace.clone(), param_ref.name.clone());
        Ok(self.params.read().get(&key).cloned())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidationFailure {
    message: String,
    policy: String,
    binding: String,
    expression_index: usize,
    validation_actions: Vec<ValidationAction>,
}

/// A failed validation or a failure treated as one.
struct Violation {
    message: String,
    reason: String,
    expression_index: usize,
}

/// Collects what a dispatch decided across all policies.
#[derive(Default)]
struct Verdict {
    denial: Option<AdmissionError>,
    audit: Vec<ValidationFailure>,
}

/// PolicyDispatcher evaluates every bound policy that matches a request.
pub struct PolicyDispatcher<P: PolicyAccessor, B: BindingAccessor, E> {
    source: Arc<PolicySource<P, B, E>>,
    matcher: Arc<Matcher>,
    params: Arc<dyn ParamResolver>,
}

impl<P, B, E> PolicyDispatcher<P, B, E>
where
    P: PolicyAccessor,
    B: BindingAccessor,
    E: PolicyValidator + 'static,
{
    pub fn new(source: Arc<PolicySource<P, B, E>>, matcher: Arc<Matcher>, params: Arc<dyn ParamResolver>) -> Self {
        Self {
            source,
            matcher,
            params,
        }
    }

    pub fn source(&self) -> &Arc<PolicySource<P, B, E>> {
        &self.source
    }

    /// Evaluates the policies. All policies run even after a denial so that
    /// warnings and audit annotations are complete; the first denial is
    /// returned.
    pub fn dispatch(&self, attr: &dyn Attributes) -> AdmissionResult<()> {
        let hooks = self.source.hooks();
        let mut verdict = Verdict::default();

        for hook in hooks.iter() {
            let policy = &hook.policy;
            let failure_policy = policy.failure_policy();

            // A policy that cannot match fails the same way for every binding.
            let policy_match = policy_matches(policy.match_constraints(), &self.matcher, attr);
            if let Ok(false) = policy_match {
                continue;
            }

            for binding in &hook.bindings {
                let violations = match &policy_match {
                    Ok(_) => self.evaluate_binding(hook.evaluator.as_ref(), policy, binding, attr),
                    Err(err) => Err(err.to_string()),
                };
                let violations = match violations {
                    Ok(violations) => violations,
                    Err(message) if failure_policy == FailurePolicy::Ignore => {
                        warn!(
                            policy = policy.name(),
                            binding = binding.name(),
                            error = %message,
                            "policy failed, failing open"
                        );
                        continue;
                    }
                    Err(message) => vec![Violation {
                        message,
                        reason: String::new(),
                        expression_index: 0,
                    }],
                };
                for violation in violations {
                    enforce(policy.name(), binding, violation, attr, &mut verdict);
                }
            }
        }

        if !verdict.audit.is_empty() {
            let value = serde_json::to_string(&verdict.audit).map_err(|e| AdmissionError::internal_error(e.to_string()))?;
            attr.add_annotation(VALIDATION_FAILURE_ANNOTATION, &value)?;
        }
        match verdict.denial {
            Some(denial) => Err(denial),
            None => Ok(()),
        }
    }

    /// Evaluates one binding of a matching policy. Errors are failures
    /// subject to the policy's failure policy.
    fn evaluate_binding(
        &self,
        evaluator: Result<&Arc<E>, &String>,
        policy: &P,
        binding: &B,
        attr: &dyn Attributes,
    ) -> Result<Vec<Violation>, String> {
        if !binding_matches(binding.match_resources(), &self.matcher, attr).map_err(|e| e.to_string())? {
            return Ok(Vec::new());
        }
        let evaluator = evaluator.map_err(|err| format!("failed to configure policy: {}", err))?;

        let params = match policy.param_kind() {
            None => Value::Null,
            Some(kind) => {
                let param_ref = binding.param_ref().ok_or_else(|| {
                    format!("binding '{}' does not reference params required by the policy", binding.name())
                })?;
                self.params.resolve(kind, param_ref)?.ok_or_else(|| {
                    format!("no params found for policy binding with paramRef {:?}", param_ref.name)
                })?
            }
        };
        let activation = Activation::from_attributes(attr).with_params(params);

        if !policy.match_conditions().is_empty() && !evaluator.matches(policy.match_conditions(), &activation)? {
            debug!(policy = policy.name(), binding = binding.name(), "match conditions excluded request");
            return Ok(Vec::new());
        }

        let mut violations = Vec::new();
        for (expression_index, decision) in evaluator.validate(&activation).into_iter().enumerate() {
            match decision {
                PolicyDecision::Admit => {}
                PolicyDecision::Deny { message, reason } => violations.push(Violation {
                    message,
                    reason: reason.unwrap_or_default(),
                    expression_index,
                }),
                PolicyDecision::Error(message) => {
                    if policy.failure_policy() == FailurePolicy::Ignore {
                        warn!(policy = policy.name(), error = %message, "validation failed to evaluate, ignoring");
                        continue;
                    }
                    violations.push(Violation {
                        message,
                        reason: String::new(),
                        expression_index,
                    });
                }
            }
        }
        Ok(violations)
    }
}

/// Applies the binding's validation actions to a violation.
fn enforce<B: BindingAccessor>(
    policy: &str,
    binding: &B,
    violation: Violation,
    attr: &dyn Attributes,
    verdict: &mut Verdict,
) {
    let actions = binding.validation_actions();
    for action in &actions {
        match action {
            ValidationAction::Deny => {
                if verdict.denial.is_none() {
                    verdict.denial = Some(AdmissionError::policy_denied(
                        policy,
                        binding.name(),
                        &violation.message,
                        &violation.reason,
                    ));
                }
            }
            ValidationAction::Warn => attr.add_warning(&format!(
                "Validation failed for ValidatingAdmissionPolicy '{}' with binding '{}': {}",
                policy,
                binding.name(),
                violation.message
            )),
            ValidationAction::Audit => verdict.audit.push(ValidationFailure {
                message: violation.message.clone(),
                policy: policy.to_string(),
                binding: binding.name().to_string(),
                expression_index: violation.expression_index,
                validation_actions: actions.clone(),
            }),
        }
    }
}
