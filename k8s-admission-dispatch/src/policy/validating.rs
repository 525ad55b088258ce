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

//! ValidatingAdmissionPolicy and its binding wired into the generic policy
//! machinery.

use super::source::{CompileFn, PolicySource};
use super::{BindingAccessor, PolicyAccessor, PolicyDecision, PolicyValidator};
use crate::api::admissionregistration::{
    FailurePolicy, MatchCondition, MatchResources, ParamKind, ParamRef, ValidatingAdmissionPolicy,
    ValidatingAdmissionPolicyBinding, Validation, ValidationAction,
};
use crate::api::meta::NamespacedName;
use crate::evaluator::{Activation, EvaluationError, Evaluator};
use crate::informer::ListerWatcher;
use crate::webhook::matcher::evaluate_match_conditions;
use std::sync::Arc;

impl PolicyAccessor for ValidatingAdmissionPolicy {
    fn param_kind(&self) -> Option<&ParamKind> {
        self.spec.param_kind.as_ref()
    }

    fn match_constraints(&self) -> Option<&MatchResources> {
        self.spec.match_constraints.as_ref()
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.spec.failure_policy.unwrap_or_default()
    }

    fn match_conditions(&self) -> &[MatchCondition] {
        &self.spec.match_conditions
    }
}

impl BindingAccessor for ValidatingAdmissionPolicyBinding {
    /// Both kinds are cluster-scoped, so the key has no namespace.
    fn policy_name(&self) -> NamespacedName {
        NamespacedName::cluster(&self.spec.policy_name)
    }

    fn param_ref(&self) -> Option<&ParamRef> {
        self.spec.param_ref.as_ref()
    }

    fn match_resources(&self) -> Option<&MatchResources> {
        self.spec.match_resources.as_ref()
    }

    fn validation_actions(&self) -> Vec<ValidationAction> {
        self.actions()
    }
}

/// PolicyEvaluator is a compiled ValidatingAdmissionPolicy.
pub struct PolicyEvaluator {
    validations: Vec<Validation>,
    evaluator: Arc<dyn Evaluator>,
}

impl PolicyEvaluator {
    /// Compiles every validation and match condition of `policy`. The first
    /// failure is returned.
    pub fn compile(policy: &ValidatingAdmissionPolicy, evaluator: Arc<dyn Evaluator>) -> Result<Self, String> {
        for (i, validation) in policy.spec.validations.iter().enumerate() {
            evaluator
                .compile(&validation.expression)
                .map_err(|err| format!("spec.validations[{}].expression: {}", i, err))?;
        }
        for (i, condition) in policy.spec.match_conditions.iter().enumerate() {
            evaluator
                .compile(&condition.expression)
                .map_err(|err| format!("spec.matchConditions[{}].expression: {}", i, err))?;
        }
        Ok(Self {
            validations: policy.spec.validations.clone(),
            evaluator,
        })
    }
}

impl PolicyValidator for PolicyEvaluator {
    fn validate(&self, activation: &Activation) -> Vec<PolicyDecision> {
        self.validations
            .iter()
            .map(|validation| match self.evaluator.evaluate_bool(&validation.expression, activation) {
                Ok(true) => PolicyDecision::Admit,
                Ok(false) => PolicyDecision::Deny {
                    message: if validation.message.is_empty() {
                        format!("failed expression: {}", validation.expression)
                    } else {
                        validation.message.clone()
                    },
                    reason: validation.reason.clone(),
                },
                Err(err) => PolicyDecision::Error(evaluation_message(&validation.expression, &err)),
            })
            .collect()
    }

    fn matches(&self, conditions: &[MatchCondition], activation: &Activation) -> Result<bool, String> {
        evaluate_match_conditions(conditions, self.evaluator.as_ref(), activation).map_err(|e| e.to_string())
    }
}

fn evaluation_message(expression: &str, err: &EvaluationError) -> String {
    format!("expression '{}' resulted in error: {}", expression, err)
}

pub type ValidatingPolicySource =
    PolicySource<ValidatingAdmissionPolicy, ValidatingAdmissionPolicyBinding, PolicyEvaluator>;

/// Builds a policy source that compiles policies with `evaluator`.
pub fn new_policy_source(
    policies: Arc<dyn ListerWatcher<ValidatingAdmissionPolicy>>,
    bindings: Arc<dyn ListerWatcher<ValidatingAdmissionPolicyBinding>>,
    evaluator: Arc<dyn Evaluator>,
) -> ValidatingPolicySource {
    let compile: CompileFn<ValidatingAdmissionPolicy, PolicyEvaluator> =
        Arc::new(move |policy| PolicyEvaluator::compile(policy, evaluator.clone()));
    PolicySource::new(policies, bindings, compile)
}
