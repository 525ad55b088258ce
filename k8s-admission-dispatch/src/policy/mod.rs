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

//! Admission policies: configuration objects whose expressions are
//! evaluated in process instead of calling out to a webhook.
//!
//! A policy does nothing on its own. [`PolicySource`](source::PolicySource)
//! joins policies with the bindings that reference them and publishes one
//! [`PolicyHook`] per bound policy; the
//! [`PolicyDispatcher`](dispatcher::PolicyDispatcher) evaluates them.

pub mod dispatcher;
pub mod matching;
pub mod source;
pub mod validating;

use crate::api::admissionregistration::{
    FailurePolicy, MatchCondition, MatchResources, ParamKind, ParamRef, ValidationAction,
};
use crate::api::meta::NamespacedName;
use crate::evaluator::Activation;
use crate::informer::Resource;
use std::sync::Arc;

/// PolicyAccessor exposes the fields of a policy the dispatch path reads.
pub trait PolicyAccessor: Resource {
    fn name(&self) -> &str {
        &self.meta().name
    }

    /// Empty for cluster-scoped policies.
    fn namespace(&self) -> &str {
        &self.meta().namespace
    }

    fn param_kind(&self) -> Option<&ParamKind>;

    fn match_constraints(&self) -> Option<&MatchResources>;

    fn failure_policy(&self) -> FailurePolicy;

    fn match_conditions(&self) -> &[MatchCondition];
}

/// BindingAccessor exposes the fields of a binding the dispatch path reads.
pub trait BindingAccessor: Resource {
    fn name(&self) -> &str {
        &self.meta().name
    }

    fn namespace(&self) -> &str {
        &self.meta().namespace
    }

    /// Key of the policy this binding applies.
    fn policy_name(&self) -> NamespacedName;

    fn param_ref(&self) -> Option<&ParamRef>;

    fn match_resources(&self) -> Option<&MatchResources>;

    fn validation_actions(&self) -> Vec<ValidationAction>;
}

/// Result of one policy expression.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyDecision {
    Admit,
    Deny { message: String, reason: Option<String> },
    Error(String),
}

/// PolicyValidator is the compiled form of a policy.
pub trait PolicyValidator: Send + Sync {
    /// Evaluates every validation, in order.
    fn validate(&self, activation: &Activation) -> Vec<PolicyDecision>;

    /// Evaluates match conditions of the policy.
    fn matches(&self, conditions: &[MatchCondition], activation: &Activation) -> Result<bool, String>;
}

/// PolicyHook is a policy together with the bindings that apply it and its
/// compiled validator, or the reason compilation failed.
#[derive(Debug)]
pub struct PolicyHook<P, B, E> {
    pub policy: P,
    pub bindings: Vec<B>,
    pub evaluator: Result<Arc<E>, String>,
}

impl<P: Clone, B: Clone, E> Clone for PolicyHook<P, B, E> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            bindings: self.bindings.clone(),
            evaluator: self.evaluator.clone(),
        }
    }
}
