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

//! Admission webhook dispatch.
//!
//! [`HookSource`](source::HookSource)s publish the configured hooks,
//! the [`Matcher`](matcher::Matcher) decides which of them apply to a
//! request, and the dispatchers call the matching hooks through a
//! [`WebhookCaller`](caller::WebhookCaller) backed by the
//! [`ClientManager`](client::ClientManager).

pub mod authentication;
pub mod caller;
pub mod client;
pub mod dispatcher;
pub mod matcher;
pub mod namespace;
pub mod source;

#[cfg(test)]
pub(crate) mod testserver;

use crate::admission::Attributes;
use crate::api::admissionregistration::{
    FailurePolicy, MatchCondition, MutatingWebhook, ReinvocationPolicy, RuleWithOperations,
    SideEffectClass, ValidatingWebhook, WebhookClientConfig, DEFAULT_TIMEOUT_SECONDS, GROUP_NAME,
    MUTATING_WEBHOOK_CONFIGURATIONS, VALIDATING_WEBHOOK_CONFIGURATIONS,
};
use crate::api::meta::LabelSelector;
use std::time::Duration;

/// Review versions assumed when a hook lists none.
const DEFAULT_REVIEW_VERSIONS: &[&str] = &["v1", "v1beta1"];

/// Whether a hook may only judge a request or may also mutate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Validating,
    Mutating {
        reinvocation_policy: ReinvocationPolicy,
    },
}

/// HookConfig is the uniform view of one webhook entry of a
/// Validating- or MutatingWebhookConfiguration, with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct HookConfig {
    /// `<configuration>/<webhook>/<index>`, unique across sources.
    pub uid: String,
    pub configuration_name: String,
    pub name: String,
    pub kind: HookKind,
    pub rules: Vec<RuleWithOperations>,
    pub client_config: WebhookClientConfig,
    pub failure_policy: FailurePolicy,
    pub side_effects: SideEffectClass,
    pub timeout: Duration,
    pub namespace_selector: LabelSelector,
    pub object_selector: LabelSelector,
    pub match_conditions: Vec<MatchCondition>,
    pub admission_review_versions: Vec<String>,
}

fn timeout_from_seconds(seconds: Option<i32>) -> Duration {
    let seconds = seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS).max(1);
    Duration::from_secs(u64::try_from(seconds).unwrap_or(1))
}

fn review_versions_or_default(versions: &[String]) -> Vec<String> {
    if versions.is_empty() {
        DEFAULT_REVIEW_VERSIONS.iter().map(|v| v.to_string()).collect()
    } else {
        versions.to_vec()
    }
}

impl HookConfig {
    fn base(name: &str, kind: HookKind, client_config: WebhookClientConfig) -> Self {
        Self {
            uid: name.to_string(),
            configuration_name: String::new(),
            name: name.to_string(),
            kind,
            rules: vec![RuleWithOperations::match_everything()],
            client_config,
            failure_policy: FailurePolicy::default(),
            side_effects: SideEffectClass::default(),
            timeout: timeout_from_seconds(None),
            namespace_selector: LabelSelector::default(),
            object_selector: LabelSelector::default(),
            match_conditions: Vec::new(),
            admission_review_versions: review_versions_or_default(&[]),
        }
    }

    /// A validating hook matching everything, for building hooks by hand.
    pub fn validating(name: &str, client_config: WebhookClientConfig) -> Self {
        Self::base(name, HookKind::Validating, client_config)
    }

    /// A mutating hook matching everything that is never reinvoked.
    pub fn mutating(name: &str, client_config: WebhookClientConfig) -> Self {
        Self::base(
            name,
            HookKind::Mutating {
                reinvocation_policy: ReinvocationPolicy::Never,
            },
            client_config,
        )
    }

    pub fn from_validating(configuration: &str, index: usize, hook: &ValidatingWebhook) -> Self {
        Self {
            uid: format!("{}/{}/{}", configuration, hook.name, index),
            configuration_name: configuration.to_string(),
            name: hook.name.clone(),
            kind: HookKind::Validating,
            rules: hook.rules.clone(),
            client_config: hook.client_config.clone(),
            failure_policy: hook.failure_policy.unwrap_or_default(),
            side_effects: hook.side_effects.unwrap_or_default(),
            timeout: timeout_from_seconds(hook.timeout_seconds),
            namespace_selector: hook.namespace_selector.clone().unwrap_or_default(),
            object_selector: hook.object_selector.clone().unwrap_or_default(),
            match_conditions: hook.match_conditions.clone(),
            admission_review_versions: review_versions_or_default(&hook.admission_review_versions),
        }
    }

    pub fn from_mutating(configuration: &str, index: usize, hook: &MutatingWebhook) -> Self {
        Self {
            uid: format!("{}/{}/{}", configuration, hook.name, index),
            configuration_name: configuration.to_string(),
            name: hook.name.clone(),
            kind: HookKind::Mutating {
                reinvocation_policy: hook.reinvocation_policy.unwrap_or_default(),
            },
            rules: hook.rules.clone(),
            client_config: hook.client_config.clone(),
            failure_policy: hook.failure_policy.unwrap_or_default(),
            side_effects: hook.side_effects.unwrap_or_default(),
            timeout: timeout_from_seconds(hook.timeout_seconds),
            namespace_selector: hook.namespace_selector.clone().unwrap_or_default(),
            object_selector: hook.object_selector.clone().unwrap_or_default(),
            match_conditions: hook.match_conditions.clone(),
            admission_review_versions: review_versions_or_default(&hook.admission_review_versions),
        }
    }

    pub fn with_rules(mut self, rules: Vec<RuleWithOperations>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_side_effects(mut self, side_effects: SideEffectClass) -> Self {
        self.side_effects = side_effects;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_namespace_selector(mut self, selector: LabelSelector) -> Self {
        self.namespace_selector = selector;
        self
    }

    pub fn with_object_selector(mut self, selector: LabelSelector) -> Self {
        self.object_selector = selector;
        self
    }

    pub fn with_match_conditions(mut self, conditions: Vec<MatchCondition>) -> Self {
        self.match_conditions = conditions;
        self
    }

    pub fn with_admission_review_versions(mut self, versions: &[&str]) -> Self {
        self.admission_review_versions = versions.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn with_reinvocation_policy(mut self, policy: ReinvocationPolicy) -> Self {
        if let HookKind::Mutating { reinvocation_policy } = &mut self.kind {
            *reinvocation_policy = policy;
        }
        self
    }

    /// Never for validating hooks.
    pub fn reinvocation_policy(&self) -> ReinvocationPolicy {
        match self.kind {
            HookKind::Validating => ReinvocationPolicy::Never,
            HookKind::Mutating { reinvocation_policy } => reinvocation_policy,
        }
    }

    pub fn is_mutating(&self) -> bool {
        matches!(self.kind, HookKind::Mutating { .. })
    }
}

/// Webhook configurations themselves are never sent to webhooks, so that a
/// broken webhook cannot block its own repair.
pub fn is_webhook_configuration_resource(attr: &dyn Attributes) -> bool {
    let resource = attr.get_resource();
    resource.group == GROUP_NAME
        && (resource.resource == VALIDATING_WEBHOOK_CONFIGURATIONS
            || resource.resource == MUTATING_WEBHOOK_CONFIGURATIONS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::attributes::{GroupVersionKind, GroupVersionResource};
    use crate::admission::{AttributesRecord, Operation};

    #[test]
    fn test_from_validating_applies_defaults() {
        let hook = ValidatingWebhook {
            name: "allow.example.com".to_string(),
            client_config: WebhookClientConfig::url("https://example.com/allow"),
            ..Default::default()
        };
        let config = HookConfig::from_validating("config", 2, &hook);
        assert_eq!(config.uid, "config/allow.example.com/2");
        assert_eq!(config.failure_policy, FailurePolicy::Fail);
        assert_eq!(config.side_effects, SideEffectClass::Unknown);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.namespace_selector.is_empty());
        assert_eq!(config.admission_review_versions, vec!["v1", "v1beta1"]);
        assert_eq!(config.reinvocation_policy(), ReinvocationPolicy::Never);
    }

    #[test]
    fn test_from_mutating() {
        let hook = MutatingWebhook {
            name: "mutate.example.com".to_string(),
            timeout_seconds: Some(3),
            reinvocation_policy: Some(ReinvocationPolicy::IfNeeded),
            failure_policy: Some(FailurePolicy::Ignore),
            ..Default::default()
        };
        let config = HookConfig::from_mutating("m", 0, &hook);
        assert!(config.is_mutating());
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.failure_policy, FailurePolicy::Ignore);
        assert_eq!(config.reinvocation_policy(), ReinvocationPolicy::IfNeeded);
    }

    #[test]
    fn test_webhook_configuration_resources_are_exempt() {
        let attrs = |group: &str, resource: &str| {
            AttributesRecord::new(
                "config",
                "",
                GroupVersionResource::new(group, "v1", resource),
                "",
                Operation::Create,
                None,
                None,
                GroupVersionKind::default(),
                false,
            )
        };
        assert!(is_webhook_configuration_resource(&attrs(GROUP_NAME, VALIDATING_WEBHOOK_CONFIGURATIONS)));
        assert!(is_webhook_configuration_resource(&attrs(GROUP_NAME, MUTATING_WEBHOOK_CONFIGURATIONS)));
        assert!(!is_webhook_configuration_resource(&attrs(GROUP_NAME, "validatingadmissionpolicies")));
        assert!(!is_webhook_configuration_resource(&attrs("", "pods")));
    }
}
