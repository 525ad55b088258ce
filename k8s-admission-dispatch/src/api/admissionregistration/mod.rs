// Copyright 2024 The Kubernetes Authors.
// Licensed under the Apache License, Version 2.0

//! admissionregistration.k8s.io types: webhook configurations and
//! validating admission policies with their bindings.

pub mod validation;

use crate::admission::Operation;
use crate::api::meta::{LabelSelector, ObjectMeta};
use serde::{Deserialize, Serialize};

pub const GROUP_NAME: &str = "admissionregistration.k8s.io";

/// Resource name of ValidatingWebhookConfiguration.
pub const VALIDATING_WEBHOOK_CONFIGURATIONS: &str = "validatingwebhookconfigurations";

/// Resource name of MutatingWebhookConfiguration.
pub const MUTATING_WEBHOOK_CONFIGURATIONS: &str = "mutatingwebhookconfigurations";

/// Default per-call webhook timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: i32 = 10;

// ============================================================================
// Webhook Types
// ============================================================================

/// FailurePolicy defines how to handle failures of a hook: calling errors,
/// timeouts and inconclusive match conditions. Explicit denials are never
/// subject to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Ignore means the error is logged and the request proceeds.
    Ignore,
    /// Fail means the admission request is rejected.
    #[default]
    Fail,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Fail => "Fail",
            FailurePolicy::Ignore => "Ignore",
        }
    }
}

/// SideEffectClass describes the side effects of calling a webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SideEffectClass {
    #[default]
    Unknown,
    None,
    Some,
    NoneOnDryRun,
}

impl SideEffectClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SideEffectClass::Unknown => "Unknown",
            SideEffectClass::None => "None",
            SideEffectClass::Some => "Some",
            SideEffectClass::NoneOnDryRun => "NoneOnDryRun",
        }
    }

    /// Webhooks with side effects may only be called on dry-run requests if
    /// they promise to suppress them.
    pub fn supports_dry_run(&self) -> bool {
        matches!(self, SideEffectClass::None | SideEffectClass::NoneOnDryRun)
    }
}

/// ReinvocationPolicy says whether a mutating webhook is called again when
/// later webhooks modify the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReinvocationPolicy {
    #[default]
    Never,
    IfNeeded,
}

/// OperationType specifies an operation for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    #[serde(rename = "*")]
    All,
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "CONNECT")]
    Connect,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::All => "*",
            OperationType::Create => "CREATE",
            OperationType::Update => "UPDATE",
            OperationType::Delete => "DELETE",
            OperationType::Connect => "CONNECT",
        }
    }

    /// Check if this operation type matches the given admission operation.
    pub fn matches(&self, op: Operation) -> bool {
        match self {
            OperationType::All => true,
            OperationType::Create => op == Operation::Create,
            OperationType::Update => op == Operation::Update,
            OperationType::Delete => op == Operation::Delete,
            OperationType::Connect => op == Operation::Connect,
        }
    }
}

/// ScopeType restricts a rule to cluster-scoped or namespaced resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeType {
    Cluster,
    Namespaced,
    #[serde(rename = "*")]
    All,
}

/// Rule describes resources and versions a hook applies to. `*` is a
/// wildcard in every list. Resources may name subresources as `res/sub`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default)]
    pub api_groups: Vec<String>,
    #[serde(default)]
    pub api_versions: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScopeType>,
}

/// RuleWithOperations is a tuple of Operations and Resources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleWithOperations {
    #[serde(default)]
    pub operations: Vec<OperationType>,
    #[serde(flatten)]
    pub rule: Rule,
}

impl RuleWithOperations {
    pub fn new(
        operations: Vec<OperationType>,
        api_groups: &[&str],
        api_versions: &[&str],
        resources: &[&str],
    ) -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            operations,
            rule: Rule {
                api_groups: owned(api_groups),
                api_versions: owned(api_versions),
                resources: owned(resources),
                scope: None,
            },
        }
    }

    /// A rule matching every operation on every resource and subresource.
    pub fn match_everything() -> Self {
        Self::new(vec![OperationType::All], &["*"], &["*"], &["*/*"])
    }

    pub fn with_scope(mut self, scope: ScopeType) -> Self {
        self.rule.scope = Some(scope);
        self
    }
}

/// ServiceReference holds a reference to an in-cluster Service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceReference {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

impl ServiceReference {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            path: None,
            port: None,
        }
    }

    /// The service port, defaulting to 443.
    pub fn port_or_default(&self) -> i32 {
        self.port.unwrap_or(443)
    }

    /// The in-cluster DNS name of the service.
    pub fn host(&self) -> String {
        format!("{}.{}.svc", self.name, self.namespace)
    }
}

/// WebhookClientConfig says how to reach a webhook: exactly one of `url`
/// and `service` is expected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookClientConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceReference>,
    /// PEM encoded CA bundle used to verify the webhook's serving certificate.
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        with = "crate::api::base64_bytes"
    )]
    pub ca_bundle: Vec<u8>,
}

impl WebhookClientConfig {
    pub fn url(url: &str) -> Self {
        Self {
            url: Some(url.to_string()),
            ..Default::default()
        }
    }

    pub fn service(service: ServiceReference) -> Self {
        Self {
            service: Some(service),
            ..Default::default()
        }
    }
}

/// MatchCondition is a named expression that must evaluate to true for a
/// hook to be called.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchCondition {
    pub name: String,
    pub expression: String,
}

impl MatchCondition {
    pub fn new(name: &str, expression: &str) -> Self {
        Self {
            name: name.to_string(),
            expression: expression.to_string(),
        }
    }
}

/// ValidatingWebhook describes an admission webhook that may only allow or
/// deny a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatingWebhook {
    pub name: String,
    pub client_config: WebhookClientConfig,
    #[serde(default)]
    pub rules: Vec<RuleWithOperations>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_effects: Option<SideEffectClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_selector: Option<LabelSelector>,
    #[serde(default)]
    pub admission_review_versions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_conditions: Vec<MatchCondition>,
}

/// MutatingWebhook describes an admission webhook that may also change the
/// object through a JSON patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutatingWebhook {
    pub name: String,
    pub client_config: WebhookClientConfig,
    #[serde(default)]
    pub rules: Vec<RuleWithOperations>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_effects: Option<SideEffectClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_selector: Option<LabelSelector>,
    #[serde(default)]
    pub admission_review_versions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_conditions: Vec<MatchCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reinvocation_policy: Option<ReinvocationPolicy>,
}

/// ValidatingWebhookConfiguration groups validating webhooks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidatingWebhookConfiguration {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub webhooks: Vec<ValidatingWebhook>,
}

impl ValidatingWebhookConfiguration {
    pub fn new(name: &str, webhooks: Vec<ValidatingWebhook>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            webhooks,
        }
    }
}

/// MutatingWebhookConfiguration groups mutating webhooks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutatingWebhookConfiguration {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub webhooks: Vec<MutatingWebhook>,
}

impl MutatingWebhookConfiguration {
    pub fn new(name: &str, webhooks: Vec<MutatingWebhook>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            webhooks,
        }
    }
}

// ============================================================================
// Policy Types
// ============================================================================

/// ParamKind names the kind of object that parameterizes a policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamKind {
    pub api_version: String,
    pub kind: String,
}

/// ParamRef points a binding at the parameter object to use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

/// NamedRuleWithOperations is a rule that may be narrowed to named objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedRuleWithOperations {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_names: Vec<String>,
    #[serde(flatten)]
    pub rule: RuleWithOperations,
}

impl From<RuleWithOperations> for NamedRuleWithOperations {
    fn from(rule: RuleWithOperations) -> Self {
        Self {
            resource_names: Vec::new(),
            rule,
        }
    }
}

/// MatchResources decides which requests a policy or binding applies to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_rules: Vec<NamedRuleWithOperations>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_resource_rules: Vec<NamedRuleWithOperations>,
}

/// Validation is a single expression a request must satisfy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    pub expression: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Validation {
    pub fn new(expression: &str, message: &str) -> Self {
        Self {
            expression: expression.to_string(),
            message: message.to_string(),
            reason: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatingAdmissionPolicySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param_kind: Option<ParamKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_constraints: Option<MatchResources>,
    #[serde(default)]
    pub validations: Vec<Validation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_conditions: Vec<MatchCondition>,
}

/// ValidatingAdmissionPolicy describes expressions that validate requests.
/// It is inert until a binding references it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidatingAdmissionPolicy {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ValidatingAdmissionPolicySpec,
}

impl ValidatingAdmissionPolicy {
    pub fn new(name: &str, validations: Vec<Validation>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            spec: ValidatingAdmissionPolicySpec {
                validations,
                ..Default::default()
            },
        }
    }
}

/// ValidationAction says how a failed validation is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationAction {
    Deny,
    Warn,
    Audit,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatingAdmissionPolicyBindingSpec {
    pub policy_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param_ref: Option<ParamRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_resources: Option<MatchResources>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_actions: Vec<ValidationAction>,
}

/// ValidatingAdmissionPolicyBinding binds a policy to a scope of requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidatingAdmissionPolicyBinding {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ValidatingAdmissionPolicyBindingSpec,
}

impl ValidatingAdmissionPolicyBinding {
    pub fn new(name: &str, policy_name: &str) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            spec: ValidatingAdmissionPolicyBindingSpec {
                policy_name: policy_name.to_string(),
                ..Default::default()
            },
        }
    }

    /// Enforcement actions, defaulting to Deny.
    pub fn actions(&self) -> Vec<ValidationAction> {
        if self.spec.validation_actions.is_empty() {
            vec![ValidationAction::Deny]
        } else {
            self.spec.validation_actions.clone()
        }
    }
}

macro_rules! impl_resource {
    ($($ty:ty),*) => {
        $(
            impl crate::informer::Resource for $ty {
                fn meta(&self) -> &ObjectMeta {
                    &self.metadata
                }

                fn meta_mut(&mut self) -> &mut ObjectMeta {
                    &mut self.metadata
                }
            }
        )*
    };
}

impl_resource!(
    ValidatingWebhookConfiguration,
    MutatingWebhookConfiguration,
    ValidatingAdmissionPolicy,
    ValidatingAdmissionPolicyBinding
);
