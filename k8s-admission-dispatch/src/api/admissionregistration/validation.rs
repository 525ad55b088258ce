// Copyright 2024 The Kubernetes Authors.
// Licensed under the Apache License, Version 2.0

//! Validation of admissionregistration objects.
//!
//! Malformed configuration is rejected when the configuration object itself
//! is admitted. The dispatch path assumes these checks already passed.

use super::{
    MatchCondition, MutatingWebhookConfiguration, RuleWithOperations, SideEffectClass,
    ValidatingAdmissionPolicy, ValidatingAdmissionPolicyBinding, ValidatingWebhookConfiguration,
    WebhookClientConfig,
};
use crate::admission::errors::{
    field_duplicate, field_invalid, field_not_supported, field_required, field_too_many,
    FieldError,
};
use crate::admission::{AdmissionError, AdmissionResult};
use crate::api::admission::SUPPORTED_REVIEW_VERSIONS;
use crate::api::meta::LabelSelector;
use std::collections::HashSet;

/// Upper bound on match conditions per hook or policy.
pub const MAX_MATCH_CONDITIONS: usize = 64;

const QUALIFIED_NAME_MAX_LENGTH: usize = 63;
const DNS1123_SUBDOMAIN_MAX_LENGTH: usize = 253;

/// Borrowed view over the fields validating and mutating webhooks share.
struct WebhookView<'a> {
    name: &'a str,
    client_config: &'a WebhookClientConfig,
    rules: &'a [RuleWithOperations],
    side_effects: Option<SideEffectClass>,
    timeout_seconds: Option<i32>,
    namespace_selector: Option<&'a LabelSelector>,
    object_selector: Option<&'a LabelSelector>,
    admission_review_versions: &'a [String],
    match_conditions: &'a [MatchCondition],
}

pub fn validate_validating_webhook_configuration(
    config: &ValidatingWebhookConfiguration,
) -> AdmissionResult<()> {
    let views = config.webhooks.iter().map(|h| WebhookView {
        name: &h.name,
        client_config: &h.client_config,
        rules: &h.rules,
        side_effects: h.side_effects,
        timeout_seconds: h.timeout_seconds,
        namespace_selector: h.namespace_selector.as_ref(),
        object_selector: h.object_selector.as_ref(),
        admission_review_versions: &h.admission_review_versions,
        match_conditions: &h.match_conditions,
    });
    into_result(
        "ValidatingWebhookConfiguration",
        &config.metadata.name,
        validate_webhooks(&config.metadata.name, views),
    )
}

pub fn validate_mutating_webhook_configuration(
    config: &MutatingWebhookConfiguration,
) -> AdmissionResult<()> {
    let views = config.webhooks.iter().map(|h| WebhookView {
        name: &h.name,
        client_config: &h.client_config,
        rules: &h.rules,
        side_effects: h.side_effects,
        timeout_seconds: h.timeout_seconds,
        namespace_selector: h.namespace_selector.as_ref(),
        object_selector: h.object_selector.as_ref(),
        admission_review_versions: &h.admission_review_versions,
        match_conditions: &h.match_conditions,
    });
    into_result(
        "MutatingWebhookConfiguration",
        &config.metadata.name,
        validate_webhooks(&config.metadata.name, views),
    )
}

pub fn validate_validating_admission_policy(
    policy: &ValidatingAdmissionPolicy,
) -> AdmissionResult<()> {
    let mut errors = Vec::new();
    if policy.metadata.name.is_empty() {
        errors.push(field_required("metadata.name", "name is required"));
    }
    if let Some(param_kind) = &policy.spec.param_kind {
        if param_kind.api_version.is_empty() {
            errors.push(field_required("spec.paramKind.apiVersion", ""));
        }
        if param_kind.kind.is_empty() {
            errors.push(field_required("spec.paramKind.kind", ""));
        }
    }
    if let Some(constraints) = &policy.spec.match_constraints {
        for (field, selector) in [
            ("spec.matchConstraints.namespaceSelector", &constraints.namespace_selector),
            ("spec.matchConstraints.objectSelector", &constraints.object_selector),
        ] {
            validate_selector(field, selector.as_ref(), &mut errors);
        }
    }
    if policy.spec.validations.is_empty() {
        errors.push(field_required("spec.validations", "validations must contain at least one item"));
    }
    for (i, validation) in policy.spec.validations.iter().enumerate() {
        if validation.expression.trim().is_empty() {
            errors.push(field_required(&format!("spec.validations[{}].expression", i), ""));
        }
    }
    errors.extend(validate_match_conditions(
        "spec.matchConditions",
        &policy.spec.match_conditions,
    ));
    into_result("ValidatingAdmissionPolicy", &policy.metadata.name, errors)
}

pub fn validate_validating_admission_policy_binding(
    binding: &ValidatingAdmissionPolicyBinding,
) -> AdmissionResult<()> {
    let mut errors = Vec::new();
    if binding.metadata.name.is_empty() {
        errors.push(field_required("metadata.name", "name is required"));
    }
    if binding.spec.policy_name.is_empty() {
        errors.push(field_required("spec.policyName", ""));
    }
    if let Some(param_ref) = &binding.spec.param_ref {
        if param_ref.name.is_empty() {
            errors.push(field_required("spec.paramRef.name", ""));
        }
    }
    let mut seen = HashSet::new();
    for (i, action) in binding.spec.validation_actions.iter().enumerate() {
        if !seen.insert(*action) {
            errors.push(field_duplicate(
                &format!("spec.validationActions[{}]", i),
                &format!("{:?}", action),
            ));
        }
    }
    into_result("ValidatingAdmissionPolicyBinding", &binding.metadata.name, errors)
}

/// Validates a list of match conditions: names must be unique qualified
/// names and expressions must be non-empty.
pub fn validate_match_conditions(path: &str, conditions: &[MatchCondition]) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if conditions.len() > MAX_MATCH_CONDITIONS {
        errors.push(field_too_many(path, conditions.len(), MAX_MATCH_CONDITIONS));
    }

    let mut names = HashSet::new();
    for (i, condition) in conditions.iter().enumerate() {
        let name_path = format!("{}[{}].name", path, i);
        if condition.name.is_empty() {
            errors.push(field_required(&name_path, ""));
        } else {
            for msg in qualified_name_errors(&condition.name) {
                errors.push(field_invalid(&name_path, &condition.name, &msg));
            }
            if !names.insert(condition.name.as_str()) {
                errors.push(field_duplicate(&name_path, &condition.name));
            }
        }
        if condition.expression.trim().is_empty() {
            errors.push(field_required(&format!("{}[{}].expression", path, i), ""));
        }
    }
    errors
}

fn validate_webhooks<'a>(
    configuration: &str,
    webhooks: impl Iterator<Item = WebhookView<'a>>,
) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if configuration.is_empty() {
        errors.push(field_required("metadata.name", "name is required"));
    }

    let mut names = HashSet::new();
    for (i, hook) in webhooks.enumerate() {
        let path = format!("webhooks[{}]", i);
        validate_webhook(&path, &hook, &mut errors);
        if !hook.name.is_empty() && !names.insert(hook.name) {
            errors.push(field_duplicate(&format!("{}.name", path), hook.name));
        }
    }
    errors
}

fn validate_webhook(path: &str, hook: &WebhookView<'_>, errors: &mut Vec<FieldError>) {
    let name_path = format!("{}.name", path);
    if hook.name.is_empty() {
        errors.push(field_required(&name_path, ""));
    } else if !is_dns1123_subdomain(hook.name) {
        errors.push(field_invalid(
            &name_path,
            hook.name,
            "a lowercase RFC 1123 subdomain must consist of lower case alphanumeric characters, '-' or '.'",
        ));
    } else if hook.name.split('.').count() < 3 {
        errors.push(field_invalid(
            &name_path,
            hook.name,
            "should be a domain with at least three segments separated by dots",
        ));
    }

    for (i, rule) in hook.rules.iter().enumerate() {
        validate_rule(&format!("{}.rules[{}]", path, i), rule, errors);
    }

    validate_client_config(&format!("{}.clientConfig", path), hook.client_config, errors);

    match hook.side_effects {
        None => errors.push(field_required(&format!("{}.sideEffects", path), "must specify one of None, NoneOnDryRun")),
        Some(SideEffectClass::None) | Some(SideEffectClass::NoneOnDryRun) => {}
        Some(other) => errors.push(field_not_supported(
            &format!("{}.sideEffects", path),
            other.as_str(),
            vec!["None", "NoneOnDryRun"],
        )),
    }

    if let Some(timeout) = hook.timeout_seconds {
        if !(1..=30).contains(&timeout) {
            errors.push(field_invalid(
                &format!("{}.timeoutSeconds", path),
                &timeout.to_string(),
                "the timeout value must be between 1 and 30 seconds",
            ));
        }
    }

    validate_selector(&format!("{}.namespaceSelector", path), hook.namespace_selector, errors);
    validate_selector(&format!("{}.objectSelector", path), hook.object_selector, errors);
    validate_review_versions(
        &format!("{}.admissionReviewVersions", path),
        hook.admission_review_versions,
        errors,
    );
    errors.extend(validate_match_conditions(
        &format!("{}.matchConditions", path),
        hook.match_conditions,
    ));
}

fn validate_rule(path: &str, rule: &RuleWithOperations, errors: &mut Vec<FieldError>) {
    if rule.operations.is_empty() {
        errors.push(field_required(&format!("{}.operations", path), ""));
    }
    if rule.operations.len() > 1 && rule.operations.contains(&super::OperationType::All) {
        errors.push(field_invalid(
            &format!("{}.operations", path),
            "*",
            "if '*' is present, must not specify other operations",
        ));
    }
    for (field, values) in [
        ("apiGroups", &rule.rule.api_groups),
        ("apiVersions", &rule.rule.api_versions),
        ("resources", &rule.rule.resources),
    ] {
        if values.is_empty() {
            errors.push(field_required(&format!("{}.{}", path, field), ""));
        }
    }
    for (i, resource) in rule.rule.resources.iter().enumerate() {
        if resource.is_empty() || resource.split('/').count() > 2 {
            errors.push(field_invalid(
                &format!("{}.resources[{}]", path, i),
                resource,
                "must be a resource or resource/subresource",
            ));
        }
    }
}

fn validate_client_config(path: &str, config: &WebhookClientConfig, errors: &mut Vec<FieldError>) {
    match (&config.url, &config.service) {
        (Some(_), Some(_)) | (None, None) => {
            errors.push(field_required(path, "exactly one of url or service is required"));
        }
        (Some(url), None) => {
            let url_path = format!("{}.url", path);
            match reqwest::Url::parse(url) {
                Err(err) => errors.push(field_invalid(&url_path, url, &err.to_string())),
                Ok(parsed) => {
                    if parsed.scheme() != "https" {
                        errors.push(field_invalid(&url_path, url, "'https' is the only allowed URL scheme"));
                    }
                    if parsed.host_str().map_or(true, str::is_empty) {
                        errors.push(field_invalid(&url_path, url, "host must be specified"));
                    }
                    if !parsed.username().is_empty() || parsed.password().is_some() {
                        errors.push(field_invalid(&url_path, url, "user information is not permitted in the URL"));
                    }
                    if parsed.fragment().is_some() {
                        errors.push(field_invalid(&url_path, url, "fragments are not permitted in the URL"));
                    }
                    if parsed.query().is_some() {
                        errors.push(field_invalid(&url_path, url, "query parameters are not permitted in the URL"));
                    }
                }
            }
        }
        (None, Some(service)) => {
            let service_path = format!("{}.service", path);
            if service.namespace.is_empty() {
                errors.push(field_required(&format!("{}.namespace", service_path), "service namespace is required"));
            }
            if service.name.is_empty() {
                errors.push(field_required(&format!("{}.name", service_path), "service name is required"));
            }
            if let Some(p) = &service.path {
                if !p.starts_with('/') {
                    errors.push(field_invalid(&format!("{}.path", service_path), p, "must start with a '/'"));
                }
            }
            if let Some(port) = service.port {
                if !(1..=65535).contains(&port) {
                    errors.push(field_invalid(
                        &format!("{}.port", service_path),
                        &port.to_string(),
                        "port is not valid: must be between 1 and 65535, inclusive",
                    ));
                }
            }
        }
    }
}

fn validate_selector(path: &str, selector: Option<&LabelSelector>, errors: &mut Vec<FieldError>) {
    if let Some(selector) = selector {
        if let Err(msg) = selector.validate() {
            errors.push(field_invalid(path, "", &msg));
        }
    }
}

fn validate_review_versions(path: &str, versions: &[String], errors: &mut Vec<FieldError>) {
    if versions.is_empty() {
        errors.push(field_required(
            path,
            &format!("must specify one of {}", SUPPORTED_REVIEW_VERSIONS.join(", ")),
        ));
        return;
    }
    let mut seen = HashSet::new();
    for (i, version) in versions.iter().enumerate() {
        if !seen.insert(version.as_str()) {
            errors.push(field_duplicate(&format!("{}[{}]", path, i), version));
        }
    }
    if !versions
        .iter()
        .any(|v| SUPPORTED_REVIEW_VERSIONS.contains(&v.as_str()))
    {
        errors.push(field_invalid(
            path,
            &versions.join(","),
            &format!("must include at least one of {}", SUPPORTED_REVIEW_VERSIONS.join(", ")),
        ));
    }
}

fn into_result(kind: &str, name: &str, errors: Vec<FieldError>) -> AdmissionResult<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AdmissionError::invalid(kind, name, errors))
    }
}

/// Returns the reasons `value` is not a qualified name (an optional DNS
/// subdomain prefix and a slash, followed by a name of at most 63 characters).
pub fn qualified_name_errors(value: &str) -> Vec<String> {
    let mut errors = Vec::new();
    let (prefix, name) = match value.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, value),
    };

    if let Some(prefix) = prefix {
        if prefix.is_empty() {
            errors.push("prefix part must be non-empty".to_string());
        } else if !is_dns1123_subdomain(prefix) {
            errors.push("prefix part must be a lowercase RFC 1123 subdomain".to_string());
        }
    }

    if name.is_empty() {
        errors.push("name part must be non-empty".to_string());
    } else if name.len() > QUALIFIED_NAME_MAX_LENGTH {
        errors.push(format!(
            "name part must be no more than {} characters",
            QUALIFIED_NAME_MAX_LENGTH
        ));
    } else if !is_qualified_name_part(name) {
        errors.push(
            "name part must consist of alphanumeric characters, '-', '_' or '.', and must start and end with an alphanumeric character"
                .to_string(),
        );
    }
    errors
}

fn is_qualified_name_part(name: &str) -> bool {
    let bytes = name.as_bytes();
    let inner_ok = |b: &u8| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.');
    bytes.first().is_some_and(u8::is_ascii_alphanumeric)
        && bytes.last().is_some_and(u8::is_ascii_alphanumeric)
        && bytes.iter().all(inner_ok)
}

fn is_dns1123_subdomain(value: &str) -> bool {
    if value.is_empty() || value.len() > DNS1123_SUBDOMAIN_MAX_LENGTH {
        return false;
    }
    value.split('.').all(|label| {
        let bytes = label.as_bytes();
        let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
        !bytes.is_empty()
            && bytes.first().is_some_and(alnum)
            && bytes.last().is_some_and(alnum)
            && bytes.iter().all(|b| alnum(b) || *b == b'-')
    })
}
