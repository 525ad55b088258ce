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

//! Validating and mutating webhook dispatch.
//!
//! Hooks are called one at a time in source order. A hook whose call fails
//! is skipped when its failure policy is `Ignore` and rejects the request
//! otherwise. An explicit denial always rejects the request.

use super::caller::{WebhookCaller, WebhookError};
use super::matcher::{MatchError, Matcher};
use super::HookConfig;
use crate::admission::{AdmissionError, AdmissionResult, Attributes};
use crate::api::admission::{AdmissionRequest, AdmissionResponse, PatchType};
use crate::api::admissionregistration::{FailurePolicy, ReinvocationPolicy};
use serde_json::json;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Annotation recording whether a mutating hook changed the object.
const MUTATION_ANNOTATION_PREFIX: &str = "mutation.webhook.admission.k8s.io";

/// What happened during one dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchOutcome {
    /// Hooks that were called, in call order. Reinvoked hooks appear twice.
    pub called: Vec<String>,
    /// Hooks whose failure was ignored.
    pub failed_open: Vec<String>,
    /// Patches applied to the object, in order.
    pub patches: Vec<json_patch::Patch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Validating,
    Mutating,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Validating => write!(f, "validating"),
            Phase::Mutating => write!(f, "mutating"),
        }
    }
}

/// Position of a hook call, used in annotation keys.
#[derive(Debug, Clone, Copy)]
struct Slot {
    round: usize,
    index: usize,
}

/// Shared plumbing of both dispatchers.
struct HookRunner {
    matcher: Arc<Matcher>,
    caller: Arc<dyn WebhookCaller>,
    phase: Phase,
}

impl HookRunner {
    fn fail_open(
        &self,
        hook: &HookConfig,
        slot: Slot,
        reason: &dyn fmt::Display,
        attr: &dyn Attributes,
        outcome: &mut DispatchOutcome,
    ) -> AdmissionResult<()> {
        warn!(
            hook = %hook.name,
            phase = %self.phase,
            error = %reason,
            "failed calling webhook, failing open"
        );
        let key = format!(
            "failed-open.{}.webhook.admission.k8s.io/round_{}_index_{}",
            self.phase, slot.round, slot.index
        );
        attr.add_annotation(&key, &hook.name)?;
        outcome.failed_open.push(hook.name.clone());
        Ok(())
    }

    /// Interprets a match result, applying the failure policy to an
    /// inconclusive one.
    fn resolve_match(
        &self,
        hook: &HookConfig,
        slot: Slot,
        matched: Result<bool, MatchError>,
        attr: &dyn Attributes,
        outcome: &mut DispatchOutcome,
    ) -> AdmissionResult<bool> {
        match matched {
            Ok(matched) => Ok(matched),
            Err(err) if err.is_inconclusive() && hook.failure_policy == FailurePolicy::Ignore => {
                self.fail_open(hook, slot, &err, attr, outcome)?;
                Ok(false)
            }
            Err(err) => Err(err.into_admission_error(&hook.name)),
        }
    }

    fn check_dry_run(&self, hook: &HookConfig, attr: &dyn Attributes) -> AdmissionResult<()> {
        if attr.is_dry_run() && !hook.side_effects.supports_dry_run() {
            return Err(AdmissionError::bad_request(format!(
                "admission webhook \"{}\" does not support dry run",
                hook.name
            )));
        }
        Ok(())
    }

    async fn call(
        &self,
        hook: &HookConfig,
        attr: &dyn Attributes,
        outcome: &mut DispatchOutcome,
    ) -> Result<AdmissionResponse, WebhookError> {
        let request = AdmissionRequest::from_attributes(&Uuid::new_v4().to_string(), attr);
        outcome.called.push(hook.name.clone());
        self.caller.call(hook, &request).await
    }

    /// Records annotations and warnings of a response and turns a denial
    /// into an error.
    fn record_response(&self, hook: &HookConfig, response: &AdmissionResponse, attr: &dyn Attributes) -> AdmissionResult<()> {
        for (key, value) in &response.audit_annotations {
            attr.add_annotation(&format!("{}/{}", hook.name, key), value)?;
        }
        for warning in &response.warnings {
            attr.add_warning(warning);
        }
        if !response.allowed {
            debug!(hook = %hook.name, phase = %self.phase, "webhook denied the request");
            return Err(AdmissionError::webhook_denied(&hook.name, response.result.as_ref()));
        }
        Ok(())
    }

    /// Applies the failure policy to a failed call.
    fn call_failed(
        &self,
        hook: &HookConfig,
        slot: Slot,
        reason: &dyn fmt::Display,
        attr: &dyn Attributes,
        outcome: &mut DispatchOutcome,
    ) -> AdmissionResult<()> {
        match hook.failure_policy {
            FailurePolicy::Ignore => self.fail_open(hook, slot, reason, attr, outcome),
            FailurePolicy::Fail => Err(AdmissionError::calling_hook(&hook.name, reason.to_string())),
        }
    }
}

/// Calls validating hooks. The first denial wins and stops the dispatch.
pub struct ValidatingDispatcher {
    runner: HookRunner,
}

impl ValidatingDispatcher {
    pub fn new(matcher: Arc<Matcher>, caller: Arc<dyn WebhookCaller>) -> Self {
        Self {
            runner: HookRunner {
                matcher,
                caller,
                phase: Phase::Validating,
            },
        }
    }

    pub async fn dispatch(&self, attr: &dyn Attributes, hooks: &[HookConfig]) -> AdmissionResult<()> {
        self.dispatch_recorded(attr, hooks).await.map(|_| ())
    }

    pub async fn dispatch_recorded(&self, attr: &dyn Attributes, hooks: &[HookConfig]) -> AdmissionResult<DispatchOutcome> {
        let runner = &self.runner;
        let mut outcome = DispatchOutcome::default();
        for (index, hook) in hooks.iter().enumerate() {
            let slot = Slot { round: 0, index };
            let matched = runner.matcher.matches(hook, attr);
            if !runner.resolve_match(hook, slot, matched, attr, &mut outcome)? {
                continue;
            }
            runner.check_dry_run(hook, attr)?;

            match runner.call(hook, attr, &mut outcome).await {
                Ok(response) => runner.record_response(hook, &response, attr)?,
                Err(err) => runner.call_failed(hook, slot, &err, attr, &mut outcome)?,
            }
        }
        Ok(outcome)
    }
}

/// Calls mutating hooks, applying each returned patch before calling the
/// next hook.
pub struct MutatingDispatcher {
    runner: HookRunner,
}

impl MutatingDispatcher {
    pub fn new(matcher: Arc<Matcher>, caller: Arc<dyn WebhookCaller>) -> Self {
        Self {
            runner: HookRunner {
                matcher,
                caller,
                phase: Phase::Mutating,
            },
        }
    }

    /// Runs the hooks and returns the applied patches. The mutated object
    /// is written back into `attr`.
    pub async fn dispatch(&self, attr: &mut dyn Attributes, hooks: &[HookConfig]) -> AdmissionResult<Vec<json_patch::Patch>> {
        self.dispatch_recorded(attr, hooks).await.map(|outcome| outcome.patches)
    }

    pub async fn dispatch_recorded(
        &self,
        attr: &mut dyn Attributes,
        hooks: &[HookConfig],
    ) -> AdmissionResult<DispatchOutcome> {
        let runner = &self.runner;
        let mut outcome = DispatchOutcome::default();

        // Hooks are matched against the request as it arrived.
        let matches: Vec<Result<bool, MatchError>> =
            hooks.iter().map(|hook| runner.matcher.matches(hook, &*attr)).collect();

        let mut called = Vec::new();
        let mut previously_invoked: Vec<usize> = Vec::new();
        let mut reinvoke: HashSet<usize> = HashSet::new();

        for ((index, hook), matched) in hooks.iter().enumerate().zip(matches) {
            let slot = Slot { round: 0, index };
            if !runner.resolve_match(hook, slot, matched, &*attr, &mut outcome)? {
                continue;
            }
            runner.check_dry_run(hook, &*attr)?;
            called.push(index);

            let changed = self.call_and_patch(hook, slot, attr, &mut outcome).await?;
            if changed {
                reinvoke.extend(previously_invoked.drain(..));
            }
            if hook.reinvocation_policy() == ReinvocationPolicy::IfNeeded {
                previously_invoked.push(index);
            }
        }

        for index in called.into_iter().filter(|i| reinvoke.contains(i)) {
            let hook = &hooks[index];
            debug!(hook = %hook.name, "reinvoking webhook after later mutation");
            self.call_and_patch(hook, Slot { round: 1, index }, attr, &mut outcome)
                .await?;
        }
        Ok(outcome)
    }

    /// Calls one hook and applies its patch. Returns whether the object
    /// changed.
    async fn call_and_patch(
        &self,
        hook: &HookConfig,
        slot: Slot,
        attr: &mut dyn Attributes,
        outcome: &mut DispatchOutcome,
    ) -> AdmissionResult<bool> {
        let runner = &self.runner;
        let response = match runner.call(hook, &*attr, outcome).await {
            Ok(response) => response,
            Err(err) => {
                runner.call_failed(hook, slot, &err, &*attr, outcome)?;
                return Ok(false);
            }
        };
        runner.record_response(hook, &response, &*attr)?;

        let changed = match apply_patch(&response, &*attr) {
            Ok(None) => false,
            Ok(Some((patch, patched))) => {
                let changed = attr.get_object() != Some(&patched);
                if changed {
                    attr.set_object(patched);
                }
                outcome.patches.push(patch);
                changed
            }
            Err(reason) => {
                runner.call_failed(hook, slot, &reason, &*attr, outcome)?;
                return Ok(false);
            }
        };

        let value = json!({
            "configuration": hook.configuration_name,
            "webhook": hook.name,
            "mutated": changed,
        });
        attr.add_annotation(
            &format!(
                "{}/round_{}_index_{}",
                MUTATION_ANNOTATION_PREFIX, slot.round, slot.index
            ),
            &value.to_string(),
        )?;
        Ok(changed)
    }
}

/// Decodes the patch of a response and applies it to a copy of the
/// object. Returns `None` when the response carries no patch.
fn apply_patch(
    response: &AdmissionResponse,
    attr: &dyn Attributes,
) -> Result<Option<(json_patch::Patch, serde_json::Value)>, String> {
    if response.patch.is_empty() {
        return Ok(None);
    }
    match response.patch_type {
        Some(PatchType::JsonPatch) => {}
        None => return Err("the response specifies a patch without a patch type".to_string()),
    }
    let patch: json_patch::Patch =
        serde_json::from_slice(&response.patch).map_err(|e| format!("failed to decode patch: {}", e))?;
    let mut object = attr
        .get_object()
        .cloned()
        .ok_or_else(|| "cannot apply a patch to a request without an object".to_string())?;
    json_patch::patch(&mut object, &patch.0).map_err(|e| format!("failed to apply patch: {}", e))?;
    Ok(Some((patch, object)))
}
