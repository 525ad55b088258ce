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

//! Admission plugins module.

pub mod mutatingwebhook;
pub mod validatingadmissionpolicy;
pub mod validatingwebhook;

use crate::admission::{AdmissionResult, PluginDependencies, Plugins, WebhookAdmission};
use crate::webhook::caller::{HttpWebhookCaller, WebhookCaller};
use crate::webhook::client::ClientManager;
use crate::webhook::matcher::Matcher;
use std::sync::Arc;

/// All plugins in execution order. Mutating plugins run before validating
/// plugins regardless, so the order matters within each phase.
pub const ALL_ORDERED_PLUGINS: &[&str] = &[
    mutatingwebhook::PLUGIN_NAME,
    validatingadmissionpolicy::PLUGIN_NAME,
    validatingwebhook::PLUGIN_NAME,
];

/// Register all admission plugins.
pub fn register_all_admission_plugins(plugins: &Plugins) {
    mutatingwebhook::register(plugins);
    validatingadmissionpolicy::register(plugins);
    validatingwebhook::register(plugins);
}

fn new_matcher(deps: &PluginDependencies) -> Arc<Matcher> {
    Arc::new(Matcher::new(deps.namespace_lister.clone(), deps.evaluator.clone()))
}

/// The injected caller if there is one, otherwise an HTTPS caller using the
/// credentials the config selects.
fn new_webhook_caller(config: &WebhookAdmission, deps: &PluginDependencies) -> AdmissionResult<Arc<dyn WebhookCaller>> {
    let auth_info_resolver = config.auth_info_resolver(&deps.auth_info_resolver)?;
    if let Some(caller) = &deps.webhook_caller {
        return Ok(caller.clone());
    }
    let clients = Arc::new(ClientManager::new(auth_info_resolver, deps.service_resolver.clone()));
    Ok(Arc::new(HttpWebhookCaller::new(clients, deps.registry.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all_admission_plugins() {
        let plugins = Plugins::new();
        register_all_admission_plugins(&plugins);
        let mut expected: Vec<String> = ALL_ORDERED_PLUGINS.iter().map(|p| p.to_string()).collect();
        expected.sort();
        assert_eq!(plugins.registered_names(), expected);
    }
}
