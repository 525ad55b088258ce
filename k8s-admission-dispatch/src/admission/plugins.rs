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

//! Plugin registry for admission controllers.

use super::errors::{AdmissionError, AdmissionResult};
use super::interfaces::{MutationInterface, Operation, ValidationInterface};
use crate::api::admission::registry::Registry;
use crate::api::admissionregistration::{
    MutatingWebhookConfiguration, ValidatingAdmissionPolicyBinding, ValidatingAdmissionPolicy,
    ValidatingWebhookConfiguration,
};
use crate::evaluator::{Evaluator, SimpleEvaluator};
use crate::informer::ListerWatcher;
use crate::policy::dispatcher::{ParamResolver, StaticParamResolver};
use crate::policy::validating::{new_policy_source, ValidatingPolicySource};
use crate::webhook::caller::WebhookCaller;
use crate::webhook::client::{AnonymousAuthInfoResolver, AuthInfoResolver, DefaultServiceResolver, ServiceResolver};
use crate::webhook::namespace::NamespaceLister;
use crate::webhook::source::{ConfigurationHookSource, HookSource};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

/// Factory is a function that creates an admission plugin instance from its
/// optional configuration and the injected collaborators.
pub type Factory = fn(config: Option<&mut dyn Read>, deps: &PluginDependencies) -> AdmissionResult<PluginHandle>;

/// PluginHandle is a constructed plugin, typed by the admission phase it
/// takes part in.
#[derive(Clone)]
pub enum PluginHandle {
    Mutating(Arc<dyn MutationInterface>),
    Validating(Arc<dyn ValidationInterface>),
}

impl PluginHandle {
    pub fn handles(&self, operation: Operation) -> bool {
        match self {
            PluginHandle::Mutating(plugin) => plugin.handles(operation),
            PluginHandle::Validating(plugin) => plugin.handles(operation),
        }
    }

    pub fn is_ready(&self) -> bool {
        match self {
            PluginHandle::Mutating(plugin) => plugin.is_ready(),
            PluginHandle::Validating(plugin) => plugin.is_ready(),
        }
    }
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginHandle::Mutating(_) => f.write_str("PluginHandle::Mutating"),
            PluginHandle::Validating(_) => f.write_str("PluginHandle::Validating"),
        }
    }
}

/// PluginDependencies carries everything a plugin factory may need. The
/// configuration sources are optional; a plugin whose source is missing
/// fails to build.
#[derive(Clone)]
pub struct PluginDependencies {
    pub auth_info_resolver: Arc<dyn AuthInfoResolver>,
    pub service_resolver: Arc<dyn ServiceResolver>,
    pub evaluator: Arc<dyn Evaluator>,
    pub namespace_lister: Arc<dyn NamespaceLister>,
    pub registry: Arc<Registry>,
    /// Replaces the HTTP caller when set.
    pub webhook_caller: Option<Arc<dyn WebhookCaller>>,
    pub validating_webhooks: Option<Arc<dyn HookSource>>,
    pub mutating_webhooks: Option<Arc<dyn HookSource>>,
    pub policy_source: Option<Arc<ValidatingPolicySource>>,
    pub param_resolver: Arc<dyn ParamResolver>,
}

impl PluginDependencies {
    /// Dependencies with anonymous credentials, in-cluster service
    /// resolution, the standard review versions and no sources.
    pub fn new(namespace_lister: Arc<dyn NamespaceLister>) -> Self {
        Self {
            auth_info_resolver: Arc::new(AnonymousAuthInfoResolver),
            service_resolver: Arc::new(DefaultServiceResolver),
            evaluator: Arc::new(SimpleEvaluator),
            namespace_lister,
            registry: Arc::new(Registry::standard()),
            webhook_caller: None,
            validating_webhooks: None,
            mutating_webhooks: None,
            policy_source: None,
            param_resolver: Arc::new(StaticParamResolver::new()),
        }
    }

    pub fn with_auth_info_resolver(mut self, resolver: Arc<dyn AuthInfoResolver>) -> Self {
        self.auth_info_resolver = resolver;
        self
    }

    pub fn with_service_resolver(mut self, resolver: Arc<dyn ServiceResolver>) -> Self {
        self.service_resolver = resolver;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_webhook_caller(mut self, caller: Arc<dyn WebhookCaller>) -> Self {
        self.webhook_caller = Some(caller);
        self
    }

    pub fn with_validating_webhooks(mut self, source: Arc<dyn HookSource>) -> Self {
        self.validating_webhooks = Some(source);
        self
    }

    pub fn with_mutating_webhooks(mut self, source: Arc<dyn HookSource>) -> Self {
        self.mutating_webhooks = Some(source);
        self
    }

    pub fn with_policy_source(mut self, source: Arc<ValidatingPolicySource>) -> Self {
        self.policy_source = Some(source);
        self
    }

    pub fn with_param_resolver(mut self, resolver: Arc<dyn ParamResolver>) -> Self {
        self.param_resolver = resolver;
        self
    }

    /// Builds informer-backed sources for all configuration kinds.
    pub fn with_lister_watchers(
        self,
        validating: Arc<dyn ListerWatcher<ValidatingWebhookConfiguration>>,
        mutating: Arc<dyn ListerWatcher<MutatingWebhookConfiguration>>,
        policies: Arc<dyn ListerWatcher<ValidatingAdmissionPolicy>>,
        bindings: Arc<dyn ListerWatcher<ValidatingAdmissionPolicyBinding>>,
    ) -> Self {
        let policy_source = Arc::new(new_policy_source(policies, bindings, self.evaluator.clone()));
        self.with_validating_webhooks(Arc::new(ConfigurationHookSource::new(
            "validatingwebhookconfigurations",
            validating,
        )))
        .with_mutating_webhooks(Arc::new(ConfigurationHookSource::new(
            "mutatingwebhookconfigurations",
            mutating,
        )))
        .with_policy_source(policy_source)
    }
}

/// Plugins is a registry of admission plugins.
#[derive(Default)]
pub struct Plugins {
    registry: RwLock<HashMap<String, Factory>>,
}

impl Plugins {
    /// Create a new empty plugin registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new admission plugin with the given name and factory.
    pub fn register(&self, name: &str, factory: Factory) {
        self.registry.write().insert(name.to_string(), factory);
    }

    /// Get a factory for the given plugin name.
    pub fn get_factory(&self, name: &str) -> Option<Factory> {
        self.registry.read().get(name).copied()
    }

    /// Get all registered plugin names, sorted.
    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a plugin is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.read().contains_key(name)
    }

    /// Create a new instance of the named plugin.
    pub fn new_from_plugins(
        &self,
        name: &str,
        config: Option<&mut dyn Read>,
        deps: &PluginDependencies,
    ) -> AdmissionResult<PluginHandle> {
        let factory = self
            .get_factory(name)
            .ok_or_else(|| AdmissionError::internal_error(format!("unknown admission plugin: {}", name)))?;
        factory(config, deps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{Attributes, Handler, Interface};
    use crate::webhook::namespace::StaticNamespaceLister;
    use async_trait::async_trait;

    struct TestPlugin {
        handler: Handler,
    }

    impl Interface for TestPlugin {
        fn handles(&self, operation: Operation) -> bool {
            self.handler.handles(operation)
        }
    }

    #[async_trait]
    impl ValidationInterface for TestPlugin {
        async fn validate(&self, _attributes: &dyn Attributes) -> AdmissionResult<()> {
            Ok(())
        }
    }

    fn test_factory(_config: Option<&mut dyn Read>, _deps: &PluginDependencies) -> AdmissionResult<PluginHandle> {
        Ok(PluginHandle::Validating(Arc::new(TestPlugin {
            handler: Handler::new_create_update(),
        })))
    }

    fn deps() -> PluginDependencies {
        PluginDependencies::new(Arc::new(StaticNamespaceLister::new(Vec::new())))
    }

    #[test]
    fn test_plugins_register() {
        let plugins = Plugins::new();
        plugins.register("TestPlugin", test_factory);

        assert!(plugins.is_registered("TestPlugin"));
        assert!(!plugins.is_registered("Unknown"));
        assert_eq!(plugins.registered_names(), vec!["TestPlugin".to_string()]);
    }

    #[test]
    fn test_plugins_new_from_plugins() {
        let plugins = Plugins::new();
        plugins.register("TestPlugin", test_factory);

        let plugin = plugins.new_from_plugins("TestPlugin", None, &deps()).unwrap();
        assert!(matches!(plugin, PluginHandle::Validating(_)));
        assert!(plugin.handles(Operation::Create));
        assert!(plugin.handles(Operation::Update));
        assert!(!plugin.handles(Operation::Delete));
        assert!(plugin.is_ready());
    }

    #[test]
    fn test_plugins_unknown_plugin() {
        let plugins = Plugins::new();
        let err = plugins.new_from_plugins("Unknown", None, &deps()).unwrap_err();
        assert_eq!(err.to_string(), "internal error: unknown admission plugin: Unknown");
    }
}
