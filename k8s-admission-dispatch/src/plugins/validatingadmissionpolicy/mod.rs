// Copyright 2024 The Kubernetes Authors.
// Licensed under the Apache License, Version 2.0

//! ValidatingAdmissionPolicy admission controller.

use super::new_matcher;
use crate::admission::{
    AdmissionError, AdmissionResult, Attributes, Handler, Interface, Operation, PluginDependencies,
    PluginHandle, Plugins, ValidationInterface,
};
use crate::api::admissionregistration::{ValidatingAdmissionPolicy, ValidatingAdmissionPolicyBinding};
use crate::policy::dispatcher::PolicyDispatcher;
use crate::policy::validating::PolicyEvaluator;
use async_trait::async_trait;
use std::io::Read;
use std::sync::Arc;

pub const PLUGIN_NAME: &str = "ValidatingAdmissionPolicy";

pub fn register(plugins: &Plugins) {
    plugins.register(PLUGIN_NAME, |_config: Option<&mut dyn Read>, deps: &PluginDependencies| {
        Ok(PluginHandle::Validating(Arc::new(Plugin::from_dependencies(deps)?)))
    });
}

pub struct Plugin {
    handler: Handler,
    dispatcher: PolicyDispatcher<ValidatingAdmissionPolicy, ValidatingAdmissionPolicyBinding, PolicyEvaluator>,
}

impl Plugin {
    pub fn from_dependencies(deps: &PluginDependencies) -> AdmissionResult<Self> {
        let source = deps
            .policy_source
            .clone()
            .ok_or_else(|| AdmissionError::internal_error(format!("{} requires a policy source", PLUGIN_NAME)))?;
        let mut handler = Handler::new_all();
        let synced = source.clone();
        handler.set_ready_func(Arc::new(move || synced.has_synced()));
        Ok(Self {
            handler,
            dispatcher: PolicyDispatcher::new(source, new_matcher(deps), deps.param_resolver.clone()),
        })
    }

    pub async fn wait_for_ready(&self) -> bool {
        self.handler.wait_for_ready().await
    }
}

impl Interface for Plugin {
    fn handles(&self, operation: Operation) -> bool {
        self.handler.handles(operation)
    }

    fn is_ready(&self) -> bool {
        self.handler.is_ready()
    }
}

#[async_trait]
impl ValidationInterface for Plugin {
    async fn validate(&self, attributes: &dyn Attributes) -> AdmissionResult<()> {
        if !self.wait_for_ready().await {
            return Err(AdmissionError::NotReady);
        }
        self.dispatcher.dispatch(attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::attributes::{GroupVersionKind, GroupVersionResource};
    use crate::admission::AttributesRecord;
    use crate::api::admissionregistration::Validation;
    use crate::evaluator::SimpleEvaluator;
    use crate::informer::fake::FakeListerWatcher;
    use crate::policy::validating::new_policy_source;
    use crate::webhook::namespace::StaticNamespaceLister;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        policies: Arc<FakeListerWatcher<ValidatingAdmissionPolicy>>,
        bindings: Arc<FakeListerWatcher<ValidatingAdmissionPolicyBinding>>,
        deps: PluginDependencies,
    }

    fn fixture() -> Fixture {
        let policies: Arc<FakeListerWatcher<ValidatingAdmissionPolicy>> = Arc::new(FakeListerWatcher::new());
        let bindings: Arc<FakeListerWatcher<ValidatingAdmissionPolicyBinding>> = Arc::new(FakeListerWatcher::new());
        let source = Arc::new(new_policy_source(policies.clone(), bindings.clone(), Arc::new(SimpleEvaluator)));
        let deps = PluginDependencies::new(Arc::new(StaticNamespaceLister::new(Vec::new()))).with_policy_source(source);
        Fixture {
            policies,
            bindings,
            deps,
        }
    }

    fn deployment(replicas: i64) -> AttributesRecord {
        AttributesRecord::new(
            "web",
            "",
            GroupVersionResource::new("apps", "v1", "deployments"),
            "",
            Operation::Create,
            Some(json!({"metadata": {"name": "web"}, "spec": {"replicas": replicas}})),
            None,
            GroupVersionKind::new("apps", "v1", "Deployment"),
            false,
        )
    }

    #[test]
    fn test_plugin_registration() {
        let plugins = Plugins::new();
        register(&plugins);
        assert!(plugins.is_registered(PLUGIN_NAME));

        let f = fixture();
        let plugin = plugins.new_from_plugins(PLUGIN_NAME, None, &f.deps).unwrap();
        assert!(matches!(plugin, PluginHandle::Validating(_)));
        assert!(plugin.handles(Operation::Create));
        assert!(plugin.handles(Operation::Delete));
        assert!(!plugin.is_ready());

        let without_source = PluginDependencies::new(Arc::new(StaticNamespaceLister::new(Vec::new())));
        assert!(plugins.new_from_plugins(PLUGIN_NAME, None, &without_source).is_err());
    }

    #[tokio::test]
    async fn test_validate() {
        let f = fixture();
        f.policies.add(ValidatingAdmissionPolicy::new(
            "single-replica",
            vec![Validation::new("object.spec.replicas == 1", "only one replica allowed")],
        ));
        f.bindings
            .add(ValidatingAdmissionPolicyBinding::new("single-replica-binding", "single-replica"));
        let source = f.deps.policy_source.clone().unwrap();
        let (_stop, rx) = tokio::sync::watch::channel(false);
        let runner = source.clone();
        tokio::spawn(async move { runner.run(rx).await });

        let plugin = Plugin::from_dependencies(&f.deps).unwrap();
        assert!(plugin.wait_for_ready().await);
        for _ in 0..300 {
            if !source.hooks().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        plugin.validate(&deployment(1)).await.unwrap();
        let err = plugin.validate(&deployment(3)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "ValidatingAdmissionPolicy 'single-replica' with binding 'single-replica-binding' denied request: only one replica allowed"
        );
    }
}
