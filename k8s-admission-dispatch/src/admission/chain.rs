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

//! Ordered execution of admission plugins.

use super::attributes::Attributes;
use super::errors::AdmissionResult;
use super::plugins::{PluginDependencies, PluginHandle, Plugins};
use std::collections::HashMap;
use std::io::Read;
use tracing::debug;

/// Chain runs every mutating plugin, in order, before any validating
/// plugin. Plugins that do not handle the operation are skipped.
#[derive(Debug, Default, Clone)]
pub struct Chain {
    plugins: Vec<(String, PluginHandle)>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the named plugins in order. `configs` holds the raw
    /// configuration of each plugin by name.
    pub fn from_plugins(
        registry: &Plugins,
        names: &[&str],
        configs: &HashMap<String, Vec<u8>>,
        deps: &PluginDependencies,
    ) -> AdmissionResult<Self> {
        let mut chain = Self::new();
        for name in names {
            let mut config = configs.get(*name).map(Vec::as_slice);
            let reader = config.as_mut().map(|data| data as &mut dyn Read);
            chain.push(name, registry.new_from_plugins(name, reader, deps)?);
        }
        Ok(chain)
    }

    pub fn push(&mut self, name: &str, plugin: PluginHandle) {
        self.plugins.push((name.to_string(), plugin));
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn is_ready(&self) -> bool {
        self.plugins.iter().all(|(_, plugin)| plugin.is_ready())
    }

    /// Runs the chain. The first error ends admission.
    pub async fn admit(&self, attr: &mut dyn Attributes) -> AdmissionResult<()> {
        let operation = attr.get_operation();
        for (name, plugin) in &self.plugins {
            if let PluginHandle::Mutating(plugin) = plugin {
                if plugin.handles(operation) {
                    debug!(plugin = %name, %operation, "running mutating plugin");
                    plugin.admit(attr).await?;
                }
            }
        }
        for (name, plugin) in &self.plugins {
            if let PluginHandle::Validating(plugin) = plugin {
                if plugin.handles(operation) {
                    debug!(plugin = %name, %operation, "running validating plugin");
                    plugin.validate(attr).await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::attributes::{GroupVersionKind, GroupVersionResource};
    use crate::admission::{
        AdmissionError, AttributesRecord, Handler, Interface, MutationInterface, Operation, ValidationInterface,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    struct Recorder {
        name: &'static str,
        handler: Handler,
        log: Arc<Mutex<Vec<&'static str>>>,
        deny: bool,
    }

    impl Recorder {
        fn new(name: &'static str, operations: &[Operation], log: &Arc<Mutex<Vec<&'static str>>>) -> Self {
            Self {
                name,
                handler: Handler::new(operations),
                log: log.clone(),
                deny: false,
            }
        }

        fn denying(mut self) -> Self {
            self.deny = true;
            self
        }

        fn record(&self) -> AdmissionResult<()> {
            self.log.lock().push(self.name);
            if self.deny {
                return Err(AdmissionError::bad_request(format!("{} denied", self.name)));
            }
            Ok(())
        }
    }

    impl Interface for Recorder {
        fn handles(&self, operation: Operation) -> bool {
            self.handler.handles(operation)
        }
    }

    #[async_trait]
    impl MutationInterface for Recorder {
        async fn admit(&self, _attributes: &mut dyn Attributes) -> AdmissionResult<()> {
            self.record()
        }
    }

    #[async_trait]
    impl ValidationInterface for Recorder {
        async fn validate(&self, _attributes: &dyn Attributes) -> AdmissionResult<()> {
            self.record()
        }
    }

    fn attrs(operation: Operation) -> AttributesRecord {
        AttributesRecord::new(
            "pod",
            "default",
            GroupVersionResource::new("", "v1", "pods"),
            "",
            operation,
            Some(json!({"metadata": {"name": "pod"}})),
            None,
            GroupVersionKind::new("", "v1", "Pod"),
            false,
        )
    }

    #[tokio::test]
    async fn test_mutating_before_validating() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let all = [Operation::Create, Operation::Update, Operation::Delete];
        let mut chain = Chain::new();
        chain.push("v1", PluginHandle::Validating(Arc::new(Recorder::new("v1", &all, &log))));
        chain.push("m1", PluginHandle::Mutating(Arc::new(Recorder::new("m1", &all, &log))));
        chain.push("v2", PluginHandle::Validating(Arc::new(Recorder::new("v2", &all, &log))));
        chain.push("m2", PluginHandle::Mutating(Arc::new(Recorder::new("m2", &all, &log))));
        assert_eq!(chain.names(), vec!["v1", "m1", "v2", "m2"]);

        chain.admit(&mut attrs(Operation::Create)).await.unwrap();
        assert_eq!(*log.lock(), vec!["m1", "m2", "v1", "v2"]);
    }

    #[tokio::test]
    async fn test_skips_unhandled_operations() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = Chain::new();
        chain.push(
            "create-only",
            PluginHandle::Validating(Arc::new(Recorder::new("create-only", &[Operation::Create], &log).denying())),
        );
        chain.push(
            "delete-only",
            PluginHandle::Mutating(Arc::new(Recorder::new("delete-only", &[Operation::Delete], &log))),
        );

        chain.admit(&mut attrs(Operation::Delete)).await.unwrap();
        assert_eq!(*log.lock(), vec!["delete-only"]);
    }

    #[tokio::test]
    async fn test_first_error_ends_admission() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let all = [Operation::Create];
        let mut chain = Chain::new();
        chain.push("m1", PluginHandle::Mutating(Arc::new(Recorder::new("m1", &all, &log).denying())));
        chain.push("v1", PluginHandle::Validating(Arc::new(Recorder::new("v1", &all, &log))));

        let err = chain.admit(&mut attrs(Operation::Create)).await.unwrap_err();
        assert_eq!(err.to_string(), "m1 denied");
        assert_eq!(*log.lock(), vec!["m1"]);
    }
}
