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

//! The admission controller: a plugin chain gated on the readiness of its
//! configuration sources.

use crate::admission::{AdmissionError, AdmissionResult, AttributesRecord, Chain, PluginDependencies, Plugins};
use crate::informer::StopCh;
use crate::plugins::register_all_admission_plugins;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// AdmissionController runs the admission chain for requests once every
/// configuration source has synced.
pub struct AdmissionController {
    chain: Chain,
    deps: PluginDependencies,
}

impl AdmissionController {
    pub fn new(chain: Chain, deps: PluginDependencies) -> Self {
        Self { chain, deps }
    }

    /// Builds the named plugins from the built-in registry. `configs` maps
    /// plugin names to their raw configuration.
    pub fn from_configuration(
        plugin_names: &[&str],
        configs: &HashMap<String, Vec<u8>>,
        deps: PluginDependencies,
    ) -> AdmissionResult<Self> {
        let plugins = Plugins::new();
        register_all_admission_plugins(&plugins);
        let chain = Chain::from_plugins(&plugins, plugin_names, configs, &deps)?;
        info!(plugins = ?chain.names(), "admission chain configured");
        Ok(Self::new(chain, deps))
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// True once every source has synced.
    pub fn is_ready(&self) -> bool {
        let sources_synced = self.deps.validating_webhooks.as_ref().map_or(true, |s| s.has_synced())
            && self.deps.mutating_webhooks.as_ref().map_or(true, |s| s.has_synced())
            && self.deps.policy_source.as_ref().map_or(true, |s| s.has_synced());
        sources_synced && self.chain.is_ready()
    }

    /// Waits until ready. Returns false if `timeout` passes first.
    pub async fn wait_for_ready(&self, timeout: Duration) -> bool {
        let poll = async {
            while !self.is_ready() {
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }

    /// Admits a request: mutating plugins first, then validating plugins.
    pub async fn admit(&self, attr: &mut AttributesRecord) -> AdmissionResult<()> {
        if !self.is_ready() {
            debug!(name = %attr.name, namespace = %attr.namespace, "rejecting request before sources synced");
            return Err(AdmissionError::NotReady);
        }
        self.chain.admit(attr).await
    }

    /// Drives every configuration source until `stop` closes.
    pub async fn run(&self, stop: StopCh) {
        let mut tasks: Vec<BoxFuture<'_, ()>> = Vec::new();
        if let Some(source) = &self.deps.validating_webhooks {
            tasks.push(source.run(stop.clone()));
        }
        if let Some(source) = &self.deps.mutating_webhooks {
            tasks.push(source.run(stop.clone()));
        }
        if let Some(source) = &self.deps.policy_source {
            tasks.push(source.run(stop.clone()).boxed());
        }
        info!(sources = tasks.len(), "starting admission configuration sources");
        futures::future::join_all(tasks).await;
        info!("admission configuration sources stopped");
    }
}
