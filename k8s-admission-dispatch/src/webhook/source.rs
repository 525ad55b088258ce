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

//! Sources of webhook configuration.

use super::HookConfig;
use crate::admission::{AdmissionError, AdmissionResult};
use crate::api::admissionregistration::{MutatingWebhookConfiguration, ValidatingWebhookConfiguration};
use crate::informer::{stopped, Informer, ListerWatcher, Notification, Resource, StopCh, Store};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// HookSource publishes the current list of hooks.
#[async_trait]
pub trait HookSource: Send + Sync {
    /// The hooks in dispatch order.
    fn webhooks(&self) -> AdmissionResult<Arc<Vec<HookConfig>>>;

    /// Keeps the source current until `stop` closes.
    async fn run(&self, stop: StopCh);

    fn has_synced(&self) -> bool;
}

/// WebhookConfiguration is a configuration object holding hooks.
pub trait WebhookConfiguration: Resource {
    fn hooks(&self) -> Vec<HookConfig>;
}

impl WebhookConfiguration for ValidatingWebhookConfiguration {
    fn hooks(&self) -> Vec<HookConfig> {
        self.webhooks
            .iter()
            .enumerate()
            .map(|(i, hook)| HookConfig::from_validating(&self.metadata.name, i, hook))
            .collect()
    }
}

impl WebhookConfiguration for MutatingWebhookConfiguration {
    fn hooks(&self) -> Vec<HookConfig> {
        self.webhooks
            .iter()
            .enumerate()
            .map(|(i, hook)| HookConfig::from_mutating(&self.metadata.name, i, hook))
            .collect()
    }
}

/// Flattens configurations sorted by name, keeping hook order within each.
fn flatten<C: WebhookConfiguration>(mut configurations: Vec<C>) -> Vec<HookConfig> {
    configurations.sort_by(|a, b| a.meta().name.cmp(&b.meta().name));
    configurations.iter().flat_map(|c| c.hooks()).collect()
}

/// ConfigurationHookSource follows webhook configuration objects through an
/// informer and republishes the flattened hook list on every change.
pub struct ConfigurationHookSource<C: WebhookConfiguration> {
    informer: Arc<Informer<C>>,
    hooks: Arc<RwLock<Arc<Vec<HookConfig>>>>,
}

impl<C: WebhookConfiguration> ConfigurationHookSource<C> {
    pub fn new(name: &str, lister_watcher: Arc<dyn ListerWatcher<C>>) -> Self {
        Self::from_informer(Arc::new(Informer::new(name, lister_watcher)))
    }

    pub fn from_informer(informer: Arc<Informer<C>>) -> Self {
        let hooks = Arc::new(RwLock::new(Arc::new(Vec::new())));
        let store: Arc<Store<C>> = informer.store().clone();
        let published = hooks.clone();
        informer.add_event_handler(Arc::new(move |changes: &[Notification<C>]| {
            let rebuilt = Arc::new(flatten(store.list()));
            debug!(changes = changes.len(), hooks = rebuilt.len(), "rebuilt webhook list");
            *published.write() = rebuilt;
        }));
        Self { informer, hooks }
    }

    pub fn informer(&self) -> &Arc<Informer<C>> {
        &self.informer
    }
}

#[async_trait]
impl<C: WebhookConfiguration> HookSource for ConfigurationHookSource<C> {
    fn webhooks(&self) -> AdmissionResult<Arc<Vec<HookConfig>>> {
        Ok(self.hooks.read().clone())
    }

    async fn run(&self, stop: StopCh) {
        self.informer.run(stop).await;
    }

    fn has_synced(&self) -> bool {
        self.informer.has_synced()
    }
}

/// StaticHookSource serves a fixed hook list, optionally failing instead.
#[derive(Debug, Default)]
pub struct StaticHookSource {
    hooks: RwLock<Arc<Vec<HookConfig>>>,
    error: RwLock<Option<String>>,
    unsynced: AtomicBool,
}

impl StaticHookSource {
    pub fn new(hooks: Vec<HookConfig>) -> Self {
        Self {
            hooks: RwLock::new(Arc::new(hooks)),
            ..Default::default()
        }
    }

    pub fn from_configurations<C: WebhookConfiguration>(configurations: Vec<C>) -> Self {
        Self::new(flatten(configurations))
    }

    pub fn set_hooks(&self, hooks: Vec<HookConfig>) {
        *self.hooks.write() = Arc::new(hooks);
    }

    /// Makes `webhooks` fail with `message` until cleared with `None`.
    pub fn set_error(&self, message: Option<&str>) {
        *self.error.write() = message.map(str::to_string);
    }

    pub fn set_synced(&self, synced: bool) {
        self.unsynced.store(!synced, Ordering::SeqCst);
    }
}

#[async_trait]
impl HookSource for StaticHookSource {
    fn webhooks(&self) -> AdmissionResult<Arc<Vec<HookConfig>>> {
        if let Some(message) = self.error.read().as_ref() {
            return Err(AdmissionError::internal_error(message.clone()));
        }
        Ok(self.hooks.read().clone())
    }

    async fn run(&self, mut stop: StopCh) {
        stopped(&mut stop).await;
    }

    fn has_synced(&self) -> bool {
        !self.unsynced.load(Ordering::SeqCst)
    }
}
