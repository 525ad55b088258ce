// Copyright 2024 The Kubernetes Authors.
// Licensed under the Apache License, Version 2.0

//! MutatingAdmissionWebhook admission controller.
//!
//! Calls the mutating webhooks in order and applies their JSON patches to
//! the object under admission. Hooks that ask for it are reinvoked once
//! when a later hook changed the object.

use super::{new_matcher, new_webhook_caller};
use crate::admission::{
    AdmissionError, AdmissionResult, Attributes, Handler, Interface, MutationInterface, Operation,
    PluginDependencies, PluginHandle, Plugins, WebhookAdmission,
};
use crate::webhook::dispatcher::MutatingDispatcher;
use crate::webhook::is_webhook_configuration_resource;
use crate::webhook::source::HookSource;
use async_trait::async_trait;
use std::io::Read;
use std::sync::Arc;
use tracing::debug;

pub const PLUGIN_NAME: &str = "MutatingAdmissionWebhook";

pub fn register(plugins: &Plugins) {
    plugins.register(PLUGIN_NAME, |config: Option<&mut dyn Read>, deps: &PluginDependencies| {
        let config = WebhookAdmission::load(config)?;
        Ok(PluginHandle::Mutating(Arc::new(Plugin::from_dependencies(&config, deps)?)))
    });
}

pub struct Plugin {
    handler: Handler,
    source: Arc<dyn HookSource>,
    dispatcher: MutatingDispatcher,
}

impl Plugin {
    pub fn new(source: Arc<dyn HookSource>, dispatcher: MutatingDispatcher) -> Self {
        let mut handler = Handler::new_all();
        let synced = source.clone();
        handler.set_ready_func(Arc::new(move || synced.has_synced()));
        Self {
            handler,
            source,
            dispatcher,
        }
    }

    pub fn from_dependencies(config: &WebhookAdmission, deps: &PluginDependencies) -> AdmissionResult<Self> {
        let source = deps
            .mutating_webhooks
            .clone()
            .ok_or_else(|| AdmissionError::internal_error(format!("{} requires a webhook source", PLUGIN_NAME)))?;
        let dispatcher = MutatingDispatcher::new(new_matcher(deps), new_webhook_caller(config, deps)?);
        Ok(Self::new(source, dispatcher))
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
impl MutationInterface for Plugin {
    async fn admit(&self, attributes: &mut dyn Attributes) -> AdmissionResult<()> {
        if is_webhook_configuration_resource(attributes) {
            return Ok(());
        }
        if !self.wait_for_ready().await {
            return Err(AdmissionError::NotReady);
        }
        let hooks = self.source.webhooks()?;
        let patches = self.dispatcher.dispatch(attributes, &hooks).await?;
        debug!(patches = patches.len(), "mutating webhooks applied");
        Ok(())
    }
}
