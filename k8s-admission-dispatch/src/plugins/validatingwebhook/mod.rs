// Copyright 2024 The Kubernetes Authors.
// Licensed under the Apache License, Version 2.0

//! ValidatingAdmissionWebhook admission controller.
//!
//! This admission controller calls the validating webhooks published by a
//! [`HookSource`] in order. The first denial rejects the request; failing
//! hooks are handled according to their failure policy.

use super::{new_matcher, new_webhook_caller};
use crate::admission::{
    AdmissionError, AdmissionResult, Attributes, Handler, Interface, Operation, PluginDependencies,
    PluginHandle, Plugins, ValidationInterface, WebhookAdmission,
};
use crate::webhook::dispatcher::ValidatingDispatcher;
use crate::webhook::is_webhook_configuration_resource;
use crate::webhook::source::HookSource;
use async_trait::async_trait;
use std::io::Read;
use std::sync::Arc;

pub const PLUGIN_NAME: &str = "ValidatingAdmissionWebhook";

pub fn register(plugins: &Plugins) {
    plugins.register(PLUGIN_NAME, |config: Option<&mut dyn Read>, deps: &PluginDependencies| {
        let config = WebhookAdmission::load(config)?;
        Ok(PluginHandle::Validating(Arc::new(Plugin::from_dependencies(&config, deps)?)))
    });
}

pub struct Plugin {
    handler: Handler,
    source: Arc<dyn HookSource>,
    dispatcher: ValidatingDispatcher,
}

impl Plugin {
    pub fn new(source: Arc<dyn HookSource>, dispatcher: ValidatingDispatcher) -> Self {
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
            .validating_webhooks
            .clone()
            .ok_or_else(|| AdmissionError::internal_error(format!("{} requires a webhook source", PLUGIN_NAME)))?;
        let dispatcher = ValidatingDispatcher::new(new_matcher(deps), new_webhook_caller(config, deps)?);
        Ok(Self::new(source, dispatcher))
    }

    /// Resolves once the hook source has synced, or gives up after a while.
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
        if is_webhook_configuration_resource(attributes) {
            return Ok(());
        }
        if !self.wait_for_ready().await {
            return Err(AdmissionError::NotReady);
        }
        let hooks = self.source.webhooks()?;
        self.dispatcher.dispatch(attributes, &hooks).await
    }
}
