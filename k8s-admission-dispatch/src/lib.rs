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

//! Kubernetes admission webhook and policy dispatch.
//!
//! This crate decides which dynamically configured admission webhooks and
//! validating admission policies apply to a request, calls or evaluates
//! them, and turns the results into an admission decision. Configuration
//! objects are kept current by informers; webhooks are called over HTTPS
//! with per-backend credentials.

pub mod admission;
pub mod api;
pub mod controller;
pub mod evaluator;
pub mod informer;
pub mod plugins;
pub mod policy;
pub mod webhook;

// Re-export commonly used types
pub use admission::{
    AdmissionError, AdmissionResult, Attributes, AttributesRecord, Chain, Handler, Interface, MutationInterface,
    Operation, PluginDependencies, Plugins, ValidationInterface,
};
pub use controller::AdmissionController;
pub use policy::dispatcher::PolicyDispatcher;
pub use webhook::client::ClientManager;
pub use webhook::dispatcher::{MutatingDispatcher, ValidatingDispatcher};
pub use webhook::matcher::Matcher;
pub use webhook::source::HookSource;
pub use webhook::HookConfig;
