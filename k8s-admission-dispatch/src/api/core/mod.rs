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


//! Core API types read by the dispatch core.

use super::meta::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Resource name of the Namespace kind.
pub const NAMESPACES_RESOURCE: &str = "namespaces";

/// Namespace provides a scope for names. Only its metadata matters for
/// admission: namespace selectors match against its labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    #[serde(default)]
    pub metadata: ObjectMeta,
}

impl Namespace {
    pub fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        Self {
            metadata: ObjectMeta::named(name).with_labels(labels),
        }
    }
}

impl crate::informer::Resource for Namespace {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
