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

//! Configuration file of the webhook admission plugins.

use super::errors::{AdmissionError, AdmissionResult};
use crate::webhook::authentication::KubeconfigAuthInfoResolver;
use crate::webhook::client::AuthInfoResolver;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

/// WebhookAdmission configures how webhook plugins authenticate to
/// their backends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAdmission {
    /// Kubeconfig holding per-backend credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_config_file: Option<PathBuf>,
}

impl WebhookAdmission {
    /// Reads the configuration. A missing or blank config yields the default.
    pub fn load(config: Option<&mut dyn Read>) -> AdmissionResult<Self> {
        let reader = match config {
            Some(reader) => reader,
            None => return Ok(Self::default()),
        };
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| AdmissionError::bad_request(format!("failed to read webhook admission config: {}", e)))?;
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(&data)
            .map_err(|e| AdmissionError::bad_request(format!("invalid webhook admission config: {}", e)))
    }

    /// The resolver named by `kubeConfigFile`, or `fallback` when unset.
    pub fn auth_info_resolver(
        &self,
        fallback: &Arc<dyn AuthInfoResolver>,
    ) -> AdmissionResult<Arc<dyn AuthInfoResolver>> {
        match &self.kube_config_file {
            None => Ok(fallback.clone()),
            Some(path) => {
                let resolver = KubeconfigAuthInfoResolver::from_file(path)
                    .map_err(|e| AdmissionError::internal_error(e.to_string()))?;
                Ok(Arc::new(resolver))
            }
        }
    }
}
