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

//! Registry of AdmissionReview wire versions.

use super::AdmissionReview;
use std::collections::HashMap;
use thiserror::Error;

/// Errors converting between the hub review and a wire version.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("admission review version {0:?} is not registered")]
    UnknownVersion(String),

    #[error("{version} admission reviews cannot carry {field}")]
    UnsupportedField {
        version: &'static str,
        field: &'static str,
    },

    #[error("failed to encode {version} admission review: {source}")]
    Encode {
        version: &'static str,
        source: serde_json::Error,
    },

    #[error("failed to decode {version} admission review: {source}")]
    Decode {
        version: &'static str,
        source: serde_json::Error,
    },

    #[error("expected admission review apiVersion {expected:?}, got {actual:?}")]
    VersionMismatch {
        expected: &'static str,
        actual: String,
    },
}

pub type EncodeReviewFn = fn(&AdmissionReview) -> Result<Vec<u8>, ConversionError>;
pub type DecodeReviewFn = fn(&[u8]) -> Result<AdmissionReview, ConversionError>;

/// Conversions bundles the codec of one wire version.
#[derive(Debug, Clone, Copy)]
pub struct Conversions {
    /// Version tag as listed in `admissionReviewVersions`, e.g. `v1`.
    pub version: &'static str,
    /// Full apiVersion on the wire, e.g. `admission.k8s.io/v1`.
    pub api_version: &'static str,
    pub encode_review: EncodeReviewFn,
    pub decode_review: DecodeReviewFn,
}

/// Registry maps version tags to their conversions.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    conversions: HashMap<&'static str, Conversions>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every version this crate speaks.
    pub fn standard() -> Self {
        Self::new()
            .register(super::v1::conversions())
            .register(super::v1beta1::conversions())
            .register(super::v1alpha1::conversions())
    }

    pub fn register(mut self, conversions: Conversions) -> Self {
        self.conversions.insert(conversions.version, conversions);
        self
    }

    pub fn get(&self, version: &str) -> Option<&Conversions> {
        self.conversions.get(version)
    }

    /// Picks the first version in preference order that is registered.
    pub fn negotiate(&self, preferred: &[String]) -> Option<&Conversions> {
        preferred.iter().find_map(|version| self.get(version))
    }

    pub fn encode(&self, version: &str, review: &AdmissionReview) -> Result<Vec<u8>, ConversionError> {
        let conversions = self
            .get(version)
            .ok_or_else(|| ConversionError::UnknownVersion(version.to_string()))?;
        (conversions.encode_review)(review)
    }

    pub fn decode(&self, version: &str, data: &[u8]) -> Result<AdmissionReview, ConversionError> {
        let conversions = self
            .get(version)
            .ok_or_else(|| ConversionError::UnknownVersion(version.to_string()))?;
        (conversions.decode_review)(data)
    }

    pub fn versions(&self) -> Vec<&'static str> {
        let mut versions: Vec<_> = self.conversions.keys().copied().collect();
        versions.sort_unstable();
        versions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_standard_registry() {
        let registry = Registry::standard();
        assert_eq!(registry.versions(), vec!["v1", "v1alpha1", "v1beta1"]);
        assert_eq!(registry.get("v1").unwrap().api_version, "admission.k8s.io/v1");
    }

    #[test]
    fn test_negotiate_uses_first_known_version() {
        let registry = Registry::standard();
        let picked = registry.negotiate(&versions(&["v2", "v1beta1", "v1"])).unwrap();
        assert_eq!(picked.version, "v1beta1");
        assert!(registry.negotiate(&versions(&["v2", "v3"])).is_none());
    }

    #[test]
    fn test_unknown_version() {
        let registry = Registry::new().register(super::super::v1::conversions());
        let err = registry.encode("v1beta1", &AdmissionReview::default()).unwrap_err();
        assert!(matches!(err, ConversionError::UnknownVersion(v) if v == "v1beta1"));
    }
}
