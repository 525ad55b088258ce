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

//! Credentials for webhook backends read from a kubeconfig file.
//!
//! Users are looked up by the server name of the hook. For a server
//! `name.ns.svc:port` the candidates are, in order, the full server name,
//! the host without the port, `*.ns.svc`, `*.svc` and finally `*`.

use super::client::{AuthInfo, AuthInfoResolver, ClientError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct Kubeconfig {
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: User,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct User {
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "tokenFile")]
    token_file: Option<PathBuf>,
    #[serde(default)]
    client_certificate_data: Option<String>,
    #[serde(default)]
    client_certificate: Option<PathBuf>,
    #[serde(default)]
    client_key_data: Option<String>,
    #[serde(default)]
    client_key: Option<PathBuf>,
    #[serde(default)]
    certificate_authority_data: Option<String>,
}

/// KubeconfigAuthInfoResolver serves credentials from the `users` section
/// of a kubeconfig. Servers without a matching user are called
/// anonymously.
#[derive(Debug, Default)]
pub struct KubeconfigAuthInfoResolver {
    users: HashMap<String, User>,
    base_dir: Option<PathBuf>,
}

impl KubeconfigAuthInfoResolver {
    /// Loads a kubeconfig. Relative file references inside it resolve
    /// against the directory of the file.
    ///
    /// Only the JSON form of a kubeconfig is accepted. A YAML kubeconfig
    /// fails with a decode error and has to be converted first.
    pub fn from_file(path: &Path) -> Result<Self, ClientError> {
        let data = std::fs::read(path).map_err(|err| ClientError::Credentials {
            server: path.display().to_string(),
            reason: err.to_string(),
        })?;
        let mut resolver = Self::from_slice(&data)?;
        resolver.base_dir = path.parent().map(Path::to_path_buf);
        Ok(resolver)
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, ClientError> {
        let config: Kubeconfig = serde_json::from_slice(data).map_err(|err| ClientError::Credentials {
            server: "kubeconfig".to_string(),
            reason: err.to_string(),
        })?;
        let users = config
            .users
            .into_iter()
            .map(|named| (named.name, named.user))
            .collect();
        Ok(Self { users, base_dir: None })
    }

    fn lookup(&self, server: &str) -> Option<(&str, &User)> {
        candidates(server)
            .into_iter()
            .find_map(|name| self.users.get_key_value(&name))
            .map(|(name, user)| (name.as_str(), user))
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn read_file(&self, server: &str, path: &Path) -> Result<Vec<u8>, ClientError> {
        std::fs::read(self.resolve_path(path)).map_err(|err| ClientError::Credentials {
            server: server.to_string(),
            reason: format!("{}: {}", path.display(), err),
        })
    }

    fn pem(
        &self,
        server: &str,
        data: Option<&str>,
        file: Option<&Path>,
    ) -> Result<Option<Vec<u8>>, ClientError> {
        if let Some(encoded) = data {
            let decoded = STANDARD
                .decode(encoded.trim())
                .map_err(|err| ClientError::Credentials {
                    server: server.to_string(),
                    reason: err.to_string(),
                })?;
            return Ok(Some(decoded));
        }
        file.map(|path| self.read_file(server, path)).transpose()
    }
}

fn candidates(server: &str) -> Vec<String> {
    let mut names = vec![server.to_string()];
    let host = match server.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => server,
    };
    if host != server {
        names.push(host.to_string());
    }
    if let Some(rest) = host.strip_suffix(".svc") {
        if let Some((_, namespace)) = rest.split_once('.') {
            names.push(format!("*.{}.svc", namespace));
        }
        names.push("*.svc".to_string());
    }
    names.push("*".to_string());
    names
}

impl AuthInfoResolver for KubeconfigAuthInfoResolver {
    fn client_config_for(&self, server: &str) -> Result<AuthInfo, ClientError> {
        let Some((name, user)) = self.lookup(server) else {
            debug!(server, "no kubeconfig user for webhook server, calling anonymously");
            return Ok(AuthInfo::default());
        };
        debug!(server, user = name, "using kubeconfig credentials for webhook server");

        let bearer_token = match (&user.token, &user.token_file) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(path)) => {
                let raw = self.read_file(server, path)?;
                Some(String::from_utf8_lossy(&raw).trim().to_string())
            }
            (None, None) => None,
        };
        let client_certificate = self.pem(
            server,
            user.client_certificate_data.as_deref(),
            user.client_certificate.as_deref(),
        )?;
        let client_key = self.pem(server, user.client_key_data.as_deref(), user.client_key.as_deref())?;
        let ca_data = self.pem(server, user.certificate_authority_data.as_deref(), None)?;
        if client_certificate.is_some() != client_key.is_some() {
            return Err(ClientError::Credentials {
                server: server.to_string(),
                reason: "client certificate and key must be set together".to_string(),
            });
        }

        Ok(AuthInfo {
            bearer_token,
            client_certificate,
            client_key,
            ca_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver(users: serde_json::Value) -> KubeconfigAuthInfoResolver {
        let data = serde_json::to_vec(&json!({ "users": users })).unwrap();
        KubeconfigAuthInfoResolver::from_slice(&data).unwrap()
    }

    #[test]
    fn test_candidates() {
        assert_eq!(
            candidates("webhook.ns.svc:443"),
            vec!["webhook.ns.svc:443", "webhook.ns.svc", "*.ns.svc", "*.svc", "*"]
        );
        assert_eq!(candidates("hooks.example.com"), vec!["hooks.example.com", "*"]);
    }

    #[test]
    fn test_exact_match_wins() {
        let resolver = resolver(json!([
            {"name": "*", "user": {"token": "fallback"}},
            {"name": "*.ns.svc", "user": {"token": "namespace"}},
            {"name": "webhook.ns.svc:443", "user": {"token": "exact"}}
        ]));
        let auth = resolver.client_config_for("webhook.ns.svc:443").unwrap();
        assert_eq!(auth.bearer_token.as_deref(), Some("exact"));

        let auth = resolver.client_config_for("other.ns.svc:443").unwrap();
        assert_eq!(auth.bearer_token.as_deref(), Some("namespace"));

        let auth = resolver.client_config_for("hooks.example.com").unwrap();
        assert_eq!(auth.bearer_token.as_deref(), Some("fallback"));
    }

    #[test]
    fn test_no_match_is_anonymous() {
        let resolver = resolver(json!([{"name": "a.example.com", "user": {"token": "t"}}]));
        assert_eq!(resolver.client_config_for("b.example.com").unwrap(), AuthInfo::default());
    }

    #[test]
    fn test_client_certificate_data() {
        let resolver = resolver(json!([{
            "name": "hooks.example.com",
            "user": {
                "client-certificate-data": STANDARD.encode("CERT"),
                "client-key-data": STANDARD.encode("KEY")
            }
        }]));
        let auth = resolver.client_config_for("hooks.example.com:8443").unwrap();
        assert_eq!(auth.client_certificate, Some(b"CERT".to_vec()));
        assert_eq!(auth.client_key, Some(b"KEY".to_vec()));
        assert_eq!(auth.bearer_token, None);
    }

    #[test]
    fn test_certificate_without_key_is_rejected() {
        let resolver = resolver(json!([{
            "name": "*",
            "user": {"client-certificate-data": STANDARD.encode("CERT")}
        }]));
        assert!(matches!(
            resolver.client_config_for("hooks.example.com"),
            Err(ClientError::Credentials { .. })
        ));
    }

    #[test]
    fn test_invalid_kubeconfig() {
        assert!(KubeconfigAuthInfoResolver::from_slice(b"users: [").is_err());
    }

    #[test]
    fn test_yaml_kubeconfig_is_rejected() {
        let yaml = b"users:\n- name: hook.example.com\n  user:\n    token: abc\n";
        assert!(matches!(
            KubeconfigAuthInfoResolver::from_slice(yaml),
            Err(ClientError::Credentials { .. })
        ));
    }
}
