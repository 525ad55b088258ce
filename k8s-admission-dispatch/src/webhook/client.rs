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

//! HTTP clients for webhooks.
//!
//! [`ClientManager`] resolves where a hook lives, which credentials to
//! present, and hands out clients. Credentials are cached per server name
//! and clients per server name and CA bundle, so hooks served by the same
//! backend share one connection pool.

use super::HookConfig;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("webhook client config must set exactly one of url or service")]
    InvalidClientConfig,

    #[error("invalid webhook url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to resolve service {namespace}/{name}: {reason}")]
    Resolve {
        namespace: String,
        name: String,
        reason: String,
    },

    #[error("failed to load credentials for {server}: {reason}")]
    Credentials { server: String, reason: String },

    #[error("failed to build client for {server}: {reason}")]
    Build { server: String, reason: String },

    #[error("{0}")]
    Transport(String),

    #[error("the server responded with status code {code}: {body}")]
    Status { code: u16, body: String },

    #[error("call timed out after {0:?}")]
    Timeout(Duration),
}

/// AuthInfo is what the API server presents to a webhook backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthInfo {
    pub bearer_token: Option<String>,
    /// PEM encoded client certificate, used together with `client_key`.
    pub client_certificate: Option<Vec<u8>>,
    pub client_key: Option<Vec<u8>>,
    /// PEM encoded CA trusted in addition to the hook's CA bundle.
    pub ca_data: Option<Vec<u8>>,
}

/// AuthInfoResolver returns the credentials to use for a server name.
pub trait AuthInfoResolver: Send + Sync {
    fn client_config_for(&self, server: &str) -> Result<AuthInfo, ClientError>;
}

/// Presents no credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousAuthInfoResolver;

impl AuthInfoResolver for AnonymousAuthInfoResolver {
    fn client_config_for(&self, _server: &str) -> Result<AuthInfo, ClientError> {
        Ok(AuthInfo::default())
    }
}

/// ServiceResolver turns a service reference into a URL.
pub trait ServiceResolver: Send + Sync {
    fn resolve_endpoint(&self, namespace: &str, name: &str, port: i32) -> Result<Url, ClientError>;
}

/// Resolves services to their cluster DNS name.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultServiceResolver;

impl ServiceResolver for DefaultServiceResolver {
    fn resolve_endpoint(&self, namespace: &str, name: &str, port: i32) -> Result<Url, ClientError> {
        if namespace.is_empty() || name.is_empty() {
            return Err(ClientError::Resolve {
                namespace: namespace.to_string(),
                name: name.to_string(),
                reason: "service namespace and name are required".to_string(),
            });
        }
        let raw = format!("https://{}.{}.svc:{}", name, namespace, port);
        Url::parse(&raw).map_err(|err| ClientError::Resolve {
            namespace: namespace.to_string(),
            name: name.to_string(),
            reason: err.to_string(),
        })
    }
}

/// Client posts admission reviews to one hook endpoint.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    url: Url,
}

impl Client {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Posts a JSON body and returns the response body. Non-2xx responses
    /// are errors.
    pub async fn post(&self, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, ClientError> {
        let request = self
            .http
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send();

        let response = tokio::time::timeout(timeout, async {
            let response = request.await.map_err(|e| ClientError::Transport(e.to_string()))?;
            let status = response.status();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| ClientError::Transport(e.to_string()))?;
            if !status.is_success() {
                return Err(ClientError::Status {
                    code: status.as_u16(),
                    body: String::from_utf8_lossy(&bytes).into_owned(),
                });
            }
            Ok(bytes.to_vec())
        })
        .await
        .map_err(|_| ClientError::Timeout(timeout))?;
        response
    }
}

/// Where a hook lives: the credential cache key and the full URL.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub server: String,
    pub url: Url,
}

pub struct ClientManager {
    auth_info_resolver: Arc<dyn AuthInfoResolver>,
    service_resolver: Arc<dyn ServiceResolver>,
    auth_cache: Mutex<HashMap<String, AuthInfo>>,
    client_cache: Mutex<HashMap<(String, Vec<u8>), reqwest::Client>>,
}

impl ClientManager {
    pub fn new(
        auth_info_resolver: Arc<dyn AuthInfoResolver>,
        service_resolver: Arc<dyn ServiceResolver>,
    ) -> Self {
        Self {
            auth_info_resolver,
            service_resolver,
            auth_cache: Mutex::new(HashMap::new()),
            client_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves the endpoint of a hook without building a client.
    pub fn endpoint_for(&self, hook: &HookConfig) -> Result<Endpoint, ClientError> {
        let config = &hook.client_config;
        match (&config.url, &config.service) {
            (Some(raw), None) => {
                let url = Url::parse(raw).map_err(|err| ClientError::InvalidUrl {
                    url: raw.clone(),
                    reason: err.to_string(),
                })?;
                let host = url.host_str().ok_or_else(|| ClientError::InvalidUrl {
                    url: raw.clone(),
                    reason: "missing host".to_string(),
                })?;
                let server = match url.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                };
                Ok(Endpoint { server, url })
            }
            (None, Some(service)) => {
                let port = service.port_or_default();
                let mut url = self
                    .service_resolver
                    .resolve_endpoint(&service.namespace, &service.name, port)?;
                if let Some(path) = &service.path {
                    url.set_path(path);
                }
                Ok(Endpoint {
                    server: format!("{}:{}", service.host(), port),
                    url,
                })
            }
            _ => Err(ClientError::InvalidClientConfig),
        }
    }

    /// Returns a client for the hook, resolving credentials and building
    /// the HTTP client on first use of its backend.
    pub fn client_for(&self, hook: &HookConfig) -> Result<Client, ClientError> {
        let endpoint = self.endpoint_for(hook)?;
        let cache_key = (endpoint.server.clone(), hook.client_config.ca_bundle.clone());

        if let Some(http) = self.client_cache.lock().get(&cache_key) {
            return Ok(Client {
                http: http.clone(),
                url: endpoint.url,
            });
        }

        let auth = self.auth_info_for(&endpoint.server)?;
        let http = build_http_client(&endpoint.server, &hook.client_config.ca_bundle, &auth)?;
        let http = self
            .client_cache
            .lock()
            .entry(cache_key)
            .or_insert(http)
            .clone();
        debug!(hook = %hook.name, server = %endpoint.server, "built webhook client");
        Ok(Client {
            http,
            url: endpoint.url,
        })
    }

    fn auth_info_for(&self, server: &str) -> Result<AuthInfo, ClientError> {
        if let Some(auth) = self.auth_cache.lock().get(server) {
            return Ok(auth.clone());
        }
        let auth = self.auth_info_resolver.client_config_for(server)?;
        Ok(self
            .auth_cache
            .lock()
            .entry(server.to_string())
            .or_insert(auth)
            .clone())
    }

    /// Drops every cached credential and client.
    pub fn invalidate(&self) {
        self.auth_cache.lock().clear();
        self.client_cache.lock().clear();
    }
}

fn build_http_client(server: &str, ca_bundle: &[u8], auth: &AuthInfo) -> Result<reqwest::Client, ClientError> {
    let build_err = |reason: String| ClientError::Build {
        server: server.to_string(),
        reason,
    };

    let mut builder = reqwest::Client::builder().use_rustls_tls();
    if !ca_bundle.is_empty() {
        let ca = reqwest::Certificate::from_pem(ca_bundle).map_err(|e| build_err(e.to_string()))?;
        builder = builder.tls_built_in_root_certs(false).add_root_certificate(ca);
    }
    if let Some(extra) = &auth.ca_data {
        let ca = reqwest::Certificate::from_pem(extra).map_err(|e| build_err(e.to_string()))?;
        builder = builder.add_root_certificate(ca);
    }
    if let (Some(cert), Some(key)) = (&auth.client_certificate, &auth.client_key) {
        let mut pem = cert.clone();
        pem.push(b'\n');
        pem.extend_from_slice(key);
        let identity = reqwest::Identity::from_pem(&pem).map_err(|e| build_err(e.to_string()))?;
        builder = builder.identity(identity);
    }
    if let Some(token) = &auth.bearer_token {
        let mut headers = HeaderMap::new();
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| build_err(e.to_string()))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
        builder = builder.default_headers(headers);
    }
    builder.build().map_err(|e| build_err(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::admissionregistration::{ServiceReference, WebhookClientConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts resolutions per server.
    #[derive(Default)]
    struct CountingResolver {
        calls: AtomicUsize,
        servers: Mutex<Vec<String>>,
    }

    impl AuthInfoResolver for CountingResolver {
        fn client_config_for(&self, server: &str) -> Result<AuthInfo, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.servers.lock().push(server.to_string());
            Ok(AuthInfo {
                bearer_token: Some("secret".to_string()),
                ..Default::default()
            })
        }
    }

    fn manager(resolver: Arc<CountingResolver>) -> ClientManager {
        ClientManager::new(resolver, Arc::new(DefaultServiceResolver))
    }

    #[test]
    fn test_credentials_resolved_once_per_server() {
        let resolver = Arc::new(CountingResolver::default());
        let clients = manager(resolver.clone());
        let hooks: Vec<HookConfig> = ["allow", "disallow", "internalErr"]
            .iter()
            .map(|path| {
                HookConfig::validating(
                    &format!("{}.example.com", path),
                    WebhookClientConfig::url(&format!("https://webhook.example.com:8443/{}", path)),
                )
            })
            .collect();

        for _ in 0..5 {
            for hook in &hooks {
                let client = clients.client_for(hook).unwrap();
                assert!(client.url().path().ends_with(hook.name.split('.').next().unwrap()));
            }
        }
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.servers.lock().clone(), vec!["webhook.example.com:8443".to_string()]);
    }

    #[test]
    fn test_distinct_servers_resolve_separately() {
        let resolver = Arc::new(CountingResolver::default());
        let clients = manager(resolver.clone());
        let a = HookConfig::validating("a.example.com", WebhookClientConfig::url("https://a.example.com/x"));
        let b = HookConfig::validating("b.example.com", WebhookClientConfig::url("https://b.example.com/x"));
        clients.client_for(&a).unwrap();
        clients.client_for(&b).unwrap();
        clients.client_for(&a).unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);

        clients.invalidate();
        clients.client_for(&a).unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_service_endpoint() {
        let clients = manager(Arc::new(CountingResolver::default()));
        let mut service = ServiceReference::new("webhooks", "validator");
        service.path = Some("/validate".to_string());
        service.port = Some(8443);
        let hook = HookConfig::validating("v.example.com", WebhookClientConfig::service(service));

        let endpoint = clients.endpoint_for(&hook).unwrap();
        assert_eq!(endpoint.server, "validator.webhooks.svc:8443");
        assert_eq!(endpoint.url.as_str(), "https://validator.webhooks.svc:8443/validate");
    }

    #[test]
    fn test_url_endpoint_without_port() {
        let clients = manager(Arc::new(CountingResolver::default()));
        let hook = HookConfig::validating("u.example.com", WebhookClientConfig::url("https://hooks.example.com/check"));
        assert_eq!(clients.endpoint_for(&hook).unwrap().server, "hooks.example.com");
    }

    #[test]
    fn test_invalid_client_configs() {
        let clients = manager(Arc::new(CountingResolver::default()));
        let neither = HookConfig::validating("n.example.com", WebhookClientConfig::default());
        assert!(matches!(clients.client_for(&neither), Err(ClientError::InvalidClientConfig)));

        let bad_url = HookConfig::validating("b.example.com", WebhookClientConfig::url("not a url"));
        assert!(matches!(clients.client_for(&bad_url), Err(ClientError::InvalidUrl { .. })));
    }
}
