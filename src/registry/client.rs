// Registry client for the Docker Registry HTTP API v2.
//
// Every registry call goes through `RegistryClient::execute_url`, which
// attaches credentials, sets the API version header, and recovers from at
// most one 401 per request by resolving the authentication challenge.

use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{RegistryError, Result};
use crate::registry::auth::AuthSession;
use crate::registry::transport::{RequestBody, TransportOptions, build_http_client};
use reqwest::header::{CONTENT_LENGTH, HeaderMap, WWW_AUTHENTICATE};
use reqwest::{Client, Method, Response, StatusCode};
use tracing::{debug, trace, warn};

pub const API_VERSION_HEADER: &str = "Docker-Distribution-API-Version";
pub const API_VERSION: &str = "registry/2.0";
pub const DOCKER_HUB_ENDPOINT: &str = "https://registry-1.docker.io";

/// Turn a registry host as typed by users into an API base URL.
///
/// Empty input and the bare Docker Hub names map to the canonical endpoint;
/// hosts without a scheme are assumed to speak HTTPS.
pub fn normalize_registry_url(registry: &str) -> Result<String> {
    let registry = registry.trim().trim_end_matches('/');
    let with_scheme = match registry {
        "" | "docker.io" | "index.docker.io" | "registry-1.docker.io" => DOCKER_HUB_ENDPOINT.to_string(),
        r if r.starts_with("http://") || r.starts_with("https://") => r.to_string(),
        r => format!("https://{}", r),
    };

    let parsed = url::Url::parse(&with_scheme)
        .map_err(|e| RegistryError::Validation(format!("Invalid registry URL {:?}: {}", registry, e)))?;
    if parsed.host_str().is_none() {
        return Err(RegistryError::Validation(format!("Registry URL has no host: {:?}", registry)));
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

pub struct RegistryClientBuilder {
    address: String,
    username: Option<String>,
    password: Option<String>,
    proxy: Option<String>,
    options: TransportOptions,
    http_client: Option<Client>,
}

impl RegistryClientBuilder {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            username: None,
            password: None,
            proxy: None,
            options: TransportOptions::default(),
            http_client: None,
        }
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_options(mut self, options: TransportOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a ready-made transport instead of building one from the proxy setting
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn build(self) -> Result<RegistryClient> {
        let base_url = normalize_registry_url(&self.address)?;
        let http = match self.http_client {
            Some(client) => client,
            None => build_http_client(self.proxy.as_deref(), &self.options)?,
        };
        let auth = AuthSession::new(http.clone(), self.username, self.password);

        debug!(base_url = %base_url, authenticated = auth.state().has_credentials(), "registry client ready");
        Ok(RegistryClient { http, base_url, auth })
    }
}

/// Registry API client.
///
/// Holds one mutable [`AuthSession`]; methods that may refresh it take
/// `&mut self`, so a client cannot be shared between concurrent callers.
#[derive(Debug)]
pub struct RegistryClient {
    http: Client,
    base_url: String,
    auth: AuthSession,
}

impl RegistryClient {
    pub fn builder(address: impl Into<String>) -> RegistryClientBuilder {
        RegistryClientBuilder::new(address)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth(&self) -> &AuthSession {
        &self.auth
    }

    /// Absolute URL for a path below `/v2`
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/v2{}", self.base_url, path)
    }

    /// Resolve an upload `Location`, which may be absolute or relative
    pub fn resolve_location(&self, location: &str) -> Result<String> {
        if location.starts_with("http://") || location.starts_with("https://") {
            return Ok(location.to_string());
        }
        let base = url::Url::parse(&format!("{}/", self.base_url))?;
        Ok(base.join(location)?.to_string())
    }

    /// Issue a bodiless request against `base + /v2 + path`
    pub async fn execute(&mut self, method: Method, path: &str, headers: &HeaderMap) -> Result<Response> {
        let url = self.url_for(path);
        self.execute_url(method, &url, headers, &RequestBody::Empty).await
    }

    /// Issue a request against an absolute URL with one auth retry.
    ///
    /// A 401 triggers challenge resolution and exactly one re-send. A 401 on
    /// the re-send is terminal and reported with the server's challenge text.
    /// Transport failures are returned immediately.
    pub async fn execute_url(
        &mut self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: &RequestBody,
    ) -> Result<Response> {
        let response = self.send_once(&method, url, headers, body).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(%method, url, "received 401, resolving challenge");
        self.auth.resolve_challenge(response.headers()).await?;
        drop(response);

        let retry = self.send_once(&method, url, headers, body).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            let challenge = retry
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let text = retry.text().await.unwrap_or_default();
            warn!(%method, url, "still unauthorized after re-authentication");
            return Err(RegistryError::Authentication(format!(
                "{} {} unauthorized after re-authentication (challenge: {:?}): {}",
                method, url, challenge, text
            )));
        }
        Ok(retry)
    }

    async fn send_once(&self, method: &Method, url: &str, headers: &HeaderMap, body: &RequestBody) -> Result<Response> {
        let mut request = self.http.request(method.clone(), url).headers(headers.clone());
        request = self.auth.add_authentication(request);
        request = request.header(API_VERSION_HEADER, API_VERSION);

        if let Some(payload) = body.to_reqwest().await? {
            request = request.header(CONTENT_LENGTH, body.len()).body(payload);
        }

        trace!(%method, url, "sending registry request");
        request
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, &format!("{} {}", method, url)))
    }

    /// `GET /v2/` liveness check
    pub async fn ping(&mut self) -> Result<()> {
        let response = self.execute(Method::GET, "/", &HeaderMap::new()).await?;
        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(HttpErrorHandler::handle_registry_error(status, &text, "ping"))
    }

    /// Check that the configured credentials are accepted by the registry
    pub async fn verify_credentials(&mut self) -> Result<()> {
        match self.ping().await {
            Ok(()) => Ok(()),
            Err(RegistryError::Authentication(msg)) => Err(RegistryError::Authentication(format!(
                "access denied, check your username and password: {}",
                msg
            ))),
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_registry_url() {
        assert_eq!(normalize_registry_url("").unwrap(), DOCKER_HUB_ENDPOINT);
        assert_eq!(normalize_registry_url("docker.io").unwrap(), DOCKER_HUB_ENDPOINT);
        assert_eq!(normalize_registry_url("ghcr.io").unwrap(), "https://ghcr.io");
        assert_eq!(normalize_registry_url("localhost:5000").unwrap(), "https://localhost:5000");
        assert_eq!(normalize_registry_url("http://10.0.0.1:5000/").unwrap(), "http://10.0.0.1:5000");
    }

    #[test]
    fn test_resolve_location() {
        let client = RegistryClient::builder("http://registry.local:5000").build().unwrap();
        assert_eq!(
            client.resolve_location("/v2/app/blobs/uploads/abc?_state=x").unwrap(),
            "http://registry.local:5000/v2/app/blobs/uploads/abc?_state=x"
        );
        assert_eq!(
            client.resolve_location("https://storage.example/upload/1").unwrap(),
            "https://storage.example/upload/1"
        );
        assert_eq!(client.url_for("/app/manifests/latest"), "http://registry.local:5000/v2/app/manifests/latest");
    }
}
