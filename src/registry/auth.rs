//! Authentication for Docker registry access
//!
//! [`AuthSession`] owns the credentials of one client and knows how to answer
//! a `WWW-Authenticate` challenge. A bearer token obtained from a challenge is
//! kept for the rest of the session; expiry is not tracked.

use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{RegistryError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, HeaderMap, WWW_AUTHENTICATE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Bearer,
    Other(String),
}

/// A parsed `WWW-Authenticate` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub scheme: AuthScheme,
    pub params: HashMap<String, String>,
}

impl AuthChallenge {
    /// Parse `Scheme key="value", key2=value2`.
    ///
    /// Commas inside quoted values are kept, so scopes such as
    /// `repository:app:pull,push` survive intact.
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        if header.is_empty() {
            return Err(RegistryError::Authentication("Empty WWW-Authenticate header".to_string()));
        }

        let (scheme, rest) = match header.split_once(char::is_whitespace) {
            Some((scheme, rest)) => (scheme, rest.trim()),
            None => (header, ""),
        };
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "basic" => AuthScheme::Basic,
            "bearer" => AuthScheme::Bearer,
            _ => AuthScheme::Other(scheme.to_string()),
        };

        let mut params = HashMap::new();
        for part in split_params(rest) {
            if let Some((key, value)) = part.split_once('=') {
                let key = key.trim().to_ascii_lowercase();
                let value = value.trim().trim_matches('"').to_string();
                if !key.is_empty() {
                    params.insert(key, value);
                }
            }
        }

        Ok(Self { scheme, params })
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }
}

/// Split on commas that are not inside double quotes
fn split_params(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (idx, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(input[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(input[start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
    // Accepted but never enforced
    #[allow(dead_code)]
    expires_in: Option<u64>,
    #[allow(dead_code)]
    issued_at: Option<String>,
}

/// Mutable credential cell for one registry client
#[derive(Debug, Clone, Default)]
pub struct AuthState {
    pub username: Option<String>,
    pub password: Option<String>,
    pub bearer_token: Option<String>,
}

impl AuthState {
    pub fn has_credentials(&self) -> bool {
        matches!((&self.username, &self.password), (Some(u), Some(p)) if !u.is_empty() && !p.is_empty())
    }

    fn basic_value(&self) -> Option<String> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => {
                Some(format!("Basic {}", STANDARD.encode(format!("{}:{}", u, p))))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthSession {
    client: Client,
    state: AuthState,
}

impl AuthSession {
    pub fn new(client: Client, username: Option<String>, password: Option<String>) -> Self {
        Self {
            client,
            state: AuthState {
                username,
                password,
                bearer_token: None,
            },
        }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.state.bearer_token.as_deref()
    }

    /// Best current `Authorization` value: bearer token, then basic, then none
    pub fn authorization(&self) -> Option<String> {
        if let Some(token) = &self.state.bearer_token {
            return Some(format!("Bearer {}", token));
        }
        self.state.basic_value()
    }

    pub fn add_authentication(&self, request: RequestBuilder) -> RequestBuilder {
        match self.authorization() {
            Some(value) => request.header(AUTHORIZATION, value),
            None => request,
        }
    }

    /// React to a 401 response.
    ///
    /// `Ok(())` means a retry is worth attempting. For `Basic` nothing changes
    /// (the credentials are already attached), so the retry may still fail.
    pub async fn resolve_challenge(&mut self, headers: &HeaderMap) -> Result<()> {
        let raw = headers
            .get(WWW_AUTHENTICATE)
            .ok_or_else(|| RegistryError::Authentication("401 without WWW-Authenticate header".to_string()))?
            .to_str()
            .map_err(|e| RegistryError::Authentication(format!("Invalid WWW-Authenticate header: {}", e)))?;

        let challenge = AuthChallenge::parse(raw)?;
        debug!(scheme = ?challenge.scheme, "resolving authentication challenge");

        match challenge.scheme {
            AuthScheme::Basic => Ok(()),
            AuthScheme::Bearer => {
                let realm = challenge.param("realm").ok_or_else(|| {
                    RegistryError::Authentication(format!("No realm in WWW-Authenticate header: {}", raw))
                })?;
                let token = self
                    .fetch_token(realm, challenge.param("service"), challenge.param("scope"))
                    .await
                    .map_err(|e| match e {
                        RegistryError::Authentication(msg) => {
                            RegistryError::Authentication(format!("{} (challenge: {})", msg, raw))
                        }
                        other => other,
                    })?;
                self.state.bearer_token = Some(token);
                Ok(())
            }
            AuthScheme::Other(scheme) => Err(RegistryError::Authentication(format!(
                "Unsupported authentication scheme {:?} in challenge: {}",
                scheme, raw
            ))),
        }
    }

    async fn fetch_token(&self, realm: &str, service: Option<&str>, scope: Option<&str>) -> Result<String> {
        let mut url = url::Url::parse(realm)
            .map_err(|e| RegistryError::Authentication(format!("Invalid realm {:?}: {}", realm, e)))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = service {
                query.append_pair("service", service);
            }
            if let Some(scope) = scope {
                query.append_pair("scope", scope);
            }
        }
        trace!(url = %url, "requesting bearer token");

        let mut request = self.client.get(url.clone());
        if let Some(basic) = self.state.basic_value() {
            request = request.header(AUTHORIZATION, basic);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "token request"))?;

        let status = response.status();
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_auth_error(status, &text, realm));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::Authentication(format!("Failed to parse token response: {}", e)))?;

        [body.token, body.access_token]
            .into_iter()
            .flatten()
            .find(|t| !t.is_empty())
            .ok_or_else(|| RegistryError::Authentication(format!("No token in response from {}", realm)))
    }
}
