//! Proxy-aware HTTP transport construction and request bodies
//!
//! The registry client never builds its own `reqwest::Client`; it receives one
//! from [`build_http_client`], which decides between a direct connection, an
//! HTTP(S) proxy, or a SOCKS5 proxy.

use crate::error::{RegistryError, Result};
use reqwest::{Client, Proxy};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::debug;

pub const DEFAULT_SOCKS5_PORT: u16 = 1080;
pub const PROXY_ENV_VARS: &[&str] = &["IMAGE_COURIER_PROXY", "HTTP_PROXY", "HTTPS_PROXY", "http_proxy", "https_proxy"];

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub timeout: Option<Duration>,
    pub skip_tls: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(7200)),
            skip_tls: false,
        }
    }
}

/// Build an HTTP client, routed through `proxy_url` when one is given
pub fn build_http_client(proxy_url: Option<&str>, options: &TransportOptions) -> Result<Client> {
    let mut builder = Client::builder();

    if let Some(timeout) = options.timeout {
        builder = builder.timeout(timeout);
    }
    if options.skip_tls {
        builder = builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }

    // Environment proxies are resolved by the caller, not by reqwest
    builder = match proxy_url.map(str::trim).filter(|p| !p.is_empty()) {
        Some(proxy_url) => builder.proxy(build_proxy(proxy_url)?),
        None => builder.no_proxy(),
    };

    builder
        .build()
        .map_err(|e| RegistryError::Config(format!("Failed to create HTTP client: {}", e)))
}

fn build_proxy(proxy_url: &str) -> Result<Proxy> {
    let mut url = url::Url::parse(proxy_url)
        .map_err(|e| RegistryError::Config(format!("Invalid proxy URL {:?}: {}", proxy_url, e)))?;

    match url.scheme() {
        "socks5" | "socks5h" => {
            if url.port().is_none() {
                url.set_port(Some(DEFAULT_SOCKS5_PORT))
                    .map_err(|_| RegistryError::Config(format!("Invalid SOCKS5 proxy URL {:?}", proxy_url)))?;
            }
            debug!(host = ?url.host_str(), port = ?url.port(), "using SOCKS5 proxy");
        }
        "http" | "https" => {
            debug!(host = ?url.host_str(), "using HTTP proxy");
        }
        other => {
            return Err(RegistryError::Config(format!("Unsupported proxy scheme {:?}", other)));
        }
    }

    // reqwest reads userinfo from the URL for both proxy kinds
    Proxy::all(url.as_str()).map_err(|e| RegistryError::Config(format!("Invalid proxy {:?}: {}", proxy_url, e)))
}

/// First non-empty proxy from the well-known environment variables
pub fn proxy_from_env() -> Option<String> {
    PROXY_ENV_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

/// Command-line proxy first, then the environment
pub fn resolve_proxy(flag: Option<&str>) -> Option<String> {
    flag.map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .or_else(proxy_from_env)
}

/// A request body that can be produced more than once.
///
/// The executor may send a request twice (after an auth challenge), so file
/// bodies are reopened instead of being buffered.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    File { path: PathBuf, len: u64 },
}

impl RequestBody {
    pub fn len(&self) -> u64 {
        match self {
            RequestBody::Empty => 0,
            RequestBody::Bytes(data) => data.len() as u64,
            RequestBody::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) async fn to_reqwest(&self) -> Result<Option<reqwest::Body>> {
        match self {
            RequestBody::Empty => Ok(None),
            RequestBody::Bytes(data) => Ok(Some(reqwest::Body::from(data.clone()))),
            RequestBody::File { path, .. } => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| RegistryError::storage("open upload source", path, e))?;
                Ok(Some(reqwest::Body::wrap_stream(ReaderStream::new(file))))
            }
        }
    }
}
