//! Manifest model and manifest operations
//!
//! Implements the manifest endpoints of the Registry API v2:
//! - `GET /v2/{name}/manifests/{ref}` structured (list-resolving) and raw
//! - `HEAD /v2/{name}/manifests/{ref}` for the content digest
//! - `PUT /v2/{name}/manifests/{ref}`

use crate::digest::DigestUtils;
use crate::error::handlers::HttpErrorHandler;
use crate::error::{RegistryError, Result};
use crate::registry::client::RegistryClient;
use crate::registry::transport::RequestBody;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST_V2: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";

pub const DOCKER_CONFIG_V1: &str = "application/vnd.docker.container.image.v1+json";
pub const OCI_CONFIG_V1: &str = "application/vnd.oci.image.config.v1+json";
pub const DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
pub const OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

pub const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";

pub const TARGET_ARCHITECTURE: &str = "amd64";
pub const TARGET_OS: &str = "linux";

/// How many list-to-list hops are followed before giving up
pub const MAX_LIST_DEPTH: usize = 2;

const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json,\
application/vnd.docker.distribution.manifest.list.v2+json,\
application/vnd.oci.image.manifest.v1+json,\
application/vnd.oci.image.index.v1+json";

/// Compare media types ignoring parameters such as `; charset=utf-8`
fn essence(media_type: &str) -> &str {
    media_type.split(';').next().unwrap_or("").trim()
}

pub fn is_list_media_type(media_type: &str) -> bool {
    let mt = essence(media_type);
    mt.eq_ignore_ascii_case(DOCKER_MANIFEST_LIST_V2) || mt.eq_ignore_ascii_case(OCI_INDEX_V1)
}

/// A config or layer descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub digest: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn matches(&self, architecture: &str, os: &str) -> bool {
        self.architecture == architecture && self.os == os
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestListEntry {
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub platform: Platform,
}

/// Image manifest or manifest list.
///
/// A concrete manifest fills `config` and `layers`; a list fills `manifests`.
/// Which one it is comes from `media_type` or the response content type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub config: Layer,
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<ManifestListEntry>,
}

impl Manifest {
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| RegistryError::Parse(format!("Failed to decode manifest: {}", e)))
    }

    /// List or index, judged by the document's own media type or the transport's
    pub fn is_list(&self, content_type: Option<&str>) -> bool {
        is_list_media_type(&self.media_type) || content_type.is_some_and(is_list_media_type)
    }

    /// First entry whose platform is exactly `architecture`/`os`
    pub fn select_platform(&self, architecture: &str, os: &str) -> Option<&ManifestListEntry> {
        self.manifests.iter().find(|m| m.platform.matches(architecture, os))
    }

    /// A concrete manifest needs one valid config digest and valid layer digests
    pub fn validate_image(&self) -> Result<()> {
        if self.config.digest.is_empty() {
            return Err(RegistryError::Parse(
                "Manifest has no config descriptor (schema 1 manifests are not supported)".to_string(),
            ));
        }
        DigestUtils::validate(&self.config.digest)?;
        for layer in &self.layers {
            DigestUtils::validate(&layer.digest)?;
        }
        Ok(())
    }

    /// Config digest followed by layer digests, in manifest order
    pub fn blob_digests(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.config.digest.as_str()).chain(self.layers.iter().map(|l| l.digest.as_str()))
    }
}

/// Manifest bytes exactly as the registry sent them
#[derive(Debug, Clone)]
pub struct RawManifest {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl RawManifest {
    pub fn is_list(&self) -> bool {
        if is_list_media_type(&self.content_type) {
            return true;
        }
        Manifest::from_slice(&self.bytes).is_ok_and(|m| m.is_list(None))
    }

    /// Digest of the `architecture`/`os` entry when these bytes are a list
    pub fn platform_digest(&self, architecture: &str, os: &str) -> Result<Option<String>> {
        let manifest = Manifest::from_slice(&self.bytes)?;
        Ok(manifest.select_platform(architecture, os).map(|m| m.digest.clone()))
    }
}

/// Rewrite OCI media types to their Docker schema 2 equivalents.
///
/// Works on the raw text so nothing else in the document changes.
pub fn rewrite_oci_media_types(raw: &[u8]) -> Vec<u8> {
    match std::str::from_utf8(raw) {
        Ok(text) => text
            .replace(OCI_CONFIG_V1, DOCKER_CONFIG_V1)
            .replace(OCI_LAYER_GZIP, DOCKER_LAYER_GZIP)
            .replace(OCI_MANIFEST_V1, DOCKER_MANIFEST_V2)
            .into_bytes(),
        Err(_) => raw.to_vec(),
    }
}

/// Make stored manifest bytes acceptable for `PUT`.
///
/// Lists cannot be pushed. A stray `manifests` key is dropped and a missing
/// `mediaType` defaults to Docker v2; the bytes are re-encoded only when one
/// of those fixes applies.
pub fn prepare_for_push(raw: &[u8]) -> Result<(Vec<u8>, String)> {
    let mut document: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(raw)?;

    let media_type = document
        .get("mediaType")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    if is_list_media_type(&media_type) || document.get("manifests").is_some_and(|m| m.as_array().is_some_and(|a| !a.is_empty())) {
        return Err(RegistryError::Validation(
            "Cannot push a manifest list or image index; pull a single platform image first".to_string(),
        ));
    }

    let mut changed = document.remove("manifests").is_some();
    let media_type = if media_type.is_empty() {
        document.insert("mediaType".to_string(), serde_json::Value::from(DOCKER_MANIFEST_V2));
        changed = true;
        DOCKER_MANIFEST_V2.to_string()
    } else {
        media_type
    };

    if changed {
        Ok((serde_json::to_vec(&document)?, media_type))
    } else {
        Ok((raw.to_vec(), media_type))
    }
}

fn accept_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(MANIFEST_ACCEPT));
    headers
}

impl RegistryClient {
    /// Fetch a manifest, resolving lists to the linux/amd64 image manifest
    pub async fn get_manifest(&mut self, repository: &str, reference: &str) -> Result<Manifest> {
        let mut reference = reference.to_string();

        for hop in 0..=MAX_LIST_DEPTH {
            let raw = self.get_manifest_raw(repository, &reference).await?;
            let manifest = Manifest::from_slice(&raw.bytes)?;

            if !manifest.is_list(Some(&raw.content_type)) {
                manifest.validate_image()?;
                debug!(repository, reference = %reference, layers = manifest.layers.len(), "resolved image manifest");
                return Ok(manifest);
            }

            if hop == MAX_LIST_DEPTH {
                break;
            }

            let entry = manifest.select_platform(TARGET_ARCHITECTURE, TARGET_OS).ok_or_else(|| {
                RegistryError::Resolution(format!(
                    "no suitable platform manifest ({}/{}) in {}:{}",
                    TARGET_OS, TARGET_ARCHITECTURE, repository, reference
                ))
            })?;
            DigestUtils::validate(&entry.digest)?;
            debug!(repository, digest = %entry.digest, "following manifest list entry");
            reference = entry.digest.clone();
        }

        Err(RegistryError::Resolution(format!(
            "manifest lists for {} nest deeper than {} levels",
            repository, MAX_LIST_DEPTH
        )))
    }

    /// Fetch a manifest without decoding or resolving it
    pub async fn get_manifest_raw(&mut self, repository: &str, reference: &str) -> Result<RawManifest> {
        let path = format!("/{}/manifests/{}", repository, reference);
        let response = self.execute(Method::GET, &path, &accept_headers()).await?;

        let status = response.status();
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_registry_error(status, &text, "get manifest"));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let bytes = response.bytes().await?.to_vec();

        Ok(RawManifest { bytes, content_type })
    }

    /// `Docker-Content-Digest` of a manifest, via HEAD
    pub async fn get_manifest_digest(&mut self, repository: &str, reference: &str) -> Result<String> {
        let path = format!("/{}/manifests/{}", repository, reference);
        let response = self.execute(Method::HEAD, &path, &accept_headers()).await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(HttpErrorHandler::handle_registry_error(status, "", "head manifest"));
        }

        response
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| RegistryError::protocol("head manifest", status.as_u16(), "no Docker-Content-Digest header"))
    }

    /// Upload manifest bytes under `reference`; returns the digest the registry reports
    pub async fn put_manifest(
        &mut self,
        repository: &str,
        reference: &str,
        manifest: &[u8],
        content_type: &str,
    ) -> Result<Option<String>> {
        let url = self.url_for(&format!("/{}/manifests/{}", repository, reference));
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(content_type)
                .map_err(|e| RegistryError::Validation(format!("Invalid content type {:?}: {}", content_type, e)))?,
        );

        let response = self
            .execute_url(Method::PUT, &url, &headers, &RequestBody::Bytes(manifest.to_vec()))
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_registry_error(status, &text, "put manifest"));
        }

        Ok(response
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string))
    }
}
