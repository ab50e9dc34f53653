//! Registry module for Docker Registry HTTP API v2 interactions
//!
//! [`RegistryClient`] is the request executor; manifest and blob operations
//! are implemented on it in their own files.

pub mod auth;
pub mod blob;
pub mod client;
pub mod manifest;
pub mod transport;

pub use auth::{AuthChallenge, AuthScheme, AuthSession, AuthState};
pub use blob::{ProgressFn, UploadOutcome, classify_upload_failure};
pub use client::{RegistryClient, RegistryClientBuilder};
pub use manifest::{Layer, Manifest, ManifestListEntry, Platform, RawManifest};
pub use transport::{RequestBody, TransportOptions, build_http_client, resolve_proxy};
