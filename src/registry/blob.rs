//! Blob operations for the registry client
//!
//! Implements the blob endpoints of the Registry API v2:
//! - existence checks (`HEAD /v2/{name}/blobs/{digest}`)
//! - streamed download (`GET /v2/{name}/blobs/{digest}`)
//! - monolithic upload (`POST /v2/{name}/blobs/uploads/` then `PUT {location}?digest=`)

use crate::digest::DigestUtils;
use crate::error::handlers::HttpErrorHandler;
use crate::error::{RegistryError, Result};
use crate::registry::client::RegistryClient;
use crate::registry::transport::RequestBody;
use futures_util::{Stream, StreamExt};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, LOCATION};
use reqwest::{Method, StatusCode};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Error text some registries return instead of succeeding on a duplicate upload
const ALREADY_EXISTS_MARKERS: &[&str] = &["BLOB_UPLOAD_INVALID", "already exists", "exist blob"];

/// Successful result of a blob upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Created,
    AlreadyExists,
}

/// Decide whether a failed upload actually means the blob is already there.
///
/// Only a fallback for registries that reject duplicates with an error;
/// `upload_if_missing` asks with HEAD first.
pub fn classify_upload_failure(body: &str) -> bool {
    ALREADY_EXISTS_MARKERS.iter().any(|marker| body.contains(marker))
}

/// Progress sink: `(bytes_written, total_bytes)`; total is `None` when the
/// server sent no content length
pub type ProgressFn<'a> = &'a mut dyn FnMut(u64, Option<u64>);

/// Write a body stream to `dest`, reporting progress after each chunk.
///
/// The file is removed if the stream or a write fails part way.
async fn write_stream<S, B, E>(
    stream: S,
    dest: &Path,
    total: Option<u64>,
    on_progress: &mut Option<ProgressFn<'_>>,
) -> Result<u64>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    RegistryError: From<E>,
{
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| RegistryError::storage("create blob file", dest, e))?;

    let copied = async {
        let mut written: u64 = 0;
        let mut stream = std::pin::pin!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let chunk = chunk.as_ref();
            file.write_all(chunk)
                .await
                .map_err(|e| RegistryError::storage("write blob", dest, e))?;
            written += chunk.len() as u64;
            if let Some(progress) = on_progress.as_mut() {
                progress(written, total);
            }
        }
        file.flush().await.map_err(|e| RegistryError::storage("flush blob", dest, e))?;
        Ok::<_, RegistryError>(written)
    }
    .await;
    drop(file);

    if copied.is_err() {
        let _ = tokio::fs::remove_file(dest).await;
    }
    copied
}

impl RegistryClient {
    /// `HEAD` a blob: 200 means present, 404 means absent
    pub async fn check_exists(&mut self, repository: &str, digest: &str) -> Result<bool> {
        DigestUtils::validate(digest)?;
        let path = format!("/{}/blobs/{}", repository, digest);
        let response = self.execute(Method::HEAD, &path, &HeaderMap::new()).await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(HttpErrorHandler::handle_registry_error(status, "", "check blob")),
        }
    }

    /// Stream a blob to `dest`, creating parent directories.
    ///
    /// `on_progress` fires after every chunk and once more when the body is
    /// complete. sha256 blobs are verified after writing; a mismatch or an
    /// interrupted body removes the file.
    pub async fn download(
        &mut self,
        repository: &str,
        digest: &str,
        dest: &Path,
        mut on_progress: Option<ProgressFn<'_>>,
    ) -> Result<u64> {
        DigestUtils::validate(digest)?;
        let path = format!("/{}/blobs/{}", repository, digest);
        let response = self.execute(Method::GET, &path, &HeaderMap::new()).await?;

        let status = response.status();
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_registry_error(status, &text, "download blob"));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RegistryError::storage("create directory", parent, e))?;
        }

        let total = response.content_length();
        let written = write_stream(response.bytes_stream(), dest, total, &mut on_progress).await?;

        if let Some(progress) = on_progress.as_mut() {
            progress(written, total.or(Some(written)));
        }

        if let Err(e) = DigestUtils::verify_file(dest, digest).await {
            let _ = tokio::fs::remove_file(dest).await;
            return Err(e);
        }

        debug!(repository, digest, bytes = written, "blob downloaded");
        Ok(written)
    }

    /// Open an upload session; returns the absolute session URL
    pub async fn start_upload(&mut self, repository: &str) -> Result<String> {
        let url = self.url_for(&format!("/{}/blobs/uploads/", repository));
        let response = self
            .execute_url(Method::POST, &url, &HeaderMap::new(), &RequestBody::Empty)
            .await?;

        let status = response.status();
        if status != StatusCode::ACCEPTED {
            let text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_registry_error(status, &text, "start blob upload"));
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RegistryError::protocol("start blob upload", status.as_u16(), "no Location header"))?;
        self.resolve_location(location)
    }

    /// Upload `source` as blob `digest` with a single PUT.
    ///
    /// Duplicate-blob errors, at either step, come back as
    /// [`UploadOutcome::AlreadyExists`].
    pub async fn upload(&mut self, repository: &str, digest: &str, source: &Path) -> Result<UploadOutcome> {
        DigestUtils::validate(digest)?;
        let len = tokio::fs::metadata(source)
            .await
            .map_err(|e| RegistryError::storage("stat upload source", source, e))?
            .len();

        let location = match self.start_upload(repository).await {
            Ok(location) => location,
            Err(e) if classify_upload_failure(e.body()) => {
                debug!(repository, digest, "registry reports blob already present");
                return Ok(UploadOutcome::AlreadyExists);
            }
            Err(e) => return Err(e),
        };

        let mut url = url::Url::parse(&location)?;
        url.query_pairs_mut().append_pair("digest", digest);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        let body = RequestBody::File {
            path: source.to_path_buf(),
            len,
        };

        let response = self.execute_url(Method::PUT, url.as_str(), &headers, &body).await?;
        let status = response.status();
        if status == StatusCode::CREATED {
            info!(repository, digest, bytes = len, "blob uploaded");
            return Ok(UploadOutcome::Created);
        }

        let text = response.text().await.unwrap_or_default();
        if classify_upload_failure(&text) {
            debug!(repository, digest, %status, "registry reports blob already present");
            return Ok(UploadOutcome::AlreadyExists);
        }
        Err(HttpErrorHandler::handle_registry_error(status, &text, "upload blob"))
    }

    /// HEAD first; upload only when the registry does not have the blob
    pub async fn upload_if_missing(&mut self, repository: &str, digest: &str, source: &Path) -> Result<UploadOutcome> {
        if self.check_exists(repository, digest).await? {
            debug!(repository, digest, "blob exists, skipping upload");
            return Ok(UploadOutcome::AlreadyExists);
        }
        self.upload(repository, digest, source).await
    }
}
