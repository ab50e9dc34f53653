//! Pull and push flows between a registry and the local image store
//!
//! Both flows take an already built [`RegistryClient`] and [`ImageStore`], so
//! the command runner only decides where those point.

use crate::digest::DigestUtils;
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::reference::Reference;
use crate::registry::manifest::{self, MAX_LIST_DEPTH, RawManifest, TARGET_ARCHITECTURE, TARGET_OS};
use crate::registry::{RegistryClient, UploadOutcome};
use crate::storage::ImageStore;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Counters for one pull or push
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Blobs that actually moved over the wire
    pub transferred: usize,
    /// Blobs the registry already had
    pub skipped: usize,
    pub bytes: u64,
}

/// Scratch directory for blobs in flight, removed on drop
struct StagingDir(PathBuf);

impl StagingDir {
    fn create() -> Result<Self> {
        let path = std::env::temp_dir().join(format!("image-courier-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).map_err(|e| RegistryError::storage("create staging directory", &path, e))?;
        Ok(Self(path))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// Download `reference` into the store under `key`.
///
/// Config and layers are stored first and the manifest last, so a readable
/// manifest means the image is complete. The stored manifest is the raw
/// linux/amd64 document with OCI media types renamed to their Docker
/// equivalents.
pub async fn pull_into(
    client: &mut RegistryClient,
    store: &ImageStore,
    reference: &Reference,
    key: &str,
    logger: &Logger,
) -> Result<TransferStats> {
    let manifest = client.get_manifest(&reference.repository, &reference.tag).await?;
    logger.detail(&format!(
        "Manifest: mediaType={}, schemaVersion={}, layers={}",
        manifest.media_type,
        manifest.schema_version,
        manifest.layers.len()
    ));

    let staging = StagingDir::create()?;
    let mut stats = TransferStats::default();

    logger.step("Downloading config");
    let config_path = staging.path().join("config.json");
    stats.bytes += download_blob(client, logger, &reference.repository, &manifest.config.digest, &config_path, "Config")
        .await?;
    stats.transferred += 1;
    let config_data =
        std::fs::read(&config_path).map_err(|e| RegistryError::storage("read downloaded config", &config_path, e))?;
    store.save_config(key, &config_data)?;

    let total = manifest.layers.len();
    logger.step(&format!("Downloading {} layers", total));
    for (index, layer) in manifest.layers.iter().enumerate() {
        let staged = staging.path().join(layer.digest.replace(':', "_"));
        let label = format!("Layer {}/{} {}", index + 1, total, DigestUtils::short(&layer.digest));
        stats.bytes += download_blob(client, logger, &reference.repository, &layer.digest, &staged, &label).await?;
        stats.transferred += 1;
        store.save_layer(key, &layer.digest, &staged)?;
        let _ = std::fs::remove_file(&staged);
    }

    let raw = platform_manifest_raw(client, reference).await?;
    store.save_manifest_raw(key, &manifest::rewrite_oci_media_types(&raw.bytes))?;
    Ok(stats)
}

/// Raw manifest bytes for the linux/amd64 image, walking lists by hand
pub async fn platform_manifest_raw(client: &mut RegistryClient, reference: &Reference) -> Result<RawManifest> {
    let mut raw = client.get_manifest_raw(&reference.repository, &reference.tag).await?;
    for _ in 0..MAX_LIST_DEPTH {
        if !raw.is_list() {
            return Ok(raw);
        }
        let digest = raw.platform_digest(TARGET_ARCHITECTURE, TARGET_OS)?.ok_or_else(|| {
            RegistryError::Resolution(format!(
                "no suitable platform manifest ({}/{}) for {}",
                TARGET_OS, TARGET_ARCHITECTURE, reference
            ))
        })?;
        DigestUtils::validate(&digest)?;
        debug!(digest = %digest, "fetching platform manifest");
        raw = client.get_manifest_raw(&reference.repository, &digest).await?;
    }
    if raw.is_list() {
        return Err(RegistryError::Resolution(format!(
            "manifest lists for {} nest deeper than {} levels",
            reference, MAX_LIST_DEPTH
        )));
    }
    Ok(raw)
}

async fn download_blob(
    client: &mut RegistryClient,
    logger: &Logger,
    repository: &str,
    digest: &str,
    dest: &Path,
    label: &str,
) -> Result<u64> {
    let mut bar = logger.progress_bar(label);
    let mut on_progress = |done: u64, total: Option<u64>| bar.update(done, total);
    let written = client.download(repository, digest, dest, Some(&mut on_progress)).await?;
    bar.finish();
    Ok(written)
}

/// Upload the image stored under `key` to `reference`.
///
/// Config and layers go first, each skipped when the registry already has
/// it; the manifest is sent last, prepared by
/// [`manifest::prepare_for_push`].
pub async fn push_from(
    client: &mut RegistryClient,
    store: &ImageStore,
    reference: &Reference,
    key: &str,
    logger: &Logger,
) -> Result<TransferStats> {
    if !store.image_exists(key) {
        return Err(RegistryError::NotFound(format!("image {:?} not found locally", key)));
    }
    let manifest = store.load_manifest(key)?;
    manifest.validate_image()?;
    let mut stats = TransferStats::default();

    logger.step("Uploading config");
    let config_path = store.get_config_path(key);
    let outcome = client
        .upload_if_missing(&reference.repository, &manifest.config.digest, &config_path)
        .await?;
    stats.record(outcome, manifest.config.size);
    report_upload(logger, "Config", outcome);

    let total = manifest.layers.len();
    logger.step(&format!("Uploading {} layers", total));
    for (index, layer) in manifest.layers.iter().enumerate() {
        let layer_path = store.get_layer_path(key, &layer.digest)?;
        let outcome = client
            .upload_if_missing(&reference.repository, &layer.digest, &layer_path)
            .await?;
        stats.record(outcome, layer.size);
        report_upload(
            logger,
            &format!("[{}/{}] {}", index + 1, total, DigestUtils::short(&layer.digest)),
            outcome,
        );
    }

    logger.step("Uploading manifest");
    let raw = store.load_manifest_raw(key)?;
    let (bytes, content_type) = manifest::prepare_for_push(&raw)?;
    let digest = client
        .put_manifest(&reference.repository, &reference.tag, &bytes, &content_type)
        .await?;
    if let Some(digest) = digest {
        logger.detail(&format!("Manifest digest: {}", digest));
    }
    Ok(stats)
}

impl TransferStats {
    fn record(&mut self, outcome: UploadOutcome, size: i64) {
        match outcome {
            UploadOutcome::Created => {
                self.transferred += 1;
                self.bytes += u64::try_from(size).unwrap_or(0);
            }
            UploadOutcome::AlreadyExists => self.skipped += 1,
        }
    }
}

fn report_upload(logger: &Logger, what: &str, outcome: UploadOutcome) {
    match outcome {
        UploadOutcome::Created => logger.info(&format!("{} uploaded", what)),
        UploadOutcome::AlreadyExists => logger.info(&format!("{} already exists, skipping", what)),
    }
}
