//! Local image store
//!
//! References are opaque keys here; the store never parses them. Reads
//! find images under either directory encoding, writes always use the
//! current one.

use crate::error::{RegistryError, Result};
use crate::registry::manifest::Manifest;
use crate::storage::layout::Layout;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ImageStore {
    layout: Layout,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            layout: Layout::new(root)?,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Store a structured manifest as pretty-printed JSON
    pub fn save_manifest(&self, reference: &str, manifest: &Manifest) -> Result<()> {
        let data = serde_json::to_vec_pretty(manifest)?;
        self.save_manifest_raw(reference, &data)
    }

    /// Store manifest bytes exactly as given
    pub fn save_manifest_raw(&self, reference: &str, data: &[u8]) -> Result<()> {
        let image_dir = self.layout.create_image_dir(reference)?;
        write_file(&image_dir.join(crate::storage::layout::MANIFEST_FILE), data, "write manifest")?;
        debug!(reference, bytes = data.len(), "manifest saved");
        Ok(())
    }

    pub fn load_manifest(&self, reference: &str) -> Result<Manifest> {
        let data = self.load_manifest_raw(reference)?;
        Manifest::from_slice(&data)
    }

    pub fn load_manifest_raw(&self, reference: &str) -> Result<Vec<u8>> {
        read_file(&self.layout.manifest_path(reference), reference, "manifest")
    }

    pub fn save_config(&self, reference: &str, data: &[u8]) -> Result<()> {
        let image_dir = self.layout.create_image_dir(reference)?;
        write_file(&image_dir.join(crate::storage::layout::CONFIG_FILE), data, "write config")
    }

    pub fn load_config(&self, reference: &str) -> Result<Vec<u8>> {
        read_file(&self.layout.config_path(reference), reference, "config")
    }

    /// Copy a downloaded layer into the image's `layers/` directory.
    ///
    /// Copying a file onto itself would truncate it, so a `source` that is
    /// already the destination is left untouched.
    pub fn save_layer(&self, reference: &str, digest: &str, source: &Path) -> Result<PathBuf> {
        self.layout.create_image_dir(reference)?;
        let dest = self.layout.layer_write_path(reference, digest)?;
        if same_file(source, &dest) {
            debug!(reference, digest, "layer already in place");
            return Ok(dest);
        }
        fs::copy(source, &dest).map_err(|e| RegistryError::storage("copy layer", &dest, e))?;
        debug!(reference, digest, path = %dest.display(), "layer saved");
        Ok(dest)
    }

    pub fn get_layer_path(&self, reference: &str, digest: &str) -> Result<PathBuf> {
        self.layout.layer_path(reference, digest)
    }

    pub fn get_config_path(&self, reference: &str) -> PathBuf {
        self.layout.config_path(reference)
    }

    pub fn list_images(&self) -> Result<Vec<String>> {
        self.layout.list_images()
    }

    pub fn image_exists(&self, reference: &str) -> bool {
        self.layout.image_exists(reference)
    }

    pub fn remove_image(&self, reference: &str) -> Result<()> {
        self.layout.remove_image(reference)?;
        debug!(reference, "image removed");
        Ok(())
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn write_file(path: &Path, data: &[u8], context: &str) -> Result<()> {
    fs::write(path, data).map_err(|e| RegistryError::storage(context, path, e))
}

fn read_file(path: &Path, reference: &str, what: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => RegistryError::NotFound(format!("{} for image {:?}", what, reference)),
        _ => RegistryError::storage(format!("read {}", what), path, e),
    })
}
