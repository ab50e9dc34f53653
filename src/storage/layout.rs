//! On-disk layout of the local image store
//!
//! ```text
//! {root}/images/{encoded reference}/
//!   manifest.json
//!   config.json
//!   layers/{algorithm}_{hex}.tar.gz
//! ```
//!
//! Directory names come in two generations. Current stores write
//! `_COLON_`/`_SLASH_` tokens; older stores replaced both characters with a
//! plain `_`. Both are read, only the current one is written.

use crate::digest::DigestUtils;
use crate::error::{RegistryError, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const IMAGES_DIR: &str = "images";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const CONFIG_FILE: &str = "config.json";
pub const LAYERS_DIR: &str = "layers";
pub const LAYER_SUFFIX: &str = ".tar.gz";

const COLON_TOKEN: &str = "_COLON_";
const SLASH_TOKEN: &str = "_SLASH_";

/// One generation of reference-to-directory-name encoding
pub trait EncodingStrategy: Sync {
    fn name(&self) -> &'static str;

    fn encode(&self, reference: &str) -> String;

    /// Decode a directory name, or `None` when it was not written by this strategy
    fn try_decode(&self, dir_name: &str) -> Option<String>;

    fn path_exists(&self, images_dir: &Path, reference: &str) -> bool {
        images_dir.join(self.encode(reference)).is_dir()
    }
}

/// Reversible token encoding
#[derive(Debug, Clone, Copy)]
pub struct CurrentEncoding;

impl EncodingStrategy for CurrentEncoding {
    fn name(&self) -> &'static str {
        "current"
    }

    fn encode(&self, reference: &str) -> String {
        reference.replace(':', COLON_TOKEN).replace('/', SLASH_TOKEN)
    }

    fn try_decode(&self, dir_name: &str) -> Option<String> {
        if !dir_name.contains(SLASH_TOKEN) && !dir_name.contains(COLON_TOKEN) {
            return None;
        }
        Some(dir_name.replace(SLASH_TOKEN, "/").replace(COLON_TOKEN, ":"))
    }
}

/// Lossy single-underscore encoding of older stores.
///
/// Decoding assumes the last `_` was the tag separator and every other `_`
/// a path separator, so repository names containing `_` come back wrong.
#[derive(Debug, Clone, Copy)]
pub struct LegacyEncoding;

impl EncodingStrategy for LegacyEncoding {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn encode(&self, reference: &str) -> String {
        reference.replace([':', '/'], "_")
    }

    fn try_decode(&self, dir_name: &str) -> Option<String> {
        match dir_name.rfind('_') {
            Some(idx) => Some(format!("{}:{}", dir_name[..idx].replace('_', "/"), &dir_name[idx + 1..])),
            None => Some(dir_name.to_string()),
        }
    }
}

/// Probe order for every read: current first, legacy second
pub const ENCODINGS: &[&dyn EncodingStrategy] = &[&CurrentEncoding, &LegacyEncoding];

/// Turn a directory name back into the reference it stores
pub fn decode_dir_name(dir_name: &str) -> String {
    ENCODINGS
        .iter()
        .find_map(|encoding| encoding.try_decode(dir_name))
        .unwrap_or_else(|| dir_name.to_string())
}

fn layer_file_name(digest: &str) -> Result<String> {
    DigestUtils::validate(digest)?;
    Ok(format!("{}{}", digest.replace(':', "_"), LAYER_SUFFIX))
}

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| RegistryError::storage("create storage root", &root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES_DIR)
    }

    /// Directory a write for `reference` goes to (current encoding)
    pub fn image_dir(&self, reference: &str) -> PathBuf {
        self.images_dir().join(CurrentEncoding.encode(reference))
    }

    /// Existing directory for `reference` under any known encoding
    pub fn find_image_dir(&self, reference: &str) -> Option<PathBuf> {
        let images_dir = self.images_dir();
        ENCODINGS
            .iter()
            .find(|encoding| encoding.path_exists(&images_dir, reference))
            .map(|encoding| images_dir.join(encoding.encode(reference)))
    }

    /// Directory a read for `reference` goes to; the current one when nothing exists yet
    fn read_dir_for(&self, reference: &str) -> PathBuf {
        self.find_image_dir(reference).unwrap_or_else(|| self.image_dir(reference))
    }

    pub fn manifest_path(&self, reference: &str) -> PathBuf {
        self.read_dir_for(reference).join(MANIFEST_FILE)
    }

    pub fn config_path(&self, reference: &str) -> PathBuf {
        self.read_dir_for(reference).join(CONFIG_FILE)
    }

    pub fn layers_dir(&self, reference: &str) -> PathBuf {
        self.read_dir_for(reference).join(LAYERS_DIR)
    }

    pub fn layer_path(&self, reference: &str, digest: &str) -> Result<PathBuf> {
        Ok(self.layers_dir(reference).join(layer_file_name(digest)?))
    }

    /// Layer destination inside the current-encoding directory
    pub fn layer_write_path(&self, reference: &str, digest: &str) -> Result<PathBuf> {
        Ok(self.image_dir(reference).join(LAYERS_DIR).join(layer_file_name(digest)?))
    }

    /// Create `{image}/layers/` under the current encoding and return the image dir
    pub fn create_image_dir(&self, reference: &str) -> Result<PathBuf> {
        let image_dir = self.image_dir(reference);
        let layers_dir = image_dir.join(LAYERS_DIR);
        fs::create_dir_all(&layers_dir).map_err(|e| RegistryError::storage("create image directory", &layers_dir, e))?;
        Ok(image_dir)
    }

    /// Stored references, decoded, sorted and without duplicates
    pub fn list_images(&self) -> Result<Vec<String>> {
        let images_dir = self.images_dir();
        let entries = match fs::read_dir(&images_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RegistryError::storage("read images directory", &images_dir, e)),
        };

        let mut images = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| RegistryError::storage("read images directory", &images_dir, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                images.insert(decode_dir_name(name));
            }
        }
        Ok(images.into_iter().collect())
    }

    pub fn image_exists(&self, reference: &str) -> bool {
        self.find_image_dir(reference).is_some()
    }

    pub fn remove_image(&self, reference: &str) -> Result<()> {
        let image_dir = self
            .find_image_dir(reference)
            .ok_or_else(|| RegistryError::NotFound(format!("image {:?} not found", reference)))?;
        fs::remove_dir_all(&image_dir).map_err(|e| RegistryError::storage("remove image directory", &image_dir, e))
    }
}
