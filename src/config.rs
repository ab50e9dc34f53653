//! Configuration management: stored credentials and proxy settings
//!
//! Everything lives in `config.json` under the home directory, which also
//! holds the image store.

use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const HOME_ENV: &str = "IMAGE_COURIER_HOME";
pub const HOME_DIR_NAME: &str = ".image-courier";
pub const CONFIG_FILE: &str = "config.json";

/// `$IMAGE_COURIER_HOME`, else `~/.image-courier`
pub fn home_dir() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(HOME_DIR_NAME))
        .ok_or_else(|| RegistryError::Config("Cannot determine the user's home directory".to_string()))
}

/// Stored credentials for one registry host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEntry {
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl AuthEntry {
    pub fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(RegistryError::Validation("Username cannot be empty".to_string()));
        }
        if self.password.is_empty() {
            return Err(RegistryError::Validation("Password cannot be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub auth: BTreeMap<String, AuthEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub registries: BTreeMap<String, RegistryEntry>,
}

/// Loads, edits and persists [`Config`]
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// Open the configuration in `dir`, creating the directory; a missing file is an empty config
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| RegistryError::storage("create config directory", dir, e))?;
        let mut manager = Self {
            path: dir.join(CONFIG_FILE),
            config: Config::default(),
        };
        manager.load()?;
        Ok(manager)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn load(&mut self) -> Result<()> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.config = Config::default();
                return Ok(());
            }
            Err(e) => return Err(RegistryError::storage("read config", &self.path, e)),
        };
        self.config = serde_json::from_slice(&data)
            .map_err(|e| RegistryError::Config(format!("Invalid {}: {}", self.path.display(), e)))?;
        debug!(path = %self.path.display(), "configuration loaded");
        Ok(())
    }

    /// Write pretty-printed JSON, readable only by the owner on unix
    pub fn save(&self) -> Result<()> {
        let data = serde_json::to_vec_pretty(&self.config)?;
        fs::write(&self.path, data).map_err(|e| RegistryError::storage("write config", &self.path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
                .map_err(|e| RegistryError::storage("set config permissions", &self.path, e))?;
        }
        Ok(())
    }

    /// Credential provider: `(username, password)` stored for `registry`
    pub fn get_auth(&self, registry: &str) -> Option<(String, String)> {
        self.config
            .auth
            .get(registry)
            .map(|entry| (entry.username.clone(), entry.password.clone()))
    }

    pub fn set_auth(&mut self, registry: &str, username: &str, password: &str) -> Result<()> {
        let entry = AuthEntry {
            username: username.to_string(),
            password: password.to_string(),
            email: None,
        };
        entry.validate()?;
        self.config.auth.insert(registry.to_string(), entry);
        Ok(())
    }

    pub fn remove_auth(&mut self, registry: &str) -> bool {
        self.config.auth.remove(registry).is_some()
    }

    pub fn default_proxy(&self) -> Option<&str> {
        self.config.default_proxy.as_deref().filter(|p| !p.is_empty())
    }

    pub fn set_default_proxy(&mut self, proxy: Option<String>) {
        self.config.default_proxy = proxy.filter(|p| !p.is_empty());
    }

    /// Proxy configured for `registry`, falling back to the default proxy
    pub fn registry_proxy(&self, registry: &str) -> Option<&str> {
        self.config
            .registries
            .get(registry)
            .and_then(|entry| entry.proxy.as_deref())
            .filter(|p| !p.is_empty())
            .or_else(|| self.default_proxy())
    }

    pub fn set_registry_proxy(&mut self, registry: &str, proxy: Option<String>) {
        self.config.registries.insert(
            registry.to_string(),
            RegistryEntry {
                proxy: proxy.filter(|p| !p.is_empty()),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty_config() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ConfigManager::new(tmp.path().join("nested")).unwrap();
        assert_eq!(manager.config(), &Config::default());
        assert!(manager.get_auth("docker.io").is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manager = ConfigManager::new(tmp.path()).unwrap();
        manager.set_auth("registry.local:5000", "alice", "s3cret").unwrap();
        manager.set_default_proxy(Some("socks5://127.0.0.1:1080".to_string()));
        manager.set_registry_proxy("ghcr.io", Some("http://proxy:3128".to_string()));
        manager.save().unwrap();

        let reloaded = ConfigManager::new(tmp.path()).unwrap();
        assert_eq!(
            reloaded.get_auth("registry.local:5000"),
            Some(("alice".to_string(), "s3cret".to_string()))
        );
        assert_eq!(reloaded.registry_proxy("ghcr.io"), Some("http://proxy:3128"));
        assert_eq!(reloaded.registry_proxy("docker.io"), Some("socks5://127.0.0.1:1080"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(reloaded.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_reads_plain_json_layout() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILE),
            r#"{"auth":{"docker.io":{"username":"bob","password":"pw","email":"b@x"}},"registries":{"q.io":{}}}"#,
        )
        .unwrap();
        let manager = ConfigManager::new(tmp.path()).unwrap();
        assert_eq!(manager.get_auth("docker.io"), Some(("bob".to_string(), "pw".to_string())));
        assert_eq!(manager.registry_proxy("q.io"), None);
    }

    #[test]
    fn test_remove_auth_and_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let mut manager = ConfigManager::new(tmp.path()).unwrap();
        assert!(manager.set_auth("docker.io", "", "pw").is_err());
        manager.set_auth("docker.io", "u", "p").unwrap();
        assert!(manager.remove_auth("docker.io"));
        assert!(!manager.remove_auth("docker.io"));
    }

    #[test]
    fn test_corrupt_file_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE), "{not json").unwrap();
        assert!(matches!(ConfigManager::new(tmp.path()), Err(RegistryError::Config(_))));
    }
}
