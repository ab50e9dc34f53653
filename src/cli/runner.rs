//! Command runner: wires references, configuration, the registry client and
//! the image store together for each subcommand

use crate::cli::args::{Cli, Command};
use crate::config::{self, ConfigManager};
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::reference::Reference;
use crate::registry::RegistryClient;
use crate::registry::manifest::Manifest;
use crate::registry::transport::{TransportOptions, build_http_client, resolve_proxy};
use crate::storage::ImageStore;
use crate::transfer::{self, TransferStats};
use std::path::PathBuf;
use std::time::Duration;

pub struct Runner {
    cli: Cli,
    logger: Logger,
    home: PathBuf,
}

impl Runner {
    pub fn new(cli: Cli) -> Result<Self> {
        let home = config::home_dir()?;
        Ok(Self::with_home(cli, home))
    }

    /// Runner rooted at an explicit home directory instead of the default one
    pub fn with_home(cli: Cli, home: impl Into<PathBuf>) -> Self {
        let logger = if cli.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(cli.verbose)
        };
        Self {
            cli,
            logger,
            home: home.into(),
        }
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub async fn run(&self) -> Result<()> {
        self.cli.validate().map_err(RegistryError::Validation)?;

        match &self.cli.command {
            Command::Pull { image } => self.pull(image).await,
            Command::Push { image } => self.push(image).await,
            Command::Tag { source, target } => self.tag(source, target),
            Command::Rm { image } => self.remove(image),
            Command::List => self.list(),
            Command::Login {
                registry,
                username,
                password,
            } => self.login(registry, username, password).await,
            Command::Logout { registry } => self.logout(registry),
            Command::Proxy { registry, url, unset } => self.proxy(registry.as_deref(), url.as_deref(), *unset),
        }
    }

    fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            timeout: Some(Duration::from_secs(self.cli.timeout)),
            skip_tls: self.cli.skip_tls,
        }
    }

    /// Flag, then environment, then per-registry config, then default proxy
    fn proxy_for(&self, registry: &str, config: &ConfigManager) -> Option<String> {
        resolve_proxy(self.cli.proxy.as_deref()).or_else(|| config.registry_proxy(registry).map(str::to_string))
    }

    fn registry_client(&self, registry: &str, config: &ConfigManager) -> Result<RegistryClient> {
        let proxy = self.proxy_for(registry, config);
        if let Some(proxy) = &proxy {
            self.logger.detail(&format!("Using proxy {}", proxy));
        }
        let (username, password) = config.get_auth(registry).unzip();
        RegistryClient::builder(registry)
            .with_credentials(username, password)
            .with_proxy(proxy)
            .with_options(self.transport_options())
            .build()
    }

    fn open_store(&self) -> Result<ImageStore> {
        ImageStore::new(&self.home)
    }

    async fn pull(&self, image: &str) -> Result<()> {
        let reference = Reference::parse(image)?;
        let config = ConfigManager::new(&self.home)?;
        let store = self.open_store()?;
        let mut client = self.registry_client(&reference.registry, &config)?;

        self.logger.section(&format!("Pulling {} from {}", image, reference.registry));
        let stats = transfer::pull_into(&mut client, &store, &reference, image, &self.logger).await?;

        self.logger.success(&format!("Pulled {}", image));
        self.report_transfer("Pull summary", image, &stats);
        Ok(())
    }

    async fn push(&self, image: &str) -> Result<()> {
        let reference = Reference::parse(image)?;
        let store = self.open_store()?;
        let config = ConfigManager::new(&self.home)?;
        let mut client = self.registry_client(&reference.registry, &config)?;

        self.logger.section(&format!("Pushing {} to {}", image, reference.registry));
        let stats = transfer::push_from(&mut client, &store, &reference, image, &self.logger).await?;

        self.logger.success(&format!("Pushed {}", image));
        self.report_transfer("Push summary", image, &stats);
        Ok(())
    }

    fn report_transfer(&self, title: &str, image: &str, stats: &TransferStats) {
        let elapsed = self.logger.elapsed();
        self.logger.summary_kv(
            title,
            &[
                ("Image", image.to_string()),
                (
                    "Blobs",
                    format!("{} transferred, {} already present", stats.transferred, stats.skipped),
                ),
                ("Size", self.logger.format_size(stats.bytes)),
                ("Duration", self.logger.format_duration(elapsed)),
                ("Average speed", self.logger.format_speed(stats.bytes, elapsed)),
            ],
        );
    }

    /// Copy manifest, config and every layer file from `source` to `target`
    fn tag(&self, source: &str, target: &str) -> Result<()> {
        let store = self.open_store()?;
        let source_dir = store
            .layout()
            .find_image_dir(source)
            .ok_or_else(|| RegistryError::NotFound(format!("source image {:?} not found", source)))?;
        if source_dir == store.layout().image_dir(target) {
            self.logger.info(&format!("{} already refers to {}", target, source));
            return Ok(());
        }

        let raw = store.load_manifest_raw(source)?;
        let manifest = Manifest::from_slice(&raw)?;

        let config_data = store.load_config(source)?;
        store.save_config(target, &config_data)?;

        for layer in &manifest.layers {
            let layer_path = store.get_layer_path(source, &layer.digest)?;
            store.save_layer(target, &layer.digest, &layer_path)?;
        }

        store.save_manifest_raw(target, &raw)?;
        self.logger.success(&format!("Tagged {} as {}", source, target));
        Ok(())
    }

    fn remove(&self, image: &str) -> Result<()> {
        self.open_store()?.remove_image(image)?;
        self.logger.success(&format!("Removed {}", image));
        Ok(())
    }

    fn list(&self) -> Result<()> {
        let images = self.open_store()?.list_images()?;
        if images.is_empty() {
            self.logger.info("No images found");
            return Ok(());
        }
        self.logger.list(&images);
        self.logger.info(&format!("Total: {} image(s)", images.len()));
        Ok(())
    }

    async fn login(&self, registry: &str, username: &str, password: &str) -> Result<()> {
        let mut config = ConfigManager::new(&self.home)?;
        let mut client = RegistryClient::builder(registry)
            .with_credentials(Some(username.to_string()), Some(password.to_string()))
            .with_proxy(self.proxy_for(registry, &config))
            .with_options(self.transport_options())
            .build()?;

        self.logger.step(&format!("Verifying credentials for {}", registry));
        client.verify_credentials().await?;

        config.set_auth(registry, username, password)?;
        config.save()?;
        self.logger.success(&format!("Login succeeded for {}", registry));
        Ok(())
    }

    fn logout(&self, registry: &str) -> Result<()> {
        let mut config = ConfigManager::new(&self.home)?;
        if config.remove_auth(registry) {
            config.save()?;
            self.logger.success(&format!("Removed credentials for {}", registry));
        } else {
            self.logger.warning(&format!("No credentials stored for {}", registry));
        }
        Ok(())
    }

    fn proxy(&self, registry: Option<&str>, url: Option<&str>, unset: bool) -> Result<()> {
        let mut config = ConfigManager::new(&self.home)?;

        if url.is_none() && !unset {
            let current = match registry {
                Some(registry) => config.registry_proxy(registry),
                None => config.default_proxy(),
            };
            self.logger.info(&format!("Proxy: {}", current.unwrap_or("(none)")));
            return Ok(());
        }

        if let Some(url) = url {
            build_http_client(Some(url), &self.transport_options())?;
        }
        let value = url.map(str::to_string);
        match registry {
            Some(registry) => config.set_registry_proxy(registry, value),
            None => config.set_default_proxy(value),
        }
        config.save()?;
        self.logger.success("Proxy settings saved");
        Ok(())
    }
}
