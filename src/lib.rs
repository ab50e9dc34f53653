//! Image Courier Library
//!
//! Registry API v2 client and local image store for moving container images
//! between registries and disk without a container runtime.

pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod logging;
pub mod reference;
pub mod registry;
pub mod storage;
pub mod transfer;

pub use error::{RegistryError, Result};
pub use reference::Reference;
pub use registry::{RegistryClient, RegistryClientBuilder};
pub use storage::ImageStore;
