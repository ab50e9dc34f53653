//! Image reference parsing
//!
//! Handles `nginx`, `nginx:1.25`, `user/app:tag`, `registry.example.com:5000/team/app:tag`
//! and `name@sha256:...`.

use crate::error::{RegistryError, Result};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_REGISTRY: &str = "docker.io";
pub const DEFAULT_TAG: &str = "latest";
pub const OFFICIAL_NAMESPACE: &str = "library";

/// A parsed image reference.
///
/// `registry` is never part of `repository`. `tag` holds either a tag or,
/// for `name@digest` input, the digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl Reference {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(RegistryError::Validation("Image reference cannot be empty".to_string()));
        }

        let mut registry = DEFAULT_REGISTRY.to_string();
        let mut remainder = input;

        if let Some((first, rest)) = input.split_once('/') {
            if first.contains('.') || first.contains(':') {
                registry = first.to_string();
                remainder = rest;
            }
        }

        let (name, tag) = if let Some((name, digest)) = remainder.split_once('@') {
            // `name:tag@digest` pins by digest; the tag is informational only
            let name = name.rsplit_once(':').map_or(name, |(name, _)| name);
            (name, digest.to_string())
        } else if let Some((name, tag)) = remainder.rsplit_once(':') {
            (name, tag.to_string())
        } else {
            (remainder, DEFAULT_TAG.to_string())
        };

        if name.is_empty() || name.starts_with('/') || name.ends_with('/') || name.contains("//") {
            return Err(RegistryError::Validation(format!("Invalid repository name in {:?}", input)));
        }
        if tag.is_empty() {
            return Err(RegistryError::Validation(format!("Empty tag in {:?}", input)));
        }

        let repository = if registry == DEFAULT_REGISTRY && !name.contains('/') {
            format!("{}/{}", OFFICIAL_NAMESPACE, name)
        } else {
            name.to_string()
        };

        Ok(Self {
            registry,
            repository,
            tag,
        })
    }

    pub fn is_digest(&self) -> bool {
        self.tag.contains(':')
    }
}

impl FromStr for Reference {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        Reference::parse(s)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let separator = if self.is_digest() { '@' } else { ':' };
        write!(f, "{}/{}{}{}", self.registry, self.repository, separator, self.tag)
    }
}
