//! Image references: `registry/repository(:tag|@digest)`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::RegistryError;
use crate::DOCKER_HUB_HOST;

/// Tag or digest part of an image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reference {
    Tag(String),
    Digest(Digest),
}

impl Reference {
    /// The string used in `/v2/<name>/manifests/<reference>`.
    pub fn as_str(&self) -> &str {
        match self {
            Reference::Tag(tag) => tag,
            Reference::Digest(digest) => digest.as_str(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully qualified image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub reference: Reference,
}

impl ImageReference {
    pub fn tagged(registry: &str, repository: &str, tag: &str) -> Self {
        Self {
            registry: registry.to_string(),
            repository: normalize_repository(registry, repository),
            reference: Reference::Tag(tag.to_string()),
        }
    }

    pub fn by_digest(registry: &str, repository: &str, digest: Digest) -> Self {
        Self {
            registry: registry.to_string(),
            repository: normalize_repository(registry, repository),
            reference: Reference::Digest(digest),
        }
    }

    /// Same registry and repository, different tag.
    pub fn with_tag(&self, tag: &str) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            reference: Reference::Tag(tag.to_string()),
        }
    }

    /// Same registry and repository, addressed by digest.
    pub fn with_digest(&self, digest: Digest) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            reference: Reference::Digest(digest),
        }
    }

    /// Same repository and reference on another registry.
    pub fn on_registry(&self, registry: &str) -> Self {
        Self {
            registry: registry.to_string(),
            repository: normalize_repository(registry, &self.repository),
            reference: self.reference.clone(),
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.reference {
            Reference::Tag(tag) => Some(tag),
            Reference::Digest(_) => None,
        }
    }

    /// Parse `[registry/]repository[:tag|@digest]`.
    ///
    /// The first path component is a registry host when it contains `.` or
    /// `:` or is `localhost`; otherwise `default_registry` is used. A missing
    /// tag means `latest`.
    pub fn parse(s: &str, default_registry: &str) -> Result<Self, RegistryError> {
        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return Err(RegistryError::InvalidReference(s.to_string()));
        }

        let (name, reference) = if let Some((name, digest)) = s.split_once('@') {
            (name, Reference::Digest(digest.parse()?))
        } else {
            let last_slash = s.rfind('/').map(|i| i + 1).unwrap_or(0);
            match s[last_slash..].rfind(':') {
                Some(colon) => {
                    let split = last_slash + colon;
                    (&s[..split], Reference::Tag(s[split + 1..].to_string()))
                }
                None => (s, Reference::Tag("latest".to_string())),
            }
        };

        if let Reference::Tag(tag) = &reference {
            if tag.is_empty() || tag.len() > 128 {
                return Err(RegistryError::InvalidReference(s.to_string()));
            }
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest)) if first.contains('.') || first.contains(':') || first == "localhost" => {
                (first, rest)
            }
            _ => (default_registry, name),
        };
        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(RegistryError::InvalidReference(s.to_string()));
        }

        Ok(Self {
            registry: registry.to_string(),
            repository: normalize_repository(registry, repository),
            reference,
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reference {
            Reference::Tag(tag) => write!(f, "{}/{}:{}", self.registry, self.repository, tag),
            Reference::Digest(d) => write!(f, "{}/{}@{}", self.registry, self.repository, d),
        }
    }
}

/// Docker Hub keeps official images under `library/`.
fn normalize_repository(registry: &str, repository: &str) -> String {
    if registry == DOCKER_HUB_HOST && !repository.contains('/') {
        format!("library/{}", repository)
    } else {
        repository.to_string()
    }
}
