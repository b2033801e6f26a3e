//! Image reference types shared across registry, policy, and engine modules.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// What the driver's `inspect_image` exposes about a pulled image: its
/// engine-local id and the ENV it bakes in by default, needed by ENV
/// reconciliation (§4.5) to tell "inherited default" apart from "explicit
/// override" on the running container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSnapshot {
    pub id: String,
    pub env: HashMap<String, String>,
}

/// Whether an image reference names a tag or pins a digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageLocator {
    Tag(String),
    Digest(String),
}

impl fmt::Display for ImageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageLocator::Tag(t) => write!(f, ":{t}"),
            ImageLocator::Digest(d) => write!(f, "@{d}"),
        }
    }
}

/// A fully-qualified reference to an image on a registry.
///
/// Equality is registry + repository + locator, matching the spec's
/// equality rule for "same image" comparisons (e.g. skip-if-unchanged
/// checks in the orchestrator).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub locator: ImageLocator,
}

impl ImageReference {
    pub fn new(registry: impl Into<String>, repository: impl Into<String>, locator: ImageLocator) -> Self {
        Self { registry: registry.into(), repository: repository.into(), locator }
    }

    /// Parse a Docker-style image string (`[registry/]repository[:tag|@digest]`).
    ///
    /// Defaults the registry to `docker.io` and the tag to `latest` when
    /// absent, matching the convention the teacher's polling code already
    /// assumed for Docker Hub image strings.
    pub fn parse(raw: &str) -> Self {
        let (name_part, locator) = match raw.rsplit_once('@') {
            Some((name, digest)) => (name.to_string(), ImageLocator::Digest(digest.to_string())),
            None => match raw.rsplit_once(':') {
                // A colon after the last slash is a tag; one before it (e.g.
                // `host:5000/repo`) is a registry port, not a tag separator.
                Some((name, tag)) if !name.contains('/') || raw.rfind(':').unwrap() > raw.rfind('/').unwrap_or(0) => {
                    (name.to_string(), ImageLocator::Tag(tag.to_string()))
                }
                _ => (raw.to_string(), ImageLocator::Tag("latest".to_string())),
            },
        };

        let mut parts = name_part.splitn(2, '/');
        let first = parts.next().unwrap_or_default();
        let rest = parts.next();

        let looks_like_host = first.contains('.') || first.contains(':') || first == "localhost";
        if looks_like_host && rest.is_some() {
            ImageReference::new(first, rest.unwrap(), locator)
        } else {
            ImageReference::new("docker.io", name_part, locator)
        }
    }

    pub fn as_docker_string(&self) -> String {
        format!("{}/{}{}", self.registry, self.repository, self.locator)
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.locator {
            ImageLocator::Tag(t) => Some(t),
            ImageLocator::Digest(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_repository() {
        let r = ImageReference::parse("nginx");
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "nginx");
        assert_eq!(r.tag(), Some("latest"));
    }

    #[test]
    fn parses_tagged_repository() {
        let r = ImageReference::parse("nginx:1.25.4");
        assert_eq!(r.tag(), Some("1.25.4"));
    }

    #[test]
    fn parses_digest_pinned_reference() {
        let r = ImageReference::parse("ghcr.io/foo/bar@sha256:abcd");
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "foo/bar");
        assert_eq!(r.locator, ImageLocator::Digest("sha256:abcd".to_string()));
    }

    #[test]
    fn parses_private_registry_with_port() {
        let r = ImageReference::parse("registry.internal:5000/team/app:latest");
        assert_eq!(r.registry, "registry.internal:5000");
        assert_eq!(r.repository, "team/app");
        assert_eq!(r.tag(), Some("latest"));
    }
}
