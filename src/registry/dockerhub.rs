//! Docker Hub tag-list client (C2).

use super::{RegistryClient, RegistryCredential, TagCandidate};
use crate::models::ImageReference;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

const DOCKER_HUB_API: &str = "https://hub.docker.com/v2";
const MAX_PAGES: usize = 20;

/// Docker Hub is addressed under several historical hostnames; all of them
/// route to the same registry. Mirrors the teacher's `registry_matches`
/// Docker Hub aliasing.
pub fn is_docker_hub(host: &str) -> bool {
    matches!(
        host,
        "docker.io" | "index.docker.io" | "registry-1.docker.io" | "registry.hub.docker.com" | ""
    )
}

pub struct DockerHubClient {
    http: reqwest::Client,
}

impl DockerHubClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn repo_path(repository: &str) -> String {
        if repository.contains('/') {
            repository.to_string()
        } else {
            format!("library/{repository}")
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagsPage {
    results: Vec<TagEntry>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
    last_updated: Option<DateTime<Utc>>,
    digest: Option<String>,
    images: Option<Vec<ImageEntry>>,
}

#[derive(Debug, Deserialize)]
struct ImageEntry {
    digest: Option<String>,
}

#[async_trait]
impl RegistryClient for DockerHubClient {
    async fn list_tags(&self, reference: &ImageReference, _auth: &RegistryCredential) -> Result<Vec<TagCandidate>> {
        let repo = Self::repo_path(&reference.repository);
        let mut url = format!("{DOCKER_HUB_API}/repositories/{repo}/tags?page_size=100");
        let mut out = Vec::new();

        for _ in 0..MAX_PAGES {
            let resp = self.http.get(&url).send().await.context("docker hub tag list request")?;
            if !resp.status().is_success() {
                anyhow::bail!("docker hub returned {} for {}", resp.status(), repo);
            }
            let page: TagsPage = resp.json().await.context("decoding docker hub tags page")?;

            for entry in page.results {
                let digest = entry.digest.or_else(|| {
                    entry.images.and_then(|imgs| imgs.into_iter().find_map(|i| i.digest))
                });
                out.push(TagCandidate {
                    name: entry.name,
                    digest,
                    created_at: entry.last_updated,
                    media_type: None,
                });
            }

            match page.next {
                Some(next) => url = next,
                None => break,
            }
        }

        Ok(out)
    }

    async fn describe_tag(
        &self,
        reference: &ImageReference,
        tag: &str,
        _auth: &RegistryCredential,
    ) -> Result<TagCandidate> {
        let repo = Self::repo_path(&reference.repository);
        let url = format!("{DOCKER_HUB_API}/repositories/{repo}/tags/{tag}");
        let resp = self.http.get(&url).send().await.context("docker hub tag detail request")?;
        if !resp.status().is_success() {
            anyhow::bail!("docker hub returned {} for {}:{}", resp.status(), repo, tag);
        }
        let entry: TagEntry = resp.json().await.context("decoding docker hub tag detail")?;
        let digest = entry.digest.or_else(|| entry.images.and_then(|imgs| imgs.into_iter().find_map(|i| i.digest)));
        Ok(TagCandidate { name: entry.name, digest, created_at: entry.last_updated, media_type: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_docker_hub_aliases() {
        assert!(is_docker_hub("docker.io"));
        assert!(is_docker_hub("index.docker.io"));
        assert!(is_docker_hub("registry-1.docker.io"));
        assert!(!is_docker_hub("ghcr.io"));
        assert!(!is_docker_hub("quay.io"));
    }

    #[test]
    fn official_images_get_library_prefix() {
        assert_eq!(DockerHubClient::repo_path("nginx"), "library/nginx");
        assert_eq!(DockerHubClient::repo_path("bitnami/redis"), "bitnami/redis");
    }
}
