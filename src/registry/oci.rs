//! OCI Distribution v2 registry client (C2), used for GHCR, Quay, and
//! generic registries. Wraps the teacher's own `oci_distribution` dependency.

use super::{RegistryClient, RegistryCredential, TagCandidate};
use crate::models::ImageReference;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oci_distribution::{
    Reference,
    client::{Client, ClientConfig},
    manifest::OciManifest,
    secrets::RegistryAuth,
};
use serde::Deserialize;

pub struct OciClient {
    http: reqwest::Client,
}

impl OciClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn oci_auth(auth: &RegistryCredential) -> RegistryAuth {
        match (&auth.username, &auth.password) {
            (Some(u), Some(p)) => RegistryAuth::Basic(u.clone(), p.clone()),
            _ => RegistryAuth::Anonymous,
        }
    }

    fn oci_reference(reference: &ImageReference, tag: &str) -> Result<Reference> {
        format!("{}/{}:{}", reference.registry, reference.repository, tag)
            .parse()
            .context("building oci reference")
    }

    fn oci_client(&self) -> Client {
        Client::new(ClientConfig::default())
    }
}

#[derive(Debug, Deserialize)]
struct TagsList {
    tags: Vec<String>,
}

#[async_trait]
impl RegistryClient for OciClient {
    async fn list_tags(&self, reference: &ImageReference, auth: &RegistryCredential) -> Result<Vec<TagCandidate>> {
        let url = format!("https://{}/v2/{}/tags/list?n=1000", reference.registry, reference.repository);
        let mut req = self.http.get(&url);
        if let (Some(u), Some(p)) = (&auth.username, &auth.password) {
            req = req.basic_auth(u, Some(p));
        }
        let resp = req.send().await.context("oci tag list request")?;
        if !resp.status().is_success() {
            anyhow::bail!("registry {} returned {} listing tags", reference.registry, resp.status());
        }
        let list: TagsList = resp.json().await.context("decoding oci tags list")?;
        Ok(list
            .tags
            .into_iter()
            .map(|name| TagCandidate { name, digest: None, created_at: None, media_type: None })
            .collect())
    }

    /// Fetches the manifest for `tag`, taking the digest from the
    /// `Docker-Content-Digest` response header (never the manifest body,
    /// per §4.2), and branches on media type the way
    /// `ghcr.py::fetch_ghcr_tag_details` does for multi-arch indexes versus
    /// single-platform manifests, falling back to the config blob / v1
    /// history for a `created` timestamp when the manifest itself lacks one.
    async fn describe_tag(
        &self,
        reference: &ImageReference,
        tag: &str,
        auth: &RegistryCredential,
    ) -> Result<TagCandidate> {
        let oci_ref = Self::oci_reference(reference, tag)?;
        let client = self.oci_client();
        let oci_auth = Self::oci_auth(auth);

        let (manifest, digest) = client
            .pull_manifest(&oci_ref, &oci_auth)
            .await
            .context("pulling oci manifest")?;

        let created_at = self.fetch_created_at(reference, &manifest, auth).await;

        Ok(TagCandidate {
            name: tag.to_string(),
            digest: Some(digest),
            created_at,
            media_type: Some(manifest_media_type(&manifest)),
        })
    }
}

/// `OciManifest` is an enum (single-platform `Image` vs multi-arch
/// `ImageIndex`) with no common `media_type` field, so callers must match on
/// it rather than field-access — see `other_examples`'s zizmor OCI client,
/// which destructures `pull_manifest`'s result the same way.
fn manifest_media_type(manifest: &OciManifest) -> String {
    match manifest {
        OciManifest::Image(image) => {
            image.media_type.clone().unwrap_or_else(|| "application/vnd.oci.image.manifest.v1+json".to_string())
        }
        OciManifest::ImageIndex(index) => {
            index.media_type.clone().unwrap_or_else(|| "application/vnd.oci.image.index.v1+json".to_string())
        }
    }
}

impl OciClient {
    /// A single-platform manifest carries its config blob digest directly.
    /// A multi-arch index has none of its own — fall back to the first
    /// platform variant's manifest (per §4.2: "enumerate platform variants
    /// from the index") to reach that variant's config blob.
    async fn fetch_created_at(
        &self,
        reference: &ImageReference,
        manifest: &OciManifest,
        auth: &RegistryCredential,
    ) -> Option<DateTime<Utc>> {
        let config_digest = match manifest {
            OciManifest::Image(image) => image.config.digest.clone(),
            OciManifest::ImageIndex(index) => {
                let entry = index.manifests.first()?;
                self.fetch_platform_config_digest(reference, &entry.digest, auth).await?
            }
        };
        self.fetch_config_created(reference, &config_digest, auth).await
    }

    async fn fetch_platform_config_digest(
        &self,
        reference: &ImageReference,
        manifest_digest: &str,
        auth: &RegistryCredential,
    ) -> Option<String> {
        let url = format!("https://{}/v2/{}/manifests/{}", reference.registry, reference.repository, manifest_digest);
        let mut req = self.http.get(&url).header(
            "Accept",
            "application/vnd.oci.image.manifest.v1+json, application/vnd.docker.distribution.manifest.v2+json",
        );
        if let (Some(u), Some(p)) = (&auth.username, &auth.password) {
            req = req.basic_auth(u, Some(p));
        }
        let resp = req.send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let parsed: PlatformManifest = resp.json().await.ok()?;
        Some(parsed.config.digest)
    }

    async fn fetch_config_created(
        &self,
        reference: &ImageReference,
        config_digest: &str,
        auth: &RegistryCredential,
    ) -> Option<DateTime<Utc>> {
        let url = format!("https://{}/v2/{}/blobs/{}", reference.registry, reference.repository, config_digest);
        let mut req = self.http.get(&url);
        if let (Some(u), Some(p)) = (&auth.username, &auth.password) {
            req = req.basic_auth(u, Some(p));
        }
        let resp = req.send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let blob: ConfigBlob = resp.json().await.ok()?;
        blob.created
    }
}

#[derive(Debug, Deserialize)]
struct PlatformManifest {
    config: ConfigDescriptor,
}

#[derive(Debug, Deserialize)]
struct ConfigDescriptor {
    digest: String,
}

#[derive(Debug, Deserialize)]
struct ConfigBlob {
    created: Option<DateTime<Utc>>,
}
