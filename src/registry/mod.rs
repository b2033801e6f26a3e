//! Registry tag discovery (C2) and tag filtering/ordering (C3).

pub mod dockerhub;
pub mod oci;
pub mod pipeline;

use crate::models::ImageReference;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Credential for a single registry, resolved by `credentials::resolve`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryCredential {
    pub username: Option<String>,
    pub password: Option<String>,
    pub identity_token: Option<String>,
}

impl RegistryCredential {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() && self.password.is_none() && self.identity_token.is_none()
    }
}

/// A candidate tag discovered on a registry, before shape filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagCandidate {
    pub name: String,
    pub digest: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub media_type: Option<String>,
}

/// Common contract both registry backends implement. Transport failures are
/// swallowed into a logged warning and an empty/partial result by the
/// caller, never propagated into the per-container loop (§4.2).
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn list_tags(&self, reference: &ImageReference, auth: &RegistryCredential) -> Result<Vec<TagCandidate>>;

    async fn describe_tag(
        &self,
        reference: &ImageReference,
        tag: &str,
        auth: &RegistryCredential,
    ) -> Result<TagCandidate>;
}

/// Shared timeout bounds for registry HTTP calls, per §4.2.
pub const MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn request_timeout(configured: Duration) -> Duration {
    configured.clamp(MIN_REQUEST_TIMEOUT, MAX_REQUEST_TIMEOUT)
}

/// Picks the backend for a registry hostname: Docker Hub gets its own JSON
/// API client, everything else goes through the OCI Distribution v2 client.
pub fn client_for(registry_host: &str, http: reqwest::Client) -> Box<dyn RegistryClient> {
    if dockerhub::is_docker_hub(registry_host) {
        Box::new(dockerhub::DockerHubClient::new(http))
    } else {
        Box::new(oci::OciClient::new(http))
    }
}
