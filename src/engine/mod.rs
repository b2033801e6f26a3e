//! Container engine driver abstraction (C5).

pub mod docker;
pub mod env_filter;
pub mod mock;
pub mod recreate;

use crate::models::{ContainerSnapshot, ImageSnapshot, RestartPolicy};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("container {0} not found")]
    NotFound(String),
    #[error("rollback failed for {container}: {reason}")]
    RollbackFailed { container: String, reason: String },
    #[error("verify_start timed out waiting for {0} to become healthy")]
    VerifyTimeout(String),
    #[error("engine transport error: {0}")]
    Transport(String),
}

/// A fully-built container specification ready to hand to `create`, derived
/// from a snapshot plus the new image reference by `recreate_spec`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecreateSpec {
    pub name: String,
    pub image: String,
    pub env: HashMap<String, String>,
    pub mounts: Vec<crate::models::Mount>,
    pub ports: Vec<crate::models::PortBinding>,
    pub network_mode: String,
    pub restart_policy: crate::models::RestartPolicy,
    pub healthcheck: Option<crate::models::HealthcheckSpec>,
    pub networks: Vec<crate::models::NetworkAttachment>,
    pub labels: HashMap<String, String>,
    pub command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub user: Option<String>,
    pub workdir: Option<String>,
}

/// Reason `verify_start` concluded a container did not come up healthy. Named
/// after the SAMPLE state machine's own failure labels (§4.5) rather than
/// generic engine terms, so a report reader sees exactly which branch fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyFailure {
    /// RestartCount increased relative to the baseline taken right after
    /// `start` — the engine itself restarted the container.
    Restarted { restart_count: i64 },
    /// StartedAt changed without a RestartCount increase — something
    /// outside this cycle (an operator, another tool) restarted it.
    ManuallyRestarted,
    /// Container status left `{running, starting}`.
    NotRunning { status: String },
    Unhealthy,
    DeadlineExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyOutcome {
    Healthy,
    Failed(VerifyFailure),
}

/// Timing knobs for `verify_start`'s SAMPLE loop, sourced from
/// `[updateVerification]` (§6): `grace` before the first sample, `interval`
/// between samples, `stable_time` a health check (or bare liveness) must
/// hold continuously before `Healthy` is returned, and `max_wait` the
/// overall deadline.
#[derive(Debug, Clone, Copy)]
pub struct VerifyPolicy {
    pub grace: Duration,
    pub interval: Duration,
    pub stable_time: Duration,
    pub max_wait: Duration,
}

/// Capability set the orchestrator needs from a container engine. Concrete
/// implementation is `docker::BollardDriver`; tests substitute `mock::MockDriver`
/// (§9's dependency-injection testability note).
#[async_trait]
pub trait Driver: Send + Sync {
    async fn list(&self, name_filter: Option<&str>) -> Result<Vec<ContainerSnapshot>>;
    async fn inspect(&self, id_or_name: &str) -> Result<ContainerSnapshot>;
    async fn inspect_image(&self, image: &str) -> Result<Option<ImageSnapshot>>;
    async fn pull(&self, image: &str) -> Result<String>;
    async fn create(&self, spec: &RecreateSpec) -> Result<String>;
    async fn start(&self, id: &str) -> Result<()>;
    async fn stop(&self, id: &str, timeout_secs: u32) -> Result<()>;
    async fn rename(&self, id: &str, new_name: &str) -> Result<()>;
    async fn remove(&self, id: &str, force: bool) -> Result<()>;
    /// Rewrites a container's restart policy in place, without recreating
    /// it — used to disable the backup's restart policy during recreate and
    /// restore it on rollback (§4.5 step 1/3).
    async fn update_restart_policy(&self, id: &str, policy: &RestartPolicy) -> Result<()>;
    async fn verify_start(&self, id: &str, policy: &VerifyPolicy) -> Result<VerifyOutcome>;
    async fn prune_images(&self, until: std::time::Duration) -> Result<ImagePruneSummary>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImagePruneSummary {
    pub images_deleted: usize,
    pub space_reclaimed_bytes: u64,
}
