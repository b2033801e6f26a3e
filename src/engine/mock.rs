//! In-memory `Driver` for tests. Verify is deterministic: healthy unless
//! explicitly configured to fail, per §9's testability note.

use super::{Driver, ImagePruneSummary, RecreateSpec, VerifyFailure, VerifyOutcome, VerifyPolicy};
use crate::models::{ContainerSnapshot, ImageSnapshot, RestartPolicy};
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub struct MockDriver {
    containers: Mutex<HashMap<String, ContainerSnapshot>>,
    next_id: Mutex<u64>,
    fail_verify: bool,
    image_envs: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            next_id: Mutex::new(1),
            fail_verify: false,
            image_envs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_container(self, snapshot: ContainerSnapshot) -> Self {
        self.containers.lock().unwrap().insert(snapshot.id.clone(), snapshot);
        self
    }

    pub fn failing_verify(mut self) -> Self {
        self.fail_verify = true;
        self
    }

    /// Registers the ENV an image would report via `inspect_image`, for
    /// tests exercising ENV reconciliation.
    pub fn with_image_env(self, image: impl Into<String>, env: HashMap<String, String>) -> Self {
        self.image_envs.lock().unwrap().insert(image.into(), env);
        self
    }

    fn allocate_id(&self) -> String {
        let mut n = self.next_id.lock().unwrap();
        let id = format!("mock-{n}");
        *n += 1;
        id
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn list(&self, name_filter: Option<&str>) -> Result<Vec<ContainerSnapshot>> {
        let containers = self.containers.lock().unwrap();
        Ok(containers
            .values()
            .filter(|c| name_filter.map(|f| c.name.contains(f)).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn inspect(&self, id_or_name: &str) -> Result<ContainerSnapshot> {
        let containers = self.containers.lock().unwrap();
        containers
            .values()
            .find(|c| c.id == id_or_name || c.name == id_or_name)
            .cloned()
            .ok_or_else(|| super::DriverError::NotFound(id_or_name.to_string()).into())
    }

    async fn inspect_image(&self, image: &str) -> Result<Option<ImageSnapshot>> {
        let envs = self.image_envs.lock().unwrap();
        Ok(envs.get(image).map(|env| ImageSnapshot { id: format!("sha256:{:x}", md5_like(image)), env: env.clone() }))
    }

    async fn pull(&self, image: &str) -> Result<String> {
        Ok(format!("sha256:{:x}", md5_like(image)))
    }

    async fn create(&self, spec: &RecreateSpec) -> Result<String> {
        let id = self.allocate_id();
        let snapshot = ContainerSnapshot {
            id: id.clone(),
            name: spec.name.clone(),
            status: "created".to_string(),
            image_digest: None,
            image_ref_as_started: spec.image.clone(),
            env: spec.env.clone(),
            mounts: spec.mounts.clone(),
            ports: spec.ports.clone(),
            network_mode: spec.network_mode.clone(),
            restart_policy: spec.restart_policy.clone(),
            healthcheck: spec.healthcheck.clone(),
            networks: spec.networks.clone(),
            labels: spec.labels.clone(),
            command: spec.command.clone(),
            entrypoint: spec.entrypoint.clone(),
            user: spec.user.clone(),
            workdir: spec.workdir.clone(),
            started_at: None,
            restart_count: 0,
        };
        self.containers.lock().unwrap().insert(id.clone(), snapshot);
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        match containers.get_mut(id) {
            Some(c) => {
                c.status = "running".to_string();
                c.started_at = Some(chrono::Utc::now());
                Ok(())
            }
            None => bail!(super::DriverError::NotFound(id.to_string())),
        }
    }

    async fn stop(&self, id: &str, _timeout_secs: u32) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        match containers.get_mut(id) {
            Some(c) => {
                c.status = "exited".to_string();
                Ok(())
            }
            None => bail!(super::DriverError::NotFound(id.to_string())),
        }
    }

    async fn rename(&self, id: &str, new_name: &str) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        match containers.get_mut(id) {
            Some(c) => {
                c.name = new_name.to_string();
                Ok(())
            }
            None => bail!(super::DriverError::NotFound(id.to_string())),
        }
    }

    async fn remove(&self, id: &str, _force: bool) -> Result<()> {
        self.containers.lock().unwrap().remove(id);
        Ok(())
    }

    async fn update_restart_policy(&self, id: &str, policy: &RestartPolicy) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        match containers.get_mut(id) {
            Some(c) => {
                c.restart_policy = policy.clone();
                Ok(())
            }
            None => bail!(super::DriverError::NotFound(id.to_string())),
        }
    }

    async fn verify_start(&self, id: &str, _policy: &VerifyPolicy) -> Result<VerifyOutcome> {
        if self.fail_verify {
            return Ok(VerifyOutcome::Failed(VerifyFailure::Unhealthy));
        }
        let containers = self.containers.lock().unwrap();
        match containers.get(id) {
            Some(c) if c.status == "running" => Ok(VerifyOutcome::Healthy),
            Some(c) => Ok(VerifyOutcome::Failed(VerifyFailure::NotRunning { status: c.status.clone() })),
            None => bail!(super::DriverError::NotFound(id.to_string())),
        }
    }

    async fn prune_images(&self, _until: Duration) -> Result<ImagePruneSummary> {
        Ok(ImagePruneSummary::default())
    }
}

fn md5_like(input: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    hasher.finish()
}
