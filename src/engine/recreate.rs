//! Container recreation spec construction and the atomic
//! rename/stop/create/start/verify/rollback protocol (C5).

use super::env_filter::{EnvFilterRules, reconcile_env};
use super::{Driver, RecreateSpec, VerifyFailure, VerifyOutcome, VerifyPolicy};
use crate::models::{ContainerSnapshot, NetworkAttachment, RestartPolicy, backup_name};
use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use tracing::{info, warn};

/// Builds the spec for the replacement container. Anonymous volumes (64-hex
/// source names bollard assigns when no host path was given) are dropped
/// rather than copied forward — a fresh one is created alongside the new
/// container, matching how the engine behaves when no explicit mount is
/// declared. Ports are omitted entirely when the snapshot's network mode is
/// `host` or `none`, since port publishing is meaningless there.
pub fn recreate_spec(
    snapshot: &ContainerSnapshot,
    new_image: &str,
    image_env: &HashMap<String, String>,
    env_rules: &EnvFilterRules,
) -> RecreateSpec {
    let mounts: Vec<_> = snapshot.mounts.iter().filter(|m| !m.is_anonymous_volume).cloned().collect();

    let ports = if snapshot.network_mode == "host" || snapshot.network_mode == "none" {
        Vec::new()
    } else {
        snapshot.ports.clone()
    };

    let env = reconcile_env(&snapshot.env, image_env, &snapshot.name, env_rules);

    RecreateSpec {
        name: snapshot.name.clone(),
        image: new_image.to_string(),
        env,
        mounts,
        ports,
        network_mode: snapshot.network_mode.clone(),
        restart_policy: snapshot.restart_policy.clone(),
        healthcheck: snapshot.healthcheck.clone(),
        networks: snapshot.networks.clone(),
        labels: snapshot.labels.clone(),
        command: snapshot.command.clone(),
        entrypoint: snapshot.entrypoint.clone(),
        user: snapshot.user.clone(),
        workdir: snapshot.workdir.clone(),
    }
}

pub struct RecreateOutcome {
    pub new_id: String,
    pub verify: VerifyOutcome,
    pub rolled_back: bool,
}

/// The four-step protocol of §4.5: rename the running container out of the
/// way, disable its restart policy so a flapping old container can't race
/// the new one back onto the name, stop it, build+create+start+verify the
/// replacement, roll back to the backup (restoring its original restart
/// policy) on verify failure, then run the post-hook (caller's
/// responsibility) and roll back again if the post-hook itself fails.
pub async fn recreate_container(
    driver: &dyn Driver,
    snapshot: &ContainerSnapshot,
    spec: &RecreateSpec,
    verify_policy: &VerifyPolicy,
) -> Result<RecreateOutcome> {
    let backup = backup_name(&snapshot.name, chrono::Utc::now());
    let disabled = RestartPolicy { name: "no".to_string(), max_retry_count: 0 };

    driver.rename(&snapshot.id, &backup).await.context("renaming original container to backup")?;
    if let Err(e) = driver.update_restart_policy(&snapshot.id, &disabled).await {
        warn!(container = %snapshot.name, error = %e, "failed to disable backup restart policy, continuing");
    }
    driver.stop(&snapshot.id, 10).await.context("stopping backup container")?;

    let create_result = driver.create(spec).await;
    let new_id = match create_result {
        Ok(id) => id,
        Err(e) => {
            warn!(container = %snapshot.name, error = %e, "create failed, rolling back to backup");
            rollback(driver, &snapshot.id, &snapshot.name, &backup, &snapshot.restart_policy).await?;
            bail!("failed to create replacement container: {e}");
        }
    };

    if let Err(e) = driver.start(&new_id).await {
        warn!(container = %snapshot.name, error = %e, "start failed, rolling back to backup");
        driver.remove(&new_id, true).await.ok();
        rollback(driver, &snapshot.id, &snapshot.name, &backup, &snapshot.restart_policy).await?;
        bail!("failed to start replacement container: {e}");
    }

    let verify = driver.verify_start(&new_id, verify_policy).await?;
    if let VerifyOutcome::Failed(reason) = &verify {
        warn!(container = %snapshot.name, ?reason, "verify_start failed, rolling back to backup");
        driver.stop(&new_id, 10).await.ok();
        driver.remove(&new_id, true).await.ok();
        rollback(driver, &snapshot.id, &snapshot.name, &backup, &snapshot.restart_policy).await?;
        return Ok(RecreateOutcome { new_id, verify, rolled_back: true });
    }

    info!(container = %snapshot.name, "recreate succeeded");
    Ok(RecreateOutcome { new_id, verify, rolled_back: false })
}

async fn rollback(
    driver: &dyn Driver,
    backup_id: &str,
    original_name: &str,
    backup_name: &str,
    original_restart_policy: &RestartPolicy,
) -> Result<()> {
    driver.rename(backup_id, original_name).await.map_err(|e| {
        super::DriverError::RollbackFailed { container: original_name.to_string(), reason: e.to_string() }
    })?;
    if let Err(e) = driver.update_restart_policy(backup_id, original_restart_policy).await {
        warn!(container = original_name, error = %e, "failed to restore original restart policy on rollback");
    }
    driver.start(backup_id).await.map_err(|e| {
        super::DriverError::RollbackFailed { container: original_name.to_string(), reason: e.to_string() }
    })?;
    info!(container = original_name, backup = backup_name, "rolled back to previous container");
    Ok(())
}

pub fn failure_reason(outcome: &VerifyOutcome) -> Option<&VerifyFailure> {
    match outcome {
        VerifyOutcome::Failed(reason) => Some(reason),
        VerifyOutcome::Healthy => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockDriver;
    use crate::models::{HealthcheckSpec, Mount, PortBinding};
    use std::time::Duration;

    fn snapshot() -> ContainerSnapshot {
        ContainerSnapshot {
            id: "c1".to_string(),
            name: "web".to_string(),
            status: "running".to_string(),
            image_digest: Some("sha256:old".to_string()),
            image_ref_as_started: "nginx:1.25.3".to_string(),
            env: HashMap::from([("LOG_LEVEL".to_string(), "debug".to_string())]),
            mounts: vec![Mount {
                source: "a".repeat(64),
                destination: "/data".to_string(),
                mode: "rw".to_string(),
                rw: true,
                is_anonymous_volume: true,
            }],
            ports: vec![PortBinding { container_port: "80/tcp".to_string(), protocol: "tcp".to_string(), host_ip: None, host_port: Some("8080".to_string()) }],
            network_mode: "bridge".to_string(),
            restart_policy: RestartPolicy { name: "always".to_string(), max_retry_count: 0 },
            healthcheck: None::<HealthcheckSpec>,
            networks: Vec::<NetworkAttachment>::new(),
            labels: HashMap::new(),
            command: None,
            entrypoint: None,
            user: None,
            workdir: None,
            started_at: None,
            restart_count: 0,
        }
    }

    #[test]
    fn recreate_spec_drops_anonymous_volumes() {
        let snap = snapshot();
        let spec = recreate_spec(&snap, "nginx:1.25.4", &HashMap::new(), &EnvFilterRules::default());
        assert!(spec.mounts.is_empty());
    }

    #[test]
    fn recreate_spec_omits_ports_in_host_network_mode() {
        let mut snap = snapshot();
        snap.network_mode = "host".to_string();
        let spec = recreate_spec(&snap, "nginx:1.25.4", &HashMap::new(), &EnvFilterRules::default());
        assert!(spec.ports.is_empty());
    }

    fn test_policy() -> VerifyPolicy {
        VerifyPolicy {
            grace: Duration::from_secs(0),
            interval: Duration::from_millis(10),
            stable_time: Duration::from_secs(0),
            max_wait: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn recreate_succeeds_and_keeps_new_container() {
        let driver = MockDriver::new().with_container(snapshot());
        let spec = recreate_spec(&snapshot(), "nginx:1.25.4", &HashMap::new(), &EnvFilterRules::default());
        let outcome =
            recreate_container(&driver, &snapshot(), &spec, &test_policy()).await.expect("recreate should succeed");
        assert_eq!(outcome.verify, VerifyOutcome::Healthy);
        assert!(!outcome.rolled_back);
    }

    #[tokio::test]
    async fn recreate_rolls_back_when_verify_fails() {
        let driver = MockDriver::new().with_container(snapshot()).failing_verify();
        let spec = recreate_spec(&snapshot(), "nginx:1.25.4", &HashMap::new(), &EnvFilterRules::default());
        let outcome = recreate_container(&driver, &snapshot(), &spec, &test_policy())
            .await
            .expect("recreate call itself should not error on verify failure");
        assert!(outcome.rolled_back);
        let restored = driver.inspect("web").await.expect("original should be restored under its name");
        assert_eq!(restored.name, "web");
    }

    #[tokio::test]
    async fn recreate_disables_and_restores_backup_restart_policy() {
        let driver = MockDriver::new().with_container(snapshot()).failing_verify();
        let spec = recreate_spec(&snapshot(), "nginx:1.25.4", &HashMap::new(), &EnvFilterRules::default());
        recreate_container(&driver, &snapshot(), &spec, &test_policy())
            .await
            .expect("recreate call itself should not error on verify failure");
        let restored = driver.inspect("web").await.expect("original should be restored under its name");
        assert_eq!(restored.restart_policy, snapshot().restart_policy);
    }
}
