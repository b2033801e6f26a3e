//! Bollard-backed `Driver` implementation. Grounded on
//! `other_examples`'s docker-maid/komodo/devrig pattern of driving a
//! local engine through `bollard::Docker` directly (`connect_with_local_defaults`,
//! `inspect_container`, `create_container`, `rename_container`, image prune).

use super::{Driver, DriverError, ImagePruneSummary, RecreateSpec, VerifyFailure, VerifyOutcome, VerifyPolicy};
use crate::models::{ContainerSnapshot, HealthcheckSpec, ImageSnapshot, Mount, NetworkAttachment, PortBinding, RestartPolicy};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{Config, CreateContainerOptions, RemoveContainerOptions, RenameContainerOptions, StopContainerOptions, UpdateContainerOptions};
use bollard::image::{CreateImageOptions, PruneImagesOptions};
use bollard::models::{HostConfig, PortBinding as BollardPortBinding, RestartPolicy as BollardRestartPolicy};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

pub struct BollardDriver {
    docker: Docker,
}

impl BollardDriver {
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().context("connecting to container engine socket")?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl Driver for BollardDriver {
    async fn list(&self, name_filter: Option<&str>) -> Result<Vec<ContainerSnapshot>> {
        let mut filters = HashMap::new();
        if let Some(name) = name_filter {
            filters.insert("name".to_string(), vec![name.to_string()]);
        }
        let opts = bollard::container::ListContainersOptions { all: true, filters, ..Default::default() };
        let summaries = self.docker.list_containers(Some(opts)).await.context("listing containers")?;

        let mut out = Vec::with_capacity(summaries.len());
        for summary in summaries {
            if let Some(id) = summary.id {
                out.push(self.inspect(&id).await?);
            }
        }
        Ok(out)
    }

    async fn inspect(&self, id_or_name: &str) -> Result<ContainerSnapshot> {
        let detail = self
            .docker
            .inspect_container(id_or_name, None)
            .await
            .map_err(|_| DriverError::NotFound(id_or_name.to_string()))?;
        Ok(to_snapshot(detail))
    }

    async fn inspect_image(&self, image: &str) -> Result<Option<ImageSnapshot>> {
        match self.docker.inspect_image(image).await {
            Ok(detail) => {
                let id = match detail.id {
                    Some(id) => id,
                    None => return Ok(None),
                };
                let env = detail
                    .config
                    .and_then(|c| c.env)
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|e| e.split_once('=').map(|(k, v)| (k.to_string(), v.to_string())))
                    .collect();
                Ok(Some(ImageSnapshot { id, env }))
            }
            Err(_) => Ok(None),
        }
    }

    async fn pull(&self, image: &str) -> Result<String> {
        let options = CreateImageOptions { from_image: image.to_string(), ..Default::default() };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            if let Err(e) = progress {
                warn!(image, error = %e, "pull progress error");
            }
        }
        self.inspect_image(image)
            .await?
            .map(|snapshot| snapshot.id)
            .ok_or_else(|| DriverError::Transport(format!("image {image} not present after pull")).into())
    }

    async fn create(&self, spec: &RecreateSpec) -> Result<String> {
        let host_config = HostConfig {
            binds: Some(
                spec.mounts
                    .iter()
                    .map(|m| format!("{}:{}:{}", m.source, m.destination, if m.rw { "rw" } else { "ro" }))
                    .collect(),
            ),
            port_bindings: Some(port_bindings_map(&spec.ports)),
            network_mode: Some(spec.network_mode.clone()),
            restart_policy: Some(to_bollard_restart_policy(&spec.restart_policy)),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
            cmd: spec.command.clone(),
            entrypoint: spec.entrypoint.clone(),
            user: spec.user.clone(),
            working_dir: spec.workdir.clone(),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions { name: spec.name.clone(), platform: None };
        let response = self.docker.create_container(Some(options), config).await.context("creating container")?;
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker.start_container::<String>(id, None).await.context("starting container")?;
        Ok(())
    }

    async fn stop(&self, id: &str, timeout_secs: u32) -> Result<()> {
        let opts = StopContainerOptions { t: timeout_secs as i64 };
        self.docker.stop_container(id, Some(opts)).await.context("stopping container")?;
        Ok(())
    }

    async fn rename(&self, id: &str, new_name: &str) -> Result<()> {
        let opts = RenameContainerOptions { name: new_name.to_string() };
        self.docker.rename_container(id, opts).await.context("renaming container")?;
        Ok(())
    }

    async fn remove(&self, id: &str, force: bool) -> Result<()> {
        let opts = RemoveContainerOptions { force, ..Default::default() };
        self.docker.remove_container(id, Some(opts)).await.context("removing container")?;
        Ok(())
    }

    /// Rewrites the restart policy of a running/stopped container in place
    /// via `POST /containers/{id}/update`, without recreating it.
    async fn update_restart_policy(&self, id: &str, policy: &RestartPolicy) -> Result<()> {
        let opts = UpdateContainerOptions::<String> {
            restart_policy: Some(to_bollard_restart_policy(policy)),
            ..Default::default()
        };
        self.docker.update_container(id, opts).await.context("updating container restart policy")?;
        Ok(())
    }

    /// Grace wait, then interval polling against `max_wait`, comparing each
    /// sample against the baseline (`RestartCount`, `StartedAt`) captured on
    /// entry — the SAMPLE state machine of §4.5. A rising `RestartCount`
    /// means the engine itself restarted the container (`Restarted`); a
    /// changed `StartedAt` with no `RestartCount` change means something
    /// outside this cycle restarted it (`ManuallyRestarted`).
    async fn verify_start(&self, id: &str, policy: &VerifyPolicy) -> Result<VerifyOutcome> {
        tokio::time::sleep(policy.grace).await;

        let baseline = self.docker.inspect_container(id, None).await.context("capturing verify baseline")?;
        let baseline_restart_count = baseline.restart_count.unwrap_or(0);
        let baseline_started_at = baseline.state.clone().unwrap_or_default().started_at;

        let deadline_at = Instant::now() + policy.max_wait;
        let mut stable_since: Option<Instant> = None;

        loop {
            let detail = self.docker.inspect_container(id, None).await.context("polling container state")?;
            let state = detail.state.clone().unwrap_or_default();

            let restart_count = detail.restart_count.unwrap_or(0);
            if restart_count > baseline_restart_count {
                return Ok(VerifyOutcome::Failed(VerifyFailure::Restarted { restart_count }));
            }
            if state.started_at != baseline_started_at {
                return Ok(VerifyOutcome::Failed(VerifyFailure::ManuallyRestarted));
            }

            let running = matches!(
                state.status,
                Some(bollard::models::ContainerStateStatusEnum::RUNNING) | Some(bollard::models::ContainerStateStatusEnum::CREATED)
            );
            if !running {
                let status = state.status.map(|s| format!("{s:?}").to_lowercase()).unwrap_or_else(|| "unknown".to_string());
                return Ok(VerifyOutcome::Failed(VerifyFailure::NotRunning { status }));
            }

            let healthy = state
                .health
                .as_ref()
                .and_then(|h| h.status)
                .map(|s| s == bollard::models::HealthStatusEnum::HEALTHY)
                .unwrap_or(state.running.unwrap_or(false));

            if healthy {
                let now = Instant::now();
                let since = *stable_since.get_or_insert(now);
                if now.duration_since(since) >= policy.stable_time {
                    return Ok(VerifyOutcome::Healthy);
                }
            } else {
                stable_since = None;
            }

            if Instant::now() >= deadline_at {
                return Ok(VerifyOutcome::Failed(VerifyFailure::DeadlineExceeded));
            }
            tokio::time::sleep(policy.interval).await;
        }
    }

    async fn prune_images(&self, until: Duration) -> Result<ImagePruneSummary> {
        let mut filters = HashMap::new();
        filters.insert("dangling".to_string(), vec!["false".to_string()]);
        filters.insert("until".to_string(), vec![format!("{}h", until.as_secs() / 3600)]);
        let opts = PruneImagesOptions { filters };
        let report = self.docker.prune_images(Some(opts)).await.context("pruning images")?;
        Ok(ImagePruneSummary {
            images_deleted: report.images_deleted.map(|v| v.len()).unwrap_or(0),
            space_reclaimed_bytes: report.space_reclaimed.unwrap_or(0) as u64,
        })
    }
}

fn port_bindings_map(ports: &[PortBinding]) -> HashMap<String, Option<Vec<BollardPortBinding>>> {
    let mut map: HashMap<String, Option<Vec<BollardPortBinding>>> = HashMap::new();
    for p in ports {
        let key = format!("{}/{}", p.container_port, p.protocol);
        let binding = BollardPortBinding { host_ip: p.host_ip.clone(), host_port: p.host_port.clone() };
        map.entry(key).or_insert_with(|| Some(Vec::new())).get_or_insert_with(Vec::new).push(binding);
    }
    map
}

fn to_bollard_restart_policy(policy: &RestartPolicy) -> BollardRestartPolicy {
    use bollard::models::RestartPolicyNameEnum::*;
    let name = match policy.name.as_str() {
        "always" => ALWAYS,
        "unless-stopped" => UNLESS_STOPPED,
        "on-failure" => ON_FAILURE,
        _ => NO,
    };
    BollardRestartPolicy { name: Some(name), maximum_retry_count: Some(policy.max_retry_count as i64) }
}

fn to_snapshot(detail: bollard::models::ContainerInspectResponse) -> ContainerSnapshot {
    let config = detail.config.clone().unwrap_or_default();
    let host_config = detail.host_config.clone().unwrap_or_default();
    let state = detail.state.clone().unwrap_or_default();

    let env: HashMap<String, String> = config
        .env
        .unwrap_or_default()
        .into_iter()
        .filter_map(|e| e.split_once('=').map(|(k, v)| (k.to_string(), v.to_string())))
        .collect();

    let mounts = detail
        .mounts
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|m| {
            let source = m.source.clone().unwrap_or_default();
            Mount {
                source: source.clone(),
                destination: m.destination.clone().unwrap_or_default(),
                mode: m.mode.clone().unwrap_or_default(),
                rw: m.rw.unwrap_or(true),
                is_anonymous_volume: is_anonymous_volume_name(&source),
            }
        })
        .collect();

    let ports = host_config
        .port_bindings
        .unwrap_or_default()
        .into_iter()
        .flat_map(|(key, bindings)| {
            let mut parts = key.splitn(2, '/');
            let container_port = parts.next().unwrap_or_default().to_string();
            let protocol = parts.next().unwrap_or("tcp").to_string();
            bindings.unwrap_or_default().into_iter().map(move |b| PortBinding {
                container_port: container_port.clone(),
                protocol: protocol.clone(),
                host_ip: b.host_ip,
                host_port: b.host_port,
            })
        })
        .collect();

    let restart_policy = host_config
        .restart_policy
        .map(|p| RestartPolicy {
            name: p.name.map(|n| format!("{n:?}").to_lowercase().replace('_', "-")).unwrap_or_else(|| "no".to_string()),
            max_retry_count: p.maximum_retry_count.unwrap_or(0),
        })
        .unwrap_or(RestartPolicy { name: "no".to_string(), max_retry_count: 0 });

    let healthcheck = config.healthcheck.map(|h| HealthcheckSpec {
        test: h.test.unwrap_or_default(),
        interval_ns: h.interval.unwrap_or(0),
        timeout_ns: h.timeout.unwrap_or(0),
        retries: h.retries.unwrap_or(0),
        start_period_ns: h.start_period.unwrap_or(0),
    });

    let networks = detail
        .network_settings
        .and_then(|ns| ns.networks)
        .unwrap_or_default()
        .into_iter()
        .map(|(name, net)| NetworkAttachment {
            network_name: name,
            aliases: net.aliases.unwrap_or_default(),
            links: net.links.unwrap_or_default(),
            driver_opts: net.driver_opts.unwrap_or_default(),
            ipv4_address: net.ip_address,
            ipv6_address: net.global_ipv6_address,
            mac_address: net.mac_address,
        })
        .collect();

    ContainerSnapshot {
        id: detail.id.unwrap_or_default(),
        name: detail.name.unwrap_or_default().trim_start_matches('/').to_string(),
        status: state.status.map(|s| format!("{s:?}").to_lowercase()).unwrap_or_default(),
        image_digest: detail.image.clone(),
        image_ref_as_started: config.image.unwrap_or_default(),
        env,
        mounts,
        ports,
        network_mode: host_config.network_mode.unwrap_or_else(|| "bridge".to_string()),
        restart_policy,
        healthcheck,
        networks,
        labels: config.labels.unwrap_or_default(),
        command: config.cmd,
        entrypoint: config.entrypoint,
        user: config.user,
        workdir: config.working_dir,
        started_at: state.started_at.and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&chrono::Utc)),
        restart_count: detail.restart_count.unwrap_or(0),
    }
}

/// Bollard reports anonymous volumes with a 64-character hex source name
/// (the engine-assigned volume id) rather than a host path or named volume.
fn is_anonymous_volume_name(source: &str) -> bool {
    source.len() == 64 && source.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_anonymous_volume_ids() {
        assert!(is_anonymous_volume_name(&"a".repeat(64)));
        assert!(!is_anonymous_volume_name("/host/path"));
        assert!(!is_anonymous_volume_name("named-volume"));
    }
}
