//! Self-update trampoline (C7).
//!
//! The running daemon can be one of the containers it manages. Detecting
//! this, and handing the update off to a short-lived helper container
//! instead of replacing itself mid-cycle, is ported from
//! `original_source/app/__main__.py`'s self-id logic and
//! `app/utils/self_update.py::create_self_update_helper_container`.

use crate::engine::{Driver, RecreateSpec};
use crate::models::{ContainerSnapshot, ImageReference};
use anyhow::Result;
use std::collections::HashMap;
use std::fs;
use tracing::info;

pub const SELF_CONTAINER_ENV: &str = "CAPTN_CONTAINER";
pub const ROLE_ENV: &str = "ROLE";
pub const TARGET_CONTAINER_ENV: &str = "TARGET_CONTAINER";
pub const HELPER_ROLE: &str = "SELFUPDATEHELPER";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfIdentity {
    pub container_id: String,
    pub container_name: String,
}

/// Identifies whether this process is itself one of `containers`, by
/// cross-referencing the `CAPTN_CONTAINER` env sentinel, `HOSTNAME`, and
/// `/proc/self/cgroup` (both the `docker-<id>.scope` systemd-cgroup form
/// and a raw 64-hex container id line).
pub fn detect_self(containers: &[ContainerSnapshot]) -> Option<SelfIdentity> {
    if let Ok(sentinel) = std::env::var(SELF_CONTAINER_ENV) {
        if let Some(found) = containers.iter().find(|c| c.id.starts_with(&sentinel) || c.name == sentinel) {
            return Some(SelfIdentity { container_id: found.id.clone(), container_name: found.name.clone() });
        }
    }

    if let Ok(hostname) = std::env::var("HOSTNAME") {
        if let Some(found) = containers.iter().find(|c| c.id.starts_with(&hostname)) {
            return Some(SelfIdentity { container_id: found.id.clone(), container_name: found.name.clone() });
        }
    }

    if let Some(cgroup_id) = read_cgroup_container_id() {
        if let Some(found) = containers.iter().find(|c| c.id.starts_with(&cgroup_id)) {
            return Some(SelfIdentity { container_id: found.id.clone(), container_name: found.name.clone() });
        }
    }

    None
}

/// Parses `/proc/self/cgroup`, recognizing `.../docker-<64 hex>.scope` and
/// bare 64-hex-char path segments (both forms appear depending on whether
/// the host uses cgroup v1 or v2 with systemd as the cgroup driver).
fn read_cgroup_container_id() -> Option<String> {
    let contents = fs::read_to_string("/proc/self/cgroup").ok()?;
    parse_cgroup_container_id(&contents)
}

fn parse_cgroup_container_id(contents: &str) -> Option<String> {
    for line in contents.lines() {
        if let Some(scope_start) = line.rfind("docker-") {
            let rest = &line[scope_start + "docker-".len()..];
            if let Some(id) = rest.strip_suffix(".scope") {
                if is_hex64(id) {
                    return Some(id.to_string());
                }
            }
        }
        if let Some(segment) = line.rsplit('/').next() {
            if is_hex64(segment) {
                return Some(segment.to_string());
            }
        }
    }
    None
}

fn is_hex64(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Creates a helper container running `new_image`, mounting the engine
/// control socket, parameterized by `ROLE=SELFUPDATEHELPER` so the helper
/// re-invokes this same binary targeting `producer` rather than shipping a
/// bespoke bash script (the original embedded one; here the helper *is*
/// `captn` itself).
pub async fn spawn_helper(driver: &dyn Driver, producer: &ContainerSnapshot, new_image: &ImageReference) -> Result<()> {
    let mut env = HashMap::new();
    env.insert(ROLE_ENV.to_string(), HELPER_ROLE.to_string());
    env.insert(TARGET_CONTAINER_ENV.to_string(), producer.name.clone());

    let mounts = vec![crate::models::Mount {
        source: "/var/run/docker.sock".to_string(),
        destination: "/var/run/docker.sock".to_string(),
        mode: "rw".to_string(),
        rw: true,
        is_anonymous_volume: false,
    }];

    let spec = RecreateSpec {
        name: format!("{}_self_update_helper", producer.name),
        image: new_image.as_docker_string(),
        env,
        mounts,
        ports: Vec::new(),
        network_mode: "bridge".to_string(),
        restart_policy: crate::models::RestartPolicy { name: "no".to_string(), max_retry_count: 0 },
        healthcheck: None,
        networks: Vec::new(),
        labels: HashMap::new(),
        command: None,
        entrypoint: None,
        user: None,
        workdir: None,
    };

    driver.pull(&spec.image).await?;
    let id = driver.create(&spec).await?;
    driver.start(&id).await?;
    info!(producer = %producer.name, helper = %spec.name, "spawned self-update helper container");
    Ok(())
}

/// The single-shot path taken when `ROLE=SELFUPDATEHELPER` is set at
/// startup: run exactly one orchestration step against `TARGET_CONTAINER`
/// and exit. Wiring into `orchestrator::run_cycle` happens in `main`.
pub fn is_helper_role() -> bool {
    std::env::var(ROLE_ENV).map(|v| v == HELPER_ROLE).unwrap_or(false)
}

pub fn target_container() -> Option<String> {
    std::env::var(TARGET_CONTAINER_ENV).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_systemd_cgroup_scope_form() {
        let id = "a".repeat(64);
        let contents = format!("0::/system.slice/docker-{id}.scope\n");
        assert_eq!(parse_cgroup_container_id(&contents), Some(id));
    }

    #[test]
    fn parses_bare_cgroup_v2_id_form() {
        let id = "c".repeat(64);
        let contents = format!("0::/docker/{id}\n");
        assert_eq!(parse_cgroup_container_id(&contents), Some(id));
    }

    #[test]
    fn rejects_non_hex_segments() {
        let contents = "0::/user.slice/user-1000.slice\n";
        assert_eq!(parse_cgroup_container_id(contents), None);
    }
}
