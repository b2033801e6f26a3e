//! Engine-agnostic container and recreation types (C5 data model).

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub source: String,
    pub destination: String,
    pub mode: String,
    pub rw: bool,
    /// Anonymous volumes have a 64-hex-char source name; these are dropped
    /// on recreate rather than copied, per §4.5.
    pub is_anonymous_volume: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: String,
    pub protocol: String,
    pub host_ip: Option<String>,
    pub host_port: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub name: String,
    pub max_retry_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthcheckSpec {
    pub test: Vec<String>,
    pub interval_ns: i64,
    pub timeout_ns: i64,
    pub retries: i64,
    pub start_period_ns: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    pub network_name: String,
    pub aliases: Vec<String>,
    pub links: Vec<String>,
    pub driver_opts: HashMap<String, String>,
    pub ipv4_address: Option<String>,
    pub ipv6_address: Option<String>,
    pub mac_address: Option<String>,
}

/// A point-in-time snapshot of a running (or stopped) container, shaped to
/// carry exactly what the driver needs to recreate it. Mirrors the fields
/// of bollard's `ContainerInspectResponse` the spec's recreate protocol
/// reads, without depending on bollard's types directly so `MockDriver` can
/// construct one without an engine connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    pub id: String,
    pub name: String,
    pub status: String,
    pub image_digest: Option<String>,
    pub image_ref_as_started: String,
    pub env: HashMap<String, String>,
    pub mounts: Vec<Mount>,
    pub ports: Vec<PortBinding>,
    pub network_mode: String,
    pub restart_policy: RestartPolicy,
    pub healthcheck: Option<HealthcheckSpec>,
    pub networks: Vec<NetworkAttachment>,
    pub labels: HashMap<String, String>,
    pub command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub user: Option<String>,
    pub workdir: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_count: i64,
}

/// A parsed backup container name: `<original>_bak_cu_<YYYYMMDD-HHMMSS>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMarker {
    pub original_name: String,
    pub created_at: NaiveDateTime,
}

const BACKUP_INFIX: &str = "_bak_cu_";

pub fn backup_name(original: &str, at: DateTime<Utc>) -> String {
    format!("{original}{BACKUP_INFIX}{}", at.format("%Y%m%d-%H%M%S"))
}

/// Tolerates underscores inside `<original>` by matching the trailing
/// `_bak_cu_<14 digits>` suffix first, per SPEC_FULL §6.
pub fn parse_backup_name(name: &str) -> Option<BackupMarker> {
    let idx = name.rfind(BACKUP_INFIX)?;
    let original_name = name[..idx].to_string();
    if original_name.is_empty() {
        return None;
    }
    let ts = &name[idx + BACKUP_INFIX.len()..];
    let created_at = NaiveDateTime::parse_from_str(ts, "%Y%m%d-%H%M%S").ok()?;
    Some(BackupMarker { original_name, created_at })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn round_trips_backup_name() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 5, 14, 30, 0).unwrap();
        let name = backup_name("my_app_server", ts);
        let parsed = parse_backup_name(&name).expect("should parse");
        assert_eq!(parsed.original_name, "my_app_server");
        assert_eq!(parsed.created_at, ts.naive_utc());
    }

    #[test]
    fn rejects_names_without_marker() {
        assert!(parse_backup_name("my_app_server").is_none());
    }
}
