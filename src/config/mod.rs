//! INI-backed configuration loading and hot-reloadable global handle.
//!
//! Generalizes the teacher's `GLOBAL_CONFIG` + `start_config_watcher`
//! pattern (`src/config/mod.rs`, originally backed by a Kubernetes
//! ConfigMap/Secret) to a plain file watched by mtime.

pub mod rules;

use anyhow::{Context, Result, bail};
use arc_swap::ArcSwap;
use ini::Ini;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

pub use rules::{load_rule_bag, load_assignment_tables};

const KNOWN_SECTIONS: &[&str] = &[
    "general",
    "log",
    "notifications",
    "prune",
    "selfUpdate",
    "updateVerification",
    "envFiltering",
    "registryAuth",
    "preScripts",
    "postScripts",
    "rules",
    "assignmentsByName",
    "assignmentsByImage",
    "assignmentsById",
    "credentials",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptnConfig {
    #[serde(default = "default_cron_schedule")]
    pub schedule: String,
    #[serde(default = "default_delay")]
    pub delay_between_updates: Duration,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default)]
    pub prune: crate::cleanup::PruneConfig,
    #[serde(default)]
    pub self_update_enabled: bool,
    #[serde(default = "default_true")]
    pub remove_helper_container: bool,
    /// `updateVerification.gracePeriod` — wait before the first sample.
    #[serde(default = "default_verify_grace")]
    pub verify_grace: Duration,
    /// `updateVerification.maxWait` — deadline for the SAMPLE loop.
    #[serde(default = "default_verify_max_wait")]
    pub verify_max_wait: Duration,
    /// `updateVerification.stableTime` — continuous-health duration required.
    #[serde(default = "default_verify_stable_time")]
    pub verify_stable_time: Duration,
    /// `updateVerification.checkInterval` — polling cadence.
    #[serde(default = "default_verify_check_interval")]
    pub verify_check_interval: Duration,
    #[serde(default)]
    pub env_filtering: crate::engine::env_filter::EnvFilterRules,
    #[serde(default)]
    pub registry_auth_enabled: bool,
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    /// `[notifications] webhookUrl`/`enabled` — the illustrative notifier
    /// this crate ships (`notifications::WebhookNotifier`).
    #[serde(default)]
    pub notification_webhook_url: Option<String>,
    #[serde(default)]
    pub notification_webhook_enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_cron_schedule() -> String {
    "0 */30 * * * *".to_string()
}

fn default_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/app/logs")
}

fn default_verify_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_verify_max_wait() -> Duration {
    Duration::from_secs(300)
}

fn default_verify_stable_time() -> Duration {
    Duration::from_secs(10)
}

fn default_verify_check_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for CaptnConfig {
    fn default() -> Self {
        Self {
            schedule: default_cron_schedule(),
            delay_between_updates: default_delay(),
            dry_run: false,
            log_level: default_log_level(),
            log_json: false,
            log_dir: default_log_dir(),
            prune: crate::cleanup::PruneConfig::default(),
            self_update_enabled: false,
            remove_helper_container: true,
            verify_grace: default_verify_grace(),
            verify_max_wait: default_verify_max_wait(),
            verify_stable_time: default_verify_stable_time(),
            verify_check_interval: default_verify_check_interval(),
            env_filtering: crate::engine::env_filter::EnvFilterRules::default(),
            registry_auth_enabled: false,
            credentials_file: None,
            notification_webhook_url: None,
            notification_webhook_enabled: false,
        }
    }
}

/// Parses `s`/`m`/`h`/`d`-suffixed durations ("30m", "2h", "10s"), or a
/// bare number of seconds. Ports `common.py::parse_duration`.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("empty duration string");
    }
    let (number_part, unit) = match raw.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&raw[..raw.len() - 1], c),
        _ => (raw, 's'),
    };
    let value: u64 = number_part.parse().with_context(|| format!("invalid duration {raw:?}"))?;
    let seconds = match unit {
        's' => value,
        'm' => value * 60,
        'h' => value * 3600,
        'd' => value * 86400,
        other => bail!("unknown duration unit {other:?} in {raw:?}"),
    };
    Ok(Duration::from_secs(seconds))
}

/// Loads and validates the INI file at `path`. Unknown section names are
/// rejected outright; unknown keys inside a known section are accepted and
/// logged at debug, since `rules`/`assignments*` sections are inherently
/// open-ended (§6, §9).
pub fn load(path: &Path) -> Result<CaptnConfig> {
    let ini = Ini::load_from_file(path).with_context(|| format!("reading config file {}", path.display()))?;

    let known: HashSet<&str> = KNOWN_SECTIONS.iter().copied().collect();
    for (section, _) in ini.iter() {
        if let Some(name) = section {
            if !known.contains(name) {
                bail!("unrecognized config section {name:?}");
            }
        }
    }

    let mut config = CaptnConfig::default();

    if let Some(general) = ini.section(Some("general")) {
        if let Some(schedule) = general.get("schedule") {
            config.schedule = schedule.to_string();
        }
        if let Some(delay) = general.get("delayBetweenUpdates") {
            config.delay_between_updates = parse_duration(delay)?;
        }
        if let Some(dry_run) = general.get("dryRun") {
            config.dry_run = parse_bool(dry_run);
        }
        for key in general.iter().map(|(k, _)| k) {
            if !matches!(key, "schedule" | "delayBetweenUpdates" | "dryRun") {
                debug!(section = "general", key, "unrecognized key in known section, ignoring");
            }
        }
    }

    if let Some(log) = ini.section(Some("log")) {
        if let Some(level) = log.get("level") {
            config.log_level = level.to_string();
        }
        if let Some(json) = log.get("json") {
            config.log_json = parse_bool(json);
        }
        if let Some(dir) = log.get("dir") {
            config.log_dir = PathBuf::from(dir);
        }
    }

    if let Some(prune) = ini.section(Some("prune")) {
        if let Some(v) = prune.get("removeOldContainers") {
            config.prune.remove_old_containers = parse_bool(v);
        }
        if let Some(v) = prune.get("removeUnusedImages") {
            config.prune.remove_unused_images = parse_bool(v);
        }
        if let Some(v) = prune.get("backupMaxAge") {
            config.prune.backup_max_age = parse_duration(v)?;
        }
        if let Some(v) = prune.get("minBackupsToKeep") {
            config.prune.min_backups_to_keep = v.parse().context("minBackupsToKeep must be an integer")?;
        }
    }

    if let Some(selfupdate) = ini.section(Some("selfUpdate")) {
        if let Some(v) = selfupdate.get("enabled") {
            config.self_update_enabled = parse_bool(v);
        }
        if let Some(v) = selfupdate.get("removeHelperContainer") {
            config.remove_helper_container = parse_bool(v);
        }
    }

    if let Some(verify) = ini.section(Some("updateVerification")) {
        if let Some(v) = verify.get("gracePeriod") {
            config.verify_grace = parse_duration(v)?;
        }
        if let Some(v) = verify.get("maxWait") {
            config.verify_max_wait = parse_duration(v)?;
        }
        if let Some(v) = verify.get("stableTime") {
            config.verify_stable_time = parse_duration(v)?;
        }
        if let Some(v) = verify.get("checkInterval") {
            config.verify_check_interval = parse_duration(v)?;
        }
    }

    if let Some(env_filtering) = ini.section(Some("envFiltering")) {
        if let Some(v) = env_filtering.get("excludePatterns") {
            config.env_filtering.exclude_patterns = split_patterns(v);
        }
        if let Some(v) = env_filtering.get("preservePatterns") {
            config.env_filtering.preserve_patterns = split_patterns(v);
        }
    }

    if let Some(notifications) = ini.section(Some("notifications")) {
        if let Some(v) = notifications.get("webhookUrl") {
            config.notification_webhook_url = Some(v.to_string());
        }
        if let Some(v) = notifications.get("enabled") {
            config.notification_webhook_enabled = parse_bool(v);
        }
    }

    if let Some(registry_auth) = ini.section(Some("registryAuth")) {
        if let Some(v) = registry_auth.get("enabled") {
            config.registry_auth_enabled = parse_bool(v);
        }
        if let Some(v) = registry_auth.get("credentialsFile") {
            config.credentials_file = Some(PathBuf::from(v));
        }
    }

    Ok(config)
}

fn split_patterns(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

/// Hot-reloadable global handle mirroring the teacher's `GLOBAL_CONFIG`
/// pattern, but watching the file's mtime rather than a Kubernetes watch
/// stream.
pub static GLOBAL_CONFIG: Lazy<ArcSwap<CaptnConfig>> = Lazy::new(|| ArcSwap::from_pointee(CaptnConfig::default()));

pub fn current() -> Arc<CaptnConfig> {
    GLOBAL_CONFIG.load_full()
}

/// Spawns a background task that reloads `path` whenever its mtime
/// changes, swapping the new config into `GLOBAL_CONFIG`. A failed reload
/// is logged and the previous config is kept in place.
pub fn start_config_watcher(path: PathBuf, poll_interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_modified: Option<SystemTime> = None;
        loop {
            tokio::time::sleep(poll_interval).await;
            let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not stat config file");
                    continue;
                }
            };
            if last_modified == Some(modified) {
                continue;
            }
            last_modified = Some(modified);
            match load(&path) {
                Ok(new_config) => {
                    GLOBAL_CONFIG.store(Arc::new(new_config));
                    info!(path = %path.display(), "configuration reloaded");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "config reload failed, keeping previous config"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixed_durations() {
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn rejects_unknown_duration_unit() {
        assert!(parse_duration("5x").is_err());
    }

    #[test]
    fn loads_ini_with_known_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captn.ini");
        std::fs::write(
            &path,
            "[general]\nschedule = 0 */15 * * * *\ndelayBetweenUpdates = 1m\n\n[prune]\nminBackupsToKeep = 3\n",
        )
        .unwrap();
        let config = load(&path).unwrap();
        assert_eq!(config.schedule, "0 */15 * * * *");
        assert_eq!(config.delay_between_updates, Duration::from_secs(60));
        assert_eq!(config.prune.min_backups_to_keep, 3);
    }

    #[test]
    fn rejects_unknown_section_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captn.ini");
        std::fs::write(&path, "[totallyUnknown]\nfoo = bar\n").unwrap();
        assert!(load(&path).is_err());
    }
}
