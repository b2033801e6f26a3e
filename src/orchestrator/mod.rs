//! Per-container update pipeline (C6).
//!
//! Implemented as one straight-line async function with early returns per
//! stage — the same shape the teacher's `controller::deployment::reconcile`
//! used for a single Kubernetes object, generalized here to a local
//! container loop instead of a reconcile queue.

use crate::config::CaptnConfig;
use crate::engine::env_filter::EnvFilterRules;
use crate::engine::recreate::{recreate_container, recreate_spec};
use crate::engine::{Driver, VerifyOutcome, VerifyPolicy};
use crate::models::{AssignmentTables, ContainerSnapshot, ImageReference, RuleBag, UpdateOutcome, UpdateStatus};
use crate::policy::{evaluate, resolve_rule};
use crate::registry::pipeline::select;
use crate::registry::{RegistryClient, RegistryCredential, TagCandidate};
use crate::report::ReportCollector;
use crate::selfupdate::{self, SelfIdentity};
use crate::version::{ChangeCategory, Version, compare, normalize};
use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct OrchestratorContext {
    pub config: Arc<CaptnConfig>,
    pub rules: Arc<RuleBag>,
    pub assignments: Arc<AssignmentTables>,
    pub env_rules: Arc<EnvFilterRules>,
    pub credentials: Arc<dyn Fn(&str, &str) -> RegistryCredential + Send + Sync>,
    pub registry_client_for: Arc<dyn Fn(&str) -> Box<dyn RegistryClient> + Send + Sync>,
    pub dry_run: bool,
}

/// A candidate queued for the self-update trampoline: the permitted new
/// image for the container hosting this process, found during the normal
/// classify/authorize pipeline but never recreated in-cycle (§4.7).
pub struct SelfUpdateRequest {
    pub container: ContainerSnapshot,
    pub new_image: ImageReference,
}

pub struct CycleOutcome {
    pub self_update: Option<SelfUpdateRequest>,
}

/// Runs one full cycle across `containers`, respecting self-update
/// deferral and progressive-upgrade delay. Sequential by construction —
/// no per-container `tokio::spawn` fan-out (§5).
pub async fn run_cycle(
    ctx: &OrchestratorContext,
    driver: &dyn Driver,
    containers: Vec<ContainerSnapshot>,
    report: &ReportCollector,
    cancel: &CancellationToken,
) -> Result<CycleOutcome> {
    report.mark_start();
    let self_identity = selfupdate::detect_self(&containers);
    let mut self_update_request: Option<SelfUpdateRequest> = None;

    for container in containers {
        if cancel.is_cancelled() {
            info!("shutdown requested, stopping before next container");
            break;
        }

        report.inc_processed();

        let is_self = self_identity
            .as_ref()
            .map(|identity| identity.container_id == container.id)
            .unwrap_or(false);

        if is_self {
            info!(container = %container.name, "container is the running engine itself, deferring to self-update trampoline");
            match find_self_update_candidate(ctx, &container, report).await {
                Ok(Some((new_image, _candidate))) => {
                    report.mark_deferred(&container.name);
                    self_update_request = Some(SelfUpdateRequest { container, new_image });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(container = %container.name, error = %e, "self-update candidate lookup failed");
                    report.add_error(&container.name, &e.to_string());
                }
            }
            continue;
        }

        if let Err(e) = process_container(ctx, driver, &container, report).await {
            warn!(container = %container.name, error = %e, "update cycle failed for container");
            report.add_error(&container.name, &e.to_string());
        }
    }

    report.mark_end();
    Ok(CycleOutcome { self_update: self_update_request })
}

/// Preflight: a rule that permits nothing can never authorize an update, so
/// the container is skipped before any registry traffic (§4.6).
fn rule_permits_anything(rule: &crate::models::Rule) -> bool {
    rule.allow.values().any(|allowed| *allowed)
}

/// Digest override (§4.1 last paragraph): when the version classifier comes
/// back `unknown` or `digest` (identical tag), compare the remote content
/// digest against the one locally recorded for the running container. A
/// mismatch promotes the category to `digest`; a match (or the absence of
/// any digest information to compare) means there is nothing to do.
fn apply_digest_override(
    category: ChangeCategory,
    container: &ContainerSnapshot,
    candidate: &TagCandidate,
) -> Option<ChangeCategory> {
    match category {
        ChangeCategory::SchemeChange | ChangeCategory::Major | ChangeCategory::Minor | ChangeCategory::Patch | ChangeCategory::Build => {
            Some(category)
        }
        ChangeCategory::Digest | ChangeCategory::Unknown => match (&candidate.digest, &container.image_digest) {
            (Some(remote), Some(local)) if remote == local => None,
            (Some(_), _) => Some(ChangeCategory::Digest),
            (None, _) => {
                if category == ChangeCategory::Digest {
                    Some(ChangeCategory::Digest)
                } else {
                    None
                }
            }
        },
    }
}

async fn candidates_for(
    ctx: &OrchestratorContext,
    container: &ContainerSnapshot,
    report: &ReportCollector,
) -> Result<Option<(ImageReference, String, Version, Vec<TagCandidate>)>> {
    let current_ref = ImageReference::parse(&container.image_ref_as_started);
    let current_tag = current_ref.tag().unwrap_or("latest").to_string();

    let auth = (ctx.credentials)(&current_ref.registry, &current_ref.repository);
    let client = (ctx.registry_client_for)(&current_ref.registry);

    let raw_tags = match client.list_tags(&current_ref, &auth).await {
        Ok(tags) => tags,
        Err(e) => {
            warn!(container = %container.name, error = %e, "registry tag listing failed, skipping this cycle");
            report.inc_skipped();
            return Ok(None);
        }
    };

    let mut candidates = select(&current_tag, raw_tags);
    if candidates.is_empty() {
        report.inc_skipped();
        return Ok(None);
    }

    // `list_tags` alone leaves `digest`/`created_at` unset on registries
    // whose tag-listing endpoint doesn't carry per-tag metadata (the OCI
    // Distribution v2 `tags/list` response is just names) — without this,
    // the digest override (§4.1) and `minImageAge` (§4.4) are both inert.
    // Fetch the per-tag manifest for anything still missing either field;
    // per §5 these per-candidate metadata fetches have no ordering
    // requirement, so a failure on one candidate doesn't block the rest.
    for candidate in candidates.iter_mut() {
        if candidate.digest.is_some() && candidate.created_at.is_some() {
            continue;
        }
        match client.describe_tag(&current_ref, &candidate.name, &auth).await {
            Ok(detail) => {
                if candidate.digest.is_none() {
                    candidate.digest = detail.digest;
                }
                if candidate.created_at.is_none() {
                    candidate.created_at = detail.created_at;
                }
                if candidate.media_type.is_none() {
                    candidate.media_type = detail.media_type;
                }
            }
            Err(e) => {
                warn!(container = %container.name, tag = %candidate.name, error = %e, "describe_tag failed, continuing with partial metadata");
            }
        }
    }

    let old_version = normalize(&current_tag);
    Ok(Some((current_ref, current_tag, old_version, candidates)))
}

async fn process_container(
    ctx: &OrchestratorContext,
    driver: &dyn Driver,
    container: &ContainerSnapshot,
    report: &ReportCollector,
) -> Result<()> {
    let (rule_name, _original) = resolve_rule(&ctx.assignments, &container.name, &ImageReference::parse(&container.image_ref_as_started).repository);
    let rule = match ctx.rules.get(&rule_name) {
        Some(r) => r,
        None => {
            warn!(container = %container.name, rule = %rule_name, "assigned rule not found, skipping");
            report.inc_skipped();
            return Ok(());
        }
    };

    if !rule_permits_anything(rule) {
        info!(container = %container.name, rule = %rule_name, "rule permits no categories, skipping container");
        report.inc_skipped();
        return Ok(());
    }

    let Some((current_ref, mut current_tag, mut old_version, candidates)) = candidates_for(ctx, container, report).await? else {
        return Ok(());
    };

    let latest_version = candidates.last().map(|c| normalize(&c.name)).unwrap_or(old_version);

    for candidate in candidates {
        if candidate.name == current_tag {
            continue;
        }

        let started_at = Utc::now();
        let started = Instant::now();

        let new_version = normalize(&candidate.name);
        let (raw_category, explanation) = compare(&old_version, &new_version);

        let category = match apply_digest_override(raw_category, container, &candidate) {
            Some(c) => c,
            None => continue,
        };

        let permit = evaluate(rule, category, &candidate, &current_ref, &old_version, &new_version, &latest_version);
        if !permit.allowed {
            info!(container = %container.name, tag = %candidate.name, reason = ?permit.reason, "update not permitted");
            report.add_update(UpdateOutcome {
                container: container.name.clone(),
                from: current_tag.clone(),
                to: candidate.name.clone(),
                category,
                started_at,
                duration: started.elapsed(),
                status: UpdateStatus::Skipped,
                reject_reason: permit.reason,
            });
            if !rule.progressive_upgrade {
                break;
            }
            continue;
        }

        info!(container = %container.name, tag = %candidate.name, %explanation, "applying update");

        let new_image = ImageReference::new(current_ref.registry.clone(), current_ref.repository.clone(), crate::models::ImageLocator::Tag(candidate.name.clone()));
        let outcome = apply_update(ctx, driver, container, &new_image, category, &current_tag, &candidate, started_at, started).await?;
        let succeeded = matches!(outcome.status, UpdateStatus::Succeeded);
        report.add_update(outcome);

        if succeeded {
            // Advance the internal "current version" so the next candidate in
            // a progressive upgrade is classified relative to what we just
            // became, not the tag this container started the cycle with.
            current_tag = candidate.name.clone();
            old_version = new_version;

            if !rule.progressive_upgrade {
                return Ok(());
            }
            tokio::time::sleep(ctx.config.delay_between_updates).await;
        } else {
            break;
        }
    }

    Ok(())
}

/// Runs preflight/classify/authorize for the self container without ever
/// recreating it, returning the first permitted candidate's image reference.
/// Progressive upgrade never applies to self-updates (§4.6): at most one
/// candidate is parked per cycle.
async fn find_self_update_candidate(
    ctx: &OrchestratorContext,
    container: &ContainerSnapshot,
    report: &ReportCollector,
) -> Result<Option<(ImageReference, TagCandidate)>> {
    let (rule_name, _original) = resolve_rule(&ctx.assignments, &container.name, &ImageReference::parse(&container.image_ref_as_started).repository);
    let rule = match ctx.rules.get(&rule_name) {
        Some(r) => r,
        None => {
            warn!(container = %container.name, rule = %rule_name, "assigned rule not found for self container, skipping");
            return Ok(None);
        }
    };

    if !rule_permits_anything(rule) {
        return Ok(None);
    }

    let Some((current_ref, _current_tag, old_version, candidates)) = candidates_for(ctx, container, report).await? else {
        return Ok(None);
    };
    let latest_version = candidates.last().map(|c| normalize(&c.name)).unwrap_or(old_version);

    for candidate in candidates {
        let new_version = normalize(&candidate.name);
        let (raw_category, _explanation) = compare(&old_version, &new_version);
        let category = match apply_digest_override(raw_category, container, &candidate) {
            Some(c) => c,
            None => continue,
        };

        let permit = evaluate(rule, category, &candidate, &current_ref, &old_version, &new_version, &latest_version);
        if permit.allowed {
            let new_image = ImageReference::new(current_ref.registry.clone(), current_ref.repository.clone(), crate::models::ImageLocator::Tag(candidate.name.clone()));
            return Ok(Some((new_image, candidate)));
        }
    }

    Ok(None)
}

async fn apply_update(
    ctx: &OrchestratorContext,
    driver: &dyn Driver,
    container: &ContainerSnapshot,
    new_image: &ImageReference,
    category: ChangeCategory,
    current_tag: &str,
    candidate: &TagCandidate,
    started_at: chrono::DateTime<Utc>,
    started: Instant,
) -> Result<UpdateOutcome> {
    if ctx.dry_run {
        info!(container = %container.name, to = %candidate.name, "dry run: simulating update, no engine mutation issued");
        // The simulated "current version" still advances per §8's invariant
        // ("under dry-run ... the simulated current version advances one
        // step per hypothetical success"), so this counts as Succeeded for
        // the purpose of progressive-upgrade continuation even though no
        // driver call was made.
        return Ok(UpdateOutcome {
            container: container.name.clone(),
            from: current_tag.to_string(),
            to: candidate.name.clone(),
            category,
            started_at,
            duration: started.elapsed(),
            status: UpdateStatus::Succeeded,
            reject_reason: None,
        });
    }

    let image_str = new_image.as_docker_string();
    driver.pull(&image_str).await?;

    // An inspect failure or missing config.Env falls back to an empty map,
    // which `reconcile_env` treats as "nothing known to be a default" and
    // so preserves every container ENV key unchanged (§4.5).
    let image_env = match driver.inspect_image(&image_str).await {
        Ok(Some(snapshot)) => snapshot.env,
        Ok(None) => {
            warn!(container = %container.name, image = %image_str, "image inspect returned nothing, preserving all container ENV");
            HashMap::new()
        }
        Err(e) => {
            warn!(container = %container.name, image = %image_str, error = %e, "image inspect failed, preserving all container ENV");
            HashMap::new()
        }
    };

    let spec = recreate_spec(container, &image_str, &image_env, &ctx.env_rules);

    let verify_policy = VerifyPolicy {
        grace: ctx.config.verify_grace,
        interval: ctx.config.verify_check_interval,
        stable_time: ctx.config.verify_stable_time,
        max_wait: ctx.config.verify_max_wait,
    };
    let outcome = recreate_container(driver, container, &spec, &verify_policy).await;

    let status = match outcome {
        Ok(ref r) if matches!(r.verify, VerifyOutcome::Healthy) => UpdateStatus::Succeeded,
        Ok(_) => UpdateStatus::RolledBack,
        Err(_) => UpdateStatus::Failed,
    };

    Ok(UpdateOutcome {
        container: container.name.clone(),
        from: current_tag.to_string(),
        to: candidate.name.clone(),
        category,
        started_at,
        duration: started.elapsed(),
        status,
        reject_reason: None,
    })
}

pub fn is_self_update_in_flight(identity: &Option<SelfIdentity>) -> bool {
    identity.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockDriver;
    use crate::models::{HealthcheckSpec, NetworkAttachment, Rule};
    use std::collections::HashMap as StdHashMap;

    fn candidate(name: &str, digest: Option<&str>) -> TagCandidate {
        TagCandidate { name: name.to_string(), digest: digest.map(str::to_string), created_at: None, media_type: None }
    }

    fn container(name: &str, image_ref: &str, digest: Option<&str>) -> ContainerSnapshot {
        ContainerSnapshot {
            id: format!("{name}-id"),
            name: name.to_string(),
            status: "running".to_string(),
            image_digest: digest.map(str::to_string),
            image_ref_as_started: image_ref.to_string(),
            env: StdHashMap::new(),
            mounts: Vec::new(),
            ports: Vec::new(),
            network_mode: "bridge".to_string(),
            restart_policy: crate::models::RestartPolicy { name: "always".to_string(), max_retry_count: 0 },
            healthcheck: None::<HealthcheckSpec>,
            networks: Vec::<NetworkAttachment>::new(),
            labels: StdHashMap::new(),
            command: None,
            entrypoint: None,
            user: None,
            workdir: None,
            started_at: None,
            restart_count: 0,
        }
    }

    #[test]
    fn digest_override_collapses_to_no_update_on_matching_digest() {
        let c = container("web", "nginx:1.25.3", Some("sha256:aaa"));
        let cand = candidate("1.25.3", Some("sha256:aaa"));
        assert_eq!(apply_digest_override(ChangeCategory::Digest, &c, &cand), None);
    }

    #[test]
    fn digest_override_promotes_to_digest_on_mismatch() {
        let c = container("web", "nginx:1.25.3", Some("sha256:aaa"));
        let cand = candidate("1.25.3", Some("sha256:bbb"));
        assert_eq!(apply_digest_override(ChangeCategory::Digest, &c, &cand), Some(ChangeCategory::Digest));
    }

    #[test]
    fn digest_override_promotes_unknown_with_differing_remote_digest() {
        let c = container("web", "nginx:nightly", Some("sha256:aaa"));
        let cand = candidate("nightly", Some("sha256:ccc"));
        assert_eq!(apply_digest_override(ChangeCategory::Unknown, &c, &cand), Some(ChangeCategory::Digest));
    }

    #[test]
    fn digest_override_leaves_ordinary_categories_untouched() {
        let c = container("web", "nginx:1.25.3", Some("sha256:aaa"));
        let cand = candidate("1.25.4", Some("sha256:bbb"));
        assert_eq!(apply_digest_override(ChangeCategory::Patch, &c, &cand), Some(ChangeCategory::Patch));
    }

    #[tokio::test]
    async fn progressive_upgrade_advances_current_version_between_candidates() {
        let snapshot = container("web", "nginx:1.25.2", None);
        let driver = MockDriver::new().with_container(snapshot.clone());

        let mut allow = StdHashMap::new();
        allow.insert(ChangeCategory::Patch, true);
        let rule = Rule { min_image_age: Duration::ZERO, progressive_upgrade: true, allow, conditions: StdHashMap::new(), lag_policy: StdHashMap::new() };

        let mut rules = crate::models::RuleBag::default();
        rules.rules.insert("default".to_string(), rule);

        let candidates = vec![candidate("1.25.3", None), candidate("1.25.4", None)];

        let config = Arc::new(CaptnConfig { delay_between_updates: Duration::ZERO, ..Default::default() });

        let ctx = OrchestratorContext {
            config,
            rules: Arc::new(rules),
            assignments: Arc::new(AssignmentTables::default()),
            env_rules: Arc::new(EnvFilterRules::default()),
            credentials: Arc::new(|_, _| RegistryCredential::anonymous()),
            registry_client_for: Arc::new(move |_| Box::new(StaticClient { candidates: candidates.clone() })),
            dry_run: true,
        };

        let report = ReportCollector::new();
        process_container(&ctx, &driver, &snapshot, &report).await.unwrap();

        let summary = report.serialize();
        assert_eq!(summary.updates.len(), 2);
        assert_eq!(summary.updates[0].to, "1.25.3");
        assert_eq!(summary.updates[1].from, "1.25.3");
        assert_eq!(summary.updates[1].to, "1.25.4");
    }

    struct StaticClient {
        candidates: Vec<TagCandidate>,
    }

    #[async_trait::async_trait]
    impl RegistryClient for StaticClient {
        async fn list_tags(&self, _reference: &ImageReference, _auth: &RegistryCredential) -> Result<Vec<TagCandidate>> {
            Ok(self.candidates.clone())
        }

        async fn describe_tag(&self, _reference: &ImageReference, tag: &str, _auth: &RegistryCredential) -> Result<TagCandidate> {
            Ok(candidate(tag, None))
        }
    }
}
