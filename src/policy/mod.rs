//! Rule resolution and permit evaluation (C4).

use crate::models::{AssignmentTables, Conditions, ImageReference, Permit, PermitReason, Rule, TagCandidate};
use crate::version::{ChangeCategory, Version};
use glob::Pattern;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("no rule named {0:?} is configured")]
    UnknownRule(String),
}

/// Resolves which rule name applies to a container: exact name match, then
/// glob-matched image repository, then glob-matched container id, falling
/// back to `"default"`. Returns `(effective, original)` so callers can log
/// when a fallback happened.
pub fn resolve_rule(tables: &AssignmentTables, container_name: &str, image_repo: &str) -> (String, String) {
    if let Some(rule) = tables.by_name.get(container_name) {
        return (rule.clone(), rule.clone());
    }

    for (pattern, rule) in &tables.by_image {
        if glob_match(pattern, image_repo) {
            return (rule.clone(), rule.clone());
        }
    }

    for (pattern, rule) in &tables.by_id {
        if glob_match(pattern, container_name) {
            return (rule.clone(), rule.clone());
        }
    }

    warn!(container = container_name, "no rule assignment matched, falling back to default");
    ("default".to_string(), "default".to_string())
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    Pattern::new(pattern).map(|p| p.matches(candidate)).unwrap_or(false)
}

/// Evaluates a rule against a candidate update, short-circuiting through
/// allow → conditions → lag policy → minimum image age, in that order
/// (§4.4). `conditions.require` is read as "the new version has a non-zero
/// component at one of the required positions" — the spec's resolution of
/// Open Question 1, not the original implementation's old-version
/// comparison (see DESIGN.md). `new_ref` on the returned `Permit` is always
/// `"<registry>/<repo>:<new-tag>"` (§4.4), regardless of the outcome.
pub fn evaluate(
    rule: &Rule,
    category: ChangeCategory,
    candidate: &TagCandidate,
    image_ref: &ImageReference,
    _old: &Version,
    new: &Version,
    latest: &Version,
) -> Permit {
    let new_ref = format!("{}/{}:{}", image_ref.registry, image_ref.repository, candidate.name);

    if !rule.is_allowed(category) {
        return Permit::denied(PermitReason::General, new_ref);
    }

    if let Some(conditions) = rule.conditions.get(&category) {
        if !satisfies_conditions(conditions, new) {
            return Permit::denied(PermitReason::Conditions, new_ref);
        }
    }

    if let Some(&max_lag) = rule.lag_policy.get(&category) {
        if exceeds_lag(category, new, latest, max_lag) {
            return Permit::denied(PermitReason::LagPolicy, new_ref);
        }
    }

    match candidate.created_at {
        Some(created_at) => {
            let age = chrono::Utc::now().signed_duration_since(created_at);
            let min_age = chrono::Duration::from_std(rule.min_image_age).unwrap_or(chrono::Duration::zero());
            if age < min_age {
                return Permit::denied(PermitReason::MinImageAge, new_ref);
            }
        }
        None => {
            warn!(tag = %candidate.name, "candidate has no createdAt metadata, skipping minImageAge check");
        }
    }

    Permit::granted(new_ref)
}

fn satisfies_conditions(conditions: &Conditions, new: &Version) -> bool {
    if conditions.require.is_empty() {
        return true;
    }
    conditions.require.iter().any(|c| new.component(*c) != 0)
}

/// Whether a candidate hasn't lagged behind `latest` by enough increments
/// yet, compared along `category`'s own axis (major/minor/patch/build
/// component) rather than always the major component — §4.4/glossary's
/// "same category axis". Per §4.4, permit requires
/// `(latest_component - new_component) + 1 > L`; this returns the negation
/// (deny) of that, i.e. `true` when the candidate sits too close to the
/// bleeding edge and the rule wants it to wait for a few more releases to
/// land upstream first.
fn exceeds_lag(category: ChangeCategory, candidate: &Version, latest: &Version, max_lag: i64) -> bool {
    if candidate.scheme != latest.scheme {
        return false;
    }
    let lag = latest.component(category) - candidate.component(category);
    lag < max_lag
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::normalize;
    use std::collections::HashMap;
    use std::time::Duration;

    fn rule_allowing(category: ChangeCategory) -> Rule {
        let mut allow = HashMap::new();
        allow.insert(category, true);
        Rule { min_image_age: Duration::ZERO, progressive_upgrade: false, allow, conditions: HashMap::new(), lag_policy: HashMap::new() }
    }

    fn candidate(name: &str) -> TagCandidate {
        TagCandidate { name: name.to_string(), digest: None, created_at: None, media_type: None }
    }

    fn image_ref() -> ImageReference {
        ImageReference::new("docker.io", "library/nginx", crate::models::ImageLocator::Tag("1.0.0".to_string()))
    }

    #[test]
    fn resolve_rule_prefers_exact_name() {
        let mut tables = AssignmentTables::default();
        tables.by_name.insert("web".to_string(), "strict".to_string());
        tables.by_image.insert("nginx*".to_string(), "relaxed".to_string());
        let (effective, _) = resolve_rule(&tables, "web", "nginx");
        assert_eq!(effective, "strict");
    }

    #[test]
    fn resolve_rule_falls_back_to_glob_image_then_default() {
        let mut tables = AssignmentTables::default();
        tables.by_image.insert("nginx*".to_string(), "relaxed".to_string());
        let (effective, _) = resolve_rule(&tables, "web", "nginx-proxy");
        assert_eq!(effective, "relaxed");

        let tables = AssignmentTables::default();
        let (effective, _) = resolve_rule(&tables, "web", "nginx-proxy");
        assert_eq!(effective, "default");
    }

    #[test]
    fn evaluate_denies_when_category_not_allowed() {
        let rule = Rule::default();
        let old = normalize("1.0.0");
        let new = normalize("2.0.0");
        let permit = evaluate(&rule, ChangeCategory::Major, &candidate("2.0.0"), &image_ref(), &old, &new, &new);
        assert!(!permit.allowed);
        assert_eq!(permit.reason, Some(PermitReason::General));
    }

    #[test]
    fn evaluate_denies_on_unmet_conditions() {
        let mut rule = rule_allowing(ChangeCategory::Minor);
        rule.conditions.insert(ChangeCategory::Minor, Conditions { require: vec![ChangeCategory::Build] });
        let old = normalize("1.2.0");
        let new = normalize("1.3.0"); // build component is 0
        let permit = evaluate(&rule, ChangeCategory::Minor, &candidate("1.3.0"), &image_ref(), &old, &new, &new);
        assert!(!permit.allowed);
        assert_eq!(permit.reason, Some(PermitReason::Conditions));
    }

    #[test]
    fn evaluate_grants_when_all_checks_pass() {
        let rule = rule_allowing(ChangeCategory::Patch);
        let old = normalize("1.2.3");
        let new = normalize("1.2.4");
        let permit = evaluate(&rule, ChangeCategory::Patch, &candidate("1.2.4"), &image_ref(), &old, &new, &new);
        assert!(permit.allowed);
        assert_eq!(permit.new_ref, "docker.io/library/nginx:1.2.4");
    }

    #[test]
    fn evaluate_denies_on_lag_policy() {
        // Candidate equals latest (zero lag), but the rule requires the
        // candidate to trail latest by at least one major increment before
        // it's adopted.
        let mut rule = rule_allowing(ChangeCategory::Major);
        rule.lag_policy.insert(ChangeCategory::Major, 1);
        let old = normalize("1.0.0");
        let new = normalize("5.0.0");
        let latest = normalize("5.0.0");
        let permit = evaluate(&rule, ChangeCategory::Major, &candidate("5.0.0"), &image_ref(), &old, &new, &latest);
        assert!(!permit.allowed);
        assert_eq!(permit.reason, Some(PermitReason::LagPolicy));
    }

    #[test]
    fn evaluate_permits_when_lag_sufficient() {
        // Spec §8 worked example: lagPolicy.major=1, latest=5.0.0, new=4.0.0
        // → lag (5-4)+1=2 > 1 → permitted.
        let mut rule = rule_allowing(ChangeCategory::Major);
        rule.lag_policy.insert(ChangeCategory::Major, 1);
        let old = normalize("1.0.0");
        let new = normalize("4.0.0");
        let latest = normalize("5.0.0");
        let permit = evaluate(&rule, ChangeCategory::Major, &candidate("4.0.0"), &image_ref(), &old, &new, &latest);
        assert!(permit.allowed);
    }

    #[test]
    fn evaluate_lag_policy_compares_on_the_categorys_own_axis() {
        // latest 1.2.9, candidate 1.2.5, lagPolicy on `patch` — must compare
        // patch components (9 vs 5), not major (1 vs 1, which would wrongly
        // deny).
        let mut rule = rule_allowing(ChangeCategory::Patch);
        rule.lag_policy.insert(ChangeCategory::Patch, 1);
        let old = normalize("1.2.1");
        let new = normalize("1.2.5");
        let latest = normalize("1.2.9");
        let permit = evaluate(&rule, ChangeCategory::Patch, &candidate("1.2.5"), &image_ref(), &old, &new, &latest);
        assert!(permit.allowed);
    }
}
