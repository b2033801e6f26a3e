//! ENV reconciliation rules applied when recreating a container.
//!
//! Grounded on `original_source/app/utils/engines/docker.py`'s
//! `filter_environment_variables` / `should_preserve_env_variable`:
//! start from the container's live env, drop anything that's identical to
//! what the new image already bakes in, then let exclude/preserve glob
//! patterns veto or rescue individual keys (preserve wins on conflict).

use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvFilterRules {
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub preserve_patterns: Vec<String>,
    #[serde(default)]
    pub per_container: HashMap<String, EnvFilterOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvFilterOverride {
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub preserve_patterns: Vec<String>,
}

impl EnvFilterRules {
    fn patterns_for(&self, container_name: &str) -> (Vec<String>, Vec<String>) {
        let mut exclude = self.exclude_patterns.clone();
        let mut preserve = self.preserve_patterns.clone();
        if let Some(over) = self.per_container.get(container_name) {
            exclude.extend(over.exclude_patterns.iter().cloned());
            preserve.extend(over.preserve_patterns.iter().cloned());
        }
        (exclude, preserve)
    }

    fn should_preserve(&self, key: &str, container_name: &str) -> bool {
        let (exclude, preserve) = self.patterns_for(container_name);
        let matches = |patterns: &[String]| patterns.iter().any(|p| Pattern::new(p).map(|p| p.matches(key)).unwrap_or(false));
        if matches(&preserve) {
            return true;
        }
        !matches(&exclude)
    }
}

/// `container_env` is the env observed on the running container;
/// `image_env` is what the new image declares by default. Keys whose
/// value is identical in both are dropped (inherited default, nothing to
/// carry forward); everything else passes through the exclude/preserve
/// filter.
pub fn reconcile_env(
    container_env: &HashMap<String, String>,
    image_env: &HashMap<String, String>,
    container_name: &str,
    rules: &EnvFilterRules,
) -> HashMap<String, String> {
    container_env
        .iter()
        .filter(|(k, v)| image_env.get(*k) != Some(*v))
        .filter(|(k, _)| rules.should_preserve(k, container_name))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_values_identical_to_image_default() {
        let container_env = HashMap::from([("LOG_LEVEL".to_string(), "info".to_string())]);
        let image_env = HashMap::from([("LOG_LEVEL".to_string(), "info".to_string())]);
        let out = reconcile_env(&container_env, &image_env, "web", &EnvFilterRules::default());
        assert!(out.is_empty());
    }

    #[test]
    fn keeps_values_overridden_from_image_default() {
        let container_env = HashMap::from([("LOG_LEVEL".to_string(), "debug".to_string())]);
        let image_env = HashMap::from([("LOG_LEVEL".to_string(), "info".to_string())]);
        let out = reconcile_env(&container_env, &image_env, "web", &EnvFilterRules::default());
        assert_eq!(out.get("LOG_LEVEL"), Some(&"debug".to_string()));
    }

    #[test]
    fn exclude_pattern_drops_matching_keys() {
        let container_env = HashMap::from([("SECRET_TOKEN".to_string(), "xyz".to_string())]);
        let image_env = HashMap::new();
        let rules = EnvFilterRules { exclude_patterns: vec!["SECRET_*".to_string()], ..Default::default() };
        let out = reconcile_env(&container_env, &image_env, "web", &rules);
        assert!(out.is_empty());
    }

    #[test]
    fn preserve_pattern_wins_over_exclude() {
        let container_env = HashMap::from([("SECRET_TOKEN".to_string(), "xyz".to_string())]);
        let image_env = HashMap::new();
        let rules = EnvFilterRules {
            exclude_patterns: vec!["SECRET_*".to_string()],
            preserve_patterns: vec!["SECRET_TOKEN".to_string()],
            ..Default::default()
        };
        let out = reconcile_env(&container_env, &image_env, "web", &rules);
        assert_eq!(out.get("SECRET_TOKEN"), Some(&"xyz".to_string()));
    }
}
