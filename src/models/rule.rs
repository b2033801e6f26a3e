//! Rule/assignment/permit types for the policy engine (C4).

use crate::version::ChangeCategory;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// `require` conditions attached to a change category: the update is only
/// permitted if the new version has a non-zero component at one of these
/// positions. See SPEC_FULL §4.4 for the resolved reading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditions {
    #[serde(default)]
    pub require: Vec<ChangeCategory>,
}

/// A fully resolved update rule, parsed once from its on-disk JSON blob and
/// held as an immutable value behind `Arc` (see `config::rules`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(with = "humantime_duration", default = "default_min_image_age")]
    pub min_image_age: Duration,
    #[serde(default)]
    pub progressive_upgrade: bool,
    #[serde(default)]
    pub allow: HashMap<ChangeCategory, bool>,
    #[serde(default)]
    pub conditions: HashMap<ChangeCategory, Conditions>,
    #[serde(default, rename = "lagPolicy")]
    pub lag_policy: HashMap<ChangeCategory, i64>,
}

fn default_min_image_age() -> Duration {
    Duration::from_secs(30 * 60)
}

impl Default for Rule {
    fn default() -> Self {
        Self {
            min_image_age: default_min_image_age(),
            progressive_upgrade: false,
            allow: HashMap::new(),
            conditions: HashMap::new(),
            lag_policy: HashMap::new(),
        }
    }
}

impl Rule {
    pub fn is_allowed(&self, category: ChangeCategory) -> bool {
        self.allow.get(&category).copied().unwrap_or(false)
    }
}

mod humantime_duration {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{}s", d.as_secs()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(de)?;
        crate::config::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Precedence tables used by `policy::resolve_rule`: exact name match, then
/// glob-matched image reference, then glob-matched container id, falling
/// back to `"default"`. `IndexMap` preserves the INI declaration order so
/// first-match-wins semantics are deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignmentTables {
    #[serde(default)]
    pub by_name: IndexMap<String, String>,
    #[serde(default)]
    pub by_image: IndexMap<String, String>,
    #[serde(default)]
    pub by_id: IndexMap<String, String>,
}

/// The named collection of rules loaded from config, keyed by rule name
/// (e.g. `"default"`, `"conservative"`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleBag {
    #[serde(flatten)]
    pub rules: HashMap<String, Rule>,
}

impl RuleBag {
    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name)
    }
}

/// Why a permit request was rejected, carried through to the report for
/// diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermitReason {
    General,
    Conditions,
    LagPolicy,
    MinImageAge,
}

/// The result of evaluating a rule against a candidate update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permit {
    pub allowed: bool,
    pub reason: Option<PermitReason>,
    pub new_ref: String,
}

impl Permit {
    pub fn granted(new_ref: impl Into<String>) -> Self {
        Self { allowed: true, reason: None, new_ref: new_ref.into() }
    }

    pub fn denied(reason: PermitReason, new_ref: impl Into<String>) -> Self {
        Self { allowed: false, reason: Some(reason), new_ref: new_ref.into() }
    }
}
