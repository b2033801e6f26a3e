//! Version normalization and classification (C1).
//!
//! Turns an arbitrary registry tag into a typed [`Version`] and compares two
//! versions into a [`ChangeCategory`]. Both operations are total: they never
//! fail, they fall back to a sentinel/`Unknown` result instead.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// The versioning scheme a tag appears to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Semantic,
    Date,
    Numeric,
    Unknown,
}

/// A tag normalized to a 4-tuple of (major, minor, patch, build) plus the
/// scheme it was detected under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub scheme: Scheme,
    pub tuple: (i64, i64, i64, i64),
}

/// Sentinel for a tag that could not be parsed into four numeric components.
pub const INVALID_TUPLE: (i64, i64, i64, i64) = (-1, -1, -1, -1);

impl Version {
    pub fn is_valid(&self) -> bool {
        self.tuple != INVALID_TUPLE
    }

    pub fn component(&self, category: ChangeCategory) -> i64 {
        match category {
            ChangeCategory::Major => self.tuple.0,
            ChangeCategory::Minor => self.tuple.1,
            ChangeCategory::Patch => self.tuple.2,
            ChangeCategory::Build => self.tuple.3,
            _ => 0,
        }
    }
}

/// The classification of a change between two versions. See spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCategory {
    Major,
    Minor,
    Patch,
    Build,
    Digest,
    SchemeChange,
    Unknown,
}

/// Normalize a tag into a [`Version`]. Total and deterministic.
///
/// Non-digit separators (anything but a digit) collapse to a single dot, the
/// first four dot-separated parts are kept, and any non-numeric part makes
/// the whole tuple invalid. Scheme detection happens on the cleaned string
/// before truncation, so both `2024.02.06` and ragged forms like `2024.2.6`
/// are recognized as `date` (the original implementation split this across
/// two code paths; collapsing separators first makes one path handle both).
pub fn normalize(tag: &str) -> Version {
    let cleaned = clean_separators(tag);
    let parts: Vec<&str> = cleaned.split('.').filter(|p| !p.is_empty()).collect();

    let scheme = detect_scheme(&parts);

    let mut numeric_parts = Vec::with_capacity(4);
    for part in parts.iter().take(4) {
        match part.parse::<i64>() {
            Ok(n) => numeric_parts.push(n),
            Err(_) => return Version { scheme, tuple: INVALID_TUPLE },
        }
    }
    if numeric_parts.is_empty() {
        return Version { scheme, tuple: INVALID_TUPLE };
    }
    while numeric_parts.len() < 4 {
        numeric_parts.push(0);
    }

    Version {
        scheme,
        tuple: (numeric_parts[0], numeric_parts[1], numeric_parts[2], numeric_parts[3]),
    }
}

/// Replace every run of non-digit, non-dot characters with a single dot, then
/// collapse repeated dots and trim leading/trailing ones.
fn clean_separators(tag: &str) -> String {
    let lowered = tag.trim().to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut last_was_sep = false;
    for c in lowered.chars() {
        if c.is_ascii_digit() {
            out.push(c);
            last_was_sep = false;
        } else if c == '.' {
            if !last_was_sep {
                out.push('.');
            }
            last_was_sep = true;
        } else if !last_was_sep {
            out.push('.');
            last_was_sep = true;
        }
    }
    out.trim_matches('.').to_string()
}

/// `YYYY.MM.DD.*` with a valid calendar date and a `20`-prefixed year → date;
/// else `N.N.N.*` → semantic; else a single integer → numeric; else unknown.
fn detect_scheme(parts: &[&str]) -> Scheme {
    if parts.len() >= 3 && parts[0].len() == 4 && parts[0].starts_with("20") {
        if let (Ok(year), Ok(month), Ok(day)) =
            (parts[0].parse::<i32>(), parts[1].parse::<u32>(), parts[2].parse::<u32>())
        {
            if (1..=12).contains(&month)
                && (1..=31).contains(&day)
                && NaiveDate::from_ymd_opt(year, month, day).is_some()
            {
                return Scheme::Date;
            }
        }
    }

    if parts.len() >= 3 && parts[..3].iter().all(|p| p.chars().all(|c| c.is_ascii_digit())) {
        return Scheme::Semantic;
    }

    if parts.len() == 1 && parts[0].chars().all(|c| c.is_ascii_digit()) && !parts[0].is_empty() {
        return Scheme::Numeric;
    }

    Scheme::Unknown
}

/// Compare two versions, returning the [`ChangeCategory`] and a short
/// explanation suitable for a log line or report entry.
///
/// Digest collapsing (identical tuple → `Digest`/"no update") is the
/// caller's job once it has a remote digest to compare against local ones —
/// see the orchestrator's digest-override step.
pub fn compare(old: &Version, new: &Version) -> (ChangeCategory, String) {
    if !old.is_valid() || !new.is_valid() {
        return (ChangeCategory::Unknown, "version tuple could not be parsed".to_string());
    }

    if old.scheme != new.scheme {
        return (
            ChangeCategory::SchemeChange,
            format!("scheme changed from {:?} to {:?}", old.scheme, new.scheme),
        );
    }

    match new.scheme {
        Scheme::Semantic => compare_semantic(old, new),
        Scheme::Date => compare_date(old, new),
        Scheme::Numeric => compare_numeric(old, new),
        Scheme::Unknown => (ChangeCategory::Unknown, "unrecognized version scheme".to_string()),
    }
}

fn compare_semantic(old: &Version, new: &Version) -> (ChangeCategory, String) {
    let (om, oi, op, ob) = old.tuple;
    let (nm, ni, np, nb) = new.tuple;

    if nm != om {
        return (ChangeCategory::Major, format!("major {om} -> {nm}"));
    }
    if ni != oi {
        return (ChangeCategory::Minor, format!("minor {oi} -> {ni}"));
    }
    if np != op {
        return (ChangeCategory::Patch, format!("patch {op} -> {np}"));
    }
    if nb != ob {
        return (ChangeCategory::Build, format!("build {ob} -> {nb}"));
    }
    (ChangeCategory::Digest, "identical version, digest differentiation deferred".to_string())
}

/// Day-delta thresholds per spec §4.1: ≥365 major, >30 minor, >0 patch, =0
/// digest, <0 unknown (a candidate older than current makes no sense).
fn compare_date(old: &Version, new: &Version) -> (ChangeCategory, String) {
    let old_date = date_from_tuple(old.tuple);
    let new_date = date_from_tuple(new.tuple);

    let (old_date, new_date) = match (old_date, new_date) {
        (Some(o), Some(n)) => (o, n),
        _ => return (ChangeCategory::Unknown, "invalid calendar date".to_string()),
    };

    let delta = (new_date - old_date).num_days();
    classify_delta(delta, "days")
}

fn date_from_tuple(tuple: (i64, i64, i64, i64)) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(tuple.0 as i32, tuple.1 as u32, tuple.2 as u32)
}

/// Delta thresholds per spec §4.1: >10 major, >1 minor, =1 patch, =0 digest,
/// <0 unknown.
fn compare_numeric(old: &Version, new: &Version) -> (ChangeCategory, String) {
    let delta = new.tuple.0 - old.tuple.0;
    classify_delta(delta, "units")
}

fn classify_delta(delta: i64, unit: &str) -> (ChangeCategory, String) {
    if delta >= 365 && unit == "days" {
        (ChangeCategory::Major, format!("{delta} {unit} apart"))
    } else if delta > 30 && unit == "days" {
        (ChangeCategory::Minor, format!("{delta} {unit} apart"))
    } else if delta > 10 && unit == "units" {
        (ChangeCategory::Major, format!("{delta} {unit} apart"))
    } else if delta > 1 && unit == "units" {
        (ChangeCategory::Minor, format!("{delta} {unit} apart"))
    } else if delta > 0 {
        (ChangeCategory::Patch, format!("{delta} {unit} apart"))
    } else if delta == 0 {
        (ChangeCategory::Digest, "no version delta".to_string())
    } else {
        (ChangeCategory::Unknown, format!("candidate is {} {unit} behind current", -delta))
    }
}

/// Ordering used by the tag pipeline's descending sort: valid tuples sort
/// before invalid ones, valid tuples compare by tuple, invalid ones by name.
impl Version {
    pub fn sort_key(&self) -> (bool, (i64, i64, i64, i64)) {
        (!self.is_valid(), self.tuple)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_semver_with_prefix_and_build_metadata() {
        let v = normalize("v1.2.3-beta+build.7");
        assert_eq!(v.tuple, (1, 2, 3, 7));
        assert_eq!(v.scheme, Scheme::Semantic);
    }

    #[test]
    fn normalizes_date_tags_with_ragged_zero_padding() {
        assert_eq!(normalize("2024.02.06").scheme, Scheme::Date);
        assert_eq!(normalize("2024.2.6").scheme, Scheme::Date);
        assert_eq!(normalize("2024.2.6").tuple, (2024, 2, 6, 0));
    }

    #[test]
    fn rejects_invalid_leap_day() {
        let v = normalize("2023.02.29");
        // Not a valid calendar date, so it can't classify as `date`; it still
        // normalizes numerically since the digits themselves are clean.
        assert_eq!(v.scheme, Scheme::Semantic);
    }

    #[test]
    fn accepts_valid_leap_day() {
        assert_eq!(normalize("2024.02.29").scheme, Scheme::Date);
    }

    #[test]
    fn non_numeric_parts_are_invalid() {
        assert_eq!(normalize("latest").tuple, INVALID_TUPLE);
        assert_eq!(normalize("1.2.alpine").tuple, INVALID_TUPLE);
    }

    #[test]
    fn compare_is_reflexive_digest() {
        let v = normalize("1.2.3");
        assert_eq!(compare(&v, &v).0, ChangeCategory::Digest);
    }

    #[test]
    fn compare_detects_scheme_change() {
        let old = normalize("1.18.0");
        let new = normalize("2024.02.06");
        assert_eq!(compare(&old, &new).0, ChangeCategory::SchemeChange);
    }

    #[test]
    fn compare_semantic_patch() {
        let old = normalize("1.25.3");
        let new = normalize("1.25.4");
        assert_eq!(compare(&old, &new).0, ChangeCategory::Patch);
    }

    #[test]
    fn compare_numeric_thresholds() {
        let old = normalize("5");
        assert_eq!(compare(&old, &normalize("16")).0, ChangeCategory::Major);
        assert_eq!(compare(&old, &normalize("7")).0, ChangeCategory::Minor);
        assert_eq!(compare(&old, &normalize("6")).0, ChangeCategory::Patch);
        assert_eq!(compare(&old, &normalize("5")).0, ChangeCategory::Digest);
        assert_eq!(compare(&old, &normalize("4")).0, ChangeCategory::Unknown);
    }

    #[test]
    fn compare_date_thresholds() {
        let old = normalize("2024.01.01");
        assert_eq!(compare(&old, &normalize("2025.01.02")).0, ChangeCategory::Major);
        assert_eq!(compare(&old, &normalize("2024.03.01")).0, ChangeCategory::Minor);
        assert_eq!(compare(&old, &normalize("2024.01.10")).0, ChangeCategory::Patch);
        assert_eq!(compare(&old, &normalize("2024.01.01")).0, ChangeCategory::Digest);
    }

    #[test]
    fn unknown_tuples_never_classify_as_upgrade() {
        let old = normalize("nightly");
        let new = normalize("1.2.3");
        assert_eq!(compare(&old, &new).0, ChangeCategory::Unknown);
    }

    #[test]
    fn sort_key_orders_valid_before_invalid() {
        let valid = normalize("1.0.0");
        let invalid = normalize("latest");
        assert!(valid < invalid);
    }
}
