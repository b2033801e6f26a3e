//! Rule-bag and assignment-table loading from the `[rules]` and
//! `assignmentsBy*` INI sections.
//!
//! `original_source/app/utils/config.py` re-parsed each rule's JSON blob on
//! every access; here they are parsed once at load time into `Rule`
//! values and handed out as `Arc<Rule>` (spec.md §9's design note).

use crate::models::{AssignmentTables, Rule, RuleBag};
use anyhow::{Context, Result};
use ini::Ini;
use std::path::Path;

/// Each key in `[rules]` names a rule, its value is a JSON object matching
/// `Rule`'s shape (`minImageAge`, `progressiveUpgrade`, `allow`,
/// `conditions`, `lagPolicy`).
pub fn load_rule_bag(path: &Path) -> Result<RuleBag> {
    let ini = Ini::load_from_file(path).with_context(|| format!("reading config file {}", path.display()))?;
    let mut bag = RuleBag::default();

    if let Some(section) = ini.section(Some("rules")) {
        for (name, raw_json) in section.iter() {
            let rule: Rule = serde_json::from_str(raw_json)
                .with_context(|| format!("parsing rule {name:?} from [rules] section"))?;
            bag.rules.insert(name.to_string(), rule);
        }
    }

    if !bag.rules.contains_key("default") {
        bag.rules.insert("default".to_string(), Rule::default());
    }

    Ok(bag)
}

/// Reads `assignmentsByName`, `assignmentsByImage`, `assignmentsById`
/// sections into their respective ordered maps, preserving INI declaration
/// order for deterministic first-match-wins resolution.
pub fn load_assignment_tables(path: &Path) -> Result<AssignmentTables> {
    let ini = Ini::load_from_file(path).with_context(|| format!("reading config file {}", path.display()))?;
    let mut tables = AssignmentTables::default();

    if let Some(section) = ini.section(Some("assignmentsByName")) {
        for (k, v) in section.iter() {
            tables.by_name.insert(k.to_string(), v.to_string());
        }
    }
    if let Some(section) = ini.section(Some("assignmentsByImage")) {
        for (k, v) in section.iter() {
            tables.by_image.insert(k.to_string(), v.to_string());
        }
    }
    if let Some(section) = ini.section(Some("assignmentsById")) {
        for (k, v) in section.iter() {
            tables.by_id.insert(k.to_string(), v.to_string());
        }
    }

    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_rule_json_blobs_and_injects_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captn.ini");
        std::fs::write(
            &path,
            r#"[rules]
patch_only = {"minImageAge":"30m","progressiveUpgrade":false,"allow":{"patch":true},"conditions":{},"lagPolicy":{}}
"#,
        )
        .unwrap();
        let bag = load_rule_bag(&path).unwrap();
        assert!(bag.get("patch_only").is_some());
        assert!(bag.get("default").is_some());
    }

    #[test]
    fn loads_assignment_tables_in_declaration_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captn.ini");
        std::fs::write(&path, "[assignmentsByImage]\nnginx* = relaxed\nredis* = conservative\n").unwrap();
        let tables = load_assignment_tables(&path).unwrap();
        let keys: Vec<_> = tables.by_image.keys().collect();
        assert_eq!(keys, vec!["nginx*", "redis*"]);
    }
}
