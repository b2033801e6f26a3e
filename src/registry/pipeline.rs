//! Tag shape filtering, ordering, and truncation (C3).

use super::TagCandidate;
use crate::version::normalize;
use regex::Regex;

/// Builds a regex from `current_tag` where digit runs become `[0-9]+` and
/// everything else is escaped, then keeps only candidates matching it.
/// Ported from `generic.py::_generate_tag_regex` / `_filter_image_tags`.
pub fn shape_filter(current_tag: &str, candidates: Vec<TagCandidate>) -> Vec<TagCandidate> {
    let pattern = generate_tag_regex(current_tag);
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(_) => return candidates,
    };
    candidates.into_iter().filter(|c| re.is_match(&c.name)).collect()
}

fn generate_tag_regex(tag: &str) -> String {
    let mut out = String::from("^");
    let mut chars = tag.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            out.push_str("[0-9]+");
            while matches!(chars.peek(), Some(d) if d.is_ascii_digit()) {
                chars.next();
            }
        } else {
            out.push_str(&regex::escape(&c.to_string()));
        }
    }
    out.push('$');
    out
}

/// Stable descending sort by normalized version. Invalid tuples sort after
/// valid ones; ties break lexicographically by name. Reimplements the
/// three-tier fallback of `generic.py::_sort_tags` as a typed `Ord`.
pub fn sort_descending(mut candidates: Vec<TagCandidate>) -> Vec<TagCandidate> {
    candidates.sort_by(|a, b| {
        let va = normalize(&a.name);
        let vb = normalize(&b.name);
        vb.sort_key().cmp(&va.sort_key()).then_with(|| a.name.cmp(&b.name))
    });
    candidates
}

/// Keeps the contiguous prefix down to and including `current_tag`. Ports
/// `_truncate_tags`.
pub fn truncate_from_current(candidates: Vec<TagCandidate>, current_tag: &str) -> Vec<TagCandidate> {
    let mut out = Vec::new();
    for c in candidates {
        let is_current = c.name == current_tag;
        out.push(c);
        if is_current {
            break;
        }
    }
    out
}

/// Composes shape filter, descending sort, and current-tag truncation, then
/// reverses so the orchestrator walks candidates oldest-first (§4.3 last
/// sentence).
pub fn select(current_tag: &str, raw: Vec<TagCandidate>) -> Vec<TagCandidate> {
    let filtered = shape_filter(current_tag, raw);
    let sorted = sort_descending(filtered);
    let mut truncated = truncate_from_current(sorted, current_tag);
    truncated.reverse();
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str) -> TagCandidate {
        TagCandidate { name: name.to_string(), digest: None, created_at: None, media_type: None }
    }

    #[test]
    fn shape_filter_keeps_same_digit_shape() {
        let candidates = vec![candidate("1.2.3"), candidate("1.2.3-alpine"), candidate("latest")];
        let out = shape_filter("1.0.0", candidates);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "1.2.3");
    }

    #[test]
    fn sort_descending_orders_valid_tuples_first() {
        let candidates = vec![candidate("1.2.1"), candidate("1.2.10"), candidate("1.2.2")];
        let sorted = sort_descending(candidates);
        let names: Vec<_> = sorted.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["1.2.10", "1.2.2", "1.2.1"]);
    }

    #[test]
    fn truncate_keeps_prefix_through_current() {
        let candidates = vec![candidate("1.2.10"), candidate("1.2.5"), candidate("1.2.3"), candidate("1.2.1")];
        let out = truncate_from_current(candidates, "1.2.5");
        let names: Vec<_> = out.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["1.2.10", "1.2.5"]);
    }

    #[test]
    fn select_returns_oldest_to_newest_candidates_above_current() {
        let candidates = vec![candidate("1.2.10"), candidate("1.2.7"), candidate("1.2.5"), candidate("1.2.3")];
        let out = select("1.2.5", candidates);
        let names: Vec<_> = out.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["1.2.5", "1.2.7", "1.2.10"]);
    }
}
