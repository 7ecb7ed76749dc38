//! Name normalization and fuzzy lookup against a user's canonical names.
//!
//! The index is pure: it never mutates the list it matches against. A
//! candidate string is normalized, scored against every existing canonical
//! name with a blend of token-set overlap and edit-distance ratio, and the
//! best score at or above the configured threshold wins. Ties prefer the
//! entry touched most recently, then the entry inserted earliest.

use chrono::{DateTime, Utc};

/// One existing canonical name offered for matching. Slice position encodes
/// insertion order.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct MatchIndex {
    threshold: f64,
}

impl MatchIndex {
    pub fn new(threshold: f64) -> Self {
        MatchIndex { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Returns the best-matching canonical name at or above the threshold,
    /// together with the best score seen over all candidates. A score below
    /// the threshold reports no match and the caller creates a new entry.
    pub fn find_best_match(&self, raw_text: &str, existing: &[Candidate]) -> (Option<String>, f64) {
        let needle = normalize(raw_text);
        if needle.is_empty() || existing.is_empty() {
            return (None, 0.0);
        }

        let mut best: Option<(usize, f64)> = None;
        for (index, candidate) in existing.iter().enumerate() {
            let score = similarity(&needle, &normalize(&candidate.name));
            match best {
                None => best = Some((index, score)),
                Some((best_index, best_score)) => {
                    if score > best_score + f64::EPSILON {
                        best = Some((index, score));
                    } else if (score - best_score).abs() <= f64::EPSILON
                        && candidate.updated_at > existing[best_index].updated_at
                    {
                        // Equal score: prefer the most recently updated entry.
                        // Equal timestamps keep the earlier-inserted entry.
                        best = Some((index, score));
                    }
                }
            }
        }

        match best {
            Some((index, score)) if score >= self.threshold => {
                (Some(existing[index].name.clone()), score)
            }
            Some((_, score)) => (None, score),
            None => (None, 0.0),
        }
    }
}

/// Normalizes a raw mention: lowercase, punctuation stripped to spaces,
/// whitespace collapsed, tokens reduced to singular form.
pub fn normalize(raw: &str) -> String {
    let cleaned: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned
        .split_whitespace()
        .map(singularize)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Collapses common plural forms so "eggs" and "egg" compare equal. The
/// rules are crude on purpose; the edit-distance blend absorbs what they
/// miss.
fn singularize(token: &str) -> String {
    if token.len() > 3 && token.ends_with("ies") {
        format!("{}y", &token[..token.len() - 3])
    } else if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        token[..token.len() - 1].to_owned()
    } else {
        token.to_owned()
    }
}

/// Blended similarity over two already-normalized strings, on a 0 to 1
/// scale. Exact matches short-circuit to 1; otherwise the stronger of the
/// token-set and edit-distance signals wins, so single-word names are not
/// penalized for having no token overlap short of equality.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    token_overlap(a, b).max(edit_ratio(a, b))
}

/// Jaccard overlap of the token sets.
fn token_overlap(a: &str, b: &str) -> f64 {
    let set_a: std::collections::BTreeSet<&str> = a.split_whitespace().collect();
    let set_b: std::collections::BTreeSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    intersection / union
}

/// Edit distance scaled into a 0 to 1 ratio.
fn edit_ratio(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 0.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, updated: &str) -> Candidate {
        Candidate {
            name: name.into(),
            updated_at: updated.parse().unwrap(),
        }
    }

    #[test]
    fn normalize_lowercases_and_strips_punctuation() {
        assert_eq!(normalize("  Whole-Milk!! "), "whole milk");
        assert_eq!(normalize("EGGS"), "egg");
    }

    #[test]
    fn plural_and_singular_forms_collapse() {
        assert_eq!(normalize("eggs"), normalize("egg"));
        assert_eq!(normalize("berries"), normalize("berry"));
    }

    #[test]
    fn identical_names_score_one() {
        assert_eq!(similarity("milk", "milk"), 1.0);
    }

    #[test]
    fn unrelated_names_score_low() {
        assert!(similarity("bread", "milk") < 0.5);
    }

    #[test]
    fn best_match_found_above_threshold() {
        let index = MatchIndex::new(0.80);
        let existing = vec![
            candidate("milk", "2026-01-01T00:00:00Z"),
            candidate("bread", "2026-01-02T00:00:00Z"),
        ];
        let (matched, score) = index.find_best_match("Milk", &existing);
        assert_eq!(matched.as_deref(), Some("milk"));
        assert_eq!(score, 1.0);
    }

    #[test]
    fn below_threshold_reports_no_match() {
        let index = MatchIndex::new(0.80);
        let existing = vec![candidate("milk", "2026-01-01T00:00:00Z")];
        let (matched, score) = index.find_best_match("sparkling water", &existing);
        assert!(matched.is_none());
        assert!(score < 0.80);
    }

    #[test]
    fn tie_prefers_most_recently_updated() {
        let index = MatchIndex::new(0.10);
        // Both candidates are equally distant from the needle.
        let existing = vec![
            candidate("oat milk", "2026-01-01T00:00:00Z"),
            candidate("soy milk", "2026-01-05T00:00:00Z"),
        ];
        let (matched, _) = index.find_best_match("milk", &existing);
        assert_eq!(matched.as_deref(), Some("soy milk"));
    }

    #[test]
    fn tie_with_equal_timestamps_prefers_earliest_inserted() {
        let index = MatchIndex::new(0.10);
        let existing = vec![
            candidate("oat milk", "2026-01-01T00:00:00Z"),
            candidate("soy milk", "2026-01-01T00:00:00Z"),
        ];
        let (matched, _) = index.find_best_match("milk", &existing);
        assert_eq!(matched.as_deref(), Some("oat milk"));
    }

    #[test]
    fn matching_never_mutates_candidates() {
        let index = MatchIndex::new(0.80);
        let existing = vec![candidate("milk", "2026-01-01T00:00:00Z")];
        let before = existing.clone();
        let _ = index.find_best_match("milk", &existing);
        assert_eq!(existing.len(), before.len());
        assert_eq!(existing[0].name, before[0].name);
    }
}
