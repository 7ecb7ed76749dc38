//! Deterministic re-purchase ranking over a user's purchase history.
//!
//! Scores combine an exponential recency decay with a saturating purchase
//! frequency weight. An external candidate pool (from an AI collaborator)
//! can be merged in, but the local ranking works with zero external calls
//! and is the authoritative fallback. The ranker is read-only.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::CoreConfig;
use crate::list_store::UserState;
use crate::match_index::normalize;
use crate::model::Source;

pub struct SuggestionRanker {
    half_life_days: f64,
    frequency_window: Duration,
    frequency_saturation: u32,
}

impl SuggestionRanker {
    pub fn new(config: &CoreConfig) -> Self {
        SuggestionRanker {
            half_life_days: config.suggestion_half_life_days,
            frequency_window: Duration::days(config.frequency_window_days),
            frequency_saturation: config.frequency_saturation.max(1),
        }
    }

    /// Ranks candidate re-purchases, best first, at most `k` names.
    ///
    /// Candidates are every canonical name with purchase evidence plus
    /// whatever `extra_candidates` the caller merged in. Names that are on
    /// the active list and not yet bought are excluded. Ties are broken
    /// alphabetically so the ranking is deterministic.
    pub fn rank(
        &self,
        state: &UserState,
        extra_candidates: &[String],
        k: usize,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let events = self.purchase_events(state);

        let mut candidates: BTreeMap<String, f64> = BTreeMap::new();
        for (name, stamps) in &events {
            candidates.insert(name.clone(), self.score(stamps, now));
        }
        for extra in extra_candidates {
            let name = normalize(extra);
            if name.is_empty() {
                continue;
            }
            let score = events.get(&name).map(|s| self.score(s, now)).unwrap_or(0.0);
            candidates.entry(name).or_insert(score);
        }

        // No point suggesting what is already queued.
        for item in &state.list.items {
            if !item.bought {
                candidates.remove(&item.canonical_name);
            }
        }

        let mut ranked: Vec<(String, f64)> = candidates.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        debug!(candidates = ranked.len(), k, "Ranked suggestion candidates");
        ranked.into_iter().take(k).map(|(name, _)| name).collect()
    }

    /// Purchase evidence per canonical name: explicit purchases plus OCR
    /// price sightings, since a receipt line is a completed purchase.
    fn purchase_events(&self, state: &UserState) -> BTreeMap<String, Vec<DateTime<Utc>>> {
        let mut events: BTreeMap<String, Vec<DateTime<Utc>>> = BTreeMap::new();
        for purchase in &state.purchases {
            events
                .entry(purchase.canonical_name.clone())
                .or_default()
                .push(purchase.bought_at);
        }
        for observation in state.prices.observations() {
            if observation.source == Source::Ocr {
                events
                    .entry(observation.canonical_name.clone())
                    .or_default()
                    .push(observation.observed_at);
            }
        }
        events
    }

    fn score(&self, stamps: &[DateTime<Utc>], now: DateTime<Utc>) -> f64 {
        let Some(last) = stamps.iter().max() else {
            return 0.0;
        };
        let days_since = (now - *last).num_seconds().max(0) as f64 / 86_400.0;
        let recency = (-days_since / self.half_life_days).exp();

        let cutoff = now - self.frequency_window;
        let recent = stamps.iter().filter(|s| **s >= cutoff && **s <= now).count() as u32;
        let frequency =
            recent.min(self.frequency_saturation) as f64 / self.frequency_saturation as f64;

        recency * frequency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_index::MatchIndex;
    use crate::model::{Currency, Source};

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn ranker() -> SuggestionRanker {
        SuggestionRanker::new(&CoreConfig::default())
    }

    fn bought(state: &mut UserState, name: &str, when: DateTime<Utc>) {
        let index = MatchIndex::new(0.80);
        state
            .apply_merge(name, None, 1.0, None, None, Source::Manual, when)
            .unwrap();
        state.mark_bought(name, &index, when).unwrap();
    }

    #[test]
    fn recent_frequent_purchases_rank_first() {
        let mut state = UserState::new(1);
        bought(&mut state, "milk", at("2026-01-20T00:00:00Z"));
        bought(&mut state, "milk", at("2026-01-27T00:00:00Z"));
        bought(&mut state, "flour", at("2025-10-01T00:00:00Z"));
        state.clear();

        let ranked = ranker().rank(&state, &[], 5, at("2026-01-28T00:00:00Z"));
        assert_eq!(ranked.first().map(String::as_str), Some("milk"));
        assert!(ranked.contains(&"flour".to_owned()));
    }

    #[test]
    fn active_unbought_items_are_excluded() {
        let now = at("2026-01-28T00:00:00Z");
        let mut state = UserState::new(1);
        bought(&mut state, "milk", at("2026-01-20T00:00:00Z"));
        state.clear();
        // Milk is queued again and not yet bought.
        state
            .apply_merge("milk", None, 1.0, None, None, Source::Manual, now)
            .unwrap();

        let ranked = ranker().rank(&state, &[], 5, now);
        assert!(!ranked.contains(&"milk".to_owned()));
    }

    #[test]
    fn bought_items_on_the_list_may_still_be_suggested() {
        let now = at("2026-01-28T00:00:00Z");
        let mut state = UserState::new(1);
        bought(&mut state, "milk", at("2026-01-27T00:00:00Z"));

        let ranked = ranker().rank(&state, &[], 5, now);
        assert!(ranked.contains(&"milk".to_owned()));
    }

    #[test]
    fn ocr_price_sightings_count_as_purchases() {
        let mut state = UserState::new(1);
        state.prices.record(
            "bread",
            3.50,
            Currency::Usd,
            Source::Ocr,
            at("2026-01-25T00:00:00Z"),
        );
        let ranked = ranker().rank(&state, &[], 5, at("2026-01-28T00:00:00Z"));
        assert_eq!(ranked, vec!["bread".to_owned()]);
    }

    #[test]
    fn external_candidates_merge_at_the_tail() {
        let mut state = UserState::new(1);
        bought(&mut state, "milk", at("2026-01-27T00:00:00Z"));
        state.clear();

        let extras = vec!["Olive Oil".to_owned(), "milk".to_owned()];
        let ranked = ranker().rank(&state, &extras, 5, at("2026-01-28T00:00:00Z"));
        assert_eq!(ranked[0], "milk");
        assert!(ranked.contains(&"olive oil".to_owned()));
    }

    #[test]
    fn ties_break_alphabetically() {
        let when = at("2026-01-27T00:00:00Z");
        let mut state = UserState::new(1);
        bought(&mut state, "yeast", when);
        bought(&mut state, "apple", when);
        state.clear();

        let ranked = ranker().rank(&state, &[], 5, at("2026-01-28T00:00:00Z"));
        assert_eq!(ranked, vec!["apple".to_owned(), "yeast".to_owned()]);
    }

    #[test]
    fn k_bounds_the_result() {
        let mut state = UserState::new(1);
        for name in ["milk", "bread", "eggs"] {
            bought(&mut state, name, at("2026-01-27T00:00:00Z"));
        }
        state.clear();
        let ranked = ranker().rank(&state, &[], 2, at("2026-01-28T00:00:00Z"));
        assert_eq!(ranked.len(), 2);
    }
}
