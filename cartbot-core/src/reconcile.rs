//! Batch reconciliation: decides merge-versus-create for every raw mention.
//!
//! A batch is the unit of idempotence. Its id is a SHA-256 digest over the
//! normalized lines, and a per-user ledger of recent batch ids guarantees
//! that replaying the same receipt produces the recorded outcomes with no
//! further state change. Lines are processed independently and
//! best-effort: a malformed line is recorded as failed and the rest of the
//! batch proceeds.
//!
//! # Major Types
//! - [`ReconciliationEngine`]: parse, match and merge logic for one batch
//! - [`BatchResult`]: per-line outcomes plus the idempotence key
//! - [`BatchLedger`]: bounded retention of recently applied batches
//!
//! # Extension Points
//! - New mention channels only need to construct [`RawMention`] values;
//!   the engine is channel-agnostic.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::list_store::UserState;
use crate::match_index::{normalize, MatchIndex};
use crate::model::{Currency, LineOutcome, RawMention, ReconciliationBatch};

/// Outcome of applying one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub batch_id: String,
    pub outcomes: Vec<LineOutcome>,
    /// True when the batch id was seen before and the recorded outcomes
    /// were returned without touching the list.
    pub replayed: bool,
}

/// An applied batch together with its recorded per-line outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch: ReconciliationBatch,
    pub outcomes: Vec<LineOutcome>,
}

/// Bounded per-user memory of applied batches, oldest evicted first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchLedger {
    order: VecDeque<String>,
    entries: HashMap<String, BatchRecord>,
}

impl BatchLedger {
    pub fn outcomes(&self, batch_id: &str) -> Option<&[LineOutcome]> {
        self.entries.get(batch_id).map(|r| r.outcomes.as_slice())
    }

    pub fn record(&mut self, record: BatchRecord, capacity: usize) {
        while self.order.len() >= capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
                debug!(batch_id = %evicted, "Evicted oldest batch from idempotence ledger");
            }
        }
        self.order.push_back(record.batch.batch_id.clone());
        self.entries.insert(record.batch.batch_id.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug)]
struct ParsedLine {
    /// Item name with quantity and price tokens removed, original casing.
    name: String,
    quantity: f64,
    unit: Option<String>,
    price: Option<(f64, Currency)>,
}

pub struct ReconciliationEngine {
    index: MatchIndex,
    retention: usize,
    price_symbol_pre: Regex,
    price_symbol_post: Regex,
    price_decimal: Regex,
    quantity_leading: Regex,
    quantity_trailing: Regex,
    unit_leading: Regex,
}

impl ReconciliationEngine {
    pub fn new(config: &CoreConfig) -> Self {
        ReconciliationEngine {
            index: MatchIndex::new(config.match_threshold),
            retention: config.batch_retention,
            price_symbol_pre: Regex::new(r"(?i)(R\$|\$|€|USD|EUR|BRL)\s*(\d+(?:[.,]\d{1,2})?)")
                .expect("static pattern"),
            price_symbol_post: Regex::new(r"(?i)(\d+(?:[.,]\d{1,2})?)\s*(R\$|\$|€|USD|EUR|BRL)")
                .expect("static pattern"),
            price_decimal: Regex::new(r"\d+[.,]\d{2}").expect("static pattern"),
            quantity_leading: Regex::new(r"^(\d+(?:[.,]\d+)?)\s+").expect("static pattern"),
            quantity_trailing: Regex::new(r"\s+(\d+(?:[.,]\d+)?)$").expect("static pattern"),
            unit_leading: Regex::new(r"(?i)^(kg|g|l|ml|lb|oz|pcs|un|x)\s+").expect("static pattern"),
        }
    }

    /// Idempotence key for a batch: digest over the normalized lines.
    pub fn batch_id(lines: &[RawMention]) -> String {
        let mut hasher = Sha256::new();
        for line in lines {
            hasher.update(normalize(&line.text).as_bytes());
            hasher.update([0x1f]);
            if let Some(quantity) = line.quantity {
                hasher.update(quantity.to_bits().to_le_bytes());
            }
            hasher.update([0x1f]);
            if let Some(price) = line.price {
                hasher.update(price.to_bits().to_le_bytes());
            }
            hasher.update([0x1e]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Applies a batch of raw mentions to the user's working state.
    ///
    /// With `enforce_idempotence` the ledger is consulted first and a known
    /// batch id short-circuits to the recorded outcomes. Single-line manual
    /// adds skip the ledger so that typing "milk" twice means two units.
    pub fn reconcile(
        &self,
        state: &mut UserState,
        lines: &[RawMention],
        now: DateTime<Utc>,
        enforce_idempotence: bool,
    ) -> BatchResult {
        let batch_id = Self::batch_id(lines);

        if enforce_idempotence {
            if let Some(previous) = state.batches.outcomes(&batch_id) {
                info!(
                    user_id = state.list.user_id,
                    batch_id = %batch_id,
                    "Batch seen before, returning recorded outcomes"
                );
                return BatchResult {
                    batch_id,
                    outcomes: previous.to_vec(),
                    replayed: true,
                };
            }
        }

        let mut outcomes = Vec::with_capacity(lines.len());
        for (line_no, mention) in lines.iter().enumerate() {
            let outcome = self.reconcile_line(state, mention, now);
            if let LineOutcome::Failed { reason } = &outcome {
                warn!(
                    user_id = state.list.user_id,
                    line_no,
                    reason = %reason,
                    "Line failed, continuing with the rest of the batch"
                );
            }
            outcomes.push(outcome);
        }

        if enforce_idempotence {
            state.batches.record(
                BatchRecord {
                    batch: ReconciliationBatch {
                        batch_id: batch_id.clone(),
                        lines: lines.to_vec(),
                        applied_at: now,
                    },
                    outcomes: outcomes.clone(),
                },
                self.retention,
            );
        }

        info!(
            user_id = state.list.user_id,
            batch_id = %batch_id,
            lines = lines.len(),
            failed = outcomes.iter().filter(|o| o.is_failed()).count(),
            "Batch reconciled"
        );
        BatchResult {
            batch_id,
            outcomes,
            replayed: false,
        }
    }

    fn reconcile_line(
        &self,
        state: &mut UserState,
        mention: &RawMention,
        now: DateTime<Utc>,
    ) -> LineOutcome {
        let parsed = match self.parse_line(mention) {
            Ok(parsed) => parsed,
            Err(reason) => return LineOutcome::Failed { reason },
        };

        // Candidates include names created earlier in this same batch, so
        // within-batch duplicates merge together.
        let candidates = state.candidates();
        let (matched, score) = self.index.find_best_match(&parsed.name, &candidates);

        let merged = match matched {
            Some(canonical) => {
                debug!(
                    raw = %mention.text,
                    canonical_name = %canonical,
                    score,
                    "Mention matched existing entry"
                );
                state
                    .apply_merge(
                        &canonical,
                        Some(parsed.name.trim()),
                        parsed.quantity,
                        parsed.unit.as_deref(),
                        parsed.price,
                        mention.source,
                        now,
                    )
                    .map(|item| LineOutcome::MatchedExisting {
                        canonical_name: item.canonical_name.clone(),
                        quantity: item.quantity,
                    })
            }
            None => {
                let canonical = normalize(&parsed.name);
                debug!(raw = %mention.text, canonical_name = %canonical, score, "Creating new entry");
                state
                    .apply_merge(
                        &canonical,
                        Some(parsed.name.trim()),
                        parsed.quantity,
                        parsed.unit.as_deref(),
                        parsed.price,
                        mention.source,
                        now,
                    )
                    .map(|item| LineOutcome::CreatedNew {
                        canonical_name: item.canonical_name.clone(),
                        quantity: item.quantity,
                    })
            }
        };

        merged.unwrap_or_else(|e| LineOutcome::Failed {
            reason: e.to_string(),
        })
    }

    /// Recovers quantity and price from the raw text when the channel did
    /// not parse them already. An unparseable quantity defaults to 1; an
    /// unparseable price is omitted rather than failing the line.
    fn parse_line(&self, mention: &RawMention) -> Result<ParsedLine, String> {
        let mut text = mention.text.trim().to_owned();
        if text.is_empty() {
            return Err("empty line".into());
        }
        if let Some(quantity) = mention.quantity {
            if quantity < 0.0 {
                return Err(format!("negative quantity {quantity}"));
            }
        }

        let mut price = mention
            .price
            .map(|p| (p, mention.currency.unwrap_or(Currency::Usd)));
        if price.is_none() {
            price = self.extract_price(&mut text, mention.currency);
            text = text.trim().to_owned();
        }

        let mut quantity = mention.quantity;
        let mut unit = None;
        if quantity.is_none() {
            let leading = self
                .quantity_leading
                .captures(&text)
                .and_then(|c| Some((c.get(0)?.range(), parse_number(c.get(1)?.as_str())?)));
            if let Some((range, value)) = leading {
                quantity = Some(value);
                text.replace_range(range, "");
                let unit_found = self
                    .unit_leading
                    .captures(&text)
                    .and_then(|c| Some((c.get(0)?.range(), c.get(1)?.as_str().to_lowercase())));
                if let Some((range, unit_name)) = unit_found {
                    unit = Some(unit_name);
                    text.replace_range(range, "");
                }
            } else {
                let trailing = self
                    .quantity_trailing
                    .captures(&text)
                    .and_then(|c| Some((c.get(0)?.range(), parse_number(c.get(1)?.as_str())?)));
                if let Some((range, value)) = trailing {
                    quantity = Some(value);
                    text.replace_range(range, "");
                }
            }
        }

        let name = text.trim().to_owned();
        if normalize(&name).is_empty() {
            return Err("no item name left after parsing".into());
        }
        Ok(ParsedLine {
            name,
            quantity: quantity.unwrap_or(1.0),
            unit,
            price,
        })
    }

    /// Finds a price token (currency marker, or a bare amount with two
    /// decimals) and removes it from the text.
    fn extract_price(&self, text: &mut String, hint: Option<Currency>) -> Option<(f64, Currency)> {
        let pre = self.price_symbol_pre.captures(text).and_then(|caps| {
            let range = caps.get(0)?.range();
            let currency = currency_from_marker(caps.get(1)?.as_str());
            let value = parse_number(caps.get(2)?.as_str())?;
            Some((range, value, currency))
        });
        if let Some((range, value, currency)) = pre {
            text.replace_range(range, " ");
            return Some((value, currency));
        }

        let post = self.price_symbol_post.captures(text).and_then(|caps| {
            let range = caps.get(0)?.range();
            let value = parse_number(caps.get(1)?.as_str())?;
            let currency = currency_from_marker(caps.get(2)?.as_str());
            Some((range, value, currency))
        });
        if let Some((range, value, currency)) = post {
            text.replace_range(range, " ");
            return Some((value, currency));
        }

        let bare = self
            .price_decimal
            .find_iter(text)
            .last()
            .and_then(|m| Some((m.range(), parse_number(m.as_str())?)));
        if let Some((range, value)) = bare {
            text.replace_range(range, " ");
            return Some((value, hint.unwrap_or(Currency::Usd)));
        }
        None
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse::<f64>().ok()
}

fn currency_from_marker(marker: &str) -> Currency {
    match marker.to_uppercase().as_str() {
        "R$" | "BRL" => Currency::Brl,
        "€" | "EUR" => Currency::Eur,
        _ => Currency::Usd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Source;

    fn engine() -> ReconciliationEngine {
        ReconciliationEngine::new(&CoreConfig::default())
    }

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn parses_leading_quantity() {
        let parsed = engine().parse_line(&RawMention::manual("2 Milk")).unwrap();
        assert_eq!(parsed.quantity, 2.0);
        assert_eq!(parsed.name, "Milk");
        assert!(parsed.price.is_none());
    }

    #[test]
    fn parses_receipt_style_line() {
        let parsed = engine()
            .parse_line(&RawMention::ocr("bread 1 $3.50"))
            .unwrap();
        assert_eq!(parsed.quantity, 1.0);
        assert_eq!(parsed.name, "bread");
        assert_eq!(parsed.price, Some((3.50, Currency::Usd)));
    }

    #[test]
    fn parses_quantity_with_unit() {
        let parsed = engine()
            .parse_line(&RawMention::manual("2 kg potatoes"))
            .unwrap();
        assert_eq!(parsed.quantity, 2.0);
        assert_eq!(parsed.unit.as_deref(), Some("kg"));
        assert_eq!(parsed.name, "potatoes");
    }

    #[test]
    fn currency_markers_map_to_currencies() {
        let parsed = engine()
            .parse_line(&RawMention::ocr("arroz 5 R$ 21,90"))
            .unwrap();
        assert_eq!(parsed.price, Some((21.90, Currency::Brl)));
        let parsed = engine().parse_line(&RawMention::ocr("käse 4,20 €")).unwrap();
        assert_eq!(parsed.price, Some((4.20, Currency::Eur)));
    }

    #[test]
    fn missing_quantity_defaults_to_one() {
        let parsed = engine().parse_line(&RawMention::manual("milk")).unwrap();
        assert_eq!(parsed.quantity, 1.0);
    }

    #[test]
    fn empty_line_fails() {
        assert!(engine().parse_line(&RawMention::manual("   ")).is_err());
    }

    #[test]
    fn price_only_line_fails_for_lack_of_a_name() {
        assert!(engine().parse_line(&RawMention::ocr("$3.50")).is_err());
    }

    #[test]
    fn negative_explicit_quantity_fails_the_line() {
        let mention = RawMention::manual("milk").with_quantity(-2.0);
        assert!(engine().parse_line(&mention).is_err());
    }

    #[test]
    fn batch_id_is_stable_under_case_and_spacing() {
        let a = ReconciliationEngine::batch_id(&[RawMention::ocr("2 Milk")]);
        let b = ReconciliationEngine::batch_id(&[RawMention::ocr("  2  milk ")]);
        let c = ReconciliationEngine::batch_id(&[RawMention::ocr("3 milk")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn failed_line_does_not_abort_batch() {
        let engine = engine();
        let mut state = UserState::new(1);
        let lines = vec![
            RawMention::ocr("bread 1 $3.50"),
            RawMention::ocr("   "),
            RawMention::ocr("eggs 12 $4.00"),
        ];
        let result = engine.reconcile(&mut state, &lines, at("2026-01-01T00:00:00Z"), true);
        assert_eq!(result.outcomes.len(), 3);
        assert!(result.outcomes[1].is_failed());
        assert_eq!(state.list.items.len(), 2);
    }

    #[test]
    fn within_batch_duplicates_merge() {
        let engine = engine();
        let mut state = UserState::new(1);
        let lines = vec![RawMention::ocr("2 milk"), RawMention::ocr("1 Milk")];
        let result = engine.reconcile(&mut state, &lines, at("2026-01-01T00:00:00Z"), true);
        assert_eq!(state.list.items.len(), 1);
        assert_eq!(state.list.items[0].canonical_name, "milk");
        assert_eq!(state.list.items[0].quantity, 3.0);
        assert!(matches!(
            result.outcomes[1],
            LineOutcome::MatchedExisting { .. }
        ));
    }

    #[test]
    fn replayed_batch_mutates_nothing() {
        let engine = engine();
        let mut state = UserState::new(1);
        let lines = vec![RawMention::ocr("bread 1 $3.50")];
        let first = engine.reconcile(&mut state, &lines, at("2026-01-01T00:00:00Z"), true);
        let second = engine.reconcile(&mut state, &lines, at("2026-01-02T00:00:00Z"), true);
        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.outcomes, second.outcomes);
        assert_eq!(state.list.items[0].quantity, 1.0);
        assert_eq!(state.prices.for_name("bread").count(), 1);
    }

    #[test]
    fn manual_adds_skip_the_ledger() {
        let engine = engine();
        let mut state = UserState::new(1);
        let line = vec![RawMention::manual("milk")];
        engine.reconcile(&mut state, &line, at("2026-01-01T00:00:00Z"), false);
        engine.reconcile(&mut state, &line, at("2026-01-01T00:01:00Z"), false);
        assert_eq!(state.list.items[0].quantity, 2.0);
        assert!(state.batches.is_empty());
    }

    #[test]
    fn ledger_evicts_oldest_beyond_retention() {
        let config = CoreConfig {
            batch_retention: 2,
            ..CoreConfig::default()
        };
        let engine = ReconciliationEngine::new(&config);
        let mut state = UserState::new(1);
        let now = at("2026-01-01T00:00:00Z");
        let first = vec![RawMention::ocr("milk")];
        engine.reconcile(&mut state, &first, now, true);
        engine.reconcile(&mut state, &[RawMention::ocr("bread")], now, true);
        engine.reconcile(&mut state, &[RawMention::ocr("eggs")], now, true);
        assert_eq!(state.batches.len(), 2);
        // The first batch fell out of the ledger, so replaying it merges.
        let replay = engine.reconcile(&mut state, &first, now, true);
        assert!(!replay.replayed);
        assert_eq!(state.list.get("milk").unwrap().quantity, 2.0);
    }
}
