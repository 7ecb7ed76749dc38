use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User identifier as handed over by the transport layer (chat id, CLI flag).
pub type UserId = i64;

/// Provenance of an item mention or price observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Manual,
    Ocr,
    Suggestion,
}

/// Currencies the original receipt formats carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Brl,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Brl => "BRL",
        }
    }
}

/// A single entry on a user's shopping list.
///
/// `canonical_name` is unique within one list; every raw spelling that was
/// merged into this entry is retained in `aliases`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoppingItem {
    pub canonical_name: String,
    pub aliases: BTreeSet<String>,
    pub quantity: f64,
    pub unit: Option<String>,
    pub bought: bool,
    pub last_price: Option<f64>,
    pub currency: Option<Currency>,
    pub source: Source,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ShoppingItem {
    pub fn new(canonical_name: impl Into<String>, source: Source, now: DateTime<Utc>) -> Self {
        ShoppingItem {
            canonical_name: canonical_name.into(),
            aliases: BTreeSet::new(),
            quantity: 0.0,
            unit: None,
            bought: false,
            last_price: None,
            currency: None,
            source,
            added_at: now,
            updated_at: now,
        }
    }
}

/// One recorded price sighting. Observations are never updated or removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub canonical_name: String,
    pub price: f64,
    pub currency: Currency,
    pub observed_at: DateTime<Utc>,
    pub source: Source,
}

/// A completed purchase, appended when an item is marked bought.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub canonical_name: String,
    pub bought_at: DateTime<Utc>,
}

/// The ordered, exclusively owned list of one user. Insertion order is
/// preserved for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserList {
    pub user_id: UserId,
    pub items: Vec<ShoppingItem>,
}

impl UserList {
    pub fn new(user_id: UserId) -> Self {
        UserList {
            user_id,
            items: Vec::new(),
        }
    }

    pub fn position(&self, canonical_name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|i| i.canonical_name == canonical_name)
    }

    pub fn get(&self, canonical_name: &str) -> Option<&ShoppingItem> {
        self.items
            .iter()
            .find(|i| i.canonical_name == canonical_name)
    }

    pub fn get_mut(&mut self, canonical_name: &str) -> Option<&mut ShoppingItem> {
        self.items
            .iter_mut()
            .find(|i| i.canonical_name == canonical_name)
    }
}

/// A raw textual item mention from any input channel, optionally carrying
/// values the channel already parsed (a structured OCR line, an explicit
/// quantity flag). Whatever is absent is recovered from the text itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMention {
    pub text: String,
    pub quantity: Option<f64>,
    pub price: Option<f64>,
    pub currency: Option<Currency>,
    pub source: Source,
}

impl RawMention {
    pub fn manual(text: impl Into<String>) -> Self {
        RawMention {
            text: text.into(),
            quantity: None,
            price: None,
            currency: None,
            source: Source::Manual,
        }
    }

    pub fn ocr(text: impl Into<String>) -> Self {
        RawMention {
            text: text.into(),
            quantity: None,
            price: None,
            currency: None,
            source: Source::Ocr,
        }
    }

    pub fn with_quantity(mut self, quantity: f64) -> Self {
        self.quantity = Some(quantity);
        self
    }
}

/// An ordered set of raw mentions applied under a single idempotence key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationBatch {
    pub batch_id: String,
    pub lines: Vec<RawMention>,
    pub applied_at: DateTime<Utc>,
}

/// Per-line result of reconciling a batch. Failures are data, not errors:
/// one bad line never aborts the rest of a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum LineOutcome {
    MatchedExisting { canonical_name: String, quantity: f64 },
    CreatedNew { canonical_name: String, quantity: f64 },
    Failed { reason: String },
}

impl LineOutcome {
    pub fn canonical_name(&self) -> Option<&str> {
        match self {
            LineOutcome::MatchedExisting { canonical_name, .. }
            | LineOutcome::CreatedNew { canonical_name, .. } => Some(canonical_name),
            LineOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, LineOutcome::Failed { .. })
    }
}
