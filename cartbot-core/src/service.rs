//! High-level facade: the operations a transport layer calls.
//!
//! This module wires the reconciliation engine, the suggestion ranker and
//! the session coordinator together and owns the policy for external
//! collaborators: every provider call runs under a bounded timeout, and a
//! failed or slow provider degrades the operation to local-only behaviour
//! instead of failing it. An empty OCR extraction is a no-op; a missing AI
//! pool falls back to the deterministic local ranking.
//!
//! # Callable From
//! - The CLI crate and integration tests. A chat transport would call the
//!   same methods; the core knows nothing about message framing.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::contract::{AiProvider, OcrProvider, PersistenceStore, PurchaseSummary};
use crate::error::{CoreError, ProviderKind};
use crate::list_store::UserState;
use crate::match_index::MatchIndex;
use crate::model::{LineOutcome, RawMention, ShoppingItem, UserId};
use crate::price_history::PriceTrend;
use crate::reconcile::{BatchResult, ReconciliationEngine};
use crate::session::SessionCoordinator;
use crate::suggest::SuggestionRanker;

pub struct ShoppingService {
    config: CoreConfig,
    coordinator: SessionCoordinator,
    engine: ReconciliationEngine,
    ranker: SuggestionRanker,
    index: MatchIndex,
    ocr: Option<Arc<dyn OcrProvider>>,
    ai: Option<Arc<dyn AiProvider>>,
    persistence: Option<Arc<dyn PersistenceStore>>,
}

impl ShoppingService {
    pub fn new(config: CoreConfig) -> Result<Self, CoreError> {
        config.validate()?;
        config.trace_loaded();
        Ok(ShoppingService {
            coordinator: SessionCoordinator::new(config.queue_depth),
            engine: ReconciliationEngine::new(&config),
            ranker: SuggestionRanker::new(&config),
            index: MatchIndex::new(config.match_threshold),
            ocr: None,
            ai: None,
            persistence: None,
            config,
        })
    }

    pub fn with_ocr(mut self, provider: Arc<dyn OcrProvider>) -> Self {
        self.ocr = Some(provider);
        self
    }

    pub fn with_ai(mut self, provider: Arc<dyn AiProvider>) -> Self {
        self.ai = Some(provider);
        self
    }

    pub fn with_persistence(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    /// Single-line convenience around reconciliation. Repeating the same
    /// add is a deliberate new mention, so the idempotence ledger is not
    /// consulted.
    pub async fn add_item(
        &self,
        user_id: UserId,
        raw_text: &str,
        quantity: Option<f64>,
    ) -> Result<ShoppingItem, CoreError> {
        let request = Uuid::new_v4();
        info!(request = %request, user_id, raw = raw_text, "add_item");
        if raw_text.trim().is_empty() {
            return Err(CoreError::Validation("empty item text".into()));
        }
        if let Some(quantity) = quantity {
            if quantity < 0.0 {
                return Err(CoreError::Validation(format!(
                    "negative quantity {quantity}"
                )));
            }
        }

        self.ensure_loaded(user_id).await;
        let mut mention = RawMention::manual(raw_text);
        mention.quantity = quantity;
        let now = Utc::now();
        let engine = &self.engine;
        let item = self
            .coordinator
            .with_write(user_id, move |state| {
                let result = engine.reconcile(state, &[mention], now, false);
                match result.outcomes.into_iter().next() {
                    Some(LineOutcome::Failed { reason }) => Err(CoreError::Validation(reason)),
                    Some(
                        LineOutcome::MatchedExisting { canonical_name, .. }
                        | LineOutcome::CreatedNew { canonical_name, .. },
                    ) => state
                        .list
                        .get(&canonical_name)
                        .cloned()
                        .ok_or(CoreError::NotFound(canonical_name)),
                    None => Err(CoreError::Validation("empty batch".into())),
                }
            })
            .await?;
        self.persist(user_id).await;
        Ok(item)
    }

    /// Applies an ordered batch of raw mentions under one idempotence key.
    pub async fn reconcile_batch(
        &self,
        user_id: UserId,
        lines: Vec<RawMention>,
    ) -> Result<BatchResult, CoreError> {
        let request = Uuid::new_v4();
        info!(request = %request, user_id, lines = lines.len(), "reconcile_batch");
        if lines.is_empty() {
            return Ok(BatchResult {
                batch_id: ReconciliationEngine::batch_id(&[]),
                outcomes: Vec::new(),
                replayed: false,
            });
        }

        self.ensure_loaded(user_id).await;
        let now = Utc::now();
        let engine = &self.engine;
        let result = self
            .coordinator
            .with_write(user_id, move |state| {
                Ok(engine.reconcile(state, &lines, now, true))
            })
            .await?;
        if !result.replayed {
            self.persist(user_id).await;
        }
        Ok(result)
    }

    /// Extracts lines from a receipt image and reconciles them. A failed,
    /// slow or absent OCR collaborator yields an empty batch, which is a
    /// no-op.
    pub async fn scan_receipt(
        &self,
        user_id: UserId,
        image_bytes: Vec<u8>,
    ) -> Result<BatchResult, CoreError> {
        let lines = match &self.ocr {
            None => {
                warn!(user_id, "No OCR provider configured, treating receipt as empty");
                Vec::new()
            }
            Some(provider) => {
                match timeout(self.config.provider_timeout(), provider.extract(image_bytes)).await
                {
                    Ok(Ok(lines)) => lines,
                    Ok(Err(e)) => {
                        warn!(user_id, error = %e, provider = %ProviderKind::Ocr, "OCR extraction failed, treating receipt as empty");
                        Vec::new()
                    }
                    Err(_) => {
                        warn!(user_id, provider = %ProviderKind::Ocr, "OCR extraction timed out, treating receipt as empty");
                        Vec::new()
                    }
                }
            }
        };

        let mentions: Vec<RawMention> = lines
            .into_iter()
            .filter(|line| !line.text.trim().is_empty())
            .map(|line| RawMention::ocr(line.text))
            .collect();
        debug!(user_id, lines = mentions.len(), "OCR extraction produced mentions");
        self.reconcile_batch(user_id, mentions).await
    }

    /// Current list in insertion order. Read-only; never queues behind a
    /// processing mutation.
    pub async fn list_items(&self, user_id: UserId) -> Vec<ShoppingItem> {
        self.ensure_loaded(user_id).await;
        match self.coordinator.snapshot(user_id).await {
            Some(snapshot) => snapshot.list.items.clone(),
            None => Vec::new(),
        }
    }

    pub async fn mark_bought(
        &self,
        user_id: UserId,
        name: &str,
    ) -> Result<ShoppingItem, CoreError> {
        let request = Uuid::new_v4();
        info!(request = %request, user_id, name, "mark_bought");
        self.ensure_loaded(user_id).await;
        let index = self.index;
        let name = name.to_owned();
        let now = Utc::now();
        let item = self
            .coordinator
            .with_write(user_id, move |state| {
                state.mark_bought(&name, &index, now).map(|item| item.clone())
            })
            .await?;
        self.persist(user_id).await;
        Ok(item)
    }

    pub async fn clear(&self, user_id: UserId) -> Result<(), CoreError> {
        let request = Uuid::new_v4();
        info!(request = %request, user_id, "clear");
        self.ensure_loaded(user_id).await;
        self.coordinator
            .with_write(user_id, |state| {
                state.clear();
                Ok(())
            })
            .await?;
        self.persist(user_id).await;
        Ok(())
    }

    /// Ranked re-purchase suggestions. The AI pool is optional enrichment;
    /// on any provider trouble the local ranking stands alone.
    pub async fn suggestions(&self, user_id: UserId, k: Option<usize>) -> Vec<String> {
        self.ensure_loaded(user_id).await;
        let Some(snapshot) = self.coordinator.snapshot(user_id).await else {
            return Vec::new();
        };

        let extras = match &self.ai {
            None => Vec::new(),
            Some(provider) => {
                let summary = history_summary(&snapshot);
                match timeout(self.config.provider_timeout(), provider.suggest(summary)).await {
                    Ok(Ok(names)) => names,
                    Ok(Err(e)) => {
                        warn!(user_id, error = %e, provider = %ProviderKind::Ai, "AI suggestion call failed, falling back to local ranking");
                        Vec::new()
                    }
                    Err(_) => {
                        warn!(user_id, provider = %ProviderKind::Ai, "AI suggestion call timed out, falling back to local ranking");
                        Vec::new()
                    }
                }
            }
        };

        self.ranker.rank(
            &snapshot,
            &extras,
            k.unwrap_or(self.config.max_suggestions),
            Utc::now(),
        )
    }

    /// Price statistics for one canonical name over a lookback window.
    pub async fn price_trend(
        &self,
        user_id: UserId,
        canonical_name: &str,
        window: Duration,
    ) -> PriceTrend {
        self.ensure_loaded(user_id).await;
        match self.coordinator.snapshot(user_id).await {
            Some(snapshot) => snapshot.prices.trend(canonical_name, window, Utc::now()),
            None => PriceTrend {
                average: None,
                min: None,
                max: None,
                count: 0,
            },
        }
    }

    /// Brings a user into memory from persistence on first interaction.
    async fn ensure_loaded(&self, user_id: UserId) {
        let Some(store) = &self.persistence else {
            return;
        };
        if self.coordinator.is_loaded(user_id).await {
            return;
        }
        match timeout(self.config.provider_timeout(), store.load(user_id)).await {
            Ok(Ok(Some(persisted))) => {
                let state = UserState::from_persisted(persisted);
                if self.coordinator.install_loaded(user_id, state).await {
                    info!(user_id, "Loaded user state from persistence");
                }
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                warn!(user_id, error = %e, provider = %ProviderKind::Persistence, "Load failed, starting from an empty list");
            }
            Err(_) => {
                warn!(user_id, provider = %ProviderKind::Persistence, "Load timed out, starting from an empty list");
            }
        }
    }

    /// Saves the committed snapshot after a mutation. Persistence trouble
    /// is recoverable; the in-memory state stays authoritative.
    async fn persist(&self, user_id: UserId) {
        let Some(store) = &self.persistence else {
            return;
        };
        let Some(snapshot) = self.coordinator.snapshot(user_id).await else {
            return;
        };
        let persisted = snapshot.to_persisted();
        match serde_json::to_string(&persisted) {
            Ok(json) => debug!(user_id, bytes = json.len(), "Persisting user state"),
            Err(e) => warn!(user_id, error = %e, "Failed to serialize user state for logging"),
        }
        match timeout(self.config.provider_timeout(), store.save(user_id, persisted)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(user_id, error = %e, provider = %ProviderKind::Persistence, "Save failed, keeping in-memory state");
            }
            Err(_) => {
                warn!(user_id, provider = %ProviderKind::Persistence, "Save timed out, keeping in-memory state");
            }
        }
    }
}

/// Compact history the AI collaborator receives: one row per name with
/// purchase evidence, most recent first is not guaranteed.
fn history_summary(state: &UserState) -> Vec<PurchaseSummary> {
    let mut counts: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
    for purchase in &state.purchases {
        *counts.entry(purchase.canonical_name.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(name, times_purchased)| PurchaseSummary {
            canonical_name: name.to_owned(),
            times_purchased,
            last_price: state.prices.last_observed(name).map(|o| o.price),
        })
        .collect()
}
