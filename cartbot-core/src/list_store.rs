//! Authoritative per-user state and the snapshot map that owns it.
//!
//! All mutation happens on a [`UserState`] working copy obtained through
//! [`ListStore::begin`] and made visible in one step through
//! [`ListStore::commit`]. Readers clone the committed `Arc` and never see a
//! half-applied batch. The per-user write serialization that makes
//! begin/commit safe lives in [`crate::session`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CoreError;
use crate::match_index::{Candidate, MatchIndex};
use crate::model::{
    Currency, PurchaseRecord, ShoppingItem, Source, UserId, UserList,
};
use crate::price_history::PriceHistory;
use crate::reconcile::BatchLedger;

/// Everything the core tracks for one user: the active list, the price
/// ledger, the purchase log and the batch idempotence ledger. The list is
/// emptied by `clear`; the ledgers outlive it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    pub list: UserList,
    pub prices: PriceHistory,
    pub purchases: Vec<PurchaseRecord>,
    pub batches: BatchLedger,
}

impl UserState {
    pub fn new(user_id: UserId) -> Self {
        UserState {
            list: UserList::new(user_id),
            prices: PriceHistory::new(),
            purchases: Vec::new(),
            batches: BatchLedger::default(),
        }
    }

    /// Rebuilds in-memory state from what the persistence collaborator
    /// stored. The idempotence ledger starts fresh; it only guards against
    /// replays within the running process.
    pub fn from_persisted(persisted: crate::contract::PersistedUser) -> Self {
        UserState {
            list: persisted.list,
            prices: PriceHistory::from_observations(persisted.observations),
            purchases: persisted.purchases,
            batches: BatchLedger::default(),
        }
    }

    pub fn to_persisted(&self) -> crate::contract::PersistedUser {
        crate::contract::PersistedUser {
            list: self.list.clone(),
            observations: self.prices.observations().to_vec(),
            purchases: self.purchases.clone(),
        }
    }

    /// Candidates for fuzzy lookup, in insertion order.
    pub fn candidates(&self) -> Vec<Candidate> {
        self.list
            .items
            .iter()
            .map(|item| Candidate {
                name: item.canonical_name.clone(),
                updated_at: item.updated_at,
            })
            .collect()
    }

    /// Creates the entry if missing, otherwise adds `quantity_delta` to the
    /// existing quantity. A supplied price is appended to the price ledger
    /// and mirrored into `last_price`. Returns the resulting item.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_merge(
        &mut self,
        canonical_name: &str,
        alias: Option<&str>,
        quantity_delta: f64,
        unit: Option<&str>,
        price: Option<(f64, Currency)>,
        source: Source,
        now: DateTime<Utc>,
    ) -> Result<&ShoppingItem, CoreError> {
        if canonical_name.is_empty() {
            return Err(CoreError::Validation("empty canonical name".into()));
        }
        if quantity_delta < 0.0 {
            return Err(CoreError::Validation(format!(
                "negative quantity {quantity_delta} for {canonical_name}"
            )));
        }

        let position = match self.list.position(canonical_name) {
            Some(position) => {
                let item = &mut self.list.items[position];
                item.quantity += quantity_delta;
                item.source = source;
                item.updated_at = now;
                debug!(
                    user_id = self.list.user_id,
                    canonical_name,
                    quantity = item.quantity,
                    "Merged mention into existing entry"
                );
                position
            }
            None => {
                let mut item = ShoppingItem::new(canonical_name, source, now);
                item.quantity = quantity_delta;
                item.unit = unit.map(str::to_owned);
                self.list.items.push(item);
                debug!(
                    user_id = self.list.user_id,
                    canonical_name, "Created new list entry"
                );
                self.list.items.len() - 1
            }
        };

        let item = &mut self.list.items[position];
        if let Some(alias) = alias {
            let alias = alias.trim();
            if !alias.is_empty() && alias != item.canonical_name {
                item.aliases.insert(alias.to_owned());
            }
        }
        if item.unit.is_none() {
            item.unit = unit.map(str::to_owned);
        }
        if let Some((price, currency)) = price {
            item.last_price = Some(price);
            item.currency = Some(currency);
            self.prices
                .record(canonical_name, price, currency, source, now);
        }
        Ok(&self.list.items[position])
    }

    /// Flags an entry as bought and logs the purchase. The name is resolved
    /// exactly first, then through the match index, so "Milk" finds "milk".
    pub fn mark_bought(
        &mut self,
        raw_name: &str,
        index: &MatchIndex,
        now: DateTime<Utc>,
    ) -> Result<&ShoppingItem, CoreError> {
        let normalized = crate::match_index::normalize(raw_name);
        let resolved = if self.list.position(&normalized).is_some() {
            Some(normalized)
        } else {
            let (matched, _) = index.find_best_match(raw_name, &self.candidates());
            matched
        };
        let canonical =
            resolved.ok_or_else(|| CoreError::NotFound(raw_name.trim().to_owned()))?;
        let position = self
            .list
            .position(&canonical)
            .ok_or_else(|| CoreError::NotFound(canonical.clone()))?;

        let item = &mut self.list.items[position];
        item.bought = true;
        item.updated_at = now;
        self.purchases.push(PurchaseRecord {
            canonical_name: canonical.clone(),
            bought_at: now,
        });
        info!(user_id = self.list.user_id, canonical_name = %canonical, "Marked item bought");
        Ok(&self.list.items[position])
    }

    /// Destroys all list entries atomically. Price history, purchase log
    /// and the idempotence ledger survive.
    pub fn clear(&mut self) {
        let removed = self.list.items.len();
        self.list.items.clear();
        info!(user_id = self.list.user_id, removed, "Cleared shopping list");
    }
}

/// Committed snapshots per user. Lists are created lazily on first
/// interaction and survive `clear`; only the entries are destroyed.
#[derive(Debug, Default)]
pub struct ListStore {
    users: HashMap<UserId, Arc<UserState>>,
}

impl ListStore {
    pub fn new() -> Self {
        ListStore::default()
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.users.contains_key(&user_id)
    }

    /// Get-or-create: returns the committed snapshot, creating an empty
    /// list on first interaction.
    pub fn get(&mut self, user_id: UserId) -> Arc<UserState> {
        self.users
            .entry(user_id)
            .or_insert_with(|| Arc::new(UserState::new(user_id)))
            .clone()
    }

    /// Committed snapshot without creating state for unknown users.
    pub fn snapshot(&self, user_id: UserId) -> Option<Arc<UserState>> {
        self.users.get(&user_id).cloned()
    }

    /// Working copy for a mutation. The caller holds the user's write gate.
    pub fn begin(&mut self, user_id: UserId) -> UserState {
        UserState::clone(&self.get(user_id))
    }

    /// Publishes a finished working copy as the new committed snapshot.
    pub fn commit(&mut self, user_id: UserId, state: UserState) {
        self.users.insert(user_id, Arc::new(state));
    }

    /// Installs state loaded from persistence, unless the user is already
    /// resident in memory.
    pub fn insert_if_absent(&mut self, user_id: UserId, state: UserState) -> bool {
        if self.users.contains_key(&user_id) {
            return false;
        }
        self.users.insert(user_id, Arc::new(state));
        true
    }
}
