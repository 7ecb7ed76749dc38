//! Capability contracts for the external collaborators the core consumes.
//!
//! The core never depends on a concrete OCR vendor, AI SDK or storage
//! backend; it sees exactly three traits. Adapters live in the binary
//! crate, mocks are generated here.
//!
//! ## Interface & Extensibility
//! - Implement [`OcrProvider`] for a new receipt extraction backend.
//! - Implement [`AiProvider`] for a new suggestion model. Suggestions are
//!   optional enrichment only; the core works without them.
//! - Implement [`PersistenceStore`] for a new storage backend. The
//!   serialization schema belongs to the adapter, not the core.
//! - All methods are async and return boxed error types; any provider
//!   failure is recoverable and degrades to local-only behaviour.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`, exported behind the
//!   `test-export-mocks` feature so integration tests can build
//!   deterministic collaborators.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::error::ProviderError;
use crate::model::{PriceObservation, PurchaseRecord, UserId, UserList};

/// One line of text recovered from a receipt image.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrLine {
    pub text: String,
    pub confidence: f32,
}

/// Compact per-item purchase history handed to the AI collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseSummary {
    pub canonical_name: String,
    pub times_purchased: usize,
    pub last_price: Option<f64>,
}

/// Snapshot of one user as the persistence collaborator stores it. The
/// in-memory idempotence ledger is deliberately not part of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedUser {
    pub list: UserList,
    pub observations: Vec<PriceObservation>,
    pub purchases: Vec<PurchaseRecord>,
}

/// Turns receipt image bytes into ordered text lines. May fail with a
/// transient error or return an empty sequence; retrying is the caller's
/// business, not the core's.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait OcrProvider: Send + Sync {
    async fn extract(&self, image_bytes: Vec<u8>) -> Result<Vec<OcrLine>, ProviderError>;
}

/// Produces candidate item names from a purchase history summary.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn suggest(&self, history: Vec<PurchaseSummary>) -> Result<Vec<String>, ProviderError>;
}

/// Loads and saves one user's durable state at session boundaries.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn load(&self, user_id: UserId) -> Result<Option<PersistedUser>, ProviderError>;
    async fn save(&self, user_id: UserId, state: PersistedUser) -> Result<(), ProviderError>;
}
