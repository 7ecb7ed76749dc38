use std::fmt;

use crate::model::UserId;

/// Boxed error type used at the provider trait boundary.
pub type ProviderError = Box<dyn std::error::Error + Send + Sync>;

/// Which external collaborator failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Ocr,
    Ai,
    Persistence,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Ocr => write!(f, "ocr"),
            ProviderKind::Ai => write!(f, "ai"),
            ProviderKind::Persistence => write!(f, "persistence"),
        }
    }
}

/// Error taxonomy of the core. Nothing here is fatal to the process; at most
/// a single request fails.
#[derive(Debug)]
pub enum CoreError {
    /// Empty or garbage input, or a negative explicit quantity.
    Validation(String),
    /// A canonical name that does not exist on the user's list.
    NotFound(String),
    /// The user's mutation queue is saturated.
    Backpressure { user_id: UserId, depth: usize },
    /// A collaborator call failed or timed out. Always recoverable; callers
    /// degrade to local-only behaviour instead of failing the operation.
    External {
        provider: ProviderKind,
        message: String,
    },
}

impl CoreError {
    pub fn external(provider: ProviderKind, message: impl Into<String>) -> Self {
        CoreError::External {
            provider,
            message: message.into(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Validation(msg) => write!(f, "validation failed: {msg}"),
            CoreError::NotFound(name) => write!(f, "no such item: {name}"),
            CoreError::Backpressure { user_id, depth } => write!(
                f,
                "request queue for user {user_id} is full (depth {depth})"
            ),
            CoreError::External { provider, message } => {
                write!(f, "{provider} provider failed: {message}")
            }
        }
    }
}

impl std::error::Error for CoreError {}
