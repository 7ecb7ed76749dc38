use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CoreError;

/// Tunables of the core. All fields have working defaults; a transport layer
/// only overrides what its deployment needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Similarity threshold for merging a mention into an existing entry,
    /// on a 0 to 1 scale.
    pub match_threshold: f64,
    /// Half-life of the recency decay used by the suggestion ranker.
    pub suggestion_half_life_days: f64,
    /// Lookback window for purchase frequency weighting.
    pub frequency_window_days: i64,
    /// Purchase count at which the frequency weight saturates.
    pub frequency_saturation: u32,
    /// Maximum queued mutating requests per user before backpressure.
    pub queue_depth: usize,
    /// How many recent batch ids are retained per user for idempotence.
    pub batch_retention: usize,
    /// Upper bound on any single external provider call, in seconds.
    pub provider_timeout_secs: u64,
    /// Default number of suggestions returned when the caller gives no k.
    pub max_suggestions: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            match_threshold: 0.80,
            suggestion_half_life_days: 14.0,
            frequency_window_days: 90,
            frequency_saturation: 5,
            queue_depth: 16,
            batch_retention: 32,
            provider_timeout_secs: 10,
            max_suggestions: 5,
        }
    }
}

impl CoreConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if !(self.match_threshold > 0.0 && self.match_threshold <= 1.0) {
            return Err(CoreError::Validation(format!(
                "match_threshold must be within (0, 1], got {}",
                self.match_threshold
            )));
        }
        if self.suggestion_half_life_days <= 0.0 {
            return Err(CoreError::Validation(
                "suggestion_half_life_days must be positive".into(),
            ));
        }
        if self.queue_depth == 0 {
            return Err(CoreError::Validation("queue_depth must be nonzero".into()));
        }
        if self.batch_retention == 0 {
            return Err(CoreError::Validation(
                "batch_retention must be nonzero".into(),
            ));
        }
        Ok(())
    }

    pub fn trace_loaded(&self) {
        info!(
            match_threshold = self.match_threshold,
            queue_depth = self.queue_depth,
            batch_retention = self.batch_retention,
            provider_timeout_secs = self.provider_timeout_secs,
            "Loaded CoreConfig"
        );
        debug!(?self, "CoreConfig loaded (full debug)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CoreConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_threshold_rejected() {
        let config = CoreConfig {
            match_threshold: 0.0,
            ..CoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_queue_depth_rejected() {
        let config = CoreConfig {
            queue_depth: 0,
            ..CoreConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
