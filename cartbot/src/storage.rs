//! JSON file persistence adapter: one file per user under a data
//! directory. The schema is this adapter's own; the core only sees the
//! load/save contract.

use async_trait::async_trait;
use cartbot_core::contract::{PersistedUser, PersistenceStore};
use cartbot_core::error::ProviderError;
use cartbot_core::model::UserId;
use std::path::PathBuf;
use tracing::{debug, error, info};

pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: PathBuf) -> Self {
        JsonFileStore { dir }
    }

    fn path_for(&self, user_id: UserId) -> PathBuf {
        self.dir.join(format!("user_{user_id}.json"))
    }
}

#[async_trait]
impl PersistenceStore for JsonFileStore {
    async fn load(&self, user_id: UserId) -> Result<Option<PersistedUser>, ProviderError> {
        let path = self.path_for(user_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(user_id, path = %path.display(), "No stored state for user");
                return Ok(None);
            }
            Err(e) => {
                error!(error = ?e, path = %path.display(), "Failed to read user state file");
                return Err(Box::new(e));
            }
        };
        let state: PersistedUser = serde_json::from_slice(&bytes).map_err(|e| {
            error!(error = ?e, path = %path.display(), "Failed to parse user state file");
            Box::new(e) as ProviderError
        })?;
        info!(user_id, items = state.list.items.len(), "Loaded user state from disk");
        Ok(Some(state))
    }

    async fn save(&self, user_id: UserId, state: PersistedUser) -> Result<(), ProviderError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            error!(error = ?e, dir = %self.dir.display(), "Failed to create data directory");
            Box::new(e) as ProviderError
        })?;
        let path = self.path_for(user_id);
        let json = serde_json::to_vec_pretty(&state).map_err(|e| {
            error!(error = ?e, user_id, "Failed to serialize user state");
            Box::new(e) as ProviderError
        })?;
        tokio::fs::write(&path, json).await.map_err(|e| {
            error!(error = ?e, path = %path.display(), "Failed to write user state file");
            Box::new(e) as ProviderError
        })?;
        debug!(user_id, path = %path.display(), "Saved user state to disk");
        Ok(())
    }
}
