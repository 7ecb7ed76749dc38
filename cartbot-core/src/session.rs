//! Per-user serialization of mutating operations.
//!
//! Every user moves between Idle and Processing. A mutating request takes
//! the user's write gate; while one is processing, later mutations queue in
//! FIFO order behind a fair async mutex up to a bounded depth, beyond which
//! they fail fast with a backpressure error. Read-only operations never
//! queue: they clone the committed snapshot and run against it. A queued
//! request that is cancelled before it acquires the gate leaves the queue
//! without effect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::list_store::{ListStore, UserState};
use crate::model::UserId;

/// Idle/Processing gate for one user. `pending` counts the processing
/// request plus everything queued behind it.
#[derive(Debug, Default)]
struct UserGate {
    writer: Mutex<()>,
    pending: AtomicUsize,
}

/// Claims a queue slot on the gate, or reports saturation. The returned
/// token gives the slot back when dropped, which also covers cancellation
/// while still queued.
fn try_admit(gate: &Arc<UserGate>, queue_depth: usize) -> Option<QueueToken> {
    let occupied = gate.pending.fetch_add(1, Ordering::SeqCst);
    // One slot is the request being processed; queue_depth more may wait.
    if occupied > queue_depth {
        gate.pending.fetch_sub(1, Ordering::SeqCst);
        return None;
    }
    Some(QueueToken {
        gate: Arc::clone(gate),
    })
}

struct QueueToken {
    gate: Arc<UserGate>,
}

impl Drop for QueueToken {
    fn drop(&mut self) {
        self.gate.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Serializes writers per user while keeping readers on committed
/// snapshots. Different users proceed fully in parallel.
pub struct SessionCoordinator {
    store: RwLock<ListStore>,
    gates: StdMutex<HashMap<UserId, Arc<UserGate>>>,
    queue_depth: usize,
}

impl SessionCoordinator {
    pub fn new(queue_depth: usize) -> Self {
        SessionCoordinator {
            store: RwLock::new(ListStore::new()),
            gates: StdMutex::new(HashMap::new()),
            queue_depth,
        }
    }

    fn gate(&self, user_id: UserId) -> Arc<UserGate> {
        let mut gates = self.gates.lock().expect("gate map lock poisoned");
        gates.entry(user_id).or_default().clone()
    }

    /// Runs one mutating operation against a working copy of the user's
    /// state and commits the copy in a single visibility step. The closure
    /// returning an error leaves the committed snapshot untouched.
    pub async fn with_write<T, F>(&self, user_id: UserId, mutate: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut UserState) -> Result<T, CoreError>,
    {
        let gate = self.gate(user_id);
        let Some(_token) = try_admit(&gate, self.queue_depth) else {
            warn!(user_id, depth = self.queue_depth, "Mutation rejected, queue saturated");
            return Err(CoreError::Backpressure {
                user_id,
                depth: self.queue_depth,
            });
        };

        // Fair FIFO acquisition; this is the Idle -> Processing transition.
        let _processing = gate.writer.lock().await;

        let mut working = self.store.write().await.begin(user_id);
        let result = mutate(&mut working);
        match result {
            Ok(value) => {
                self.store.write().await.commit(user_id, working);
                debug!(user_id, "Mutation committed");
                Ok(value)
            }
            Err(e) => {
                debug!(user_id, error = %e, "Mutation discarded");
                Err(e)
            }
        }
    }

    /// Committed snapshot for read-only operations. Never waits on a
    /// processing mutation.
    pub async fn snapshot(&self, user_id: UserId) -> Option<Arc<UserState>> {
        self.store.read().await.snapshot(user_id)
    }

    pub async fn is_loaded(&self, user_id: UserId) -> bool {
        self.store.read().await.contains(user_id)
    }

    /// Installs state recovered from persistence unless the user is
    /// already resident.
    pub async fn install_loaded(&self, user_id: UserId, state: UserState) -> bool {
        self.store.write().await.insert_if_absent(user_id, state)
    }
}
