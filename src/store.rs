//! Durable per-replica state: `(current_term, voted_for)`, the order table,
//! and the log-entry table, all in one file written via write-temp-then-
//! rename so every apply step persists its order row and log row in a single
//! atomic transaction (spec.md §4.1 step 5, §6).
//!
//! Grounded on the teacher's `persist_state_to_disk`/`load_state_from_disk`
//! (`bincode` to a per-node file), extended to also carry the order table —
//! the teacher's steganography demo had no state machine to persist.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domain::{LogEntry, Order, RaftPersistentState};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct OnDiskState {
    raft: RaftPersistentState,
    orders: Vec<Order>,
    log: Vec<LogEntry>,
}

pub struct PersistentStore {
    path: PathBuf,
    state: tokio::sync::Mutex<OnDiskState>,
}

impl PersistentStore {
    /// Load the on-disk state for `server_id`, or start fresh if the file
    /// doesn't exist yet.
    pub async fn open(server_id: &str) -> anyhow::Result<Self> {
        let path = PathBuf::from(format!("order_state_{server_id}.bin"));
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => bincode::deserialize(&bytes)
                .map_err(|e| anyhow::anyhow!("corrupt state file {}: {e}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => OnDiskState::default(),
            Err(e) => return Err(anyhow::anyhow!("failed to read {}: {e}", path.display())),
        };
        Ok(Self {
            path,
            state: tokio::sync::Mutex::new(state),
        })
    }

    pub async fn raft_state(&self) -> RaftPersistentState {
        self.state.lock().await.raft.clone()
    }

    pub async fn log(&self) -> Vec<LogEntry> {
        self.state.lock().await.log.clone()
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.state.lock().await.orders.clone()
    }

    pub async fn order(&self, order_number: u64) -> Option<Order> {
        self.state
            .lock()
            .await
            .orders
            .iter()
            .find(|o| o.order_number == order_number)
            .cloned()
    }

    pub async fn orders_from(&self, next_number: u64) -> Vec<Order> {
        self.state
            .lock()
            .await
            .orders
            .iter()
            .filter(|o| o.order_number >= next_number)
            .cloned()
            .collect()
    }

    /// Persist a vote or term change. Fatal on I/O failure: the replica must
    /// not continue with in-memory state that outruns what's on disk
    /// (spec.md §7).
    pub async fn persist_term(&self, raft: RaftPersistentState) {
        let mut state = self.state.lock().await;
        state.raft = raft;
        self.write_locked(&state).await;
    }

    /// Persist a replicated log suffix (follower truncation/append) without
    /// touching the order table.
    pub async fn persist_log(&self, raft: RaftPersistentState, log: Vec<LogEntry>) {
        let mut state = self.state.lock().await;
        state.raft = raft;
        state.log = log;
        self.write_locked(&state).await;
    }

    /// Apply one committed entry: append its order row and its log entry in
    /// a single on-disk transaction.
    pub async fn apply(&self, raft: RaftPersistentState, log: Vec<LogEntry>, order: Order) {
        let mut state = self.state.lock().await;
        state.raft = raft;
        state.log = log;
        state.orders.push(order);
        self.write_locked(&state).await;
    }

    /// Classical-mode replication: store an order under a leader-assigned
    /// number without touching Raft state.
    pub async fn store_replicated_order(&self, order: Order) {
        let mut state = self.state.lock().await;
        state.orders.push(order);
        self.write_locked(&state).await;
    }

    /// Classical-mode leader side: assign the next order number and store the
    /// order, all under the same lock so concurrent buys on the leader never
    /// race on the same number.
    pub async fn create_classical_order(&self, product_name: String, quantity: u64) -> Order {
        let mut state = self.state.lock().await;
        let order = Order {
            order_number: state.orders.len() as u64 + 1,
            product_name,
            quantity,
        };
        state.orders.push(order.clone());
        self.write_locked(&state).await;
        order
    }

    async fn write_locked(&self, state: &OnDiskState) {
        if let Err(e) = write_atomic(&self.path, state).await {
            log::error!("fatal: failed to persist state to {}: {e}", self.path.display());
            std::process::exit(1);
        }
    }
}

async fn write_atomic(path: &Path, state: &OnDiskState) -> anyhow::Result<()> {
    let bytes = bincode::serialize(state)?;
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn apply_persists_order_and_log_together() {
        let server_id = format!("test-{}", std::process::id());
        let path = PathBuf::from(format!("order_state_{server_id}.bin"));
        let _ = tokio::fs::remove_file(&path).await;

        let store = PersistentStore::open(&server_id).await.unwrap();
        let raft = RaftPersistentState {
            current_term: 1,
            voted_for: Some(server_id.clone()),
        };
        let entry = LogEntry {
            index: 1,
            term: 1,
            command: "Buy 2 Tux".to_string(),
            payload: crate::domain::OrderPayload {
                product_name: "Tux".to_string(),
                quantity: 2,
            },
        };
        let order = Order {
            order_number: 1,
            product_name: "Tux".to_string(),
            quantity: 2,
        };
        store.apply(raft, vec![entry], order).await;

        let reopened = PersistentStore::open(&server_id).await.unwrap();
        assert_eq!(reopened.orders().await.len(), 1);
        assert_eq!(reopened.log().await.len(), 1);
        assert_eq!(reopened.raft_state().await.current_term, 1);

        let _ = tokio::fs::remove_file(&path).await;
    }
}
