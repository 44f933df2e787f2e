//! Per-client bookkeeping for prediction reconciliation.
//!
//! The session layer owns client identity; this registry only tracks what
//! the engine needs to tell a client which of its predicted operations the
//! server confirmed. Both op lists are bounded; the oldest ids are evicted
//! first, like the audit log.

use crate::clock::VectorClock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Op ids remembered per list when no explicit bound is configured.
pub const DEFAULT_OP_HISTORY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientState {
    pub client_id: String,
    /// Delta ids submitted by the client and not (yet) applied.
    pub predicted_ops: VecDeque<String>,
    /// Delta ids the server applied on the client's behalf, most recent last.
    pub confirmed_ops: VecDeque<String>,
    pub vector_clock: VectorClock,
    pub last_sync: u64,
}

impl ClientState {
    pub fn new(client_id: impl Into<String>, now: u64) -> Self {
        Self {
            client_id: client_id.into(),
            predicted_ops: VecDeque::new(),
            confirmed_ops: VecDeque::new(),
            vector_clock: VectorClock::new(),
            last_sync: now,
        }
    }

    pub fn record_predicted(&mut self, delta_id: &str, limit: usize) {
        push_bounded(&mut self.predicted_ops, delta_id, limit);
    }

    /// Move `delta_id` from predicted to confirmed.
    pub fn confirm(&mut self, delta_id: &str, limit: usize) {
        self.predicted_ops.retain(|id| id != delta_id);
        push_bounded(&mut self.confirmed_ops, delta_id, limit);
    }
}

fn push_bounded(list: &mut VecDeque<String>, delta_id: &str, limit: usize) {
    if limit == 0 || list.iter().any(|id| id == delta_id) {
        return;
    }
    while list.len() >= limit {
        list.pop_front();
    }
    list.push_back(delta_id.to_string());
}

#[derive(Debug, Clone)]
pub struct ClientRegistry {
    clients: HashMap<String, ClientState>,
    op_history: usize,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::with_op_history(DEFAULT_OP_HISTORY)
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that keeps at most `op_history` ids in each client's
    /// predicted and confirmed lists.
    pub fn with_op_history(op_history: usize) -> Self {
        Self {
            clients: HashMap::new(),
            op_history,
        }
    }

    /// Registering an already-known client keeps its existing record.
    pub fn register(&mut self, client_id: &str, now: u64) -> &ClientState {
        self.clients
            .entry(client_id.to_string())
            .or_insert_with(|| ClientState::new(client_id, now))
    }

    pub fn unregister(&mut self, client_id: &str) -> Option<ClientState> {
        self.clients.remove(client_id)
    }

    pub fn get(&self, client_id: &str) -> Option<&ClientState> {
        self.clients.get(client_id)
    }

    pub fn get_mut(&mut self, client_id: &str) -> Option<&mut ClientState> {
        self.clients.get_mut(client_id)
    }

    /// Returns `false` for an unknown client.
    pub fn record_predicted(&mut self, client_id: &str, delta_id: &str) -> bool {
        let limit = self.op_history;
        match self.clients.get_mut(client_id) {
            Some(client) => {
                client.record_predicted(delta_id, limit);
                true
            }
            None => false,
        }
    }

    /// Returns `false` for an unknown client.
    pub fn confirm(&mut self, client_id: &str, delta_id: &str) -> bool {
        let limit = self.op_history;
        match self.clients.get_mut(client_id) {
            Some(client) => {
                client.confirm(delta_id, limit);
                true
            }
            None => false,
        }
    }

    pub fn vector_clock(&self, client_id: &str) -> Option<VectorClock> {
        self.clients.get(client_id).map(|c| c.vector_clock.clone())
    }

    /// Fold an applied delta's clock into its origin's record, if the
    /// origin is a registered client.
    pub fn observe_applied(&mut self, origin: &str, clock: &VectorClock) {
        if let Some(client) = self.clients.get_mut(origin) {
            client.vector_clock.merge(clock);
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
