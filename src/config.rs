//! Engine configuration.

use crate::checksum::ChecksumAlgorithm;
use crate::registry::DEFAULT_OP_HISTORY;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum number of not-yet-ready deltas held for the resolver.
    pub queue_capacity: usize,
    /// How long a queued delta may wait for its dependencies, in milliseconds.
    pub causality_timeout_ms: u64,
    /// Resolver polling interval in milliseconds.
    pub resolver_poll_ms: u64,
    /// Applied deltas retained in the audit log.
    pub delta_log_capacity: usize,
    /// Payload and state hashing algorithm.
    pub checksum_algorithm: ChecksumAlgorithm,
    /// Buffer size of the applied-delta broadcast channel.
    pub event_buffer: usize,
    /// Predicted and confirmed op ids remembered per client.
    pub client_op_history: usize,
}

impl SyncConfig {
    pub fn causality_timeout(&self) -> Duration {
        Duration::from_millis(self.causality_timeout_ms)
    }

    pub fn resolver_poll_interval(&self) -> Duration {
        Duration::from_millis(self.resolver_poll_ms.max(1))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            causality_timeout_ms: 5_000,
            resolver_poll_ms: 10,
            delta_log_capacity: 1_000,
            checksum_algorithm: ChecksumAlgorithm::Sha256,
            event_buffer: 256,
            client_op_history: DEFAULT_OP_HISTORY,
        }
    }
}
