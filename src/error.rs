//! Error taxonomy. Every failure is per-delta and local.

use crate::delta::DeltaKind;

/// A delta could not be merged into the world state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MergeError {
    #[error("unknown delta type '{0}'")]
    UnknownDeltaType(String),

    #[error("{kind} payload is missing required field '{field}'")]
    MissingField {
        kind: DeltaKind,
        field: &'static str,
    },

    #[error("{kind} payload field '{field}' must be {expected}")]
    InvalidField {
        kind: DeltaKind,
        field: String,
        expected: &'static str,
    },

    #[error("entity not found: {0}")]
    EntityNotFound(String),
}

/// A delta was malformed before it ever reached the merge engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("delta field '{0}' must not be empty")]
    EmptyField(&'static str),

    #[error("checksum mismatch for delta {delta_id}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        delta_id: String,
        expected: String,
        actual: String,
    },

    #[error("failed to serialise payload for checksum: {0}")]
    Serialisation(String),
}

/// Top-level error returned by the synchronization entry points.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// The delta is not causally ready and the pending queue is full.
    /// The producer should retry later.
    #[error("causality violation, queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("invalid delta: {0}")]
    Validation(#[from] ValidationError),

    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),

    /// The origin already has deltas waiting in the causality queue; a
    /// later delta from it may not overtake them.
    #[error("origin {0} has deltas waiting on causal dependencies")]
    OriginBacklogged(String),

    #[error("unknown client: {0}")]
    UnknownClient(String),

    #[error("unknown avatar session: {0}")]
    UnknownAvatar(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
