//! The wire-level `Delta`: one causally stamped mutation.

use crate::checksum::ChecksumAlgorithm;
use crate::clock::VectorClock;
use crate::error::{MergeError, ValidationError};
use crate::types::now_millis;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    AvatarMove,
    EntityCreate,
    EntityUpdate,
    SceneUpdate,
}

impl DeltaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeltaKind::AvatarMove => "avatar_move",
            DeltaKind::EntityCreate => "entity_create",
            DeltaKind::EntityUpdate => "entity_update",
            DeltaKind::SceneUpdate => "scene_update",
        }
    }
}

impl std::fmt::Display for DeltaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeltaKind {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avatar_move" => Ok(DeltaKind::AvatarMove),
            "entity_create" => Ok(DeltaKind::EntityCreate),
            "entity_update" => Ok(DeltaKind::EntityUpdate),
            "scene_update" => Ok(DeltaKind::SceneUpdate),
            other => Err(MergeError::UnknownDeltaType(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Delta
// ---------------------------------------------------------------------------

/// An immutable mutation as it travels between producers and the core.
///
/// `kind` stays a plain string on the wire so an unrecognised type
/// surfaces as [`MergeError::UnknownDeltaType`] instead of a decode
/// failure. The payload stays loosely typed until
/// [`DeltaPayload::parse`](crate::payload::DeltaPayload::parse)
/// normalises it, because the checksum covers its serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub id: String,
    pub origin: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub vector_clock: VectorClock,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub checksum: String,
}

impl Delta {
    /// Build a delta stamped with the current time and a payload checksum.
    pub fn new(
        id: impl Into<String>,
        origin: impl Into<String>,
        kind: DeltaKind,
        payload: serde_json::Value,
        vector_clock: VectorClock,
        algorithm: ChecksumAlgorithm,
    ) -> Result<Self, ValidationError> {
        let checksum = payload_checksum(&payload, algorithm)?;
        Ok(Self {
            id: id.into(),
            origin: origin.into(),
            kind: kind.as_str().to_string(),
            payload,
            vector_clock,
            timestamp: now_millis(),
            checksum,
        })
    }

    pub fn kind(&self) -> Result<DeltaKind, MergeError> {
        self.kind.parse()
    }

    /// The origin's own counter at emission.
    pub fn own_counter(&self) -> u64 {
        self.vector_clock.get(&self.origin)
    }

    /// Structural checks plus checksum verification.
    pub fn validate(&self, algorithm: ChecksumAlgorithm) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyField("id"));
        }
        if self.origin.is_empty() {
            return Err(ValidationError::EmptyField("origin"));
        }
        if self.kind.is_empty() {
            return Err(ValidationError::EmptyField("type"));
        }

        let actual = payload_checksum(&self.payload, algorithm)?;
        if actual != self.checksum {
            return Err(ValidationError::ChecksumMismatch {
                delta_id: self.id.clone(),
                expected: self.checksum.clone(),
                actual,
            });
        }
        Ok(())
    }
}

/// Checksum of a payload as producers are expected to compute it.
pub fn payload_checksum(
    payload: &serde_json::Value,
    algorithm: ChecksumAlgorithm,
) -> Result<String, ValidationError> {
    algorithm
        .digest_json(payload)
        .map_err(|e| ValidationError::Serialisation(e.to_string()))
}
