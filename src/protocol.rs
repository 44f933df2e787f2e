//! `scene.*` wire protocol.
//!
//! This module owns **every message that crosses the transport boundary**
//! between the sync engine and its collaborators (session layer, clients,
//! rendering bridge).
//!
//! ## Channel namespaces
//!
//! | Namespace         | Direction          | Carried by              |
//! |-------------------|--------------------|-------------------------|
//! | `scene.delta.*`   | both               | producer → engine, events out |
//! | `scene.client.*`  | session → engine   | request-reply           |
//! | `scene.avatar.*`  | session → engine   | request-reply           |
//! | `scene.cmd.*`     | client → engine    | request-reply           |
//!
//! ## Design rules
//!
//! 1. Every struct must be `Serialize + Deserialize` with snake_case JSON.
//! 2. Deltas travel as-is; the payload is serialized exactly as it was
//!    when its checksum was computed.
//! 3. Every outbound event includes `version: u64` and `session: String`.
//! 4. Replies go to `<subject>.reply` wrapped in [`CommandResponse`].

use crate::delta::{Delta, DeltaKind};
use crate::error::SyncError;
use crate::types::{Quat, Vec3};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Common envelope
// ---------------------------------------------------------------------------

/// Every outbound event is wrapped in this envelope.
///
/// The `session` field lets multiplexed consumers distinguish engines.
/// The `version` field is the world version the event belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldEvent<T> {
    pub session: String,
    pub version: u64,
    pub payload: T,
}

impl<T> WorldEvent<T> {
    pub fn new(session: impl Into<String>, version: u64, payload: T) -> Self {
        Self {
            session: session.into(),
            version,
            payload,
        }
    }
}

/// Reply to any request subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn success(result: Option<serde_json::Value>) -> Self {
        Self {
            ok: true,
            result,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

impl From<SyncError> for CommandResponse {
    fn from(err: SyncError) -> Self {
        CommandResponse::failed(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Delta events  (subject: scene.delta.applied)
// ---------------------------------------------------------------------------

/// Emitted once per applied delta, in application order.
///
/// The rendering bridge turns these into scene-graph updates; clients use
/// them to confirm their own deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaApplied {
    pub delta_id: String,
    pub origin: String,
    pub kind: DeltaKind,
    pub version: u64,
    pub checksum: String,
}

// ---------------------------------------------------------------------------
// Apply result  (reply to scene.delta.apply)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Merged immediately; the world is now at `version`.
    Applied { version: u64 },
    /// Waiting for causal dependencies; `depth` entries are queued.
    Queued { depth: usize },
}

// ---------------------------------------------------------------------------
// Client requests  (scene.client.*)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRef {
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub client_id: String,
    pub deltas: Vec<Delta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Deltas the server applied. Any predicted delta missing here should
    /// be rolled back by the client.
    pub server_deltas: Vec<Delta>,
    pub version: u64,
    pub checksum: String,
}

// ---------------------------------------------------------------------------
// Avatar requests  (scene.avatar.*)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarRegister {
    pub session_id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub position: Vec3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarPosition {
    pub session_id: String,
    pub position: Vec3,
    #[serde(default)]
    pub rotation: Option<Quat>,
    /// When set, the avatar is also moved into this channel.
    #[serde(default)]
    pub channel_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarRef {
    pub session_id: String,
}

// ---------------------------------------------------------------------------
// Commands  (scene.cmd.*)
// ---------------------------------------------------------------------------

/// Request a snapshot, optionally restricted to one channel's avatars.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CmdSnapshot {
    #[serde(default)]
    pub channel_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Subject helpers
// ---------------------------------------------------------------------------

/// All subjects used by the scene protocol, as constants.
pub mod subjects {
    pub const DELTA_APPLY: &str = "scene.delta.apply";
    pub const DELTA_APPLIED: &str = "scene.delta.applied";

    pub const CLIENT_REGISTER: &str = "scene.client.register";
    pub const CLIENT_UNREGISTER: &str = "scene.client.unregister";
    pub const CLIENT_SYNC: &str = "scene.client.sync";
    pub const CLIENT_CLOCK: &str = "scene.client.clock";

    pub const AVATAR_REGISTER: &str = "scene.avatar.register";
    pub const AVATAR_POSITION: &str = "scene.avatar.position";
    pub const AVATAR_CLEAR_CHANNEL: &str = "scene.avatar.clear_channel";
    pub const AVATAR_REMOVE: &str = "scene.avatar.remove";

    pub const CMD_SNAPSHOT: &str = "scene.cmd.snapshot";
    pub const CMD_STATS: &str = "scene.cmd.stats";

    pub const REPLY_SUFFIX: &str = ".reply";

    pub fn reply_to(subject: &str) -> String {
        format!("{subject}{REPLY_SUFFIX}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_outcome_is_tagged() {
        let json = serde_json::to_value(ApplyOutcome::Queued { depth: 3 }).unwrap();
        assert_eq!(json, serde_json::json!({"status": "queued", "depth": 3}));
    }

    #[test]
    fn failed_response_omits_result() {
        let json = serde_json::to_string(&CommandResponse::failed("nope")).unwrap();
        assert_eq!(json, r#"{"ok":false,"error":"nope"}"#);
    }

    #[test]
    fn avatar_register_defaults() {
        let msg: AvatarRegister = serde_json::from_str(r#"{"session_id":"s1"}"#).unwrap();
        assert_eq!(msg.position, Vec3::zero());
        assert!(msg.channel_id.is_none());
    }

    #[test]
    fn reply_subject() {
        assert_eq!(subjects::reply_to(subjects::CMD_STATS), "scene.cmd.stats.reply");
    }
}
