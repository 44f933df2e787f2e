//! Bus integration – SyncAgent drives a [`SyncService`] from transport frames.
//!
//! ## Role on the bus
//!
//! The agent is transport-agnostic: whatever carries bytes (WebSocket,
//! NATS, stdin in the reference binary) feeds [`Frame`]s into an inbound
//! channel and drains the outbound one. Every request is answered on
//! `<subject>.reply`; applied deltas are forwarded as events.
//!
//! ## Event contract (inbound)
//!
//! | Subject                      | Payload                | Effect                              |
//! |------------------------------|------------------------|-------------------------------------|
//! | `scene.delta.apply`          | `Delta`                | `apply_delta` → `ApplyOutcome`      |
//! | `scene.client.register`      | `ClientRef`            | `register_client` → `ClientState`   |
//! | `scene.client.unregister`    | `ClientRef`            | `unregister_client`                 |
//! | `scene.client.sync`          | `SyncRequest`          | `sync_client_deltas` → `SyncResponse` |
//! | `scene.client.clock`         | `ClientRef`            | `get_vector_clock`                  |
//! | `scene.avatar.register`      | `AvatarRegister`       | `register_avatar`                   |
//! | `scene.avatar.position`      | `AvatarPosition`       | `update_avatar_position[_in_channel]` |
//! | `scene.avatar.clear_channel` | `AvatarRef`            | `clear_avatar_channel`              |
//! | `scene.avatar.remove`        | `AvatarRef`            | `remove_avatar`                     |
//! | `scene.cmd.snapshot`         | `CmdSnapshot`          | `snapshot[_for_channel]`            |
//! | `scene.cmd.stats`            | *(empty)*              | `SyncStats`                         |
//!
//! ## Event contract (outbound)
//!
//! | Subject                | Payload type               |
//! |------------------------|----------------------------|
//! | `scene.delta.applied`  | `WorldEvent<DeltaApplied>` |
//! | `<subject>.reply`      | `CommandResponse`          |

use crate::delta::Delta;
use crate::error::SyncError;
use crate::protocol::{
    subjects, AvatarPosition, AvatarRef, AvatarRegister, ClientRef, CmdSnapshot,
    CommandResponse, SyncRequest, SyncResponse, WorldEvent,
};
use crate::service::SyncService;
use anyhow::Result;
use bytes::Bytes;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// One message on the wire: a subject plus an opaque JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub subject: String,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
        }
    }

    pub fn json<T: Serialize>(subject: impl Into<String>, body: &T) -> serde_json::Result<Self> {
        Ok(Self::new(subject, serde_json::to_vec(body)?))
    }
}

// ---------------------------------------------------------------------------
// Config for SyncAgent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SyncAgentConfig {
    /// Session name stamped on every outbound event.
    pub session: String,
    /// Forward applied-delta events on `scene.delta.applied`.
    pub forward_events: bool,
}

impl Default for SyncAgentConfig {
    fn default() -> Self {
        Self {
            session: "default".into(),
            forward_events: true,
        }
    }
}

// ---------------------------------------------------------------------------
// SyncAgent
// ---------------------------------------------------------------------------

/// Wraps a [`SyncService`] and drives it from inbound frames.
///
/// Call [`SyncAgent::run`] inside a Tokio task to start the agent.
pub struct SyncAgent {
    config: SyncAgentConfig,
    service: Arc<SyncService>,
}

impl SyncAgent {
    pub fn new(config: SyncAgentConfig, service: Arc<SyncService>) -> Self {
        Self { config, service }
    }

    /// Serve requests until the inbound channel closes or the outbound
    /// side goes away.
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<Frame>,
        outbound: mpsc::Sender<Frame>,
    ) -> Result<()> {
        info!(
            "SyncAgent active in session '{}' (events {})",
            self.config.session,
            if self.config.forward_events { "on" } else { "off" }
        );

        let mut events = self.service.subscribe();

        loop {
            tokio::select! {
                frame = inbound.recv() => {
                    let Some(frame) = frame else {
                        info!("SyncAgent inbound closed – stopping");
                        break;
                    };
                    let reply = self.handle_frame(&frame);
                    publish(&outbound, &subjects::reply_to(&frame.subject), &reply).await;
                }
                event = events.recv(), if self.config.forward_events => {
                    match event {
                        Ok(applied) => {
                            let envelope = WorldEvent::new(
                                self.config.session.as_str(),
                                applied.version,
                                applied,
                            );
                            publish(&outbound, subjects::DELTA_APPLIED, &envelope).await;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("SyncAgent lagged, {} delta events dropped", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }

            if outbound.is_closed() {
                info!("SyncAgent outbound closed – stopping");
                break;
            }
        }

        Ok(())
    }

    /// Dispatch one request frame and build its reply.
    pub fn handle_frame(&self, frame: &Frame) -> CommandResponse {
        debug!("SyncAgent ← {}", frame.subject);
        let svc = &self.service;
        let body = frame.payload.as_ref();

        match frame.subject.as_str() {
            subjects::DELTA_APPLY => with_body(body, |delta: Delta| {
                let outcome = svc.apply_delta(delta)?;
                Ok(reply(&outcome))
            }),

            subjects::CLIENT_REGISTER => with_body(body, |msg: ClientRef| {
                Ok(reply(&svc.register_client(&msg.client_id)))
            }),

            subjects::CLIENT_UNREGISTER => with_body(body, |msg: ClientRef| {
                let removed = svc.unregister_client(&msg.client_id).is_some();
                Ok(reply(&removed))
            }),

            subjects::CLIENT_SYNC => with_body(body, |msg: SyncRequest| {
                let server_deltas = svc.sync_client_deltas(&msg.client_id, msg.deltas)?;
                let world = svc.snapshot();
                Ok(reply(&SyncResponse {
                    server_deltas,
                    version: world.version,
                    checksum: world.checksum,
                }))
            }),

            subjects::CLIENT_CLOCK => with_body(body, |msg: ClientRef| {
                let clock = svc
                    .get_vector_clock(&msg.client_id)
                    .ok_or_else(|| SyncError::UnknownClient(msg.client_id.clone()))?;
                Ok(reply(&clock))
            }),

            subjects::AVATAR_REGISTER => with_body(body, |msg: AvatarRegister| {
                svc.register_avatar(&msg.session_id, msg.channel_id, msg.position);
                Ok(CommandResponse::success(None))
            }),

            subjects::AVATAR_POSITION => with_body(body, |msg: AvatarPosition| {
                match msg.channel_id {
                    Some(channel) => svc.update_avatar_position_in_channel(
                        &msg.session_id,
                        &channel,
                        msg.position,
                        msg.rotation,
                    )?,
                    None => {
                        svc.update_avatar_position(&msg.session_id, msg.position, msg.rotation)?
                    }
                }
                Ok(CommandResponse::success(None))
            }),

            subjects::AVATAR_CLEAR_CHANNEL => with_body(body, |msg: AvatarRef| {
                svc.clear_avatar_channel(&msg.session_id)?;
                Ok(CommandResponse::success(None))
            }),

            subjects::AVATAR_REMOVE => with_body(body, |msg: AvatarRef| {
                let removed = svc.remove_avatar(&msg.session_id).is_some();
                Ok(reply(&removed))
            }),

            subjects::CMD_SNAPSHOT => with_body_or_default(body, |msg: CmdSnapshot| {
                let world = match msg.channel_id {
                    Some(channel) => svc.snapshot_for_channel(&channel),
                    None => svc.snapshot(),
                };
                Ok(reply(&world))
            }),

            subjects::CMD_STATS => reply(&svc.stats()),

            other => CommandResponse::failed(format!("Unknown subject: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Decode / encode helpers
// ---------------------------------------------------------------------------

type HandlerResult = std::result::Result<CommandResponse, SyncError>;

/// Successful reply carrying `value`, or a failed one if it cannot be
/// encoded.
fn reply<T: Serialize>(value: &T) -> CommandResponse {
    match serde_json::to_value(value) {
        Ok(result) => CommandResponse::success(Some(result)),
        Err(e) => CommandResponse::failed(format!("Failed to encode reply: {}", e)),
    }
}

fn with_body<T, F>(body: &[u8], handler: F) -> CommandResponse
where
    T: DeserializeOwned,
    F: FnOnce(T) -> HandlerResult,
{
    match serde_json::from_slice::<T>(body) {
        Ok(msg) => handler(msg).unwrap_or_else(CommandResponse::from),
        Err(e) => CommandResponse::failed(format!("Invalid payload: {}", e)),
    }
}

/// Like [`with_body`] but an empty body decodes as `T::default()`.
fn with_body_or_default<T, F>(body: &[u8], handler: F) -> CommandResponse
where
    T: DeserializeOwned + Default,
    F: FnOnce(T) -> HandlerResult,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return handler(T::default()).unwrap_or_else(CommandResponse::from);
    }
    with_body(body, handler)
}

// ---------------------------------------------------------------------------
// Publish helper
// ---------------------------------------------------------------------------

/// Serialise `body` and send it on `subject`.
///
/// Errors are logged and swallowed; a single failed publish should not
/// stop the agent.
async fn publish<T: Serialize>(outbound: &mpsc::Sender<Frame>, subject: &str, body: &T) {
    match Frame::json(subject, body) {
        Ok(frame) => {
            if let Err(e) = outbound.send(frame).await {
                warn!("Failed to publish to {}: {}", subject, e);
            }
        }
        Err(e) => warn!("Failed to serialise message for {}: {}", subject, e),
    }
}
