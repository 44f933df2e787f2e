//! Authoritative scene state: avatars, entities, scene settings.
//!
//! `WorldState` is a plain value. Concurrency lives one level up in
//! [`SyncService`](crate::service::SyncService); the merge engine and the
//! session-layer mutators below assume they already hold exclusive access.

use crate::checksum::ChecksumAlgorithm;
use crate::clock::VectorClock;
use crate::payload::FieldMap;
use crate::types::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Per-object state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvatarState {
    pub session_id: String,
    pub channel_id: Option<String>,
    pub position: Vec3,
    pub rotation: Quat,
    pub animation: Option<String>,
    pub vector_clock: VectorClock,
    pub last_update: u64,
}

impl AvatarState {
    pub fn new(session_id: impl Into<String>, position: Vec3) -> Self {
        Self {
            session_id: session_id.into(),
            channel_id: None,
            position,
            rotation: Quat::identity(),
            animation: None,
            vector_clock: VectorClock::new(),
            last_update: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub id: String,
    pub name: String,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub components: FieldMap,
    pub vector_clock: VectorClock,
    pub last_update: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneState {
    pub channel_id: Option<String>,
    pub lighting: FieldMap,
    pub physics: FieldMap,
    pub vector_clock: VectorClock,
    pub last_update: u64,
}

// ---------------------------------------------------------------------------
// World state
// ---------------------------------------------------------------------------

/// The converged scene graph every client eventually observes.
///
/// `version` counts applied deltas. `checksum` is refreshed after every
/// mutation and covers everything except `last_update` stamps, so two
/// states built from the same deltas hash identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    pub avatars: BTreeMap<String, AvatarState>,
    pub entities: BTreeMap<String, EntityState>,
    pub scene: SceneState,
    pub vector_clock: VectorClock,
    pub version: u64,
    pub checksum: String,
}

/// Hashed view of an avatar (no timestamps).
#[derive(Serialize)]
struct AvatarDigest<'a> {
    channel_id: &'a Option<String>,
    position: &'a Vec3,
    rotation: &'a Quat,
    animation: &'a Option<String>,
    vector_clock: &'a VectorClock,
}

#[derive(Serialize)]
struct EntityDigest<'a> {
    name: &'a str,
    position: &'a Vec3,
    rotation: &'a Quat,
    scale: &'a Vec3,
    components: &'a FieldMap,
    vector_clock: &'a VectorClock,
}

#[derive(Serialize)]
struct SceneDigest<'a> {
    channel_id: &'a Option<String>,
    lighting: &'a FieldMap,
    physics: &'a FieldMap,
    vector_clock: &'a VectorClock,
}

#[derive(Serialize)]
struct StateDigest<'a> {
    avatars: BTreeMap<&'a str, AvatarDigest<'a>>,
    entities: BTreeMap<&'a str, EntityDigest<'a>>,
    scene: SceneDigest<'a>,
    vector_clock: &'a VectorClock,
    version: u64,
}

impl WorldState {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        let mut state = Self {
            avatars: BTreeMap::new(),
            entities: BTreeMap::new(),
            scene: SceneState::default(),
            vector_clock: VectorClock::new(),
            version: 0,
            checksum: String::new(),
        };
        state.refresh_checksum(algorithm);
        state
    }

    /// Pure function of the state's content.
    pub fn compute_checksum(&self, algorithm: ChecksumAlgorithm) -> String {
        let digest = StateDigest {
            avatars: self
                .avatars
                .iter()
                .map(|(id, a)| {
                    (
                        id.as_str(),
                        AvatarDigest {
                            channel_id: &a.channel_id,
                            position: &a.position,
                            rotation: &a.rotation,
                            animation: &a.animation,
                            vector_clock: &a.vector_clock,
                        },
                    )
                })
                .collect(),
            entities: self
                .entities
                .iter()
                .map(|(id, e)| {
                    (
                        id.as_str(),
                        EntityDigest {
                            name: &e.name,
                            position: &e.position,
                            rotation: &e.rotation,
                            scale: &e.scale,
                            components: &e.components,
                            vector_clock: &e.vector_clock,
                        },
                    )
                })
                .collect(),
            scene: SceneDigest {
                channel_id: &self.scene.channel_id,
                lighting: &self.scene.lighting,
                physics: &self.scene.physics,
                vector_clock: &self.scene.vector_clock,
            },
            vector_clock: &self.vector_clock,
            version: self.version,
        };

        // Non-finite floats serialise as `null`, so this cannot fail for
        // any value the state can hold.
        match algorithm.digest_json(&digest) {
            Ok(sum) => sum,
            Err(e) => {
                log::warn!("World checksum serialisation failed: {}", e);
                String::new()
            }
        }
    }

    pub fn refresh_checksum(&mut self, algorithm: ChecksumAlgorithm) {
        self.checksum = self.compute_checksum(algorithm);
    }

    /// Deep copy restricted to avatars in `channel_id`.
    ///
    /// Entities and the scene are copied unfiltered: entities carry no
    /// channel. `version` and `checksum` identify the full state the
    /// copy was taken from.
    pub fn filtered_to_channel(&self, channel_id: &str) -> WorldState {
        WorldState {
            avatars: self
                .avatars
                .iter()
                .filter(|(_, a)| a.channel_id.as_deref() == Some(channel_id))
                .map(|(id, a)| (id.clone(), a.clone()))
                .collect(),
            entities: self.entities.clone(),
            scene: self.scene.clone(),
            vector_clock: self.vector_clock.clone(),
            version: self.version,
            checksum: self.checksum.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Session-layer mutators (no version bump, checksum refreshed)
    // -----------------------------------------------------------------------

    /// Create or reset the avatar for `session_id`.
    pub fn register_avatar(
        &mut self,
        session_id: &str,
        channel_id: Option<String>,
        position: Vec3,
        now: u64,
        algorithm: ChecksumAlgorithm,
    ) {
        let mut avatar = AvatarState::new(session_id, position);
        avatar.channel_id = channel_id;
        avatar.last_update = now;
        self.avatars.insert(session_id.to_string(), avatar);
        self.refresh_checksum(algorithm);
    }

    /// Returns `false` when no avatar exists for `session_id`.
    pub fn update_avatar_position(
        &mut self,
        session_id: &str,
        position: Vec3,
        rotation: Option<Quat>,
        now: u64,
        algorithm: ChecksumAlgorithm,
    ) -> bool {
        let Some(avatar) = self.avatars.get_mut(session_id) else {
            return false;
        };
        avatar.position = position;
        if let Some(rotation) = rotation {
            avatar.rotation = rotation;
        }
        avatar.last_update = now;
        self.refresh_checksum(algorithm);
        true
    }

    pub fn update_avatar_position_in_channel(
        &mut self,
        session_id: &str,
        channel_id: &str,
        position: Vec3,
        rotation: Option<Quat>,
        now: u64,
        algorithm: ChecksumAlgorithm,
    ) -> bool {
        let Some(avatar) = self.avatars.get_mut(session_id) else {
            return false;
        };
        avatar.channel_id = Some(channel_id.to_string());
        avatar.position = position;
        if let Some(rotation) = rotation {
            avatar.rotation = rotation;
        }
        avatar.last_update = now;
        self.refresh_checksum(algorithm);
        true
    }

    pub fn clear_avatar_channel(
        &mut self,
        session_id: &str,
        now: u64,
        algorithm: ChecksumAlgorithm,
    ) -> bool {
        let Some(avatar) = self.avatars.get_mut(session_id) else {
            return false;
        };
        avatar.channel_id = None;
        avatar.last_update = now;
        self.refresh_checksum(algorithm);
        true
    }

    pub fn remove_avatar(
        &mut self,
        session_id: &str,
        algorithm: ChecksumAlgorithm,
    ) -> Option<AvatarState> {
        let removed = self.avatars.remove(session_id);
        if removed.is_some() {
            self.refresh_checksum(algorithm);
        }
        removed
    }
}
