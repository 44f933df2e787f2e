//! Merge engine: type-dispatched application of deltas to [`WorldState`].
//!
//! Concurrent edits from unrelated origins resolve field by field with
//! last-write-wins. Every applier checks its preconditions before touching
//! state, so a failed merge leaves the world exactly as it was.
//!
//! On success the engine:
//! 1. raises `world.vector_clock[origin]` to the delta's own counter,
//! 2. appends the delta to the bounded audit [`DeltaLog`],
//! 3. bumps `version` by one,
//! 4. refreshes the checksum.

use crate::checksum::ChecksumAlgorithm;
use crate::delta::Delta;
use crate::error::MergeError;
use crate::payload::{AvatarMove, DeltaPayload, EntityCreate, EntityUpdate, FieldMap, SceneUpdate};
use crate::state::{AvatarState, EntityState, WorldState};
use crate::types::{Quat, Vec3};
use log::debug;
use std::collections::VecDeque;

// ---------------------------------------------------------------------------
// Delta log
// ---------------------------------------------------------------------------

/// Bounded audit trail of applied deltas. Oldest entries are evicted past
/// the cap. Not used for replay.
#[derive(Debug, Clone)]
pub struct DeltaLog {
    entries: VecDeque<Delta>,
    capacity: usize,
}

impl DeltaLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, delta: Delta) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(delta);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Delta> {
        self.entries.iter()
    }

    /// The most recent `n` deltas, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Delta> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct MergeEngine {
    algorithm: ChecksumAlgorithm,
}

impl MergeEngine {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Parse and apply in one step. Used where no pre-parsed payload exists.
    pub fn apply(
        &self,
        world: &mut WorldState,
        log: &mut DeltaLog,
        delta: &Delta,
    ) -> Result<u64, MergeError> {
        let payload = DeltaPayload::parse(delta)?;
        self.apply_parsed(world, log, delta, &payload)
    }

    /// Apply a delta whose payload was already normalised. Returns the new
    /// world version.
    pub fn apply_parsed(
        &self,
        world: &mut WorldState,
        log: &mut DeltaLog,
        delta: &Delta,
        payload: &DeltaPayload,
    ) -> Result<u64, MergeError> {
        match payload {
            DeltaPayload::AvatarMove(mv) => apply_avatar_move(world, delta, mv),
            DeltaPayload::EntityCreate(create) => apply_entity_create(world, delta, create),
            DeltaPayload::EntityUpdate(update) => apply_entity_update(world, delta, update)?,
            DeltaPayload::SceneUpdate(scene) => apply_scene_update(world, delta, scene),
        }

        world
            .vector_clock
            .observe(&delta.origin, delta.own_counter());
        log.push(delta.clone());
        world.version += 1;
        world.refresh_checksum(self.algorithm);

        debug!(
            "Applied {} {} from {} → version {}",
            payload.kind(),
            delta.id,
            delta.origin,
            world.version
        );
        Ok(world.version)
    }
}

// ---------------------------------------------------------------------------
// Appliers
// ---------------------------------------------------------------------------

fn apply_avatar_move(world: &mut WorldState, delta: &Delta, mv: &AvatarMove) {
    let avatar = world
        .avatars
        .entry(mv.session_id.clone())
        .or_insert_with(|| AvatarState::new(mv.session_id.clone(), mv.position));

    avatar.position = mv.position;
    if let Some(rotation) = mv.rotation {
        avatar.rotation = rotation;
    }
    if let Some(animation) = &mv.animation {
        avatar.animation = Some(animation.clone());
    }
    if let Some(channel_id) = &mv.channel_id {
        avatar.channel_id = Some(channel_id.clone());
    }
    avatar.vector_clock.merge(&delta.vector_clock);
    avatar.last_update = delta.timestamp;
}

/// Last create wins: a re-delivered or competing create replaces the entity.
fn apply_entity_create(world: &mut WorldState, delta: &Delta, create: &EntityCreate) {
    let entity = EntityState {
        id: create.id.clone(),
        name: create.name.clone(),
        position: create.position.unwrap_or_else(Vec3::zero),
        rotation: create.rotation.unwrap_or_else(Quat::identity),
        scale: create.scale.unwrap_or_else(Vec3::one),
        components: create.components.clone(),
        vector_clock: delta.vector_clock.clone(),
        last_update: delta.timestamp,
    };
    world.entities.insert(create.id.clone(), entity);
}

fn apply_entity_update(
    world: &mut WorldState,
    delta: &Delta,
    update: &EntityUpdate,
) -> Result<(), MergeError> {
    let entity = world
        .entities
        .get_mut(&update.id)
        .ok_or_else(|| MergeError::EntityNotFound(update.id.clone()))?;

    if let Some(name) = &update.name {
        entity.name = name.clone();
    }
    if let Some(position) = update.position {
        entity.position = position;
    }
    if let Some(rotation) = update.rotation {
        entity.rotation = rotation;
    }
    if let Some(scale) = update.scale {
        entity.scale = scale;
    }
    if let Some(components) = &update.components {
        merge_fields(&mut entity.components, components);
    }
    entity.vector_clock.merge(&delta.vector_clock);
    entity.last_update = delta.timestamp;
    Ok(())
}

fn apply_scene_update(world: &mut WorldState, delta: &Delta, scene: &SceneUpdate) {
    let state = &mut world.scene;
    if let Some(channel_id) = &scene.channel_id {
        state.channel_id = Some(channel_id.clone());
    }
    if let Some(lighting) = &scene.lighting {
        merge_fields(&mut state.lighting, lighting);
    }
    if let Some(physics) = &scene.physics {
        merge_fields(&mut state.physics, physics);
    }
    state.vector_clock.merge(&delta.vector_clock);
    state.last_update = delta.timestamp;
}

/// Overwrite only the keys present in `incoming`.
fn merge_fields(target: &mut FieldMap, incoming: &FieldMap) {
    for (key, value) in incoming {
        target.insert(key.clone(), value.clone());
    }
}
