//! SyncService – causality gate, merge, resolver task, snapshots.
//!
//! ```text
//! apply_delta ─► validate ─► parse ─► CausalityGate ──ready──► MergeEngine ─► DeltaApplied event
//!                                          │
//!                                      not ready
//!                                          ▼
//!                                     DeltaQueue ◄── Resolver (fixed-interval poll)
//!                                          │
//!                                 timeout ─┴─► discarded + warn
//! ```
//!
//! World state, the client registry and the delta log sit behind one
//! `parking_lot::RwLock`. Writers hold it for the merge and checksum work
//! of a single delta; nothing awaits while holding it. The queue has its
//! own mutex and is always locked *before* the store, never after.

use crate::causality::{is_causally_ready, missing_dependencies};
use crate::clock::VectorClock;
use crate::config::SyncConfig;
use crate::delta::Delta;
use crate::error::{MergeError, Result, SyncError};
use crate::merge::{DeltaLog, MergeEngine};
use crate::payload::DeltaPayload;
use crate::protocol::{ApplyOutcome, DeltaApplied};
use crate::queue::{DeltaQueue, PendingDelta, Resolution, ResolveReport};
use crate::registry::{ClientRegistry, ClientState};
use crate::state::{AvatarState, WorldState};
use crate::types::{now_millis, Quat, SyncStats, Vec3};
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Everything guarded by the single reader-writer lock.
struct SceneStore {
    world: WorldState,
    clients: ClientRegistry,
    log: DeltaLog,
    applied_total: u64,
    discarded_total: u64,
    rejected_total: u64,
}

impl SceneStore {
    fn apply(
        &mut self,
        engine: &MergeEngine,
        delta: &Delta,
        payload: &DeltaPayload,
    ) -> std::result::Result<u64, MergeError> {
        match engine.apply_parsed(&mut self.world, &mut self.log, delta, payload) {
            Ok(version) => {
                self.clients
                    .observe_applied(&delta.origin, &delta.vector_clock);
                self.applied_total += 1;
                Ok(version)
            }
            Err(err) => {
                self.rejected_total += 1;
                Err(err)
            }
        }
    }
}

struct Shared {
    config: SyncConfig,
    engine: MergeEngine,
    store: RwLock<SceneStore>,
    queue: DeltaQueue,
    events: broadcast::Sender<DeltaApplied>,
}

impl Shared {
    /// Broadcast an applied delta. Called with the store lock held so
    /// events leave in version order; `send` never blocks.
    fn publish(&self, delta: &Delta, payload: &DeltaPayload, world: &WorldState) {
        let _ = self.events.send(DeltaApplied {
            delta_id: delta.id.clone(),
            origin: delta.origin.clone(),
            kind: payload.kind(),
            version: world.version,
            checksum: world.checksum.clone(),
        });
    }

    fn resolve_pending(&self) -> ResolveReport {
        let report = self
            .queue
            .resolve(self.config.causality_timeout(), |pending| {
                let mut store = self.store.write();
                if !is_causally_ready(&pending.delta, &store.world.vector_clock) {
                    return Resolution::NotReady;
                }
                match store.apply(&self.engine, &pending.delta, &pending.payload) {
                    Ok(_) => {
                        self.publish(&pending.delta, &pending.payload, &store.world);
                        Resolution::Applied
                    }
                    Err(err) => Resolution::Rejected(err),
                }
            });

        for id in &report.applied {
            debug!("Resolved queued delta {}", id);
        }
        for (id, err) in &report.rejected {
            warn!("Queued delta {} rejected by merge engine: {}", id, err);
        }
        if !report.expired.is_empty() {
            self.store.write().discarded_total += report.expired.len() as u64;
            for delta in &report.expired {
                warn!(
                    "Discarding delta {} from {}: clock {} not satisfied within {:?}",
                    delta.id,
                    delta.origin,
                    delta.vector_clock,
                    self.config.causality_timeout()
                );
            }
        }
        report
    }
}

// ---------------------------------------------------------------------------
// Resolver task
// ---------------------------------------------------------------------------

struct ResolverHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

fn spawn_resolver(shared: Arc<Shared>) -> ResolverHandle {
    let (stop, mut stop_rx) = oneshot::channel::<()>();
    let interval = shared.config.resolver_poll_interval();

    let task = tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = timer.tick() => {
                    if !shared.queue.is_empty() {
                        shared.resolve_pending();
                    }
                }
            }
        }
        debug!("Resolver stopped");
    });

    ResolverHandle { stop, task }
}

// ---------------------------------------------------------------------------
// SyncService
// ---------------------------------------------------------------------------

/// The authoritative synchronization engine.
///
/// Construct with [`SyncService::start`] inside a Tokio runtime to get the
/// background resolver, or with [`SyncService::new`] and drive
/// [`SyncService::resolve_pending`] by hand.
pub struct SyncService {
    shared: Arc<Shared>,
    resolver: Option<ResolverHandle>,
}

impl SyncService {
    pub fn new(config: SyncConfig) -> Self {
        let algorithm = config.checksum_algorithm;
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let shared = Shared {
            engine: MergeEngine::new(algorithm),
            store: RwLock::new(SceneStore {
                world: WorldState::new(algorithm),
                clients: ClientRegistry::with_op_history(config.client_op_history),
                log: DeltaLog::new(config.delta_log_capacity),
                applied_total: 0,
                discarded_total: 0,
                rejected_total: 0,
            }),
            queue: DeltaQueue::new(config.queue_capacity),
            events,
            config,
        };
        Self {
            shared: Arc::new(shared),
            resolver: None,
        }
    }

    /// Build the service and spawn its resolver. Must run inside a Tokio
    /// runtime.
    pub fn start(config: SyncConfig) -> Self {
        let mut service = Self::new(config);
        service.resolver = Some(spawn_resolver(service.shared.clone()));
        info!(
            "SyncService started (queue={}, timeout={:?}, poll={:?}, checksum={})",
            service.shared.config.queue_capacity,
            service.shared.config.causality_timeout(),
            service.shared.config.resolver_poll_interval(),
            service.shared.config.checksum_algorithm,
        );
        service
    }

    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    // -----------------------------------------------------------------------
    // Delta ingress
    // -----------------------------------------------------------------------

    /// Validate a delta and either merge it now or queue it until its
    /// causal dependencies have been applied.
    pub fn apply_delta(&self, delta: Delta) -> Result<ApplyOutcome> {
        let shared = &self.shared;

        if let Err(err) = delta.validate(shared.engine.algorithm()) {
            shared.store.write().rejected_total += 1;
            return Err(err.into());
        }
        let payload = match DeltaPayload::parse(&delta) {
            Ok(payload) => payload,
            Err(err) => {
                shared.store.write().rejected_total += 1;
                return Err(err.into());
            }
        };

        // Same-origin deltas never overtake ones already waiting.
        let origin_waiting = shared.queue.has_pending_from(&delta.origin);

        let missing = {
            let mut store = shared.store.write();
            if !origin_waiting && is_causally_ready(&delta, &store.world.vector_clock) {
                let version = store.apply(&shared.engine, &delta, &payload)?;
                shared.publish(&delta, &payload, &store.world);
                return Ok(ApplyOutcome::Applied { version });
            }
            missing_dependencies(&delta, &store.world.vector_clock)
        };

        let id = delta.id.clone();
        match shared.queue.push(PendingDelta::new(delta, payload)) {
            Ok(depth) => {
                debug!(
                    "Queued delta {} (waiting on {:?}, origin backlog: {}, depth {})",
                    id, missing, origin_waiting, depth
                );
                Ok(ApplyOutcome::Queued { depth })
            }
            Err(_) => {
                warn!("Rejecting delta {}: causality queue full", id);
                Err(SyncError::QueueFull {
                    capacity: shared.queue.capacity(),
                })
            }
        }
    }

    /// Run one resolver pass now. The background task calls this on every
    /// poll tick.
    pub fn resolve_pending(&self) -> ResolveReport {
        self.shared.resolve_pending()
    }

    // -----------------------------------------------------------------------
    // Client reconciliation
    // -----------------------------------------------------------------------

    /// Apply a client's predicted deltas and return those the server
    /// accepted. Failed deltas are skipped; the client rolls back any
    /// prediction missing from the result.
    pub fn sync_client_deltas(&self, client_id: &str, deltas: Vec<Delta>) -> Result<Vec<Delta>> {
        Ok(self
            .sync_client_deltas_detailed(client_id, deltas)?
            .into_iter()
            .filter_map(|(delta, result)| result.ok().map(|_| delta))
            .collect())
    }

    /// Like [`sync_client_deltas`](Self::sync_client_deltas) but keeps the
    /// per-delta outcome (new version or error) for every input.
    pub fn sync_client_deltas_detailed(
        &self,
        client_id: &str,
        deltas: Vec<Delta>,
    ) -> Result<Vec<(Delta, Result<u64>)>> {
        let shared = &self.shared;
        if shared.store.read().clients.get(client_id).is_none() {
            return Err(SyncError::UnknownClient(client_id.to_string()));
        }

        let mut outcomes = Vec::with_capacity(deltas.len());
        for delta in deltas {
            let result = self.reconcile_one(client_id, &delta);
            if let Err(err) = &result {
                debug!("Client {} delta {} skipped: {}", client_id, delta.id, err);
            }
            outcomes.push((delta, result));
        }

        if let Some(client) = shared.store.write().clients.get_mut(client_id) {
            client.last_sync = now_millis();
        }
        Ok(outcomes)
    }

    fn reconcile_one(&self, client_id: &str, delta: &Delta) -> Result<u64> {
        let shared = &self.shared;
        let checked = delta
            .validate(shared.engine.algorithm())
            .map_err(SyncError::from)
            .and_then(|_| DeltaPayload::parse(delta).map_err(SyncError::from))
            .and_then(|payload| {
                // Queue before store, as in apply_delta.
                if shared.queue.has_pending_from(&delta.origin) {
                    Err(SyncError::OriginBacklogged(delta.origin.clone()))
                } else {
                    Ok(payload)
                }
            });

        let mut store = shared.store.write();
        if !delta.id.is_empty() {
            store.clients.record_predicted(client_id, &delta.id);
        }
        let payload = match checked {
            Ok(payload) => payload,
            Err(err) => {
                store.rejected_total += 1;
                return Err(err);
            }
        };

        let version = store.apply(&shared.engine, delta, &payload)?;
        shared.publish(delta, &payload, &store.world);
        store.clients.confirm(client_id, &delta.id);
        Ok(version)
    }

    // -----------------------------------------------------------------------
    // Client registry
    // -----------------------------------------------------------------------

    pub fn register_client(&self, client_id: &str) -> ClientState {
        let mut store = self.shared.store.write();
        let client = store.clients.register(client_id, now_millis()).clone();
        debug!("Registered client {}", client_id);
        client
    }

    pub fn unregister_client(&self, client_id: &str) -> Option<ClientState> {
        self.shared.store.write().clients.unregister(client_id)
    }

    pub fn client(&self, client_id: &str) -> Option<ClientState> {
        self.shared.store.read().clients.get(client_id).cloned()
    }

    pub fn get_vector_clock(&self, client_id: &str) -> Option<VectorClock> {
        self.shared.store.read().clients.vector_clock(client_id)
    }

    // -----------------------------------------------------------------------
    // Avatar mutations (session / channel layer)
    // -----------------------------------------------------------------------

    pub fn register_avatar(&self, session_id: &str, channel_id: Option<String>, position: Vec3) {
        let algorithm = self.shared.engine.algorithm();
        self.shared.store.write().world.register_avatar(
            session_id,
            channel_id,
            position,
            now_millis(),
            algorithm,
        );
    }

    pub fn update_avatar_position(
        &self,
        session_id: &str,
        position: Vec3,
        rotation: Option<Quat>,
    ) -> Result<()> {
        let algorithm = self.shared.engine.algorithm();
        let updated = self.shared.store.write().world.update_avatar_position(
            session_id,
            position,
            rotation,
            now_millis(),
            algorithm,
        );
        found(updated, session_id)
    }

    pub fn update_avatar_position_in_channel(
        &self,
        session_id: &str,
        channel_id: &str,
        position: Vec3,
        rotation: Option<Quat>,
    ) -> Result<()> {
        let algorithm = self.shared.engine.algorithm();
        let updated = self
            .shared
            .store
            .write()
            .world
            .update_avatar_position_in_channel(
                session_id,
                channel_id,
                position,
                rotation,
                now_millis(),
                algorithm,
            );
        found(updated, session_id)
    }

    pub fn clear_avatar_channel(&self, session_id: &str) -> Result<()> {
        let algorithm = self.shared.engine.algorithm();
        let updated =
            self.shared
                .store
                .write()
                .world
                .clear_avatar_channel(session_id, now_millis(), algorithm);
        found(updated, session_id)
    }

    /// Session teardown.
    pub fn remove_avatar(&self, session_id: &str) -> Option<AvatarState> {
        let algorithm = self.shared.engine.algorithm();
        self.shared
            .store
            .write()
            .world
            .remove_avatar(session_id, algorithm)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Independent deep copy of the whole world.
    pub fn snapshot(&self) -> WorldState {
        self.shared.store.read().world.clone()
    }

    /// Deep copy with avatars restricted to `channel_id`. Entities are not
    /// filtered.
    pub fn snapshot_for_channel(&self, channel_id: &str) -> WorldState {
        self.shared.store.read().world.filtered_to_channel(channel_id)
    }

    pub fn world_clock(&self) -> VectorClock {
        self.shared.store.read().world.vector_clock.clone()
    }

    pub fn version(&self) -> u64 {
        self.shared.store.read().world.version
    }

    /// The most recent `n` applied deltas, oldest first.
    pub fn recent_deltas(&self, n: usize) -> Vec<Delta> {
        self.shared.store.read().log.recent(n)
    }

    pub fn pending_len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.shared.queue.pending_ids()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeltaApplied> {
        self.shared.events.subscribe()
    }

    pub fn stats(&self) -> SyncStats {
        // Queue first: the lock order is queue → store.
        let pending_deltas = self.shared.queue.len();
        let store = self.shared.store.read();
        SyncStats {
            avatars: store.world.avatars.len(),
            entities: store.world.entities.len(),
            clients: store.clients.len(),
            version: store.world.version,
            pending_deltas,
            delta_log_len: store.log.len(),
            applied_total: store.applied_total,
            discarded_total: store.discarded_total,
            rejected_total: store.rejected_total,
        }
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Stop the resolver, discard whatever is still queued and return the
    /// final world state. Consumes the service, so teardown happens once.
    pub async fn shutdown(mut self) -> WorldState {
        if let Some(handle) = self.resolver.take() {
            let _ = handle.stop.send(());
            if let Err(e) = handle.task.await {
                warn!("Resolver task ended abnormally: {}", e);
            }
        }

        let leftover = self.shared.queue.drain();
        let mut store = self.shared.store.write();
        if !leftover.is_empty() {
            store.discarded_total += leftover.len() as u64;
            for pending in &leftover {
                warn!(
                    "Discarding queued delta {} from {} at shutdown",
                    pending.delta.id, pending.delta.origin
                );
            }
        }
        info!(
            "SyncService stopped at version {} ({} applied, {} discarded, {} rejected)",
            store.world.version, store.applied_total, store.discarded_total, store.rejected_total
        );
        store.world.clone()
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        if let Some(handle) = self.resolver.take() {
            handle.task.abort();
        }
    }
}

fn found(updated: bool, session_id: &str) -> Result<()> {
    if updated {
        Ok(())
    } else {
        Err(SyncError::UnknownAvatar(session_id.to_string()))
    }
}
