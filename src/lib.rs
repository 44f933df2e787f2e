//! Scene Sync Engine
//!
//! Authoritative state synchronization for a multi-client collaborative
//! scene graph. Clients submit causally stamped deltas; the engine merges
//! them into one world state that every client eventually observes.
//!
//! ## Architecture
//!
//! ```text
//! SyncAgent  (bus.rs)
//!   └── SyncService  (service.rs)  ← lock, resolver task, reconciliation
//!         ├── CausalityGate  (causality.rs)
//!         ├── DeltaQueue     (queue.rs)
//!         ├── MergeEngine    (merge.rs)    ← typed payloads from payload.rs
//!         ├── WorldState     (state.rs)
//!         └── ClientRegistry (registry.rs)
//! ```
//!
//! `Delta`, `VectorClock` and the checksum helpers are usable without the
//! `server` feature, so producers can build and stamp deltas without
//! pulling in Tokio.

// Data model and merge logic are always available (no server feature needed).
pub mod causality;
pub mod checksum;
pub mod clock;
pub mod config;
pub mod delta;
pub mod error;
pub mod merge;
pub mod payload;
pub mod protocol;
pub mod registry;
pub mod state;
pub mod types;

// Server-side modules require the `server` feature.
#[cfg(feature = "server")]
pub mod bus;
#[cfg(feature = "server")]
pub mod queue;
#[cfg(feature = "server")]
pub mod service;

// Convenience re-exports (server only)
#[cfg(feature = "server")]
pub use bus::{Frame, SyncAgent, SyncAgentConfig};
#[cfg(feature = "server")]
pub use service::SyncService;

pub use causality::is_causally_ready;
pub use checksum::ChecksumAlgorithm;
pub use clock::VectorClock;
pub use config::SyncConfig;
pub use delta::{Delta, DeltaKind};
pub use error::{MergeError, SyncError, ValidationError};
pub use merge::{DeltaLog, MergeEngine};
pub use payload::DeltaPayload;
pub use protocol::{ApplyOutcome, DeltaApplied};
pub use registry::{ClientRegistry, ClientState};
pub use state::{AvatarState, EntityState, SceneState, WorldState};
pub use types::{Quat, SyncStats, Vec3};
