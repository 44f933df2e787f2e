//! Causality gate: has everything a delta depends on already been applied?
//!
//! This is a happened-before guard, not a total order. Deltas from
//! unrelated origins are admitted concurrently and resolved field by field
//! with last-write-wins in the merge engine.

use crate::clock::VectorClock;
use crate::delta::Delta;

/// For every origin in the delta's clock other than its own, the recorded
/// counter must not exceed the world's counter for that origin.
pub fn is_causally_ready(delta: &Delta, world_clock: &VectorClock) -> bool {
    delta
        .vector_clock
        .iter()
        .filter(|(origin, _)| *origin != delta.origin)
        .all(|(origin, counter)| counter <= world_clock.get(origin))
}

/// The `(origin, counter)` dependencies the world has not caught up to yet.
/// Empty exactly when [`is_causally_ready`] holds.
pub fn missing_dependencies(delta: &Delta, world_clock: &VectorClock) -> Vec<(String, u64)> {
    delta
        .vector_clock
        .iter()
        .filter(|(origin, counter)| {
            *origin != delta.origin && *counter > world_clock.get(origin)
        })
        .map(|(origin, counter)| (origin.to_string(), counter))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumAlgorithm;
    use crate::delta::DeltaKind;
    use serde_json::json;

    fn delta(origin: &str, clock: &[(&str, u64)]) -> Delta {
        Delta::new(
            "d",
            origin,
            DeltaKind::SceneUpdate,
            json!({}),
            clock.iter().map(|(o, c)| (*o, *c)).collect(),
            ChecksumAlgorithm::Sha256,
        )
        .unwrap()
    }

    #[test]
    fn own_counter_is_never_a_dependency() {
        let d = delta("c1", &[("c1", 42)]);
        assert!(is_causally_ready(&d, &VectorClock::new()));
    }

    #[test]
    fn unseen_foreign_counter_blocks() {
        let d = delta("c2", &[("c1", 1), ("c2", 1)]);
        let world = VectorClock::new();
        assert!(!is_causally_ready(&d, &world));
        assert_eq!(missing_dependencies(&d, &world), vec![("c1".to_string(), 1)]);
    }

    #[test]
    fn readiness_is_monotonic_as_the_world_advances() {
        let d = delta("c2", &[("c1", 2), ("c2", 1)]);
        let mut world = VectorClock::new();
        let mut seen_ready = false;
        for counter in 1..=5 {
            world.observe("c1", counter);
            let ready = is_causally_ready(&d, &world);
            assert!(!(seen_ready && !ready), "readiness regressed at c1={counter}");
            seen_ready |= ready;
        }
        assert!(seen_ready);
    }

    #[test]
    fn concurrent_origins_are_both_admitted() {
        let world: VectorClock = [("c1", 3), ("c2", 3)].into_iter().collect();
        let a = delta("c1", &[("c1", 4), ("c2", 3)]);
        let b = delta("c2", &[("c1", 3), ("c2", 4)]);
        assert!(is_causally_ready(&a, &world));
        assert!(is_causally_ready(&b, &world));
    }
}
