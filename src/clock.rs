//! Vector clocks: per-origin logical counters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping origin → counter. Absent origins read as 0.
///
/// Backed by a `BTreeMap` so the serialized form (and therefore every
/// checksum that covers a clock) is independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock(BTreeMap<String, u64>);

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, origin: &str) -> u64 {
        self.0.get(origin).copied().unwrap_or(0)
    }

    /// Bump `origin`'s counter and return the new value.
    pub fn increment(&mut self, origin: &str) -> u64 {
        let counter = self.0.entry(origin.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Raise `origin` to at least `counter`. Never lowers a counter.
    pub fn observe(&mut self, origin: &str, counter: u64) {
        if counter == 0 {
            return;
        }
        let current = self.0.entry(origin.to_string()).or_insert(0);
        if counter > *current {
            *current = counter;
        }
    }

    /// Pointwise max with `other`.
    pub fn merge(&mut self, other: &VectorClock) {
        for (origin, counter) in &other.0 {
            self.observe(origin, *counter);
        }
    }

    /// True when every counter in `self` is ≤ the matching one in `other`.
    pub fn dominated_by(&self, other: &VectorClock) -> bool {
        self.0.iter().all(|(origin, c)| *c <= other.get(origin))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        let mut clock = VectorClock::new();
        for (origin, counter) in iter {
            let origin: String = origin.into();
            clock.observe(&origin, counter);
        }
        clock
    }
}

impl std::fmt::Display for VectorClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (origin, counter)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{origin}:{counter}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_origin_reads_zero() {
        let clock = VectorClock::new();
        assert_eq!(clock.get("nobody"), 0);
    }

    #[test]
    fn observe_never_lowers() {
        let mut clock = VectorClock::new();
        clock.observe("a", 5);
        clock.observe("a", 3);
        assert_eq!(clock.get("a"), 5);
    }

    #[test]
    fn merge_is_pointwise_max() {
        let mut a: VectorClock = [("a", 2), ("b", 7)].into_iter().collect();
        let b: VectorClock = [("b", 3), ("c", 1)].into_iter().collect();
        a.merge(&b);
        assert_eq!(a.get("a"), 2);
        assert_eq!(a.get("b"), 7);
        assert_eq!(a.get("c"), 1);
    }

    #[test]
    fn dominated_by_treats_missing_as_zero() {
        let small: VectorClock = [("a", 1)].into_iter().collect();
        let big: VectorClock = [("a", 1), ("b", 4)].into_iter().collect();
        assert!(small.dominated_by(&big));
        assert!(!big.dominated_by(&small));
    }

    #[test]
    fn serializes_in_origin_order() {
        let clock: VectorClock = [("z", 1), ("a", 2)].into_iter().collect();
        let json = serde_json::to_string(&clock).unwrap();
        assert_eq!(json, r#"{"a":2,"z":1}"#);
    }
}
