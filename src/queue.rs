//! Bounded queue of deltas that are not yet causally ready.
//!
//! Entries keep submission order. A resolver pass walks the queue front to
//! back; once an origin has an entry that stays queued, later entries from
//! the same origin stay behind it.

use crate::delta::Delta;
use crate::error::MergeError;
use crate::payload::DeltaPayload;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct PendingDelta {
    pub delta: Delta,
    pub payload: DeltaPayload,
    pub enqueued_at: Instant,
}

impl PendingDelta {
    pub fn new(delta: Delta, payload: DeltaPayload) -> Self {
        Self {
            delta,
            payload,
            enqueued_at: Instant::now(),
        }
    }
}

/// What the resolver's callback did with one queued delta.
#[derive(Debug)]
pub enum Resolution {
    Applied,
    Rejected(MergeError),
    NotReady,
}

/// Outcome of one [`DeltaQueue::resolve`] pass.
#[derive(Debug, Default)]
pub struct ResolveReport {
    pub applied: Vec<String>,
    pub rejected: Vec<(String, MergeError)>,
    pub expired: Vec<Delta>,
}

impl ResolveReport {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.rejected.is_empty() && self.expired.is_empty()
    }
}

pub struct DeltaQueue {
    entries: Mutex<VecDeque<PendingDelta>>,
    capacity: usize,
}

impl DeltaQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Hands the entry back when the queue is full.
    pub fn push(&self, pending: PendingDelta) -> Result<usize, PendingDelta> {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            return Err(pending);
        }
        entries.push_back(pending);
        Ok(entries.len())
    }

    pub fn has_pending_from(&self, origin: &str) -> bool {
        self.entries.lock().iter().any(|p| p.delta.origin == origin)
    }

    pub fn contains(&self, delta_id: &str) -> bool {
        self.entries.lock().iter().any(|p| p.delta.id == delta_id)
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .map(|p| p.delta.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove and return everything still queued.
    pub fn drain(&self) -> Vec<PendingDelta> {
        self.entries.lock().drain(..).collect()
    }

    /// Offer every queued delta to `try_apply`, repeating until a full pass
    /// makes no progress, so dependency chains drain in one call. Entries
    /// that are still not ready after `timeout` are expired.
    pub fn resolve<F>(&self, timeout: Duration, mut try_apply: F) -> ResolveReport
    where
        F: FnMut(&PendingDelta) -> Resolution,
    {
        let mut report = ResolveReport::default();
        let mut entries = self.entries.lock();
        let now = Instant::now();

        loop {
            let mut progressed = false;
            let mut blocked: HashSet<String> = HashSet::new();
            let mut remaining = VecDeque::with_capacity(entries.len());

            while let Some(pending) = entries.pop_front() {
                if blocked.contains(&pending.delta.origin) {
                    remaining.push_back(pending);
                    continue;
                }
                match try_apply(&pending) {
                    Resolution::Applied => {
                        report.applied.push(pending.delta.id);
                        progressed = true;
                    }
                    Resolution::Rejected(err) => {
                        report.rejected.push((pending.delta.id, err));
                        progressed = true;
                    }
                    Resolution::NotReady
                        if now.saturating_duration_since(pending.enqueued_at) >= timeout =>
                    {
                        report.expired.push(pending.delta);
                        progressed = true;
                    }
                    Resolution::NotReady => {
                        blocked.insert(pending.delta.origin.clone());
                        remaining.push_back(pending);
                    }
                }
            }

            *entries = remaining;
            if !progressed || entries.is_empty() {
                break;
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumAlgorithm;
    use crate::delta::DeltaKind;
    use serde_json::json;

    fn pending(id: &str, origin: &str) -> PendingDelta {
        let delta = Delta::new(
            id,
            origin,
            DeltaKind::SceneUpdate,
            json!({}),
            Default::default(),
            ChecksumAlgorithm::Sha256,
        )
        .unwrap();
        let payload = DeltaPayload::parse(&delta).unwrap();
        PendingDelta::new(delta, payload)
    }

    #[test]
    fn push_respects_capacity() {
        let queue = DeltaQueue::new(1);
        assert!(queue.push(pending("a", "c1")).is_ok());
        let rejected = queue.push(pending("b", "c1")).unwrap_err();
        assert_eq!(rejected.delta.id, "b");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn chains_drain_in_a_single_pass() {
        let queue = DeltaQueue::new(8);
        queue.push(pending("second", "c2")).unwrap();
        queue.push(pending("first", "c1")).unwrap();

        let mut applied: Vec<String> = Vec::new();
        let report = queue.resolve(Duration::from_secs(60), |p| {
            // "second" only becomes ready after "first" has applied.
            if p.delta.id == "second" && !applied.contains(&"first".to_string()) {
                return Resolution::NotReady;
            }
            applied.push(p.delta.id.clone());
            Resolution::Applied
        });

        assert_eq!(report.applied, vec!["first", "second"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn blocked_origin_holds_back_its_later_deltas() {
        let queue = DeltaQueue::new(8);
        queue.push(pending("a1", "a")).unwrap();
        queue.push(pending("a2", "a")).unwrap();
        queue.push(pending("b1", "b")).unwrap();

        let report = queue.resolve(Duration::from_secs(60), |p| {
            if p.delta.id == "a1" {
                Resolution::NotReady
            } else {
                Resolution::Applied
            }
        });

        assert_eq!(report.applied, vec!["b1"]);
        assert_eq!(queue.pending_ids(), vec!["a1", "a2"]);
    }

    #[test]
    fn stale_entries_expire() {
        let queue = DeltaQueue::new(8);
        queue.push(pending("late", "c1")).unwrap();
        let report = queue.resolve(Duration::ZERO, |_| Resolution::NotReady);
        assert_eq!(report.expired.len(), 1);
        assert!(!queue.contains("late"));
    }

    #[test]
    fn rejected_entries_leave_the_queue() {
        let queue = DeltaQueue::new(8);
        queue.push(pending("bad", "c1")).unwrap();
        let report = queue.resolve(Duration::from_secs(60), |_| {
            Resolution::Rejected(MergeError::EntityNotFound("e9".into()))
        });
        assert_eq!(report.rejected.len(), 1);
        assert!(queue.is_empty());
    }
}
