//! Bounded in-memory history of snapshots, oldest first.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::metrics::Snapshot;

pub struct Archive {
    cap: usize,
    items: VecDeque<Arc<Snapshot>>,
}

impl Archive {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            items: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn newest(&self) -> Option<&Arc<Snapshot>> {
        self.items.back()
    }

    /// Append a snapshot; timestamps not newer than the last entry are dropped.
    pub fn push(&mut self, snap: Arc<Snapshot>) -> bool {
        if self
            .items
            .back()
            .is_some_and(|last| last.timestamp >= snap.timestamp)
        {
            return false;
        }
        if self.items.len() == self.cap {
            self.items.pop_front();
        }
        self.items.push_back(snap);
        true
    }

    // first index with timestamp >= ts
    fn lower_bound(&self, ts: i64) -> usize {
        self.items.partition_point(|s| s.timestamp < ts)
    }

    /// Snapshots at or after `ts`, at most `limit` of them.
    pub fn range_from(&self, ts: i64, limit: Option<usize>) -> Vec<Arc<Snapshot>> {
        let from = self.lower_bound(ts);
        let take = limit.unwrap_or(usize::MAX);
        self.items.iter().skip(from).take(take).cloned().collect()
    }

    /// The newest snapshot strictly before `ts`; rates for the first served tick derive from it.
    pub fn before(&self, ts: i64) -> Option<Arc<Snapshot>> {
        let idx = self.lower_bound(ts);
        idx.checked_sub(1).and_then(|i| self.items.get(i)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(cap: usize, stamps: &[i64]) -> Archive {
        let mut a = Archive::new(cap);
        for &t in stamps {
            a.push(Arc::new(Snapshot::new(t)));
        }
        a
    }

    fn stamps(v: &[Arc<Snapshot>]) -> Vec<i64> {
        v.iter().map(|s| s.timestamp).collect()
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let a = filled(3, &[1, 2, 3, 4]);
        assert_eq!(a.len(), 3);
        assert_eq!(stamps(&a.range_from(0, None)), vec![2, 3, 4]);
    }

    #[test]
    fn rejects_stale_timestamps() {
        let mut a = filled(10, &[10, 20]);
        assert!(!a.push(Arc::new(Snapshot::new(20))));
        assert!(!a.push(Arc::new(Snapshot::new(15))));
        assert_eq!(a.newest().map(|s| s.timestamp), Some(20));
    }

    #[test]
    fn range_and_predecessor() {
        let a = filled(10, &[0, 3000, 6000, 9000]);
        assert_eq!(stamps(&a.range_from(3000, Some(2))), vec![3000, 6000]);
        assert_eq!(stamps(&a.range_from(4000, None)), vec![6000, 9000]);
        assert_eq!(a.before(6000).map(|s| s.timestamp), Some(3000));
        assert!(a.before(0).is_none());
        assert!(a.range_from(10_000, None).is_empty());
    }
}
