//! Dependency records.
//!
//! A dependency is a subscriber set attached to one reactive field or to
//! one container's shape channel. Watchers and dependencies form a
//! many-to-many graph; both sides are represented as integer ids and
//! resolved through runtime-owned arenas, so tearing a watcher down is a
//! bounded lookup-and-remove rather than a walk of live object cycles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use smallvec::SmallVec;

use super::watcher::WatcherId;

/// Unique identifier for a dependency, minted in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepId(u64);

impl DepId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

pub(crate) type SubscriberList = SmallVec<[WatcherId; 4]>;

struct DepRecord {
    /// Subscribers in subscription order. A watcher appears at most once.
    subs: SubscriberList,
}

/// Id-indexed storage for every dependency of one runtime.
pub(crate) struct DepArena {
    records: RwLock<HashMap<DepId, DepRecord>>,
    next_id: AtomicU64,
}

impl DepArena {
    pub(crate) fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn create(&self) -> DepId {
        let id = DepId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.records
            .write()
            .insert(id, DepRecord { subs: SubscriberList::new() });
        id
    }

    pub(crate) fn add_sub(&self, dep: DepId, watcher: WatcherId) {
        let mut records = self.records.write();
        if let Some(record) = records.get_mut(&dep) {
            if !record.subs.contains(&watcher) {
                record.subs.push(watcher);
            }
        }
    }

    pub(crate) fn remove_sub(&self, dep: DepId, watcher: WatcherId) {
        let mut records = self.records.write();
        if let Some(record) = records.get_mut(&dep) {
            record.subs.retain(|sub| *sub != watcher);
        }
    }

    /// Snapshot of the subscriber list, so notification never iterates the
    /// live list while watcher runs mutate it.
    pub(crate) fn subscribers(&self, dep: DepId) -> SubscriberList {
        let records = self.records.read();
        records
            .get(&dep)
            .map(|record| record.subs.clone())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self, dep: DepId) -> usize {
        self.records
            .read()
            .get(&dep)
            .map(|record| record.subs.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watcher_id(raw: u64) -> WatcherId {
        WatcherId(raw)
    }

    #[test]
    fn dep_ids_are_unique_and_ordered() {
        let arena = DepArena::new();
        let a = arena.create();
        let b = arena.create();
        let c = arena.create();
        assert!(a < b && b < c);
    }

    #[test]
    fn add_sub_is_idempotent() {
        let arena = DepArena::new();
        let dep = arena.create();
        let w = watcher_id(1);

        arena.add_sub(dep, w);
        arena.add_sub(dep, w);
        assert_eq!(arena.subscriber_count(dep), 1);
    }

    #[test]
    fn remove_sub_tolerates_missing_entries() {
        let arena = DepArena::new();
        let dep = arena.create();
        let w = watcher_id(1);

        arena.remove_sub(dep, w);
        assert_eq!(arena.subscriber_count(dep), 0);

        arena.add_sub(dep, w);
        arena.remove_sub(dep, w);
        assert_eq!(arena.subscriber_count(dep), 0);
    }

    #[test]
    fn subscribers_preserve_subscription_order() {
        let arena = DepArena::new();
        let dep = arena.create();
        arena.add_sub(dep, watcher_id(3));
        arena.add_sub(dep, watcher_id(1));
        arena.add_sub(dep, watcher_id(2));

        let subs = arena.subscribers(dep);
        assert_eq!(subs.to_vec(), vec![watcher_id(3), watcher_id(1), watcher_id(2)]);
    }
}
