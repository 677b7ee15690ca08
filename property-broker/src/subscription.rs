//! Subscription table: (listener, property) → sample rate
//!
//! Subscriptions live in per-property buckets of a sharded concurrent map, so
//! mutations of one property never wait on another property's traffic. A
//! reverse index (listener → properties) lets a disconnect remove every entry
//! of a listener without scanning all buckets.
//!
//! Lock order is always bucket first, then reverse index. Snapshots are copied
//! out of the bucket and iterated without holding any lock.

use std::collections::{HashMap, HashSet};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::listener::ListenerHandle;
use crate::types::{ListenerId, PropertyId};

/// One subscription entry as seen by the dispatcher
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub listener: ListenerHandle,
    pub sample_rate: f32,
}

/// Outcome of removing a single subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// There was nothing to remove
    NotSubscribed,
    /// The entry was removed; `last` is true when the property has no
    /// subscribers left
    Removed { last: bool },
}

/// Outcome of removing every subscription of a listener
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerRemoval {
    /// Properties the listener was subscribed to
    pub properties: Vec<PropertyId>,
    /// Subset of `properties` left without any subscriber
    pub emptied: Vec<PropertyId>,
}

/// Point-in-time copy of a property's subscribers.
///
/// Subscriptions added after the snapshot was taken are not part of it.
/// Iterating does not consume the snapshot, so it can be walked repeatedly.
#[derive(Debug, Clone, Default)]
pub struct ListenerSnapshot {
    entries: Vec<Subscriber>,
}

impl ListenerSnapshot {
    pub fn iter(&self) -> std::slice::Iter<'_, Subscriber> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a ListenerSnapshot {
    type Item = &'a Subscriber;
    type IntoIter = std::slice::Iter<'a, Subscriber>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Thread-safe table of all subscriptions
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    buckets: DashMap<PropertyId, HashMap<ListenerId, Subscriber>>,
    by_listener: DashMap<ListenerId, HashSet<PropertyId>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the subscription of `listener` to `property_id`.
    ///
    /// Returns the replaced rate when the pair was already subscribed.
    pub fn subscribe(
        &self,
        listener: ListenerHandle,
        property_id: PropertyId,
        sample_rate: f32,
    ) -> Option<f32> {
        let listener_id = listener.id();
        let mut bucket = self.buckets.entry(property_id).or_default();

        let previous = bucket.insert(
            listener_id,
            Subscriber {
                listener,
                sample_rate,
            },
        );
        self.by_listener
            .entry(listener_id)
            .or_default()
            .insert(property_id);

        match &previous {
            Some(old) => tracing::debug!(
                "{} re-subscribed to {}: {} Hz -> {} Hz",
                listener_id,
                property_id,
                old.sample_rate,
                sample_rate
            ),
            None => tracing::debug!(
                "{} subscribed to {} at {} Hz",
                listener_id,
                property_id,
                sample_rate
            ),
        }

        previous.map(|old| old.sample_rate)
    }

    /// Remove the subscription if present; a no-op otherwise
    pub fn unsubscribe(&self, listener_id: ListenerId, property_id: PropertyId) -> Removal {
        let removal = {
            let Some(mut bucket) = self.buckets.get_mut(&property_id) else {
                return Removal::NotSubscribed;
            };

            if bucket.remove(&listener_id).is_none() {
                return Removal::NotSubscribed;
            }
            self.forget(listener_id, property_id);

            Removal::Removed {
                last: bucket.is_empty(),
            }
        };

        if removal == (Removal::Removed { last: true }) {
            self.buckets
                .remove_if(&property_id, |_, bucket| bucket.is_empty());
        }

        tracing::debug!("{} unsubscribed from {}", listener_id, property_id);
        removal
    }

    /// Snapshot of the current subscribers of `property_id`
    pub fn listeners_for(&self, property_id: PropertyId) -> ListenerSnapshot {
        let entries = self
            .buckets
            .get(&property_id)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default();
        ListenerSnapshot { entries }
    }

    /// Remove every subscription held by `listener_id`.
    ///
    /// Each property is cleared from its bucket and from the reverse index
    /// under the bucket lock, so a concurrent subscribe either lands before
    /// and is removed with the rest, or lands after and stays whole.
    pub fn remove_listener(&self, listener_id: ListenerId) -> ListenerRemoval {
        let properties: Vec<PropertyId> = self
            .by_listener
            .get(&listener_id)
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default();

        let mut removal = ListenerRemoval::default();
        for property_id in properties {
            match self.buckets.entry(property_id) {
                Entry::Occupied(mut bucket) => {
                    self.forget(listener_id, property_id);
                    if bucket.get_mut().remove(&listener_id).is_none() {
                        continue;
                    }
                    if bucket.get().is_empty() {
                        bucket.remove();
                        removal.emptied.push(property_id);
                    }
                    removal.properties.push(property_id);
                }
                Entry::Vacant(_) => self.forget(listener_id, property_id),
            }
        }

        removal.properties.sort();
        removal.emptied.sort();
        tracing::debug!(
            "Removed {} from {} properties",
            listener_id,
            removal.properties.len()
        );
        removal
    }

    /// Drop `property_id` from the reverse index; the caller holds its bucket
    fn forget(&self, listener_id: ListenerId, property_id: PropertyId) {
        let listener_done = match self.by_listener.get_mut(&listener_id) {
            Some(mut properties) => {
                properties.remove(&property_id);
                properties.is_empty()
            }
            None => false,
        };
        if listener_done {
            self.by_listener
                .remove_if(&listener_id, |_, properties| properties.is_empty());
        }
    }

    /// The rate `listener_id` is subscribed to `property_id` at, if any
    pub fn rate_of(&self, listener_id: ListenerId, property_id: PropertyId) -> Option<f32> {
        self.buckets
            .get(&property_id)
            .and_then(|bucket| bucket.get(&listener_id).map(|s| s.sample_rate))
    }

    /// Highest rate any listener requested for `property_id`
    pub fn max_rate(&self, property_id: PropertyId) -> Option<f32> {
        self.buckets.get(&property_id).and_then(|bucket| {
            bucket
                .values()
                .map(|s| s.sample_rate)
                .reduce(f32::max)
        })
    }

    /// Properties `listener_id` is subscribed to, ascending
    pub fn properties_of(&self, listener_id: ListenerId) -> Vec<PropertyId> {
        let mut properties: Vec<PropertyId> = self
            .by_listener
            .get(&listener_id)
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default();
        properties.sort();
        properties
    }

    pub fn listener_count(&self, property_id: PropertyId) -> usize {
        self.buckets
            .get(&property_id)
            .map(|bucket| bucket.len())
            .unwrap_or(0)
    }

    /// Total number of (listener, property) subscriptions
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ChannelListener;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn handle(id: u64) -> ListenerHandle {
        let (listener, _events) = ChannelListener::new();
        ListenerHandle::new(ListenerId::new(id), listener)
    }

    const SPEED: PropertyId = PropertyId::new(42);
    const DOOR: PropertyId = PropertyId::new(7);

    #[test]
    fn test_subscribe_and_snapshot() {
        let table = SubscriptionTable::new();
        table.subscribe(handle(1), SPEED, 5.0);
        table.subscribe(handle(2), SPEED, 10.0);

        let snapshot = table.listeners_for(SPEED);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(table.max_rate(SPEED), Some(10.0));
        assert!(table.listeners_for(DOOR).is_empty());
    }

    #[test]
    fn test_resubscribe_replaces_rate() {
        let table = SubscriptionTable::new();
        assert_eq!(table.subscribe(handle(1), SPEED, 5.0), None);
        assert_eq!(table.subscribe(handle(1), SPEED, 2.0), Some(5.0));

        assert_eq!(table.len(), 1);
        assert_eq!(table.rate_of(ListenerId::new(1), SPEED), Some(2.0));
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let table = SubscriptionTable::new();
        table.subscribe(handle(1), SPEED, 5.0);
        table.subscribe(handle(2), SPEED, 5.0);

        assert_eq!(
            table.unsubscribe(ListenerId::new(1), SPEED),
            Removal::Removed { last: false }
        );
        assert_eq!(table.unsubscribe(ListenerId::new(1), SPEED), Removal::NotSubscribed);
        assert_eq!(
            table.unsubscribe(ListenerId::new(2), SPEED),
            Removal::Removed { last: true }
        );
        assert_eq!(table.unsubscribe(ListenerId::new(3), DOOR), Removal::NotSubscribed);
        assert!(table.is_empty());
        assert!(table.properties_of(ListenerId::new(1)).is_empty());
    }

    #[test]
    fn test_snapshot_ignores_later_subscriptions() {
        let table = SubscriptionTable::new();
        table.subscribe(handle(1), SPEED, 5.0);

        let snapshot = table.listeners_for(SPEED);
        table.subscribe(handle(2), SPEED, 5.0);

        assert_eq!(snapshot.len(), 1);
        // Walking the snapshot twice yields the same entries
        let first: Vec<ListenerId> = snapshot.iter().map(|s| s.listener.id()).collect();
        let second: Vec<ListenerId> = (&snapshot).into_iter().map(|s| s.listener.id()).collect();
        assert_eq!(first, second);
        assert_eq!(table.listeners_for(SPEED).len(), 2);
    }

    #[test]
    fn test_remove_listener() {
        let table = SubscriptionTable::new();
        table.subscribe(handle(1), SPEED, 5.0);
        table.subscribe(handle(1), DOOR, 0.0);
        table.subscribe(handle(2), SPEED, 1.0);

        let removal = table.remove_listener(ListenerId::new(1));
        assert_eq!(removal.properties, vec![DOOR, SPEED]);
        assert_eq!(removal.emptied, vec![DOOR]);

        assert_eq!(table.len(), 1);
        assert!(table.properties_of(ListenerId::new(1)).is_empty());
        assert_eq!(table.remove_listener(ListenerId::new(1)), ListenerRemoval::default());
    }

    #[test]
    fn test_concurrent_subscribe_unsubscribe_ends_in_defined_state() {
        for _ in 0..50 {
            let table = Arc::new(SubscriptionTable::new());
            let listener = handle(1);

            let subscriber = {
                let table = Arc::clone(&table);
                let listener = listener.clone();
                std::thread::spawn(move || {
                    table.subscribe(listener, SPEED, 10.0);
                })
            };
            let unsubscriber = {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    table.unsubscribe(ListenerId::new(1), SPEED);
                })
            };
            subscriber.join().unwrap();
            unsubscriber.join().unwrap();

            match table.rate_of(ListenerId::new(1), SPEED) {
                Some(rate) => {
                    assert_eq!(rate, 10.0);
                    assert_eq!(table.properties_of(ListenerId::new(1)), vec![SPEED]);
                    assert_eq!(table.len(), 1);
                }
                None => {
                    assert!(table.properties_of(ListenerId::new(1)).is_empty());
                    assert!(table.is_empty());
                }
            }
        }
    }

    #[test]
    fn test_remove_listener_racing_resubscribe_leaves_no_orphans() {
        let properties: Vec<PropertyId> = (1..=8).map(PropertyId::new).collect();

        for _ in 0..50 {
            let table = Arc::new(SubscriptionTable::new());
            let listener = handle(1);
            for property_id in &properties {
                table.subscribe(listener.clone(), *property_id, 1.0);
            }

            let subscriber = {
                let table = Arc::clone(&table);
                let properties = properties.clone();
                std::thread::spawn(move || {
                    for property_id in properties.iter().rev() {
                        table.subscribe(listener.clone(), *property_id, 2.0);
                    }
                })
            };
            let remover = {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    table.remove_listener(ListenerId::new(1));
                })
            };
            subscriber.join().unwrap();
            remover.join().unwrap();

            // Reverse index and buckets agree, whatever the interleaving
            let indexed = table.properties_of(ListenerId::new(1));
            let subscribed: Vec<PropertyId> = properties
                .iter()
                .copied()
                .filter(|p| table.rate_of(ListenerId::new(1), *p).is_some())
                .collect();
            assert_eq!(indexed, subscribed);
            assert_eq!(table.len(), subscribed.len());
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Subscribe(u64, i32, f32),
        Unsubscribe(u64, i32),
        RemoveListener(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u64..4, 1i32..4, 0.0f32..20.0).prop_map(|(l, p, r)| Op::Subscribe(l, p, r)),
            (1u64..4, 1i32..4).prop_map(|(l, p)| Op::Unsubscribe(l, p)),
            (1u64..4).prop_map(Op::RemoveListener),
        ]
    }

    proptest! {
        /// The table matches a plain map model after any operation sequence,
        /// and the reverse index never holds orphaned entries.
        #[test]
        fn prop_table_matches_model(ops in proptest::collection::vec(op_strategy(), 0..60)) {
            let table = SubscriptionTable::new();
            let mut model: HashMap<(u64, i32), f32> = HashMap::new();

            for op in ops {
                match op {
                    Op::Subscribe(l, p, r) => {
                        table.subscribe(handle(l), PropertyId::new(p), r);
                        model.insert((l, p), r);
                    }
                    Op::Unsubscribe(l, p) => {
                        table.unsubscribe(ListenerId::new(l), PropertyId::new(p));
                        model.remove(&(l, p));
                    }
                    Op::RemoveListener(l) => {
                        table.remove_listener(ListenerId::new(l));
                        model.retain(|(ml, _), _| *ml != l);
                    }
                }
            }

            prop_assert_eq!(table.len(), model.len());
            prop_assert!(table.len() <= 3 * 3);
            for l in 1u64..4 {
                let mut expected: Vec<PropertyId> = model
                    .keys()
                    .filter(|(ml, _)| *ml == l)
                    .map(|(_, p)| PropertyId::new(*p))
                    .collect();
                expected.sort();
                prop_assert_eq!(table.properties_of(ListenerId::new(l)), expected);
                for p in 1i32..4 {
                    prop_assert_eq!(
                        table.rate_of(ListenerId::new(l), PropertyId::new(p)),
                        model.get(&(l, p)).copied()
                    );
                }
            }
        }
    }
}
