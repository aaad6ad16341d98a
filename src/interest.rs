//! Interest tracking: which consumer wants which metrics.
//!
//! A consumer's interest set is replaced wholesale on every call; there is
//! no incremental add/remove. Entries are sharded in a `DashMap`, so a
//! lookup never blocks on another consumer updating its own set.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::metric::MetricDescriptor;

/// Identity of a registered consumer (listener or sink).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerId(Uuid);

impl ConsumerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConsumerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Default)]
pub struct InterestTracker {
    interest: DashMap<ConsumerId, HashSet<MetricDescriptor>>,
}

impl InterestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `consumer`'s interest set. An empty set removes the entry.
    pub fn set_interest<I>(&self, consumer: ConsumerId, metrics: I)
    where
        I: IntoIterator<Item = MetricDescriptor>,
    {
        let set: HashSet<MetricDescriptor> = metrics.into_iter().collect();
        if set.is_empty() {
            self.interest.remove(&consumer);
        } else {
            self.interest.insert(consumer, set);
        }
    }

    pub fn remove(&self, consumer: ConsumerId) {
        self.interest.remove(&consumer);
    }

    /// True if any consumer currently wants `metric`.
    pub fn has_interest(&self, metric: &MetricDescriptor) -> bool {
        self.interest.iter().any(|entry| entry.value().contains(metric))
    }

    pub fn is_interested(&self, consumer: ConsumerId, metric: &MetricDescriptor) -> bool {
        self.interest
            .get(&consumer)
            .map(|set| set.contains(metric))
            .unwrap_or(false)
    }

    /// The current interest set of one consumer.
    pub fn interest_of(&self, consumer: ConsumerId) -> HashSet<MetricDescriptor> {
        self.interest
            .get(&consumer)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    pub fn consumer_count(&self) -> usize {
        self.interest.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{MetricSpec, MetricType, SourceId, SourceOrigin, SourceRef};
    use std::sync::Arc;
    use std::thread;

    fn metric(name: &str) -> MetricDescriptor {
        MetricDescriptor::bind(
            MetricSpec::push(name, MetricType::DOUBLE),
            SourceRef {
                id: SourceId(1),
                name: Arc::from("Bench"),
                origin: SourceOrigin::Builtin,
            },
        )
    }

    #[test]
    fn test_set_interest_replaces() {
        let tracker = InterestTracker::new();
        let consumer = ConsumerId::new();
        tracker.set_interest(consumer, [metric("A"), metric("B")]);
        tracker.set_interest(consumer, [metric("C")]);

        assert!(!tracker.has_interest(&metric("A")));
        assert!(tracker.has_interest(&metric("C")));
        assert_eq!(tracker.interest_of(consumer).len(), 1);
    }

    #[test]
    fn test_empty_interest_removes_entry() {
        let tracker = InterestTracker::new();
        let only = ConsumerId::new();
        let other = ConsumerId::new();
        tracker.set_interest(only, [metric("A"), metric("Shared")]);
        tracker.set_interest(other, [metric("Shared")]);

        tracker.set_interest(only, []);
        assert_eq!(tracker.consumer_count(), 1);
        assert!(!tracker.has_interest(&metric("A")));
        assert!(tracker.has_interest(&metric("Shared")));
    }

    #[test]
    fn test_union_semantics() {
        let tracker = InterestTracker::new();
        let a = ConsumerId::new();
        let b = ConsumerId::new();
        tracker.set_interest(a, [metric("X")]);
        tracker.set_interest(b, [metric("Y")]);
        assert!(tracker.is_interested(a, &metric("X")));
        assert!(!tracker.is_interested(a, &metric("Y")));
        tracker.remove(b);
        assert!(!tracker.has_interest(&metric("Y")));
    }

    #[test]
    fn test_concurrent_updates() {
        let tracker = Arc::new(InterestTracker::new());
        let stable = ConsumerId::new();
        tracker.set_interest(stable, [metric("Stable")]);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    let me = ConsumerId::new();
                    for n in 0..200 {
                        tracker.set_interest(me, [metric(&format!("m-{}-{}", i, n))]);
                        assert!(tracker.has_interest(&metric("Stable")));
                    }
                    tracker.set_interest(me, []);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tracker.consumer_count(), 1);
    }
}
