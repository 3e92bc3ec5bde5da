//! Device Registry
//!
//! In-memory set of every unit the gateway has heard from, with the time it
//! was first seen. Entries are never evicted: a unit that goes silent stays
//! listed for the lifetime of the process.

use std::collections::BTreeMap;
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::info;

use crate::topic::UnitId;

/// Thread-safe registry of discovered units
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    units: RwLock<BTreeMap<UnitId, SystemTime>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-seeded with the given units (e.g. the simulated
    /// `INT_WEB` intersection)
    pub fn with_bootstrap<I>(units: I) -> Self
    where
        I: IntoIterator<Item = UnitId>,
    {
        let now = SystemTime::now();
        Self {
            units: RwLock::new(units.into_iter().map(|u| (u, now)).collect()),
        }
    }

    /// Record a sighting of `unit_id`.
    ///
    /// Returns true exactly once per unit: on the call that inserted it.
    pub fn mark_seen(&self, unit_id: &UnitId) -> bool {
        // Fast path: already known
        if self.units.read().contains_key(unit_id) {
            return false;
        }

        let mut units = self.units.write();
        if units.contains_key(unit_id) {
            return false;
        }
        units.insert(unit_id.clone(), SystemTime::now());
        drop(units);

        info!("New unit discovered: {}", unit_id);
        true
    }

    /// Sorted copy of all known unit ids
    pub fn snapshot(&self) -> Vec<UnitId> {
        self.units.read().keys().cloned().collect()
    }

    pub fn contains(&self, unit_id: &UnitId) -> bool {
        self.units.read().contains_key(unit_id)
    }

    /// When a unit was first seen
    pub fn first_seen(&self, unit_id: &UnitId) -> Option<SystemTime> {
        self.units.read().get(unit_id).copied()
    }

    pub fn len(&self) -> usize {
        self.units.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn unit(id: &str) -> UnitId {
        UnitId::new(id).unwrap()
    }

    #[test]
    fn test_mark_seen_once() {
        let registry = DeviceRegistry::new();
        assert!(registry.mark_seen(&unit("INT_8A2F")));
        assert!(!registry.mark_seen(&unit("INT_8A2F")));
        assert!(!registry.mark_seen(&unit("INT_8A2F")));
        assert!(registry.mark_seen(&unit("INT_ESP32")));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_snapshot_sorted() {
        let registry = DeviceRegistry::new();
        for id in ["INT_C", "INT_A", "INT_B"] {
            registry.mark_seen(&unit(id));
        }
        let snapshot: Vec<String> = registry.snapshot().iter().map(|u| u.to_string()).collect();
        assert_eq!(snapshot, vec!["INT_A", "INT_B", "INT_C"]);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let registry = DeviceRegistry::new();
        registry.mark_seen(&unit("INT_A"));
        let snapshot = registry.snapshot();
        registry.mark_seen(&unit("INT_B"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_bootstrap_units() {
        let registry = DeviceRegistry::with_bootstrap([unit("INT_WEB")]);
        assert!(registry.contains(&unit("INT_WEB")));
        assert!(registry.first_seen(&unit("INT_WEB")).is_some());
        assert!(!registry.mark_seen(&unit("INT_WEB")));
        assert!(registry.first_seen(&unit("INT_X")).is_none());
    }

    #[test]
    fn test_mark_seen_concurrent() {
        let registry = Arc::new(DeviceRegistry::new());
        let new_count = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let new_count = new_count.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        if registry.mark_seen(&unit(&format!("INT_{}", i))) {
                            new_count.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(new_count.load(Ordering::SeqCst), 50);
        assert_eq!(registry.len(), 50);
    }
}
