use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::snapshot::Snapshot;

/// Keyed, write-once snapshot storage.
pub trait SnapshotRepository: Send + Sync {
    /// Stores `snapshot` unless one already exists for its proposal.
    /// Returns whether this call created it.
    fn create_if_absent(&self, snapshot: Snapshot) -> bool;

    fn get(&self, proposal_id: u64) -> Option<Arc<Snapshot>>;

    fn proposal_ids(&self) -> Vec<u64>;
}

#[derive(Debug, Default)]
pub struct MemorySnapshots {
    snapshots: RwLock<HashMap<u64, Arc<Snapshot>>>,
}

impl MemorySnapshots {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotRepository for MemorySnapshots {
    fn create_if_absent(&self, snapshot: Snapshot) -> bool {
        let mut snapshots = self
            .snapshots
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match snapshots.entry(snapshot.proposal_id) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(Arc::new(snapshot));
                true
            }
        }
    }

    fn get(&self, proposal_id: u64) -> Option<Arc<Snapshot>> {
        self.snapshots
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&proposal_id)
            .cloned()
    }

    fn proposal_ids(&self) -> Vec<u64> {
        let mut ids: Vec<_> = self
            .snapshots
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Next unused proposal id: one past the highest stored, never below `floor`.
pub fn next_proposal_id(store: &dyn SnapshotRepository, floor: u64) -> u64 {
    store
        .proposal_ids()
        .last()
        .map_or(floor, |highest| highest.saturating_add(1).max(floor))
}
