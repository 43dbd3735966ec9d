use crate::types::PayloadReady;
use ethereum_consensus::primitives::{Hash32, Slot};
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};

pub const DEFAULT_MAX_SLOTS: usize = 1000;

/// Slot-keyed store of recently built payloads. Written by the payload
/// builder only; read by the scheduler and the builder API handlers.
pub struct PayloadCache {
    max_slots: usize,
    entries: RwLock<BTreeMap<Slot, Arc<PayloadReady>>>,
}

impl Default for PayloadCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SLOTS)
    }
}

impl PayloadCache {
    pub fn new(max_slots: usize) -> Self {
        Self { max_slots: max_slots.max(1), entries: RwLock::new(BTreeMap::new()) }
    }

    /// Stores `entry`, replacing any payload already held for its slot. When
    /// the cache is over capacity the numerically smallest slot is evicted.
    /// A block hash identifies at most one live entry.
    pub fn store(&self, entry: PayloadReady) -> Arc<PayloadReady> {
        let entry = Arc::new(entry);
        let mut entries = self.entries.write();
        entries.retain(|slot, existing| {
            *slot == entry.slot || existing.block_hash != entry.block_hash
        });
        entries.insert(entry.slot, entry.clone());
        while entries.len() > self.max_slots {
            let oldest = *entries.keys().next().expect("cache is non-empty");
            entries.remove(&oldest);
        }
        entry
    }

    pub fn get_by_slot(&self, slot: Slot) -> Option<Arc<PayloadReady>> {
        self.entries.read().get(&slot).cloned()
    }

    // O(len) scan; the cache is bounded at ~1000 entries
    pub fn get_by_block_hash(&self, block_hash: &Hash32) -> Option<Arc<PayloadReady>> {
        let entries = self.entries.read();
        entries.values().find(|entry| &entry.block_hash == block_hash).cloned()
    }

    pub fn delete(&self, slot: Slot) -> Option<Arc<PayloadReady>> {
        self.entries.write().remove(&slot)
    }

    pub fn cleanup(&self, older_than: Slot) {
        self.entries.write().retain(|slot, _| *slot >= older_than);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
