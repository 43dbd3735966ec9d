use crate::types::{u256_to_u128_saturating, PayloadReady};
use ethereum_consensus::primitives::{Hash32, Slot};
use ethereum_consensus::ssz::prelude::U256;
use parking_lot::RwLock;
use std::collections::VecDeque;

pub const BIDS_WON_CAPACITY: usize = 1000;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BidWonEntry {
    #[serde(with = "crate::serde::as_str")]
    pub slot: Slot,
    pub block_hash: Hash32,
    pub num_transactions: usize,
    pub num_blobs: usize,
    #[serde(with = "crate::serde::as_str")]
    pub value_wei: U256,
    pub value_eth: f64,
    #[serde(with = "crate::serde::as_str")]
    pub timestamp_ms: u64,
}

impl BidWonEntry {
    pub fn from_payload(entry: &PayloadReady, timestamp_ms: u64) -> Self {
        let value_eth = u256_to_u128_saturating(&entry.block_value) as f64 / 1e18;
        Self {
            slot: entry.slot,
            block_hash: entry.block_hash.clone(),
            num_transactions: entry.transaction_count(),
            num_blobs: entry.blob_count(),
            value_wei: entry.block_value,
            value_eth,
            timestamp_ms,
        }
    }
}

/// Ring buffer of unblinded-and-published bids, newest first. Bounded at
/// `BIDS_WON_CAPACITY`; the oldest entry falls off.
pub struct BidsWonStore {
    capacity: usize,
    entries: RwLock<VecDeque<BidWonEntry>>,
}

impl Default for BidsWonStore {
    fn default() -> Self {
        Self::new(BIDS_WON_CAPACITY)
    }
}

impl BidsWonStore {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), entries: RwLock::new(VecDeque::new()) }
    }

    pub fn record(&self, entry: BidWonEntry) {
        let mut entries = self.entries.write();
        entries.push_front(entry);
        while entries.len() > self.capacity {
            entries.pop_back();
        }
    }

    pub fn get_page(&self, offset: usize, count: usize) -> Vec<BidWonEntry> {
        let entries = self.entries.read();
        entries.iter().skip(offset).take(count).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
