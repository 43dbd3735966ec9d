use ethereum_consensus::primitives::{Hash32, Slot};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedBid {
    pub builder_index: u64,
    pub value: u64,
    pub block_hash: Hash32,
}

#[derive(Debug, Clone, Default)]
pub struct SlotBids {
    pub by_builder: HashMap<u64, TrackedBid>,
    pub highest: Option<TrackedBid>,
    pub ours: Option<TrackedBid>,
    pub winning: Option<TrackedBid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WonBid {
    pub slot: Slot,
    pub value: u64,
    pub confirmed: bool,
}

#[derive(Default)]
struct Inner {
    slot_bids: BTreeMap<Slot, SlotBids>,
    won: Vec<WonBid>,
}

/// Aggregates bids observed per slot, ours and others', and accumulates the
/// payments owed for slots our bid won.
#[derive(Default)]
pub struct BidTracker {
    inner: Mutex<Inner>,
}

impl BidTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_bid(&self, slot: Slot, bid: TrackedBid, is_ours: bool) {
        let mut inner = self.inner.lock();
        let bids = inner.slot_bids.entry(slot).or_default();
        if bids.highest.as_ref().map(|highest| bid.value >= highest.value).unwrap_or(true) {
            bids.highest = Some(bid.clone());
        }
        if is_ours {
            bids.ours = Some(bid.clone());
        }
        bids.by_builder.insert(bid.builder_index, bid);
    }

    /// Records the bid selected by the proposer for `slot`. A win by our own
    /// builder index opens a pending payment until it is confirmed on chain.
    pub fn mark_winning(&self, slot: Slot, builder_index: u64) {
        let mut inner = self.inner.lock();
        let bids = inner.slot_bids.entry(slot).or_default();
        let winning = bids.by_builder.get(&builder_index).cloned();
        bids.winning = winning.clone();
        let is_ours = bids
            .ours
            .as_ref()
            .map(|ours| ours.builder_index == builder_index)
            .unwrap_or(false);
        if is_ours {
            if let Some(winning) = winning {
                if !inner.won.iter().any(|won| won.slot == slot) {
                    info!(slot, value = winning.value, "our bid won");
                    inner.won.push(WonBid { slot, value: winning.value, confirmed: false });
                }
            }
        }
    }

    pub fn confirm_won_bid(&self, slot: Slot) {
        let mut inner = self.inner.lock();
        for won in inner.won.iter_mut() {
            if won.slot == slot {
                won.confirmed = true;
            }
        }
    }

    /// Sum of unconfirmed won-bid values, in gwei.
    pub fn total_pending_payments(&self) -> u64 {
        let inner = self.inner.lock();
        inner.won.iter().filter(|won| !won.confirmed).map(|won| won.value).sum()
    }

    pub fn bids_for_slot(&self, slot: Slot) -> Option<SlotBids> {
        self.inner.lock().slot_bids.get(&slot).cloned()
    }

    pub fn won_bids(&self) -> Vec<WonBid> {
        self.inner.lock().won.clone()
    }

    pub fn cleanup(&self, older_than: Slot) {
        self.inner.lock().slot_bids.retain(|slot, _| *slot >= older_than);
    }
}
